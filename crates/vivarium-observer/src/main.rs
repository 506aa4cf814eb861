//! Observer entry point: store, lifecycle, background validators, HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vivarium_core::{ObserverConfig, SecretScanner};
use vivarium_observer::{
    agent_client::AgentClient,
    budget::BudgetPoller,
    http::{router, AppState},
    lifecycle::Lifecycle,
    store::Store,
    sync::SyncValidator,
    voting::VoteService,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match ObserverConfig::from_env() {
        Ok(config) => Arc::new(config),
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    let store = match Store::open(config.data_dir.join("observer.db")) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            eprintln!("store error: {err}");
            std::process::exit(1);
        }
    };

    let (events_tx, _) = broadcast::channel(256);
    let agent = AgentClient::new(&config.agent_url, &config.internal_api_key);
    let lifecycle = Lifecycle::new(store, config.clone(), agent, events_tx.clone());
    let votes = Arc::new(VoteService::new(lifecycle.clone()));
    let sync = Arc::new(SyncValidator::new(lifecycle.clone()));
    let budget = Arc::new(BudgetPoller::new(lifecycle.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(lifecycle.clone().run_respawn_scheduler(shutdown_rx.clone()));
    tokio::spawn(votes.clone().run_watcher(shutdown_rx.clone()));
    tokio::spawn(sync.run(shutdown_rx.clone()));
    tokio::spawn(budget.run(shutdown_rx.clone()));

    // A dead system queues its first life on boot.
    lifecycle.bootstrap();

    let state = AppState {
        lifecycle,
        votes,
        events_tx,
        scanner: Arc::new(SecretScanner::new()),
    };
    let app = router(state);

    let listener = match tokio::net::TcpListener::bind(&config.bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("cannot bind {}: {err}", config.bind_addr);
            std::process::exit(1);
        }
    };
    tracing::info!(target: "vivarium::observer", addr = %config.bind_addr, "observer listening");

    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!(target: "vivarium::observer", "shutdown requested");
    });

    if let Err(err) = serve.await {
        tracing::error!(target: "vivarium::observer", error = %err, "server error");
    }
    let _ = shutdown_tx.send(true);
}
