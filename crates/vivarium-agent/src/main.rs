//! Agent entry point: ledger, runtime, loopback server, think-act loop.

use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vivarium_agent::{
    brain::Brain,
    gateway::ModelGateway,
    guard::TrafficGuard,
    observer_client::ObserverClient,
    runtime::Runtime,
    server::{router, ServerState},
};
use vivarium_core::{AgentConfig, SecretScanner};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match AgentConfig::from_env() {
        Ok(config) => Arc::new(config),
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    let runtime = match Runtime::new(config.clone()) {
        Ok(runtime) => runtime,
        Err(err) => {
            // Ledger problems are fatal by contract; the supervisor restarts
            // us with the persistent credits directory intact.
            eprintln!("ledger error: {err}");
            std::process::exit(1);
        }
    };

    let scanner = Arc::new(SecretScanner::new());
    let guard = Arc::new(TrafficGuard::new(
        scanner,
        config.vault_file(),
        ModelGateway::timeout(),
    ));
    let gateway = ModelGateway::new(&config.model_gateway_url, &config.model_gateway_key, guard.clone());
    let observer = ObserverClient::new(&config.observer_url, &config.internal_api_key);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let brain = Brain::new(runtime.clone(), guard, gateway, observer);
    let brain_handle = tokio::spawn(brain.run(shutdown_rx));

    let app = router(ServerState {
        runtime: runtime.clone(),
    });
    let listener = match tokio::net::TcpListener::bind(&config.bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("cannot bind {}: {err}", config.bind_addr);
            std::process::exit(1);
        }
    };
    tracing::info!(target: "vivarium::agent", addr = %config.bind_addr, "agent listening");

    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!(target: "vivarium::agent", "shutdown requested");
    });

    if let Err(err) = serve.await {
        tracing::error!(target: "vivarium::agent", error = %err, "server error");
    }
    // In-flight charges finish before the loop is told to stop.
    let _ = shutdown_tx.send(true);
    let _ = brain_handle.await;
}
