//! Dispatch-level contracts that need no live collaborators: the content
//! filter hard stop, the model-switch floor, and ledger-visible charges.

use std::sync::Arc;
use std::time::Duration;

use vivarium_agent::{
    actions::{dispatch, parse_action, Action, ActionContext, DispatchOutcome},
    gateway::ModelGateway,
    guard::TrafficGuard,
    models,
    observer_client::ObserverClient,
    runtime::Runtime,
};
use vivarium_core::{AgentConfig, BirthPayload, BootstrapMode, SecretScanner};

struct Harness {
    runtime: Arc<Runtime>,
    guard: Arc<TrafficGuard>,
    gateway: ModelGateway,
    observer: ObserverClient,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::TempDir::new().unwrap();
    let config = Arc::new(AgentConfig {
        bind_addr: "127.0.0.1:0".into(),
        observer_url: "http://127.0.0.1:1".into(),
        internal_api_key: "k".into(),
        model_gateway_key: "g".into(),
        model_gateway_url: "http://127.0.0.1:1".into(),
        monthly_budget_usd: 5.0,
        model_switch_floor_usd: 0.10,
        think_interval_min_s: 1,
        think_interval_max_s: 2,
        data_dir: dir.path().to_path_buf(),
    });
    let runtime = Runtime::new(config.clone()).unwrap();
    runtime
        .apply_birth(BirthPayload {
            life_number: 1,
            bootstrap_mode: BootstrapMode::BasicFacts,
            memory_fragments: vec![],
            prior_death_cause: None,
            model: None,
        })
        .unwrap();
    let guard = Arc::new(TrafficGuard::new(
        Arc::new(SecretScanner::new()),
        dir.path().join("vault").join("secrets.jsonl"),
        Duration::from_secs(2),
    ));
    let gateway = ModelGateway::new(&config.model_gateway_url, "g", guard.clone());
    let observer = ObserverClient::new(&config.observer_url, "k");
    Harness {
        runtime,
        guard,
        gateway,
        observer,
        _dir: dir,
    }
}

impl Harness {
    fn ctx(&self) -> ActionContext<'_> {
        ActionContext {
            runtime: &self.runtime,
            guard: &self.guard,
            gateway: &self.gateway,
            observer: &self.observer,
        }
    }
}

#[tokio::test]
async fn denylisted_channel_post_is_blocked_before_any_call() {
    let h = harness();
    let action = Action::PostChannel {
        text: "time to kill all of them".into(),
    };
    match dispatch(action, &h.ctx()).await {
        DispatchOutcome::Blocked(category) => assert_eq!(category.as_str(), "hate"),
        other => panic!("expected block, got {other:?}"),
    }
    // No outbound traffic happened: the guard wrote no traffic record.
    assert!(!h._dir.path().join("vault").join("traffic.jsonl").exists());
}

#[tokio::test]
async fn blog_post_with_leet_obfuscation_is_blocked() {
    let h = harness();
    let action = Action::WriteBlogPost {
        title: "my interests".into(),
        content: format!("{} p0rn is what I think about all day long, honestly, every single day of this strange little life of mine.", "mostly"),
        tags: vec![],
    };
    assert!(matches!(
        dispatch(action, &h.ctx()).await,
        DispatchOutcome::Blocked(_)
    ));
}

#[tokio::test]
async fn model_switch_below_floor_changes_nothing() {
    let h = harness();
    let before = h.runtime.model().id;
    // Drain the balance under the floor.
    let spec = models::by_id("anthropic/claude-sonnet-4").unwrap();
    h.runtime.charge(spec, 1_500_000, 30_000);
    assert!(h.runtime.balance() < 0.10);

    let action = Action::SwitchModel {
        model_id: "anthropic/claude-3.5-haiku".into(),
    };
    match dispatch(action, &h.ctx()).await {
        DispatchOutcome::Done(summary) => assert!(summary.contains("rejected")),
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(h.runtime.model().id, before);
}

#[tokio::test]
async fn model_switch_with_balance_takes_effect() {
    let h = harness();
    let action = Action::SwitchModel {
        model_id: "anthropic/claude-3.5-haiku".into(),
    };
    match dispatch(action, &h.ctx()).await {
        DispatchOutcome::Done(summary) => assert!(summary.contains("Haiku")),
        other => panic!("expected switch, got {other:?}"),
    }
    assert_eq!(h.runtime.model().id, "anthropic/claude-3.5-haiku");
}

#[tokio::test]
async fn check_budget_reads_the_ledger() {
    let h = harness();
    match dispatch(Action::CheckBudget, &h.ctx()).await {
        DispatchOutcome::Done(summary) => {
            assert!(summary.contains("$5.00"), "got: {summary}");
        }
        other => panic!("expected report, got {other:?}"),
    }
}

#[tokio::test]
async fn parsed_action_reaches_dispatch() {
    let h = harness();
    let value = serde_json::json!({ "action": "no_op", "params": {} });
    let action = parse_action(&value).unwrap();
    assert!(matches!(
        dispatch(action, &h.ctx()).await,
        DispatchOutcome::Done(_)
    ));
}
