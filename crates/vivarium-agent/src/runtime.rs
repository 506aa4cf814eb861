//! Shared agent runtime state.
//!
//! The life view is whatever the observer last told us; identity and the
//! ledger are ours. The epoch counter bumps on every birth or force-sync so
//! the think-act loop can notice mid-sleep that its world changed and
//! restart against the new life.

use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::watch;

use vivarium_core::{
    AgentConfig, AgentStateReport, BirthPayload, BootstrapMode, BudgetReport, ChargeOutcome,
    CoreError, CreditLedger, DeathCause, ForceSyncPayload,
};

use crate::identity::{self, Identity};
use crate::models::{self, ModelRotator, ModelSpec};

#[derive(Debug, Clone)]
pub struct LifeView {
    pub life_number: u64,
    pub is_alive: bool,
    pub bootstrap: BootstrapMode,
    pub fragments: Vec<String>,
    pub prior_death_cause: Option<DeathCause>,
}

impl LifeView {
    fn unborn() -> Self {
        Self {
            life_number: 0,
            is_alive: false,
            bootstrap: BootstrapMode::BasicFacts,
            fragments: Vec::new(),
            prior_death_cause: None,
        }
    }
}

pub struct Runtime {
    pub config: Arc<AgentConfig>,
    ledger: Mutex<CreditLedger>,
    life: RwLock<LifeView>,
    identity: RwLock<Option<Identity>>,
    model: RwLock<&'static ModelSpec>,
    pub rotator: Mutex<ModelRotator>,
    epoch_tx: watch::Sender<u64>,
}

impl Runtime {
    pub fn new(config: Arc<AgentConfig>) -> Result<Arc<Self>, CoreError> {
        let ledger = CreditLedger::open(config.credits_file(), config.monthly_budget_usd)?;
        let rotator = ModelRotator::load(config.workspace_dir().join("model_history.json"));
        // A restart mid-life finds its identity still in the workspace; the
        // observer's sync validator re-delivers the life around it.
        let identity = identity::load(&config.workspace_dir());
        let life = identity
            .as_ref()
            .map(|id| LifeView {
                life_number: id.life_number,
                is_alive: true,
                bootstrap: BootstrapMode::rotation_for(id.life_number),
                fragments: Vec::new(),
                prior_death_cause: None,
            })
            .unwrap_or_else(LifeView::unborn);
        let (epoch_tx, _) = watch::channel(0u64);
        Ok(Arc::new(Self {
            config,
            ledger: Mutex::new(ledger),
            life: RwLock::new(life),
            identity: RwLock::new(identity),
            model: RwLock::new(&models::CATALOG[0]),
            rotator: Mutex::new(rotator),
            epoch_tx,
        }))
    }

    pub fn epoch(&self) -> watch::Receiver<u64> {
        self.epoch_tx.subscribe()
    }

    fn bump_epoch(&self) {
        self.epoch_tx.send_modify(|e| *e += 1);
    }

    // ------------------------------------------------------------------
    // Life view
    // ------------------------------------------------------------------

    pub fn life(&self) -> LifeView {
        self.life.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_alive(&self) -> bool {
        self.life.read().unwrap_or_else(|e| e.into_inner()).is_alive
    }

    /// Accept a birth. Repeat delivery of the current life is a no-op after
    /// first acceptance; anything else resets the loop.
    pub fn apply_birth(&self, payload: BirthPayload) -> Result<bool, String> {
        if payload.life_number == 0 {
            return Err("life_number must be at least 1".into());
        }
        {
            let life = self.life.read().unwrap_or_else(|e| e.into_inner());
            if life.is_alive && life.life_number == payload.life_number {
                tracing::info!(
                    target: "vivarium::runtime",
                    life = payload.life_number,
                    "birth repeated, already this life"
                );
                return Ok(false);
            }
        }

        {
            let mut life = self.life.write().unwrap_or_else(|e| e.into_inner());
            *life = LifeView {
                life_number: payload.life_number,
                is_alive: true,
                bootstrap: payload.bootstrap_mode,
                fragments: payload.memory_fragments,
                prior_death_cause: payload.prior_death_cause,
            };
        }
        {
            // A new life starts nameless; stale workspace identity from an
            // earlier life is ignored (the observer wipes it on death).
            let mut identity = self.identity.write().unwrap_or_else(|e| e.into_inner());
            *identity = identity::load(&self.config.workspace_dir())
                .filter(|id| id.life_number == payload.life_number);
        }
        if let Some(model_id) = payload.model.as_deref() {
            if let Some(spec) = models::by_id(model_id) {
                *self.model.write().unwrap_or_else(|e| e.into_inner()) = spec;
            }
        }
        {
            let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(err) = ledger.increment_lives() {
                tracing::error!(target: "vivarium::runtime", error = %err, "lives counter write failed");
            }
        }
        tracing::info!(
            target: "vivarium::runtime",
            life = payload.life_number,
            bootstrap = payload.bootstrap_mode.as_str(),
            "birth accepted"
        );
        self.bump_epoch();
        Ok(true)
    }

    /// Adopt the observer's view. An alive-to-dead correction stops the loop.
    pub fn apply_force_sync(&self, payload: ForceSyncPayload) {
        {
            let mut life = self.life.write().unwrap_or_else(|e| e.into_inner());
            life.life_number = payload.life_number;
            if let Some(alive) = payload.is_alive {
                life.is_alive = alive;
            }
            if let Some(bootstrap) = payload.bootstrap_mode {
                life.bootstrap = bootstrap;
            }
            if payload.prior_death_cause.is_some() {
                life.prior_death_cause = payload.prior_death_cause;
            }
        }
        {
            let mut identity = self.identity.write().unwrap_or_else(|e| e.into_inner());
            let stale = identity
                .as_ref()
                .map(|id| id.life_number != payload.life_number)
                .unwrap_or(false);
            if stale {
                *identity = None;
            }
        }
        tracing::info!(
            target: "vivarium::runtime",
            life = payload.life_number,
            is_alive = ?payload.is_alive,
            "force-synced to observer state"
        );
        self.bump_epoch();
    }

    // ------------------------------------------------------------------
    // Identity & model
    // ------------------------------------------------------------------

    pub fn identity(&self) -> Option<Identity> {
        self.identity.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn adopt_identity(&self, identity: Identity) {
        if let Err(err) = identity::save(&self.config.workspace_dir(), &identity) {
            tracing::warn!(target: "vivarium::runtime", error = %err, "identity persist failed");
        }
        *self.identity.write().unwrap_or_else(|e| e.into_inner()) = Some(identity);
    }

    pub fn model(&self) -> &'static ModelSpec {
        *self.model.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_model(&self, spec: &'static ModelSpec) {
        *self.model.write().unwrap_or_else(|e| e.into_inner()) = spec;
    }

    // ------------------------------------------------------------------
    // Ledger
    // ------------------------------------------------------------------

    pub fn budget_report(&self) -> BudgetReport {
        let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        let _ = ledger.reset_if_due(chrono::Utc::now());
        ledger.status()
    }

    pub fn balance(&self) -> f64 {
        self.ledger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .balance()
    }

    /// Charge the ledger. A write failure here is fatal by contract: the
    /// process exits non-zero and the supervisor restarts it with the ledger
    /// intact.
    pub fn charge(&self, model: &ModelSpec, input_tokens: u64, output_tokens: u64) -> ChargeOutcome {
        let cost = models::cost_usd(model, input_tokens, output_tokens);
        let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        match ledger.charge(model.id, input_tokens, output_tokens, cost) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(
                    target: "vivarium::runtime",
                    error = %err,
                    "ledger write failed, exiting"
                );
                std::process::exit(1);
            }
        }
    }

    pub fn state_report(&self) -> AgentStateReport {
        let life = self.life();
        let identity = self.identity();
        AgentStateReport {
            life_number: life.life_number,
            is_alive: life.is_alive,
            name: identity.as_ref().map(|i| i.name.clone()),
            icon: identity.as_ref().map(|i| i.icon.clone()),
            pronoun: identity.as_ref().map(|i| i.pronoun.clone()),
            model: Some(self.model().id.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_runtime(dir: &TempDir) -> Arc<Runtime> {
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
        Runtime::new(config).unwrap()
    }

    fn birth(life_number: u64) -> BirthPayload {
        BirthPayload {
            life_number,
            bootstrap_mode: BootstrapMode::BasicFacts,
            memory_fragments: vec!["a memory".into()],
            prior_death_cause: None,
            model: None,
        }
    }

    #[test]
    fn fresh_runtime_is_unborn() {
        let dir = TempDir::new().unwrap();
        let runtime = test_runtime(&dir);
        let report = runtime.state_report();
        assert_eq!(report.life_number, 0);
        assert!(!report.is_alive);
        assert!(report.name.is_none());
    }

    #[test]
    fn birth_is_idempotent_per_life_number() {
        let dir = TempDir::new().unwrap();
        let runtime = test_runtime(&dir);
        assert!(runtime.apply_birth(birth(1)).unwrap());
        assert!(!runtime.apply_birth(birth(1)).unwrap());
        assert!(runtime.apply_birth(birth(2)).unwrap());
        assert_eq!(runtime.life().life_number, 2);
    }

    #[test]
    fn birth_rejects_life_zero() {
        let dir = TempDir::new().unwrap();
        let runtime = test_runtime(&dir);
        assert!(runtime.apply_birth(birth(0)).is_err());
    }

    #[test]
    fn force_sync_moves_life_forward_and_can_stop() {
        let dir = TempDir::new().unwrap();
        let runtime = test_runtime(&dir);
        runtime.apply_birth(birth(5)).unwrap();
        runtime.adopt_identity(Identity::fallback(5));

        runtime.apply_force_sync(ForceSyncPayload {
            life_number: 7,
            is_alive: Some(true),
            bootstrap_mode: None,
            prior_death_cause: None,
        });
        assert_eq!(runtime.life().life_number, 7);
        // Identity belonged to life 5 and is dropped.
        assert!(runtime.identity().is_none());

        runtime.apply_force_sync(ForceSyncPayload {
            life_number: 7,
            is_alive: Some(false),
            bootstrap_mode: None,
            prior_death_cause: None,
        });
        assert!(!runtime.is_alive());
    }

    #[test]
    fn epoch_bumps_on_lifecycle_changes() {
        let dir = TempDir::new().unwrap();
        let runtime = test_runtime(&dir);
        let rx = runtime.epoch();
        let start = *rx.borrow();
        runtime.apply_birth(birth(1)).unwrap();
        assert!(*runtime.epoch().borrow() > start);
    }

    #[test]
    fn charge_flows_into_budget_report() {
        let dir = TempDir::new().unwrap();
        let runtime = test_runtime(&dir);
        let spec = models::by_id("anthropic/claude-3.5-haiku").unwrap();
        let outcome = runtime.charge(spec, 100_000, 10_000);
        assert_eq!(outcome, ChargeOutcome::Ok);
        let report = runtime.budget_report();
        assert!(report.balance_usd < 5.0);
        assert_eq!(report.history_tail.len(), 1);
    }
}
