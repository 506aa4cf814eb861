//! The authoritative life-state machine driver.
//!
//! Every transition goes through this module under a single lock; callers
//! never touch phase fields directly. Network and filesystem work happens
//! outside the lock. The respawn scheduler is a capacity-1 channel feeding a
//! single background task, so duplicate fires collapse into one pending
//! respawn and a second birth attempt no-ops on the phase guard.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::{broadcast, mpsc, watch};

use vivarium_core::{
    ActivityEvent, BirthPayload, BootstrapMode, DeathCause, EventKind, LifePhase, ObserverConfig,
};

use crate::agent_client::AgentClient;
use crate::memories::MemoryWriter;
use crate::store::Store;

/// Models the observer assigns at birth, round-robin by life number. The
/// agent may switch mid-life on its own budget.
const BIRTH_MODELS: &[&str] = &[
    "meta-llama/llama-3.3-70b-instruct:free",
    "google/gemini-2.0-flash-exp:free",
    "mistralai/mistral-small-3.1:free",
];

/// Attempts to deliver a birth before declaring it failed.
const BIRTH_ATTEMPTS: u32 = 3;

pub struct Lifecycle {
    store: Arc<Store>,
    config: Arc<ObserverConfig>,
    agent: AgentClient,
    memories: MemoryWriter,
    events_tx: broadcast::Sender<ActivityEvent>,
    phase: Mutex<LifePhase>,
    respawn_tx: mpsc::Sender<()>,
    respawn_rx: Mutex<Option<mpsc::Receiver<()>>>,
    workspace_dir: PathBuf,
}

impl Lifecycle {
    pub fn new(
        store: Arc<Store>,
        config: Arc<ObserverConfig>,
        agent: AgentClient,
        events_tx: broadcast::Sender<ActivityEvent>,
    ) -> Arc<Self> {
        let (respawn_tx, respawn_rx) = mpsc::channel(1);
        let memories = MemoryWriter::new(config.data_dir.join("memories"));
        let workspace_dir = config.data_dir.join("workspace");
        let initial = match store.life_state() {
            Ok(state) if state.is_alive => LifePhase::Alive,
            _ => LifePhase::Dead,
        };
        Arc::new(Self {
            store,
            config,
            agent,
            memories,
            events_tx,
            phase: Mutex::new(initial),
            respawn_tx,
            respawn_rx: Mutex::new(Some(respawn_rx)),
            workspace_dir,
        })
    }

    pub fn phase(&self) -> LifePhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append to the timeline and fan out to SSE subscribers.
    pub fn emit(&self, life_number: u64, kind: EventKind, payload: &str) {
        match self.store.append_activity(life_number, kind, payload) {
            Ok(event) => {
                let _ = self.events_tx.send(event);
            }
            Err(err) => {
                tracing::error!(
                    target: "vivarium::lifecycle",
                    error = %err,
                    "failed to append activity"
                );
            }
        }
    }

    /// Ask for a respawn. Idempotent: a fire already pending absorbs this one.
    pub fn request_respawn(&self) {
        match self.respawn_tx.try_send(()) {
            Ok(()) => {
                tracing::info!(target: "vivarium::lifecycle", "respawn scheduled");
            }
            Err(_) => {
                tracing::debug!(target: "vivarium::lifecycle", "respawn already pending");
            }
        }
    }

    /// alive -> dying -> dead. Returns false when the life was not alive;
    /// the budget poller and the vote watcher can race here and exactly one
    /// of them records its cause.
    pub async fn begin_death(&self, cause: DeathCause, note: &str) -> bool {
        debug_assert!(!cause.is_legacy());
        {
            let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
            match phase.transition(LifePhase::Dying) {
                Ok(next) => *phase = next,
                Err(_) => return false,
            }
        }

        let life_number = self
            .store
            .life_state()
            .map(|s| s.life_number)
            .unwrap_or(0);

        tracing::info!(
            target: "vivarium::lifecycle",
            life = life_number,
            cause = cause.as_str(),
            note,
            "death begins"
        );

        let thoughts = self
            .store
            .recent_thoughts_of_life(life_number, 5)
            .unwrap_or_default();
        let summary = if thoughts.is_empty() {
            "No thoughts recorded".to_string()
        } else {
            thoughts
                .iter()
                .map(|t| t.chars().take(50).collect::<String>())
                .collect::<Vec<_>>()
                .join("; ")
        };

        if let Err(err) = self.store.close_all_open_rounds() {
            tracing::error!(target: "vivarium::lifecycle", error = %err, "round cleanup failed");
        }
        if let Err(err) = self
            .store
            .record_death(life_number, Utc::now(), cause, &summary)
        {
            tracing::error!(target: "vivarium::lifecycle", error = %err, "death record failed");
        }

        // The workspace is the ephemeral part of the entity; death clears it.
        let _ = std::fs::remove_dir_all(&self.workspace_dir);

        self.emit(
            life_number,
            EventKind::Death,
            &format!("life ended: {}", cause.as_str()),
        );

        {
            let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
            *phase = LifePhase::Dead;
        }
        self.request_respawn();
        true
    }

    /// dead -> birthing -> alive (or back to dead on delivery failure).
    pub async fn birth_new_life(&self) {
        {
            let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
            match phase.transition(LifePhase::Birthing) {
                Ok(next) => *phase = next,
                Err(_) => {
                    tracing::debug!(
                        target: "vivarium::lifecycle",
                        phase = phase.as_str(),
                        "birth skipped, not dead"
                    );
                    return;
                }
            }
        }

        let life_number = match self.store.allocate_life_number() {
            Ok(n) => n,
            Err(err) => {
                tracing::error!(target: "vivarium::lifecycle", error = %err, "life allocation failed");
                self.abort_birth(0, "life allocation failed").await;
                return;
            }
        };
        let prior_cause = self.store.prior_death_cause().unwrap_or(None);
        let bootstrap = BootstrapMode::for_life(life_number, prior_cause);
        let model = BIRTH_MODELS[((life_number - 1) % BIRTH_MODELS.len() as u64) as usize];
        let fragments = self.memories.compose_for_birth(&self.store, life_number);

        let payload = BirthPayload {
            life_number,
            bootstrap_mode: bootstrap,
            memory_fragments: fragments,
            prior_death_cause: prior_cause,
            model: Some(model.to_string()),
        };

        tracing::info!(
            target: "vivarium::lifecycle",
            life = life_number,
            bootstrap = bootstrap.as_str(),
            model,
            "birthing"
        );

        match self.agent.birth(&payload, BIRTH_ATTEMPTS).await {
            Ok(()) => {
                let born_at = Utc::now();
                if let Err(err) = self.store.record_birth(life_number, born_at, bootstrap, model) {
                    tracing::error!(target: "vivarium::lifecycle", error = %err, "birth record failed");
                }
                let closes = born_at + chrono::Duration::seconds(self.config.voting_window_s as i64);
                if let Err(err) = self.store.open_round(life_number, born_at, closes) {
                    tracing::error!(target: "vivarium::lifecycle", error = %err, "round open failed");
                }
                {
                    let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
                    *phase = LifePhase::Alive;
                }
                self.emit(
                    life_number,
                    EventKind::Birth,
                    &format!("a new life begins (life #{life_number})"),
                );
            }
            Err(err) => {
                tracing::warn!(
                    target: "vivarium::lifecycle",
                    life = life_number,
                    error = %err,
                    "birth delivery failed after retries"
                );
                self.abort_birth(life_number, &format!("birth delivery failed: {err}"))
                    .await;
            }
        }
    }

    /// birthing -> dead with a manual-cause tombstone, then reschedule.
    async fn abort_birth(&self, life_number: u64, note: &str) {
        if life_number > 0 {
            let now = Utc::now();
            let _ = self
                .store
                .record_birth(life_number, now, BootstrapMode::BasicFacts, "unassigned");
            let _ = self.store.record_death(life_number, now, DeathCause::Manual, note);
        }
        {
            let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
            *phase = LifePhase::Dead;
        }
        self.emit(life_number, EventKind::Error, note);
        self.request_respawn();
    }

    /// Admin override: adopt the agent's reality without a restart.
    pub async fn force_alive(&self) -> Result<u64, String> {
        let report = self
            .agent
            .state()
            .await
            .map_err(|e| format!("cannot reach agent: {e}"))?;
        let born_at = Utc::now();
        let bootstrap = BootstrapMode::rotation_for(report.life_number.max(1));
        let model = report.model.clone().unwrap_or_else(|| "unknown".into());
        self.store
            .record_birth(report.life_number, born_at, bootstrap, &model)
            .map_err(|e| e.to_string())?;
        {
            let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
            *phase = LifePhase::Alive;
        }
        self.emit(
            report.life_number,
            EventKind::Birth,
            &format!("life #{} forced alive", report.life_number),
        );
        Ok(report.life_number)
    }

    /// On boot: a dead system immediately queues its first (or next) life.
    pub fn bootstrap(&self) {
        if self.phase() == LifePhase::Dead {
            self.request_respawn();
        }
    }

    /// Background task: waits for respawn requests, sleeps the configured
    /// jitter, then births. Exits on shutdown.
    pub async fn run_respawn_scheduler(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut rx = match self
            .respawn_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            Some(rx) => rx,
            None => {
                tracing::error!(target: "vivarium::lifecycle", "respawn scheduler started twice");
                return;
            }
        };

        loop {
            tokio::select! {
                fired = rx.recv() => {
                    if fired.is_none() {
                        break;
                    }
                    let delay = {
                        let mut rng = rand::thread_rng();
                        rng.gen_range(self.config.respawn_delay_min_s..=self.config.respawn_delay_max_s.max(self.config.respawn_delay_min_s))
                    };
                    tracing::info!(
                        target: "vivarium::lifecycle",
                        delay_s = delay,
                        "respawn timer armed"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(delay)) => {
                            self.birth_new_life().await;
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!(target: "vivarium::lifecycle", "respawn scheduler stopped");
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn agent(&self) -> &AgentClient {
        &self.agent
    }

    pub fn config(&self) -> &ObserverConfig {
        &self.config
    }
}
