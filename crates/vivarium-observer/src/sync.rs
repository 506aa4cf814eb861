//! Sync validator: reconciles the agent's reported state against the
//! authoritative one.
//!
//! Runs every `SYNC_INTERVAL_S`. The observer always wins; the agent is
//! brought forward (or shut down) via `/birth` and `/force-sync`. Agent
//! unreachability is tolerated indefinitely; only bankruptcy and vote
//! majority kill.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use vivarium_core::{BirthPayload, BootstrapMode, ForceSyncPayload, LifePhase};

use crate::lifecycle::Lifecycle;
use crate::memories::MemoryWriter;

pub struct SyncValidator {
    lifecycle: Arc<Lifecycle>,
}

impl SyncValidator {
    pub fn new(lifecycle: Arc<Lifecycle>) -> Self {
        Self { lifecycle }
    }

    /// One reconciliation pass. Reads state snapshots, then performs any
    /// corrective network calls without holding locks.
    pub async fn validate_once(&self) {
        // Skip while a transition is mid-flight; the next tick sees it done.
        if self.lifecycle.phase() != LifePhase::Alive {
            return;
        }
        let observer_state = match self.lifecycle.store().life_state() {
            Ok(state) => state,
            Err(err) => {
                tracing::error!(target: "vivarium::sync", error = %err, "state read failed");
                return;
            }
        };
        if !observer_state.is_alive {
            return;
        }

        let agent_state = match self.lifecycle.agent().state().await {
            Ok(state) => state,
            Err(err) => {
                // Deliberately conservative: unreachability is never a death.
                tracing::warn!(target: "vivarium::sync", error = %err, "agent unreachable");
                return;
            }
        };

        if let Err(err) = self.lifecycle.store().touch_last_seen(agent_state.model.as_deref()) {
            tracing::warn!(target: "vivarium::sync", error = %err, "last_seen update failed");
        }

        let observer_life = observer_state.life_number;
        let agent_life = agent_state.life_number;

        if agent_life == 0 {
            // A blank agent has simply never been born; re-deliver the
            // current life rather than treating this as a desync.
            tracing::info!(
                target: "vivarium::sync",
                life = observer_life,
                "agent reports no life, re-delivering birth"
            );
            let prior = self.lifecycle.store().prior_death_cause().unwrap_or(None);
            let bootstrap = observer_state
                .bootstrap_mode
                .unwrap_or_else(|| BootstrapMode::rotation_for(observer_life));
            let memories = MemoryWriter::new(self.lifecycle.config().data_dir.join("memories"));
            let fragments = memories.compose_for_birth(self.lifecycle.store(), observer_life);
            let payload = BirthPayload {
                life_number: observer_life,
                bootstrap_mode: bootstrap,
                memory_fragments: fragments,
                prior_death_cause: prior,
                model: observer_state.model.clone(),
            };
            if let Err(err) = self.lifecycle.agent().birth(&payload, 1).await {
                tracing::warn!(target: "vivarium::sync", error = %err, "birth re-delivery failed");
            }
            return;
        }

        if agent_life != observer_life || !agent_state.is_alive {
            if agent_life > observer_life {
                tracing::warn!(
                    target: "vivarium::sync",
                    observer = observer_life,
                    agent = agent_life,
                    "anomaly: agent is ahead of the authority"
                );
            } else {
                tracing::warn!(
                    target: "vivarium::sync",
                    observer = observer_life,
                    agent = agent_life,
                    agent_alive = agent_state.is_alive,
                    "desync detected"
                );
            }
            let payload = ForceSyncPayload {
                life_number: observer_life,
                is_alive: Some(observer_state.is_alive),
                bootstrap_mode: observer_state.bootstrap_mode,
                prior_death_cause: self.lifecycle.store().prior_death_cause().unwrap_or(None),
            };
            match self.lifecycle.agent().force_sync(&payload).await {
                Ok(()) => {
                    tracing::info!(
                        target: "vivarium::sync",
                        life = observer_life,
                        "agent force-synced"
                    );
                }
                Err(err) => {
                    tracing::warn!(target: "vivarium::sync", error = %err, "force-sync failed");
                }
            }
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.lifecycle.config().sync_interval_s.max(1));
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.validate_once().await,
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!(target: "vivarium::sync", "sync validator stopped");
    }
}
