//! Budget poller: the bankruptcy tripwire.
//!
//! Polls the agent's `/budget` on a fixed cadence. The returned `balance_usd`
//! is the sole bankruptcy signal; token counts and per-model spend are
//! display only. An unreachable budget endpoint never kills: the poller logs
//! and retries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use vivarium_core::{DeathCause, LifePhase};

use crate::lifecycle::Lifecycle;

/// Balance at or below this is bankruptcy (mirrors the ledger's floor,
/// including its float slack).
const BANKRUPTCY_FLOOR_USD: f64 = 0.01 + 1e-9;

pub struct BudgetPoller {
    lifecycle: Arc<Lifecycle>,
}

impl BudgetPoller {
    pub fn new(lifecycle: Arc<Lifecycle>) -> Self {
        Self { lifecycle }
    }

    pub async fn poll_once(&self) {
        if self.lifecycle.phase() != LifePhase::Alive {
            return;
        }

        let report = match self.lifecycle.agent().budget().await {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!(target: "vivarium::budget", error = %err, "budget check failed");
                return;
            }
        };

        if report.balance_usd <= BANKRUPTCY_FLOOR_USD {
            tracing::info!(
                target: "vivarium::budget",
                balance = report.balance_usd,
                "bankruptcy detected"
            );
            self.lifecycle
                .begin_death(
                    DeathCause::Bankruptcy,
                    &format!("${:.3} remaining", report.balance_usd),
                )
                .await;
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let interval =
            Duration::from_secs(self.lifecycle.config().budget_poll_interval_s.max(1));
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.poll_once().await,
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!(target: "vivarium::budget", "budget poller stopped");
    }
}
