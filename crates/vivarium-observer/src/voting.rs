//! Vote submission and the round watcher.
//!
//! Submission is refused outright once the entity is not alive, even if a
//! round row is still open. The watcher ticks every few seconds, closes any
//! round past its deadline, adjudicates, and either opens a fresh round for
//! the surviving life or hands the death to the lifecycle module.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use vivarium_core::{
    adjudicate, DeathCause, EventKind, RoundOutcome, RoundStatus, VoteChoice, VoteRejection,
};

use crate::lifecycle::Lifecycle;

/// Watcher cadence. Deadlines are coarse (minutes to hours), so a few
/// seconds of slack is invisible.
const WATCH_TICK: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, serde::Serialize)]
pub struct VoteCounts {
    pub live: u64,
    pub die: u64,
    pub total: u64,
}

pub struct VoteService {
    lifecycle: Arc<Lifecycle>,
}

impl VoteService {
    pub fn new(lifecycle: Arc<Lifecycle>) -> Self {
        Self { lifecycle }
    }

    /// Cast a ballot for the open round.
    pub fn submit(
        &self,
        fingerprint: &str,
        choice: VoteChoice,
    ) -> Result<Result<VoteCounts, VoteRejection>, crate::store::StoreError> {
        let store = self.lifecycle.store();
        let state = store.life_state()?;
        if !state.is_alive {
            return Ok(Err(VoteRejection::Dead));
        }
        let Some(round) = store.current_open_round()? else {
            // Alive with no round is a transient birth-window state; callers
            // see it as the dead-state lock rather than a 500.
            return Ok(Err(VoteRejection::Dead));
        };
        match store.cast_vote(round.id, fingerprint, choice, Utc::now())? {
            Ok((live, die)) => Ok(Ok(VoteCounts {
                live,
                die,
                total: live + die,
            })),
            Err(rejection) => Ok(Err(rejection)),
        }
    }

    pub fn counts(&self) -> Result<VoteCounts, crate::store::StoreError> {
        let store = self.lifecycle.store();
        let round = store.current_open_round()?;
        Ok(match round {
            Some(r) => VoteCounts {
                live: r.live,
                die: r.die,
                total: r.live + r.die,
            },
            None => VoteCounts {
                live: 0,
                die: 0,
                total: 0,
            },
        })
    }

    /// One pass over due rounds. Public for tests; the loop below drives it.
    pub async fn close_due_rounds(&self) {
        let store = self.lifecycle.store();
        let due = match store.due_open_rounds(Utc::now()) {
            Ok(rounds) => rounds,
            Err(err) => {
                tracing::error!(target: "vivarium::votes", error = %err, "due-round scan failed");
                return;
            }
        };

        for round in due {
            let outcome = adjudicate(round.live, round.die);
            let status = match outcome {
                RoundOutcome::Died => RoundStatus::ClosedDied,
                RoundOutcome::Survived => RoundStatus::ClosedSurvived,
            };
            // close_round is a check-and-set; losing the race means another
            // path (death cleanup) already closed this round.
            match store.close_round(round.id, status) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    tracing::error!(target: "vivarium::votes", error = %err, "round close failed");
                    continue;
                }
            }

            self.lifecycle.emit(
                round.life_number,
                EventKind::VoteWindowClose,
                &format!(
                    "vote window closed: {} live / {} die ({})",
                    round.live,
                    round.die,
                    status.as_str()
                ),
            );

            match outcome {
                RoundOutcome::Died => {
                    tracing::info!(
                        target: "vivarium::votes",
                        life = round.life_number,
                        live = round.live,
                        die = round.die,
                        "death by vote majority"
                    );
                    self.lifecycle
                        .begin_death(
                            DeathCause::VoteMajority,
                            &format!("{} die vs {} live", round.die, round.live),
                        )
                        .await;
                }
                RoundOutcome::Survived => {
                    // Survival re-arms a fresh window for the same life.
                    let state = match store.life_state() {
                        Ok(s) if s.is_alive && s.life_number == round.life_number => s,
                        _ => continue,
                    };
                    let now = Utc::now();
                    let closes = now
                        + chrono::Duration::seconds(
                            self.lifecycle.config().voting_window_s as i64,
                        );
                    if let Err(err) = store.open_round(state.life_number, now, closes) {
                        tracing::error!(target: "vivarium::votes", error = %err, "round reopen failed");
                    }
                }
            }
        }
    }

    pub async fn run_watcher(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(WATCH_TICK);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.close_due_rounds().await,
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!(target: "vivarium::votes", "vote watcher stopped");
    }
}
