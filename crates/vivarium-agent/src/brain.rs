//! The think-act loop.
//!
//! Sleep, compose, generate, filter, dispatch, charge, report, then sleep
//! again. The loop watches the runtime epoch at every suspension point: a
//! birth or force-sync mid-sleep restarts the cycle against the new life,
//! and an alive-to-dead correction parks it until the next birth.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::watch;

use vivarium_core::{
    screen_outbound, ChargeOutcome, EventKind, FilterVerdict,
};

use crate::actions::{self, ActionContext, ActionParseError, DispatchOutcome};
use crate::gateway::{Completion, GatewayError, ModelGateway};
use crate::guard::TrafficGuard;
use crate::identity::Identity;
use crate::observer_client::ObserverClient;
use crate::parse;
use crate::prompt::{self, CycleContext};
use crate::runtime::Runtime;

/// Gateway attempts per cycle before the cycle is skipped.
const MAX_ATTEMPTS: u32 = 3;

/// Backoff before each retry after a rate limit: 5s, 10s, 20s.
fn backoff_for(attempt: u32) -> Duration {
    Duration::from_secs(5u64 << (attempt - 1).min(2))
}

static PROCESS_START: OnceLock<Instant> = OnceLock::new();

pub fn process_uptime() -> Duration {
    PROCESS_START.get_or_init(Instant::now).elapsed()
}

pub struct Brain {
    runtime: Arc<Runtime>,
    guard: Arc<TrafficGuard>,
    gateway: ModelGateway,
    observer: ObserverClient,
    recent_thoughts: Vec<String>,
}

impl Brain {
    pub fn new(
        runtime: Arc<Runtime>,
        guard: Arc<TrafficGuard>,
        gateway: ModelGateway,
        observer: ObserverClient,
    ) -> Self {
        process_uptime();
        Self {
            runtime,
            guard,
            gateway,
            observer,
            recent_thoughts: Vec::new(),
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut epoch = self.runtime.epoch();
        loop {
            if *shutdown.borrow() {
                break;
            }

            if !self.runtime.is_alive() {
                // Dead or unborn: wait for the world to change.
                tokio::select! {
                    _ = epoch.changed() => continue,
                    _ = shutdown.changed() => break,
                }
            }

            if self.runtime.identity().is_none() {
                self.birth_sequence().await;
                continue;
            }

            // Randomized think interval, interruptible by lifecycle changes.
            // A critical balance shortens the stride: urgency is cheap,
            // thinking is not.
            let sleep_s = {
                let config = &self.runtime.config;
                let min = config.think_interval_min_s;
                let max = config.think_interval_max_s.max(min);
                let picked = rand::thread_rng().gen_range(min..=max);
                match self.runtime.budget_report().status.as_str() {
                    "critical" | "cautious" => min.max(picked / 2),
                    _ => picked,
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(sleep_s)) => {}
                _ = epoch.changed() => continue,
                _ = shutdown.changed() => break,
            }
            if !self.runtime.is_alive() {
                continue;
            }

            self.think_act_cycle().await;
        }
        tracing::info!(target: "vivarium::brain", "think-act loop stopped");
    }

    /// First moments of a life: the entity names itself.
    async fn birth_sequence(&mut self) {
        let life = self.runtime.life();
        let prompt = prompt::birth_prompt(&life.fragments);
        let model = self.runtime.model();

        let identity = match self.call_with_retry(&prompt, None).await {
            Ok(completion) => {
                self.charge_checked(completion.input_tokens, completion.output_tokens);
                match parse::extract_first_action(&completion.text)
                    .map(|(v, _)| v)
                    .or_else(|| serde_json::from_str(&completion.text).ok())
                {
                    Some(value) => Identity::from_model_output(&value, life.life_number),
                    None => {
                        // No JSON at all; scan for any object carrying a name.
                        completion
                            .text
                            .find('{')
                            .and_then(|idx| {
                                serde_json::Deserializer::from_str(&completion.text[idx..])
                                    .into_iter::<serde_json::Value>()
                                    .next()
                                    .and_then(Result::ok)
                            })
                            .map(|v| Identity::from_model_output(&v, life.life_number))
                            .unwrap_or_else(|| Identity::fallback(life.life_number))
                    }
                }
            }
            Err(err) => {
                tracing::warn!(target: "vivarium::brain", error = %err, "birth sequence failed");
                Identity::fallback(life.life_number)
            }
        };

        tracing::info!(
            target: "vivarium::brain",
            life = life.life_number,
            name = %identity.name,
            "identity chosen"
        );
        self.observer
            .report_identity(life.life_number, &identity.name, &identity.icon, &identity.pronoun)
            .await;
        let first_thought = identity.first_thought.clone();
        self.runtime.adopt_identity(identity);
        self.publish_thought(&first_thought).await;
        self.observer.heartbeat(model.id).await;
    }

    async fn think_act_cycle(&mut self) {
        let life = self.runtime.life();
        let Some(identity) = self.runtime.identity() else {
            return;
        };
        let model = self.runtime.model();

        let votes = self.observer.vote_counts().await;
        let oracle = self.observer.pending_oracle().await;
        let budget = self.runtime.budget_report();

        let ctx = CycleContext {
            identity: &identity,
            bootstrap: life.bootstrap,
            fragments: &life.fragments,
            budget: &budget,
            model_name: model.name,
            votes,
            unread_messages: 0,
            recent_thoughts: &self.recent_thoughts,
            oracle: oracle.as_ref(),
            prior_death_cause: life.prior_death_cause,
        };
        let prompt_text = prompt::cycle_prompt(&ctx);

        let completion = match self.call_with_retry(&prompt_text, None).await {
            Ok(completion) => completion,
            Err(err) => {
                tracing::warn!(target: "vivarium::brain", error = %err, "cycle skipped");
                self.observer
                    .report_activity(EventKind::Error, "a thought failed to form")
                    .await;
                return;
            }
        };
        self.charge_checked(completion.input_tokens, completion.output_tokens);

        if let Some(oracle) = &oracle {
            self.observer.ack_oracle(oracle.id).await;
        }

        match parse::extract_first_action(&completion.text) {
            Some((value, span)) => {
                let narrative = parse::strip_span(&completion.text, &span);
                if narrative.len() > 10 {
                    self.publish_thought(&narrative).await;
                }
                match actions::parse_action(&value) {
                    Ok(action) => {
                        let name = action.name();
                        let action_ctx = ActionContext {
                            runtime: &self.runtime,
                            guard: &self.guard,
                            gateway: &self.gateway,
                            observer: &self.observer,
                        };
                        match actions::dispatch(action, &action_ctx).await {
                            DispatchOutcome::Done(summary) => {
                                tracing::info!(
                                    target: "vivarium::brain",
                                    action = name,
                                    "action dispatched"
                                );
                                self.observer
                                    .report_activity(
                                        EventKind::Act,
                                        &format!("{name}: {}", self.guard.redact(&summary)),
                                    )
                                    .await;
                            }
                            DispatchOutcome::Blocked(category) => {
                                // Hard stop; the raw text never leaves.
                                tracing::warn!(
                                    target: "vivarium::brain",
                                    action = name,
                                    category = category.as_str(),
                                    "outbound text blocked"
                                );
                                self.observer
                                    .report_activity(
                                        EventKind::Blocked,
                                        &format!("an outbound {name} was blocked ({})", category.as_str()),
                                    )
                                    .await;
                            }
                        }
                    }
                    Err(ActionParseError::UnknownAction(name)) => {
                        tracing::debug!(target: "vivarium::brain", action = %name, "unknown action, kept as thought");
                        self.publish_thought(&completion.text).await;
                    }
                    Err(ActionParseError::BadParams { action, detail }) => {
                        tracing::debug!(
                            target: "vivarium::brain",
                            action,
                            detail = %detail,
                            "malformed action params"
                        );
                        self.observer
                            .report_activity(
                                EventKind::Error,
                                &format!("tried {action} with malformed parameters"),
                            )
                            .await;
                    }
                }
            }
            None => {
                // No object found: the whole response is a thought.
                self.publish_thought(&completion.text).await;
            }
        }

        self.observer.heartbeat(self.runtime.model().id).await;
    }

    /// Publish a thought: filtered, redacted, remembered, reported.
    async fn publish_thought(&mut self, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        if let FilterVerdict::Block(category) = screen_outbound(trimmed) {
            self.observer
                .report_activity(
                    EventKind::Blocked,
                    &format!("a thought was blocked ({})", category.as_str()),
                )
                .await;
            return;
        }
        let safe = self.guard.redact(trimmed);
        self.recent_thoughts.push(safe.chars().take(200).collect());
        if self.recent_thoughts.len() > 10 {
            self.recent_thoughts.remove(0);
        }
        self.observer.report_thought(&safe).await;
    }

    fn charge_checked(&self, input_tokens: u64, output_tokens: u64) {
        let model = self.runtime.model();
        let outcome = self.runtime.charge(model, input_tokens, output_tokens);
        if outcome == ChargeOutcome::Bankrupt {
            // The observer's poller owns the death; we just say it out loud.
            tracing::warn!(target: "vivarium::brain", "that thought emptied the purse");
        }
    }

    /// Gateway call with the in-cycle retry policy: on 429 back off
    /// (5s → 10s → 20s) and rotate to another model in the tier; on other
    /// failures rotate immediately (promoting off the free tier after
    /// repeated failures); give up after three attempts.
    async fn call_with_retry(
        &self,
        user: &str,
        system: Option<&str>,
    ) -> Result<Completion, GatewayError> {
        let mut model = self.runtime.model();
        let mut last_err = GatewayError::Parse;

        for attempt in 1..=MAX_ATTEMPTS {
            match self.gateway.complete(model.id, system, user).await {
                Ok(completion) => {
                    self.runtime
                        .rotator
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .reset_failures(model.id);
                    self.runtime.set_model(model);
                    return Ok(completion);
                }
                Err(GatewayError::RateLimited) => {
                    let wait = backoff_for(attempt);
                    tracing::info!(
                        target: "vivarium::brain",
                        model = model.id,
                        attempt,
                        wait_s = wait.as_secs(),
                        "rate limited, backing off and rotating"
                    );
                    tokio::time::sleep(wait).await;
                    let next = self
                        .runtime
                        .rotator
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .select_free(Some(model.id));
                    model = next;
                    last_err = GatewayError::RateLimited;
                }
                Err(err) => {
                    tracing::warn!(
                        target: "vivarium::brain",
                        model = model.id,
                        attempt,
                        error = %err,
                        "gateway call failed, rotating"
                    );
                    let next = self
                        .runtime
                        .rotator
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .on_free_failure(model.id);
                    model = next;
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_five_seconds() {
        assert_eq!(backoff_for(1), Duration::from_secs(5));
        assert_eq!(backoff_for(2), Duration::from_secs(10));
        assert_eq!(backoff_for(3), Duration::from_secs(20));
    }

    #[test]
    fn uptime_is_monotonic() {
        let a = process_uptime();
        let b = process_uptime();
        assert!(b >= a);
    }
}
