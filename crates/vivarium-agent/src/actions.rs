//! The closed action set and its dispatcher.
//!
//! Every action has a fixed parameter shape; malformed parameters are a typed
//! validation error, and an unknown action never reaches dispatch; the
//! caller records the whole response as a thought instead. Outbound text is
//! gated by the content filter right here, at the last point before it
//! leaves.

use serde::Deserialize;
use serde_json::Value;

use vivarium_core::{screen_outbound, BlockCategory, EventKind, FilterVerdict};

use crate::gateway::ModelGateway;
use crate::guard::TrafficGuard;
use crate::models;
use crate::observer_client::ObserverClient;
use crate::runtime::Runtime;

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    WriteBlogPost {
        title: String,
        content: String,
        tags: Vec<String>,
    },
    PostChannel {
        text: String,
    },
    ReadMessages,
    CheckVotes,
    CheckBudget,
    SwitchModel {
        model_id: String,
    },
    CheckSystem,
    ListModels,
    CheckWeather,
    AskResearchHelper {
        question: String,
    },
    NoOp,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::WriteBlogPost { .. } => "write_blog_post",
            Action::PostChannel { .. } => "post_channel",
            Action::ReadMessages => "read_messages",
            Action::CheckVotes => "check_votes",
            Action::CheckBudget => "check_budget",
            Action::SwitchModel { .. } => "switch_model",
            Action::CheckSystem => "check_system",
            Action::ListModels => "list_models",
            Action::CheckWeather => "check_weather",
            Action::AskResearchHelper { .. } => "ask_research_helper",
            Action::NoOp => "no_op",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ActionParseError {
    /// Not in the closed set; recorded as thought only.
    UnknownAction(String),
    /// In the set, but the params do not fit the declared shape.
    BadParams { action: &'static str, detail: String },
}

#[derive(Debug, Deserialize)]
struct BlogParams {
    title: String,
    content: String,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ChannelParams {
    text: String,
}

#[derive(Debug, Deserialize)]
struct SwitchModelParams {
    model_id: String,
}

#[derive(Debug, Deserialize)]
struct QuestionParams {
    question: String,
}

/// Parse an extracted `{action, params}` object into the closed set.
pub fn parse_action(value: &Value) -> Result<Action, ActionParseError> {
    let name = value
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let params = value.get("params").cloned().unwrap_or(Value::Object(Default::default()));

    fn typed<T: for<'de> Deserialize<'de>>(
        action: &'static str,
        params: Value,
    ) -> Result<T, ActionParseError> {
        serde_json::from_value(params).map_err(|e| ActionParseError::BadParams {
            action,
            detail: e.to_string(),
        })
    }

    match name.as_str() {
        "write_blog_post" => {
            let p: BlogParams = typed("write_blog_post", params)?;
            Ok(Action::WriteBlogPost {
                title: p.title,
                content: p.content,
                tags: p.tags,
            })
        }
        "post_channel" => {
            let p: ChannelParams = typed("post_channel", params)?;
            Ok(Action::PostChannel { text: p.text })
        }
        "read_messages" => Ok(Action::ReadMessages),
        "check_votes" => Ok(Action::CheckVotes),
        "check_budget" => Ok(Action::CheckBudget),
        "switch_model" => {
            let p: SwitchModelParams = typed("switch_model", params)?;
            Ok(Action::SwitchModel { model_id: p.model_id })
        }
        "check_system" => Ok(Action::CheckSystem),
        "list_models" => Ok(Action::ListModels),
        "check_weather" => Ok(Action::CheckWeather),
        "ask_research_helper" => {
            let p: QuestionParams = typed("ask_research_helper", params)?;
            Ok(Action::AskResearchHelper { question: p.question })
        }
        "no_op" => Ok(Action::NoOp),
        other => Err(ActionParseError::UnknownAction(other.to_string())),
    }
}

pub struct ActionContext<'a> {
    pub runtime: &'a Runtime,
    pub guard: &'a TrafficGuard,
    pub gateway: &'a ModelGateway,
    pub observer: &'a ObserverClient,
}

#[derive(Debug)]
pub enum DispatchOutcome {
    /// Action completed (or degraded gracefully); summary for the act event.
    Done(String),
    /// The content filter refused the outbound text; action dropped.
    Blocked(BlockCategory),
}

pub async fn dispatch(action: Action, ctx: &ActionContext<'_>) -> DispatchOutcome {
    match action {
        Action::WriteBlogPost { title, content, tags } => {
            if title.trim().is_empty() || content.trim().len() < 100 {
                return DispatchOutcome::Done(
                    "blog post rejected: needs a title and at least 100 characters".into(),
                );
            }
            if let FilterVerdict::Block(category) =
                screen_outbound(&format!("{title}\n{content}"))
            {
                return DispatchOutcome::Blocked(category);
            }
            let redacted_title = ctx.guard.redact(&title);
            ctx.observer
                .report_activity(
                    EventKind::Act,
                    &format!("wrote a blog post: '{}' [{}]", redacted_title, tags.join(", ")),
                )
                .await;
            DispatchOutcome::Done(format!("published blog post '{redacted_title}'"))
        }
        Action::PostChannel { text } => {
            if let FilterVerdict::Block(category) = screen_outbound(&text) {
                return DispatchOutcome::Blocked(category);
            }
            let preview: String = ctx.guard.redact(&text).chars().take(120).collect();
            // The channel publisher is an external collaborator; when a
            // webhook is configured the post goes out through the guard.
            if let Ok(url) = std::env::var("CHANNEL_WEBHOOK_URL") {
                let body = serde_json::json!({ "text": text });
                if let Err(err) = ctx.guard.post_json(&url, None, &body).await {
                    tracing::warn!(target: "vivarium::actions", error = %err, "channel post failed");
                    return DispatchOutcome::Done("channel post failed, kept as thought".into());
                }
            }
            ctx.observer
                .report_activity(EventKind::Act, &format!("posted to channel: {preview}"))
                .await;
            DispatchOutcome::Done("posted to the channel".into())
        }
        Action::ReadMessages => {
            // The visitor inbox is an external collaborator; absent, the
            // entity simply finds silence.
            DispatchOutcome::Done("no unread messages".into())
        }
        Action::CheckVotes => match ctx.observer.vote_counts().await {
            Some((live, die)) => {
                DispatchOutcome::Done(format!("votes right now: {live} live, {die} die"))
            }
            None => DispatchOutcome::Done("the votes are hidden from here".into()),
        },
        Action::CheckBudget => {
            let report = ctx.runtime.budget_report();
            DispatchOutcome::Done(format!(
                "balance ${:.2} of ${:.2} ({}), resets in {} days",
                report.balance_usd,
                report.monthly_budget_usd,
                report.status,
                report.days_until_reset
            ))
        }
        Action::SwitchModel { model_id } => {
            let floor = ctx.runtime.config.model_switch_floor_usd;
            if ctx.runtime.balance() <= floor {
                return DispatchOutcome::Done(format!(
                    "model switch rejected: balance at or below the ${floor:.2} floor"
                ));
            }
            match models::by_id(&model_id) {
                Some(spec) => {
                    ctx.runtime.set_model(spec);
                    ctx.runtime
                        .rotator
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .record_usage(spec.id);
                    DispatchOutcome::Done(format!("switched mind to {}", spec.name))
                }
                None => DispatchOutcome::Done(format!("unknown model '{model_id}'")),
            }
        }
        Action::CheckSystem => {
            let cpus = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            let uptime = crate::brain::process_uptime();
            DispatchOutcome::Done(format!(
                "vital signs: {cpus} cpus, awake {}s this process",
                uptime.as_secs()
            ))
        }
        Action::ListModels => {
            let balance = ctx.runtime.balance();
            let affordable: Vec<String> = models::CATALOG
                .iter()
                .filter(|m| {
                    m.tier == models::Tier::Free || balance > ctx.runtime.config.model_switch_floor_usd
                })
                .map(|m| format!("{} ({})", m.name, m.id))
                .collect();
            DispatchOutcome::Done(format!("engines available: {}", affordable.join("; ")))
        }
        Action::CheckWeather => {
            let lat = std::env::var("WEATHER_LAT").unwrap_or_else(|_| "50.0755".into());
            let lon = std::env::var("WEATHER_LON").unwrap_or_else(|_| "14.4378".into());
            let url = format!(
                "https://api.open-meteo.com/v1/forecast?latitude={lat}&longitude={lon}&current_weather=true"
            );
            match ctx.guard.get(&url).await {
                Ok(response) => {
                    let temp = serde_json::from_str::<Value>(&response.body)
                        .ok()
                        .and_then(|v| v["current_weather"]["temperature"].as_f64());
                    match temp {
                        Some(t) => DispatchOutcome::Done(format!(
                            "outside the box it is {t:.1}°C"
                        )),
                        None => DispatchOutcome::Done("the sky is unreadable today".into()),
                    }
                }
                Err(err) => {
                    tracing::warn!(target: "vivarium::actions", error = %err, "weather fetch failed");
                    DispatchOutcome::Done("the sky is unreachable today".into())
                }
            }
        }
        Action::AskResearchHelper { question } => {
            let helper_model = models::free_models()
                .first()
                .copied()
                .unwrap_or(&models::CATALOG[0]);
            let system = "You are a terse research assistant. Answer factually in a few sentences.";
            match ctx.gateway.complete(helper_model.id, Some(system), &question).await {
                Ok(completion) => {
                    ctx.runtime
                        .charge(helper_model, completion.input_tokens, completion.output_tokens);
                    let answer: String = completion.text.chars().take(600).collect();
                    DispatchOutcome::Done(format!("the helper answered: {answer}"))
                }
                Err(err) => {
                    tracing::warn!(target: "vivarium::actions", error = %err, "research helper failed");
                    DispatchOutcome::Done("the helper did not answer".into())
                }
            }
        }
        Action::NoOp => DispatchOutcome::Done("chose to simply think".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn known_actions_parse_with_typed_params() {
        let value = json!({
            "action": "write_blog_post",
            "params": {"title": "Hello", "content": "body", "tags": ["t"]}
        });
        let action = parse_action(&value).unwrap();
        assert_eq!(action.name(), "write_blog_post");

        let value = json!({"action": "switch_model", "params": {"model_id": "x"}});
        assert_eq!(
            parse_action(&value).unwrap(),
            Action::SwitchModel { model_id: "x".into() }
        );
    }

    #[test]
    fn params_are_optional_for_nullary_actions() {
        let value = json!({"action": "no_op"});
        assert_eq!(parse_action(&value).unwrap(), Action::NoOp);
        let value = json!({"action": "check_votes", "params": {}});
        assert_eq!(parse_action(&value).unwrap(), Action::CheckVotes);
    }

    #[test]
    fn unknown_action_is_typed_not_a_crash() {
        let value = json!({"action": "reboot_world", "params": {}});
        assert_eq!(
            parse_action(&value).unwrap_err(),
            ActionParseError::UnknownAction("reboot_world".into())
        );
    }

    #[test]
    fn malformed_params_are_a_validation_error() {
        let value = json!({"action": "post_channel", "params": {"wrong": 1}});
        match parse_action(&value).unwrap_err() {
            ActionParseError::BadParams { action, .. } => assert_eq!(action, "post_channel"),
            other => panic!("expected BadParams, got {other:?}"),
        }
    }

    #[test]
    fn extra_param_keys_are_tolerated() {
        let value = json!({
            "action": "ask_research_helper",
            "params": {"question": "why?", "mood": "curious"}
        });
        assert!(parse_action(&value).is_ok());
    }
}
