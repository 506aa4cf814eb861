//! The loopback wire contract between observer and agent.
//!
//! The observer is authoritative for life numbers and aliveness; the agent is
//! authoritative for identity and the ledger. These DTOs are the whole
//! coupling surface; neither side touches the other's storage.

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::life::{BootstrapMode, DeathCause};

/// `POST /birth` body, observer → agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BirthPayload {
    pub life_number: u64,
    pub bootstrap_mode: BootstrapMode,
    #[serde(default)]
    pub memory_fragments: Vec<String>,
    #[serde(default)]
    pub prior_death_cause: Option<DeathCause>,
    /// Model assigned by the observer for this life.
    #[serde(default)]
    pub model: Option<String>,
}

/// `POST /force-sync` body, observer → agent. The agent adopts the observer's
/// view and restarts its loop; an alive-to-dead correction stops the loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForceSyncPayload {
    pub life_number: u64,
    #[serde(default)]
    pub is_alive: Option<bool>,
    #[serde(default)]
    pub bootstrap_mode: Option<BootstrapMode>,
    #[serde(default)]
    pub prior_death_cause: Option<DeathCause>,
}

/// `GET /state` response, agent → observer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStateReport {
    pub life_number: u64,
    pub is_alive: bool,
    pub name: Option<String>,
    pub icon: Option<String>,
    pub pronoun: Option<String>,
    pub model: Option<String>,
}

/// Uniform error envelope: `{error: true, kind, message}`. Details never
/// cross the boundary; they go to the server-side log with a component tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: bool,
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorBody {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error: true,
            kind,
            message: message.into(),
        }
    }
}

/// Why a vote submission was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum VoteRejection {
    /// Hourly rate limit across all rounds.
    Cooldown { retry_after_s: u64 },
    /// Already voted in this round.
    Duplicate,
    /// The entity is not alive; voting is locked.
    Dead,
}

impl VoteRejection {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            VoteRejection::Cooldown { .. } => ErrorKind::RateLimited,
            VoteRejection::Duplicate => ErrorKind::Conflict,
            VoteRejection::Dead => ErrorKind::DeadState,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn birth_payload_round_trips_with_optional_fields() {
        let raw = r#"{"life_number":7,"bootstrap_mode":"blank_slate"}"#;
        let payload: BirthPayload = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.life_number, 7);
        assert!(payload.memory_fragments.is_empty());
        assert!(payload.prior_death_cause.is_none());
    }

    #[test]
    fn legacy_death_cause_still_deserializes_on_the_wire() {
        let raw = r#"{"life_number":2,"bootstrap_mode":"basic_facts","prior_death_cause":"token_exhaustion"}"#;
        let payload: BirthPayload = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.prior_death_cause, Some(DeathCause::TokenExhaustion));
    }

    #[test]
    fn vote_rejection_maps_to_taxonomy() {
        assert_eq!(
            VoteRejection::Cooldown { retry_after_s: 60 }.error_kind(),
            ErrorKind::RateLimited
        );
        assert_eq!(VoteRejection::Duplicate.error_kind(), ErrorKind::Conflict);
        assert_eq!(VoteRejection::Dead.error_kind(), ErrorKind::DeadState);
    }
}
