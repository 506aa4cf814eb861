//! Timeline events and oracle directives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened, for the append-only activity log and the SSE stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Think,
    Act,
    Error,
    Oracle,
    Birth,
    Death,
    VoteWindowClose,
    Blocked,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Think => "think",
            EventKind::Act => "act",
            EventKind::Error => "error",
            EventKind::Oracle => "oracle",
            EventKind::Birth => "birth",
            EventKind::Death => "death",
            EventKind::VoteWindowClose => "vote_window_close",
            EventKind::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "think" => Some(EventKind::Think),
            "act" => Some(EventKind::Act),
            "error" => Some(EventKind::Error),
            "oracle" => Some(EventKind::Oracle),
            "birth" => Some(EventKind::Birth),
            "death" => Some(EventKind::Death),
            "vote_window_close" => Some(EventKind::VoteWindowClose),
            "blocked" => Some(EventKind::Blocked),
            _ => None,
        }
    }
}

/// One row of the timeline. `seq` is the monotonic id SSE consumers use to
/// deduplicate across reconnects; within a life, events are totally ordered
/// by `(ts, seq)` at observer receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub seq: u64,
    pub life_number: u64,
    pub ts: DateTime<Utc>,
    pub kind: EventKind,
    pub payload: String,
}

/// Voice the administrative directive arrives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleKind {
    Oracle,
    Whisper,
    Architect,
}

impl OracleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OracleKind::Oracle => "oracle",
            OracleKind::Whisper => "whisper",
            OracleKind::Architect => "architect",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "oracle" => Some(OracleKind::Oracle),
            "whisper" => Some(OracleKind::Whisper),
            "architect" => Some(OracleKind::Architect),
            _ => None,
        }
    }
}

/// Out-of-band directive delivered to the agent; acknowledged once it has
/// been woven into a prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleMessage {
    pub id: u64,
    pub kind: OracleKind,
    pub text: String,
    pub delivered_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}
