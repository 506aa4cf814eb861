//! vivarium-core: shared lifecycle and consistency core for the Vivarium
//! digital-entity platform.
//!
//! Both services link against this crate: the observer (authoritative life
//! state, voting, timeline) and the agent (identity, think-act loop, credit
//! ledger). Everything here is side-effect-light: the pure state machine,
//! adjudication rules, the ledger file format, the safety filters, and the
//! loopback wire contract that couples the two processes.

mod config;
mod error;
mod events;
mod filter;
mod fingerprint;
mod ledger;
mod life;
mod redaction;
mod voting;
mod wire;

pub use config::{AgentConfig, CidrRange, ObserverConfig};
pub use error::{CoreError, ErrorKind};
pub use events::{ActivityEvent, EventKind, OracleKind, OracleMessage};
pub use filter::{screen_outbound, BlockCategory, FilterVerdict};
pub use fingerprint::{resolve_client_ip, voter_fingerprint, ForwardHeaders};
pub use ledger::{
    BudgetReport, ChargeOutcome, ChargeRecord, CreditLedger, ModelSpendRow, LEDGER_HISTORY_CAP,
};
pub use life::{BootstrapMode, DeathCause, LifePhase, LifeState};
pub use redaction::{sanitize_url, SecretHit, SecretScanner, REDACTED_PLACEHOLDER};
pub use voting::{
    adjudicate, RoundOutcome, RoundStatus, VoteChoice, MIN_VOTES_FOR_DEATH,
};
pub use wire::{AgentStateReport, BirthPayload, ErrorBody, ForceSyncPayload, VoteRejection};
