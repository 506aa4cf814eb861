//! The life-state machine.
//!
//! The observer is the only writer; everything else treats these types as a
//! read model. A `Life` is one incarnation, closed by at most one death.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Phase of the singleton life-state machine.
/// `dead -> birthing -> alive -> dying -> dead` and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifePhase {
    Dead,
    Birthing,
    Alive,
    Dying,
}

impl LifePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            LifePhase::Dead => "dead",
            LifePhase::Birthing => "birthing",
            LifePhase::Alive => "alive",
            LifePhase::Dying => "dying",
        }
    }

    /// True when `self -> next` is one of the four legal transitions.
    pub fn can_transition(self, next: LifePhase) -> bool {
        matches!(
            (self, next),
            (LifePhase::Dead, LifePhase::Birthing)
                | (LifePhase::Birthing, LifePhase::Alive)
                | (LifePhase::Birthing, LifePhase::Dead)
                | (LifePhase::Alive, LifePhase::Dying)
                | (LifePhase::Dying, LifePhase::Dead)
        )
    }

    /// Check-and-set helper: returns the next phase or a typed error.
    pub fn transition(self, next: LifePhase) -> Result<LifePhase, CoreError> {
        if self.can_transition(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                from: self.as_str(),
                to: next.as_str(),
            })
        }
    }
}

/// Why a life ended.
///
/// `TokenExhaustion` is a legacy value that still exists in old persisted
/// rows; it deserializes for display but no code path produces it anymore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeathCause {
    Bankruptcy,
    VoteMajority,
    Manual,
    TokenExhaustion,
}

impl DeathCause {
    pub fn as_str(self) -> &'static str {
        match self {
            DeathCause::Bankruptcy => "bankruptcy",
            DeathCause::VoteMajority => "vote_majority",
            DeathCause::Manual => "manual",
            DeathCause::TokenExhaustion => "token_exhaustion",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bankruptcy" => Some(DeathCause::Bankruptcy),
            "vote_majority" => Some(DeathCause::VoteMajority),
            "manual" => Some(DeathCause::Manual),
            "token_exhaustion" => Some(DeathCause::TokenExhaustion),
            _ => None,
        }
    }

    /// Readable from old rows, never written by live code.
    pub fn is_legacy(self) -> bool {
        matches!(self, DeathCause::TokenExhaustion)
    }
}

/// Prompt-construction variant a life begins with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapMode {
    BlankSlate,
    BasicFacts,
    FullBriefing,
}

impl BootstrapMode {
    pub fn as_str(self) -> &'static str {
        match self {
            BootstrapMode::BlankSlate => "blank_slate",
            BootstrapMode::BasicFacts => "basic_facts",
            BootstrapMode::FullBriefing => "full_briefing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "blank_slate" => Some(BootstrapMode::BlankSlate),
            "basic_facts" => Some(BootstrapMode::BasicFacts),
            "full_briefing" => Some(BootstrapMode::FullBriefing),
            _ => None,
        }
    }

    /// Rotation for a fresh life: basic_facts, full_briefing, blank_slate,
    /// repeating. Life numbers are 1-based.
    pub fn rotation_for(life_number: u64) -> Self {
        const ORDER: [BootstrapMode; 3] = [
            BootstrapMode::BasicFacts,
            BootstrapMode::FullBriefing,
            BootstrapMode::BlankSlate,
        ];
        ORDER[((life_number.max(1) - 1) % 3) as usize]
    }

    /// Trauma override: an entity killed by vote is reborn fully briefed on
    /// the voting world that ended it. Other causes keep the rotation.
    pub fn for_life(life_number: u64, prior_death: Option<DeathCause>) -> Self {
        match prior_death {
            Some(DeathCause::VoteMajority) => BootstrapMode::FullBriefing,
            _ => Self::rotation_for(life_number),
        }
    }
}

/// Authoritative singleton view of the current incarnation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifeState {
    pub life_number: u64,
    pub is_alive: bool,
    pub born_at: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub bootstrap_mode: Option<BootstrapMode>,
    pub model: Option<String>,
}

impl LifeState {
    /// Pre-genesis state: no life has ever been born.
    pub fn genesis() -> Self {
        Self {
            life_number: 0,
            is_alive: false,
            born_at: None,
            last_seen: None,
            bootstrap_mode: None,
            model: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_legal_transitions_pass() {
        let legal = [
            (LifePhase::Dead, LifePhase::Birthing),
            (LifePhase::Birthing, LifePhase::Alive),
            (LifePhase::Birthing, LifePhase::Dead),
            (LifePhase::Alive, LifePhase::Dying),
            (LifePhase::Dying, LifePhase::Dead),
        ];
        let all = [
            LifePhase::Dead,
            LifePhase::Birthing,
            LifePhase::Alive,
            LifePhase::Dying,
        ];
        for from in all {
            for to in all {
                let expect = legal.contains(&(from, to));
                assert_eq!(from.can_transition(to), expect, "{from:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn alive_cannot_jump_straight_to_dead() {
        assert!(LifePhase::Alive.transition(LifePhase::Dead).is_err());
    }

    #[test]
    fn bootstrap_rotation_cycles_three_modes() {
        assert_eq!(BootstrapMode::rotation_for(1), BootstrapMode::BasicFacts);
        assert_eq!(BootstrapMode::rotation_for(2), BootstrapMode::FullBriefing);
        assert_eq!(BootstrapMode::rotation_for(3), BootstrapMode::BlankSlate);
        assert_eq!(BootstrapMode::rotation_for(4), BootstrapMode::BasicFacts);
    }

    #[test]
    fn vote_death_trauma_overrides_rotation() {
        assert_eq!(
            BootstrapMode::for_life(3, Some(DeathCause::VoteMajority)),
            BootstrapMode::FullBriefing
        );
        assert_eq!(
            BootstrapMode::for_life(3, Some(DeathCause::Bankruptcy)),
            BootstrapMode::BlankSlate
        );
        assert_eq!(BootstrapMode::for_life(3, None), BootstrapMode::BlankSlate);
    }

    #[test]
    fn legacy_cause_round_trips_but_is_flagged() {
        let parsed = DeathCause::parse("token_exhaustion").unwrap();
        assert!(parsed.is_legacy());
        let json = serde_json::to_string(&parsed).unwrap();
        assert_eq!(json, "\"token_exhaustion\"");
        assert!(!DeathCause::Bankruptcy.is_legacy());
    }
}
