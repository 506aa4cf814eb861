//! Vote round adjudication.
//!
//! A round dies only on a strict majority: at least [`MIN_VOTES_FOR_DEATH`]
//! total ballots and `die > live`. Ties survive.

use serde::{Deserialize, Serialize};

/// Minimum total ballots before a round can kill.
pub const MIN_VOTES_FOR_DEATH: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    Live,
    Die,
}

impl VoteChoice {
    pub fn as_str(self) -> &'static str {
        match self {
            VoteChoice::Live => "live",
            VoteChoice::Die => "die",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "live" => Some(VoteChoice::Live),
            "die" => Some(VoteChoice::Die),
            _ => None,
        }
    }
}

/// Lifecycle of a round row. Open rounds transition exactly once to a closed
/// status. `ClosedDied` is reserved for vote adjudication; rounds cut short by
/// another death cause close as `ClosedSurvived`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Open,
    ClosedSurvived,
    ClosedDied,
}

impl RoundStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RoundStatus::Open => "open",
            RoundStatus::ClosedSurvived => "closed_survived",
            RoundStatus::ClosedDied => "closed_died",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(RoundStatus::Open),
            "closed_survived" => Some(RoundStatus::ClosedSurvived),
            "closed_died" => Some(RoundStatus::ClosedDied),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    Survived,
    Died,
}

/// Adjudicate a closing round from its final counters.
pub fn adjudicate(live: u64, die: u64) -> RoundOutcome {
    if live + die >= MIN_VOTES_FOR_DEATH && die > live {
        RoundOutcome::Died
    } else {
        RoundOutcome::Survived
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_votes_never_kill() {
        assert_eq!(adjudicate(0, 2), RoundOutcome::Survived);
    }

    #[test]
    fn three_votes_with_majority_kill() {
        assert_eq!(adjudicate(1, 2), RoundOutcome::Died);
        assert_eq!(adjudicate(0, 3), RoundOutcome::Died);
    }

    #[test]
    fn exact_tie_survives() {
        // die > live is strict, so 2-2 at total 4 survives.
        assert_eq!(adjudicate(2, 2), RoundOutcome::Survived);
    }

    #[test]
    fn live_majority_survives() {
        assert_eq!(adjudicate(5, 3), RoundOutcome::Survived);
    }
}
