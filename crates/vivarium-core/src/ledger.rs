//! The credit ledger: the monetary side of staying alive.
//!
//! A JSON file under the persistent credits directory. It survives death by
//! design, unlike the ephemeral workspace. One writer at a time (the agent
//! wraps it in a mutex); every mutation is committed with a tmp-file rename
//! so a crash never leaves a torn file.
//!
//! Bankruptcy is decided here, on the charge that crosses the threshold:
//! the post-charge balance is computed before commit, so a charge either
//! returns `Ok` with balance > $0.01 or `Bankrupt` with balance ≤ $0.01, and
//! the balance never goes negative.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Bounded charge history length; long-term totals live in the per-model map.
pub const LEDGER_HISTORY_CAP: usize = 100;

/// Balance at or below this is bankruptcy.
const BANKRUPTCY_FLOOR_USD: f64 = 0.01;

/// Slack for accumulated float error so "exactly $0.01" reads as bankrupt.
const BALANCE_EPSILON: f64 = 1e-9;

fn at_or_below_floor(balance: f64) -> bool {
    balance <= BANKRUPTCY_FLOOR_USD + BALANCE_EPSILON
}

/// One committed charge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRecord {
    pub ts: DateTime<Utc>,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

/// Outcome of a charge, decided against the post-charge balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeOutcome {
    Ok,
    LowBalance,
    Critical,
    Bankrupt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerFile {
    monthly_budget_usd: f64,
    balance_usd: f64,
    reset_at: DateTime<Utc>,
    #[serde(default)]
    total_lives: u64,
    #[serde(default)]
    per_model_spend: BTreeMap<String, f64>,
    #[serde(default)]
    history: Vec<ChargeRecord>,
}

/// Per-model aggregate for the budget report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpendRow {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
}

/// What `/budget` serves and the observer's poller consumes. `balance_usd` is
/// the sole bankruptcy signal; everything else is display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetReport {
    pub balance_usd: f64,
    pub monthly_budget_usd: f64,
    pub spent_this_month_usd: f64,
    pub remaining_percent: f64,
    pub status: String,
    pub reset_at: DateTime<Utc>,
    pub days_until_reset: i64,
    pub total_lives: u64,
    pub per_model_spend: BTreeMap<String, f64>,
    pub models: Vec<ModelSpendRow>,
    pub history_tail: Vec<ChargeRecord>,
}

/// Persistent credit ledger.
pub struct CreditLedger {
    path: PathBuf,
    state: LedgerFile,
}

impl CreditLedger {
    /// Load the ledger, creating a fresh one with a full balance when the
    /// file does not exist. Applies a pending calendar reset immediately.
    pub fn open(path: impl Into<PathBuf>, monthly_budget_usd: f64) -> Result<Self, CoreError> {
        let path = path.into();
        let state = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            LedgerFile {
                monthly_budget_usd,
                balance_usd: monthly_budget_usd,
                reset_at: next_month_boundary(Utc::now()),
                total_lives: 0,
                per_model_spend: BTreeMap::new(),
                history: Vec::new(),
            }
        };
        let mut ledger = Self { path, state };
        ledger.reset_if_due(Utc::now())?;
        ledger.persist()?;
        Ok(ledger)
    }

    /// First-access-after-boundary reset: balance back to the monthly budget,
    /// history cleared, next boundary armed. Per-model aggregates are
    /// all-time and survive the reset.
    pub fn reset_if_due(&mut self, now: DateTime<Utc>) -> Result<bool, CoreError> {
        if now < self.state.reset_at {
            return Ok(false);
        }
        tracing::info!(
            target: "vivarium::ledger",
            budget = self.state.monthly_budget_usd,
            "monthly budget reset"
        );
        self.state.balance_usd = self.state.monthly_budget_usd;
        self.state.history.clear();
        self.state.reset_at = next_month_boundary(now);
        self.persist()?;
        Ok(true)
    }

    /// Commit a charge. The post-charge balance decides the outcome; a
    /// `Bankrupt` return means this charge crossed the floor. A failed write
    /// here is fatal to the caller by contract.
    pub fn charge(
        &mut self,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
    ) -> Result<ChargeOutcome, CoreError> {
        if cost_usd < 0.0 {
            return Err(CoreError::Validation("negative charge".into()));
        }
        self.reset_if_due(Utc::now())?;

        let next_balance = (self.state.balance_usd - cost_usd).max(0.0);
        self.state.balance_usd = next_balance;
        *self.state.per_model_spend.entry(model.to_string()).or_insert(0.0) += cost_usd;
        self.state.history.push(ChargeRecord {
            ts: Utc::now(),
            model: model.to_string(),
            input_tokens,
            output_tokens,
            cost_usd,
        });
        let overflow = self.state.history.len().saturating_sub(LEDGER_HISTORY_CAP);
        if overflow > 0 {
            self.state.history.drain(..overflow);
        }
        self.persist()?;

        Ok(if at_or_below_floor(next_balance) {
            ChargeOutcome::Bankrupt
        } else if next_balance < 0.50 {
            ChargeOutcome::Critical
        } else if next_balance < 1.00 {
            ChargeOutcome::LowBalance
        } else {
            ChargeOutcome::Ok
        })
    }

    pub fn balance(&self) -> f64 {
        self.state.balance_usd
    }

    pub fn is_bankrupt(&self) -> bool {
        at_or_below_floor(self.state.balance_usd)
    }

    /// Called once per birth so the report can show lives lived.
    pub fn increment_lives(&mut self) -> Result<(), CoreError> {
        self.state.total_lives += 1;
        self.persist()
    }

    pub fn status(&self) -> BudgetReport {
        let state = &self.state;
        let spent = (state.monthly_budget_usd - state.balance_usd).max(0.0);
        let remaining_percent = if state.monthly_budget_usd > 0.0 {
            (state.balance_usd / state.monthly_budget_usd) * 100.0
        } else {
            0.0
        };
        let status = if at_or_below_floor(state.balance_usd) {
            "bankrupt"
        } else if state.balance_usd < 0.50 {
            "critical"
        } else if state.balance_usd < 1.00 {
            "cautious"
        } else if state.balance_usd < 3.00 {
            "moderate"
        } else {
            "comfortable"
        };

        let mut per_model_tokens: BTreeMap<String, ModelSpendRow> = BTreeMap::new();
        for record in &state.history {
            let row = per_model_tokens
                .entry(record.model.clone())
                .or_insert_with(|| ModelSpendRow {
                    model: record.model.clone(),
                    input_tokens: 0,
                    output_tokens: 0,
                    total_tokens: 0,
                    cost_usd: 0.0,
                });
            row.input_tokens += record.input_tokens;
            row.output_tokens += record.output_tokens;
            row.total_tokens += record.input_tokens + record.output_tokens;
            row.cost_usd += record.cost_usd;
        }
        let mut models: Vec<ModelSpendRow> = per_model_tokens.into_values().collect();
        models.sort_by(|a, b| b.total_tokens.cmp(&a.total_tokens));

        let tail_start = state.history.len().saturating_sub(10);
        BudgetReport {
            balance_usd: state.balance_usd,
            monthly_budget_usd: state.monthly_budget_usd,
            spent_this_month_usd: spent,
            remaining_percent,
            status: status.to_string(),
            reset_at: state.reset_at,
            days_until_reset: (state.reset_at - Utc::now()).num_days().max(0),
            total_lives: state.total_lives,
            per_model_spend: state.per_model_spend.clone(),
            models,
            history_tail: state.history[tail_start..].to_vec(),
        }
    }

    fn persist(&self) -> Result<(), CoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&self.state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// First instant of the month after `now` (UTC).
fn next_month_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ledger_in(dir: &TempDir, budget: f64) -> CreditLedger {
        CreditLedger::open(dir.path().join("balance.json"), budget).unwrap()
    }

    #[test]
    fn fresh_ledger_starts_at_full_budget() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger_in(&dir, 5.0);
        assert_eq!(ledger.balance(), 5.0);
        assert!(!ledger.is_bankrupt());
    }

    #[test]
    fn charge_that_crosses_floor_returns_bankrupt() {
        let dir = TempDir::new().unwrap();
        let mut ledger = ledger_in(&dir, 5.0);
        // Walk balance down to 0.02, then cross with a 0.015 charge.
        let outcome = ledger.charge("model-a", 100, 100, 4.98).unwrap();
        assert_ne!(outcome, ChargeOutcome::Bankrupt);
        let outcome = ledger.charge("model-a", 1000, 500, 0.015).unwrap();
        assert_eq!(outcome, ChargeOutcome::Bankrupt);
        assert!((ledger.balance() - 0.005).abs() < 1e-9);
    }

    #[test]
    fn balance_exactly_at_floor_is_bankrupt() {
        let dir = TempDir::new().unwrap();
        let mut ledger = ledger_in(&dir, 1.0);
        let outcome = ledger.charge("m", 0, 0, 0.99).unwrap();
        assert_eq!(outcome, ChargeOutcome::Bankrupt);
        assert!(ledger.is_bankrupt());
    }

    #[test]
    fn balance_just_above_floor_is_not_bankrupt() {
        let dir = TempDir::new().unwrap();
        let mut ledger = ledger_in(&dir, 1.0);
        let outcome = ledger.charge("m", 0, 0, 0.98).unwrap();
        assert_ne!(outcome, ChargeOutcome::Bankrupt);
        assert!(!ledger.is_bankrupt());
    }

    #[test]
    fn balance_never_goes_negative() {
        let dir = TempDir::new().unwrap();
        let mut ledger = ledger_in(&dir, 1.0);
        let outcome = ledger.charge("m", 0, 0, 10.0).unwrap();
        assert_eq!(outcome, ChargeOutcome::Bankrupt);
        assert_eq!(ledger.balance(), 0.0);
    }

    #[test]
    fn history_is_bounded_and_aggregates_survive() {
        let dir = TempDir::new().unwrap();
        let mut ledger = ledger_in(&dir, 100.0);
        for _ in 0..(LEDGER_HISTORY_CAP + 20) {
            ledger.charge("m", 10, 10, 0.001).unwrap();
        }
        let report = ledger.status();
        assert_eq!(report.history_tail.len(), 10);
        let spent = report.per_model_spend.get("m").copied().unwrap_or(0.0);
        assert!((spent - 0.12).abs() < 1e-9);
    }

    #[test]
    fn ledger_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut ledger = ledger_in(&dir, 5.0);
            ledger.charge("m", 5, 5, 1.5).unwrap();
        }
        let reopened = ledger_in(&dir, 5.0);
        assert!((reopened.balance() - 3.5).abs() < 1e-9);
    }

    #[test]
    fn due_reset_restores_budget_and_clears_history() {
        let dir = TempDir::new().unwrap();
        let mut ledger = ledger_in(&dir, 5.0);
        ledger.charge("m", 5, 5, 2.0).unwrap();
        // Force the boundary into the past and touch the ledger.
        ledger.state.reset_at = Utc::now() - chrono::Duration::days(1);
        let reset = ledger.reset_if_due(Utc::now()).unwrap();
        assert!(reset);
        assert_eq!(ledger.balance(), 5.0);
        assert!(ledger.status().history_tail.is_empty());
        assert!(ledger.state.reset_at > Utc::now());
    }
}
