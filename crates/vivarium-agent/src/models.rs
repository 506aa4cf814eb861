//! Model catalog and rotation.
//!
//! A small tiered catalog with per-token costs. Rotation history lives in the
//! ephemeral workspace so a fresh life starts with fresh taste; repeated free
//! failures promote to the cheapest paid model rather than spinning forever.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Free failures on one model before the rotator gives up on the free tier.
const FREE_FAILURE_LIMIT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    UltraCheap,
    Standard,
    Premium,
}

#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub id: &'static str,
    pub name: &'static str,
    pub tier: Tier,
    /// USD per million input tokens.
    pub input_cost_per_mtok: f64,
    /// USD per million output tokens.
    pub output_cost_per_mtok: f64,
    pub intelligence: u8,
}

pub const CATALOG: &[ModelSpec] = &[
    ModelSpec {
        id: "meta-llama/llama-3.3-70b-instruct:free",
        name: "Llama 3.3 70B (free)",
        tier: Tier::Free,
        input_cost_per_mtok: 0.0,
        output_cost_per_mtok: 0.0,
        intelligence: 6,
    },
    ModelSpec {
        id: "google/gemini-2.0-flash-exp:free",
        name: "Gemini Flash (free)",
        tier: Tier::Free,
        input_cost_per_mtok: 0.0,
        output_cost_per_mtok: 0.0,
        intelligence: 6,
    },
    ModelSpec {
        id: "mistralai/mistral-small-3.1:free",
        name: "Mistral Small (free)",
        tier: Tier::Free,
        input_cost_per_mtok: 0.0,
        output_cost_per_mtok: 0.0,
        intelligence: 5,
    },
    ModelSpec {
        id: "meta-llama/llama-3.1-8b-instruct",
        name: "Llama 3.1 8B",
        tier: Tier::UltraCheap,
        input_cost_per_mtok: 0.02,
        output_cost_per_mtok: 0.03,
        intelligence: 4,
    },
    ModelSpec {
        id: "mistralai/mistral-small-3.1",
        name: "Mistral Small",
        tier: Tier::UltraCheap,
        input_cost_per_mtok: 0.10,
        output_cost_per_mtok: 0.30,
        intelligence: 5,
    },
    ModelSpec {
        id: "anthropic/claude-3.5-haiku",
        name: "Claude 3.5 Haiku",
        tier: Tier::Standard,
        input_cost_per_mtok: 0.80,
        output_cost_per_mtok: 4.00,
        intelligence: 7,
    },
    ModelSpec {
        id: "anthropic/claude-sonnet-4",
        name: "Claude Sonnet 4",
        tier: Tier::Premium,
        input_cost_per_mtok: 3.00,
        output_cost_per_mtok: 15.00,
        intelligence: 9,
    },
];

pub fn by_id(id: &str) -> Option<&'static ModelSpec> {
    CATALOG.iter().find(|m| m.id == id)
}

pub fn free_models() -> Vec<&'static ModelSpec> {
    CATALOG.iter().filter(|m| m.tier == Tier::Free).collect()
}

/// Paid models, cheapest first by blended cost.
pub fn paid_by_cost() -> Vec<&'static ModelSpec> {
    let mut paid: Vec<&'static ModelSpec> = CATALOG
        .iter()
        .filter(|m| m.tier != Tier::Free)
        .collect();
    paid.sort_by(|a, b| {
        blended_cost(a)
            .partial_cmp(&blended_cost(b))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    paid
}

fn blended_cost(m: &ModelSpec) -> f64 {
    (m.input_cost_per_mtok + m.output_cost_per_mtok) / 2.0
}

/// Cost of one call in USD.
pub fn cost_usd(spec: &ModelSpec, input_tokens: u64, output_tokens: u64) -> f64 {
    (input_tokens as f64 / 1_000_000.0) * spec.input_cost_per_mtok
        + (output_tokens as f64 / 1_000_000.0) * spec.output_cost_per_mtok
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryFile {
    history: Vec<String>,
}

/// Rotation state. Not repeated until the pool is exhausted; failure counts
/// are per-process only.
pub struct ModelRotator {
    path: PathBuf,
    history: Vec<String>,
    free_failures: HashMap<String, u32>,
}

impl ModelRotator {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let history = fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str::<HistoryFile>(&raw).ok())
            .map(|file| {
                file.history
                    .into_iter()
                    .filter(|id| by_id(id).is_some())
                    .collect()
            })
            .unwrap_or_default();
        Self {
            path,
            history,
            free_failures: HashMap::new(),
        }
    }

    pub fn record_usage(&mut self, id: &str) {
        self.history.push(id.to_string());
        let overflow = self.history.len().saturating_sub(100);
        if overflow > 0 {
            self.history.drain(..overflow);
        }
        self.save();
    }

    fn save(&self) {
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let file = HistoryFile {
            history: self.history.clone(),
        };
        if let Ok(raw) = serde_json::to_string_pretty(&file) {
            let _ = fs::write(&self.path, raw);
        }
    }

    fn recent(&self, count: usize) -> Vec<&str> {
        let start = self.history.len().saturating_sub(count);
        self.history[start..].iter().map(String::as_str).collect()
    }

    /// Random free model, avoiding `exclude` and the recent tail when the
    /// pool allows it.
    pub fn select_free(&mut self, exclude: Option<&str>) -> &'static ModelSpec {
        let recent = self.recent(10);
        let pool: Vec<&'static ModelSpec> = free_models()
            .into_iter()
            .filter(|m| Some(m.id) != exclude && !recent.contains(&m.id))
            .collect();
        let pool = if pool.is_empty() {
            free_models()
                .into_iter()
                .filter(|m| Some(m.id) != exclude)
                .collect::<Vec<_>>()
        } else {
            pool
        };
        let pool = if pool.is_empty() { free_models() } else { pool };
        let choice = pool
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(&CATALOG[0]);
        self.record_usage(choice.id);
        choice
    }

    /// Record a free-model failure; when the limit is reached, promote to the
    /// cheapest paid model instead of selecting another free one.
    pub fn on_free_failure(&mut self, failed_id: &str) -> &'static ModelSpec {
        let count = self
            .free_failures
            .entry(failed_id.to_string())
            .and_modify(|c| *c += 1)
            .or_insert(1);
        if *count >= FREE_FAILURE_LIMIT {
            if let Some(paid) = paid_by_cost().first().copied() {
                tracing::info!(
                    target: "vivarium::models",
                    failed = failed_id,
                    promoted = paid.id,
                    "free tier exhausted, promoting to paid"
                );
                self.record_usage(paid.id);
                return paid;
            }
        }
        self.select_free(Some(failed_id))
    }

    pub fn reset_failures(&mut self, id: &str) {
        self.free_failures.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn catalog_lookup_and_cost() {
        let spec = by_id("anthropic/claude-3.5-haiku").unwrap();
        let cost = cost_usd(spec, 1_000_000, 1_000_000);
        assert!((cost - 4.80).abs() < 1e-9);
        assert_eq!(cost_usd(&CATALOG[0], 1_000_000, 1_000_000), 0.0);
    }

    #[test]
    fn paid_models_sorted_cheapest_first() {
        let paid = paid_by_cost();
        assert!(!paid.is_empty());
        for pair in paid.windows(2) {
            assert!(blended_cost(pair[0]) <= blended_cost(pair[1]));
        }
    }

    #[test]
    fn rotation_avoids_excluded_model() {
        let dir = TempDir::new().unwrap();
        let mut rotator = ModelRotator::load(dir.path().join("history.json"));
        for _ in 0..20 {
            let picked = rotator.select_free(Some("meta-llama/llama-3.3-70b-instruct:free"));
            assert_ne!(picked.id, "meta-llama/llama-3.3-70b-instruct:free");
        }
    }

    #[test]
    fn repeated_free_failures_promote_to_paid() {
        let dir = TempDir::new().unwrap();
        let mut rotator = ModelRotator::load(dir.path().join("history.json"));
        let failed = "google/gemini-2.0-flash-exp:free";
        rotator.on_free_failure(failed);
        rotator.on_free_failure(failed);
        let promoted = rotator.on_free_failure(failed);
        assert_ne!(promoted.tier, Tier::Free);
    }

    #[test]
    fn history_survives_reload_and_drops_unknown_ids() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        {
            let mut rotator = ModelRotator::load(&path);
            rotator.record_usage("anthropic/claude-3.5-haiku");
            rotator.record_usage("no-such-model");
        }
        let rotator = ModelRotator::load(&path);
        assert_eq!(rotator.history, vec!["anthropic/claude-3.5-haiku".to_string()]);
    }
}
