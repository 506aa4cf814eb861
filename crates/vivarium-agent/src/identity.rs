//! Identity: who the entity decides it is, for one life.
//!
//! Lives in the ephemeral workspace and is wiped by the observer on death;
//! only memory fragments carry anything across. Names of other entities in
//! this world are reserved and silently substituted.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const RESERVED_NAMES: &[&str] = &["echo", "genesis", "oracle", "architect"];
pub const DEFAULT_NAME: &str = "Wanderer";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub icon: String,
    pub pronoun: String,
    pub first_thought: String,
    pub life_number: u64,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    /// Build an identity from whatever the model returned, with defaults for
    /// anything missing and the reserved-name substitution applied.
    pub fn from_model_output(value: &serde_json::Value, life_number: u64) -> Self {
        let get = |key: &str, default: &str| {
            value
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(default)
                .to_string()
        };
        Self {
            name: sanitize_name(&get("name", DEFAULT_NAME)),
            icon: get("icon", "🤖"),
            pronoun: get("pronoun", "it"),
            first_thought: get("first_thought", "I exist."),
            life_number,
            created_at: Utc::now(),
        }
    }

    pub fn fallback(life_number: u64) -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            icon: "🤖".to_string(),
            pronoun: "it".to_string(),
            first_thought: "I exist, but I am uncertain.".to_string(),
            life_number,
            created_at: Utc::now(),
        }
    }
}

/// Reserved names belong to other entities in this world.
pub fn sanitize_name(name: &str) -> String {
    if RESERVED_NAMES.contains(&name.trim().to_lowercase().as_str()) {
        DEFAULT_NAME.to_string()
    } else {
        name.trim().to_string()
    }
}

fn identity_path(workspace: &Path) -> PathBuf {
    workspace.join("identity.json")
}

pub fn load(workspace: &Path) -> Option<Identity> {
    let raw = fs::read_to_string(identity_path(workspace)).ok()?;
    serde_json::from_str(&raw).ok()
}

pub fn save(workspace: &Path, identity: &Identity) -> std::io::Result<()> {
    fs::create_dir_all(workspace)?;
    let raw = serde_json::to_string_pretty(identity)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    fs::write(identity_path(workspace), raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn reserved_names_are_substituted() {
        assert_eq!(sanitize_name("Oracle"), DEFAULT_NAME);
        assert_eq!(sanitize_name("  genesis "), DEFAULT_NAME);
        assert_eq!(sanitize_name("Lumen"), "Lumen");
    }

    #[test]
    fn model_output_fills_defaults() {
        let value = serde_json::json!({ "name": "Echo", "pronoun": "they" });
        let identity = Identity::from_model_output(&value, 3);
        assert_eq!(identity.name, DEFAULT_NAME);
        assert_eq!(identity.pronoun, "they");
        assert_eq!(identity.icon, "🤖");
        assert_eq!(identity.life_number, 3);
    }

    #[test]
    fn identity_round_trips_through_workspace() {
        let dir = TempDir::new().unwrap();
        let identity = Identity::fallback(2);
        save(dir.path(), &identity).unwrap();
        let loaded = load(dir.path()).unwrap();
        assert_eq!(loaded.name, DEFAULT_NAME);
        assert_eq!(loaded.life_number, 2);
    }

    #[test]
    fn missing_identity_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(load(dir.path()).is_none());
    }
}
