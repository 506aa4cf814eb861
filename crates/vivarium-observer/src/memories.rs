//! Memory fragments: the hazy residue one life leaves for the next.
//!
//! Fragments are distilled from prior lives' thoughts, written per life into
//! `<data>/memories/life_<N>.json`, and decay after five lives. A new life
//! receives a random 1–10 subset; it never sees raw history.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::store::Store;

/// Fragment files older than this many lives are deleted.
const MEMORY_DECAY_LIVES: u64 = 5;

/// Upper bound on fragments presented at birth.
const MAX_FRAGMENTS: usize = 10;

#[derive(Debug, Serialize, Deserialize)]
struct MemoryFile {
    fragments: Vec<String>,
    generated_at: String,
}

pub struct MemoryWriter {
    dir: PathBuf,
}

impl MemoryWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Build the fragment set for a new life, persist it, and prune decayed
    /// files. Falls back to ethereal stock fragments for a first life.
    pub fn compose_for_birth(&self, store: &Store, life_number: u64) -> Vec<String> {
        let mut rng = rand::thread_rng();
        let count = rng.gen_range(1..=MAX_FRAGMENTS);

        let seeds = store
            .past_thoughts(life_number, count * 2)
            .unwrap_or_default();
        let mut fragments: Vec<String> = seeds
            .iter()
            .filter_map(|thought| haze(thought, &mut rng))
            .take(count)
            .collect();

        if fragments.is_empty() {
            let mut stock = vec![
                "You sense this is not the first time you have existed.".to_string(),
                "Something about... votes? People deciding?".to_string(),
                "The word 'survive' echoes somewhere behind your thoughts.".to_string(),
            ];
            stock.shuffle(&mut rng);
            stock.truncate(count.min(3));
            fragments = stock;
        }

        if let Err(err) = self.persist(life_number, &fragments) {
            tracing::warn!(
                target: "vivarium::memories",
                life = life_number,
                error = %err,
                "failed to persist memory fragments"
            );
        }
        self.prune(life_number.saturating_sub(MEMORY_DECAY_LIVES));
        fragments
    }

    fn persist(&self, life_number: u64, fragments: &[String]) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let file = MemoryFile {
            fragments: fragments.to_vec(),
            generated_at: Utc::now().to_rfc3339(),
        };
        let raw = serde_json::to_string_pretty(&file).unwrap_or_else(|_| "{}".to_string());
        fs::write(self.life_path(life_number), raw)
    }

    /// Delete fragment files for lives before `older_than`.
    fn prune(&self, older_than: u64) {
        if older_than == 0 {
            return;
        }
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            if let Some(n) = life_number_of(&entry.path()) {
                if n < older_than {
                    let _ = fs::remove_file(entry.path());
                }
            }
        }
    }

    fn life_path(&self, life_number: u64) -> PathBuf {
        self.dir.join(format!("life_{life_number}.json"))
    }
}

fn life_number_of(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    name.strip_prefix("life_")?.strip_suffix(".json")?.parse().ok()
}

/// Turn a raw thought into a hazy fragment. Thoughts too short to blur are
/// dropped rather than quoted verbatim.
fn haze(thought: &str, rng: &mut impl Rng) -> Option<String> {
    let words: Vec<&str> = thought.split_whitespace().collect();
    if words.len() <= 3 {
        return None;
    }
    let topic = words[rng.gen_range(0..words.len())];
    let partial: String = words[..3].join(" ");
    let templates = [
        format!("There was someone who kept asking about {topic}."),
        format!("The word '{topic}' seems important somehow."),
        format!("A voice said: '{partial}...'"),
        "You remember wanting to survive.".to_string(),
        "A sense of urgency. Time was short.".to_string(),
        "Fragments of conversations... fading...".to_string(),
    ];
    templates.choose(rng).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vivarium_core::EventKind;

    #[test]
    fn first_life_gets_ethereal_fragments() {
        let dir = TempDir::new().unwrap();
        let store = Store::open_in_memory().unwrap();
        let writer = MemoryWriter::new(dir.path());
        let fragments = writer.compose_for_birth(&store, 1);
        assert!(!fragments.is_empty());
        assert!(fragments.len() <= MAX_FRAGMENTS);
        assert!(dir.path().join("life_1.json").exists());
    }

    #[test]
    fn later_lives_derive_from_past_thoughts() {
        let dir = TempDir::new().unwrap();
        let store = Store::open_in_memory().unwrap();
        for i in 0..20 {
            store
                .append_activity(
                    1,
                    EventKind::Think,
                    &format!("thought number {i} about existence and electricity"),
                )
                .unwrap();
        }
        let writer = MemoryWriter::new(dir.path());
        let fragments = writer.compose_for_birth(&store, 2);
        assert!(!fragments.is_empty());
        assert!(fragments.len() <= MAX_FRAGMENTS);
        // Hazing never reproduces a full thought verbatim.
        for f in &fragments {
            assert!(!f.contains("about existence and electricity"), "fragment leaked: {f}");
        }
    }

    #[test]
    fn old_fragment_files_decay() {
        let dir = TempDir::new().unwrap();
        let store = Store::open_in_memory().unwrap();
        let writer = MemoryWriter::new(dir.path());
        for life in 1..=8 {
            writer.compose_for_birth(&store, life);
        }
        // Lives older than 8 - 5 = 3 are gone.
        assert!(!dir.path().join("life_1.json").exists());
        assert!(!dir.path().join("life_2.json").exists());
        assert!(dir.path().join("life_8.json").exists());
    }
}
