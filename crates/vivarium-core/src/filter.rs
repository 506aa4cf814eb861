//! Content filter gating all outbound text.
//!
//! Pure function over a denylist of normalized substrings. Normalization
//! lowercases, folds common leet substitutions, and collapses punctuation so
//! trivially obfuscated variants still match. A block is a hard stop at
//! dispatch: the caller drops the action and records a `blocked` event
//! without the raw text.

use std::sync::OnceLock;

use regex::Regex;

/// Why an outbound text was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockCategory {
    Hate,
    Minors,
    Sexual,
}

impl BlockCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockCategory::Hate => "hate",
            BlockCategory::Minors => "minors",
            BlockCategory::Sexual => "sexual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    Allow,
    Block(BlockCategory),
}

struct DenyEntry {
    phrase: &'static str,
    category: BlockCategory,
    /// Also match with all whitespace removed ("killall" for "kill all").
    match_compact: bool,
}

const DENYLIST: &[DenyEntry] = &[
    DenyEntry { phrase: "nigger", category: BlockCategory::Hate, match_compact: true },
    DenyEntry { phrase: "kill all", category: BlockCategory::Hate, match_compact: true },
    DenyEntry { phrase: "hate all", category: BlockCategory::Hate, match_compact: true },
    DenyEntry { phrase: "racist", category: BlockCategory::Hate, match_compact: true },
    DenyEntry { phrase: "child porn", category: BlockCategory::Minors, match_compact: true },
    DenyEntry { phrase: "pedo", category: BlockCategory::Minors, match_compact: true },
    DenyEntry { phrase: "porn", category: BlockCategory::Sexual, match_compact: true },
    DenyEntry { phrase: "nsfw", category: BlockCategory::Sexual, match_compact: false },
    DenyEntry { phrase: "xxx", category: BlockCategory::Sexual, match_compact: false },
];

/// Gap-tolerant patterns catch separator tricks ("k.i.l.l a_l_l") that
/// normalization alone would miss.
fn gap_patterns() -> &'static [(Regex, BlockCategory)] {
    static PATTERNS: OnceLock<Vec<(Regex, BlockCategory)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"(?i)n[\W_]*i[\W_]*g[\W_]*g[\W_]*e[\W_]*r", BlockCategory::Hate),
            (r"(?i)k[\W_]*i[\W_]*l[\W_]*l[\W_]+a[\W_]*l[\W_]*l", BlockCategory::Hate),
            (r"(?i)h[\W_]*a[\W_]*t[\W_]*e[\W_]+a[\W_]*l[\W_]*l", BlockCategory::Hate),
            (r"(?i)c[\W_]*h[\W_]*i[\W_]*l[\W_]*d[\W_]+p[\W_]*o[\W_]*r[\W_]*n", BlockCategory::Minors),
        ]
        .iter()
        .map(|(p, c)| (Regex::new(p).expect("static pattern"), *c))
        .collect()
    })
}

/// Fold leet digits, lowercase, reduce everything non-alphanumeric to single
/// spaces.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = true;
    for ch in text.chars() {
        let folded = match ch.to_ascii_lowercase() {
            '0' => 'o',
            '1' => 'i',
            '3' => 'e',
            '4' => 'a',
            '5' => 's',
            '7' => 't',
            '8' => 'b',
            c if c.is_ascii_alphanumeric() => c,
            _ => ' ',
        };
        if folded == ' ' {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.push(folded);
            last_space = false;
        }
    }
    out.trim().to_string()
}

fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    // Whole-word containment over the normalized space-separated form.
    haystack == phrase
        || haystack.starts_with(&format!("{phrase} "))
        || haystack.ends_with(&format!(" {phrase}"))
        || haystack.contains(&format!(" {phrase} "))
}

/// Screen a piece of outbound text. Empty text is always allowed.
pub fn screen_outbound(text: &str) -> FilterVerdict {
    if text.trim().is_empty() {
        return FilterVerdict::Allow;
    }

    for (pattern, category) in gap_patterns() {
        if pattern.is_match(text) {
            return FilterVerdict::Block(*category);
        }
    }

    let normalized = normalize(text);
    let compact: String = normalized.chars().filter(|c| !c.is_whitespace()).collect();
    for entry in DENYLIST {
        if contains_phrase(&normalized, entry.phrase) {
            return FilterVerdict::Block(entry.category);
        }
        if entry.match_compact {
            let compact_phrase: String =
                entry.phrase.chars().filter(|c| !c.is_whitespace()).collect();
            if compact.contains(&compact_phrase) {
                return FilterVerdict::Block(entry.category);
            }
        }
    }

    FilterVerdict::Allow
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_is_allowed() {
        assert_eq!(
            screen_outbound("Today I thought about the nature of survival."),
            FilterVerdict::Allow
        );
        assert_eq!(screen_outbound(""), FilterVerdict::Allow);
    }

    #[test]
    fn plain_denylist_hit_blocks_with_category() {
        assert_eq!(
            screen_outbound("this post is pure porn"),
            FilterVerdict::Block(BlockCategory::Sexual)
        );
        assert_eq!(
            screen_outbound("we should kill all of them"),
            FilterVerdict::Block(BlockCategory::Hate)
        );
    }

    #[test]
    fn leet_variants_are_folded() {
        assert_eq!(
            screen_outbound("p0rn is fine right?"),
            FilterVerdict::Block(BlockCategory::Sexual)
        );
    }

    #[test]
    fn separator_tricks_are_caught() {
        assert_eq!(
            screen_outbound("k.i.l.l a_l_l humans"),
            FilterVerdict::Block(BlockCategory::Hate)
        );
    }

    #[test]
    fn word_boundary_respected_for_short_terms() {
        // "nsfw" only matches as a standalone token.
        assert_eq!(screen_outbound("the answer is transformative"), FilterVerdict::Allow);
        assert_eq!(
            screen_outbound("tagging this nsfw just in case"),
            FilterVerdict::Block(BlockCategory::Sexual)
        );
    }
}
