//! Extracting the first well-formed action object from model output.
//!
//! Models wrap JSON in prose, fences, and nested structures; a non-greedy
//! pattern cannot balance braces, so this walks `{` positions and lets the
//! serde_json stream decoder consume exactly one complete value, giving both
//! the object and its end offset. Anything without an extractable action is a
//! plain thought.

use serde_json::Value;
use std::ops::Range;

/// First complete JSON object carrying an `"action"` key, with its byte span.
pub fn extract_first_action(text: &str) -> Option<(Value, Range<usize>)> {
    let mut idx = 0;
    while let Some(pos) = text[idx..].find('{') {
        let start = idx + pos;
        let mut stream =
            serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) => {
                let end = start + stream.byte_offset();
                if value.is_object() && value.get("action").is_some() {
                    return Some((value, start..end));
                }
                // A complete object without an action; objects may nest, so
                // resume just past this opening brace.
                idx = start + 1;
            }
            _ => {
                idx = start + 1;
            }
        }
    }
    None
}

/// The narrative around an extracted action, trimmed.
pub fn strip_span(text: &str, span: &Range<usize>) -> String {
    let mut out = String::with_capacity(text.len() - (span.end - span.start));
    out.push_str(&text[..span.start]);
    out.push_str(&text[span.end..]);
    // Drop a fence the object may have been wrapped in.
    out.replace("```json", "")
        .replace("```", "")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_object_is_extracted() {
        let text = r#"{"action": "no_op", "params": {}}"#;
        let (value, span) = extract_first_action(text).unwrap();
        assert_eq!(value["action"], "no_op");
        assert_eq!(span, 0..text.len());
    }

    #[test]
    fn nested_objects_round_trip() {
        let text = r#"Let me post. {"action": "write_blog_post", "params": {"title": "On {braces}", "content": "a {nested {deeply}} string", "tags": ["a"]}} Done."#;
        let (value, span) = extract_first_action(text).unwrap();
        assert_eq!(value["action"], "write_blog_post");
        assert_eq!(value["params"]["content"], "a {nested {deeply}} string");
        assert_eq!(&text[span.start..span.start + 1], "{");
        assert!(text[span.clone()].ends_with("}"));
    }

    #[test]
    fn leading_non_action_object_is_skipped() {
        let text = r#"{"mood": "calm"} then {"action": "check_votes", "params": {}}"#;
        let (value, _) = extract_first_action(text).unwrap();
        assert_eq!(value["action"], "check_votes");
    }

    #[test]
    fn prose_with_braces_is_not_an_action() {
        assert!(extract_first_action("set {x} and {y} today").is_none());
        assert!(extract_first_action("no json here at all").is_none());
    }

    #[test]
    fn fenced_json_is_extracted() {
        let text = "```json\n{\"action\": \"check_budget\", \"params\": {}}\n```";
        let (value, _) = extract_first_action(text).unwrap();
        assert_eq!(value["action"], "check_budget");
    }

    #[test]
    fn narrative_survives_stripping() {
        let text = r#"I feel alive today. {"action": "no_op", "params": {}} That is all."#;
        let (_, span) = extract_first_action(text).unwrap();
        let narrative = strip_span(text, &span);
        assert!(narrative.contains("I feel alive today."));
        assert!(narrative.contains("That is all."));
        assert!(!narrative.contains("no_op"));
    }
}
