//! Visual Directive Extraction
//!
//! Generated teaching text may carry inline `[SHOW:<key>]` markers telling the
//! display which card to put on screen. Speech must never read them out, so
//! every assistant turn is split here into the text that gets spoken and the
//! ordered list of keys that get displayed.

use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// Matches `[SHOW:anything-but-a-closing-bracket]`.
static SHOW_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[SHOW:([^\]]+)\]").expect("static pattern is valid"));

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{2,}").expect("static pattern is valid"));

/// The result of splitting one piece of generated text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Extraction {
    /// Text with every directive marker removed, ready for speech.
    pub clean_text: String,
    /// Directive keys in the order they were encountered. Duplicates are kept.
    pub keys: Vec<String>,
}

impl Extraction {
    pub fn has_directives(&self) -> bool {
        !self.keys.is_empty()
    }
}

/// Splits `text` into speakable text and display directive keys.
///
/// Text without any marker is returned untouched. When markers are removed,
/// whitespace runs are collapsed to a single space and the ends are trimmed.
/// Removal repeats until no marker is left, so a marker that only appears
/// after an inner one was cut out is stripped as well.
pub fn extract(text: &str) -> Extraction {
    if !SHOW_PATTERN.is_match(text) {
        return Extraction {
            clean_text: text.to_string(),
            keys: Vec::new(),
        };
    }

    let mut keys = Vec::new();
    let mut current = text.to_string();
    while SHOW_PATTERN.is_match(&current) {
        keys.extend(
            SHOW_PATTERN
                .captures_iter(&current)
                .map(|caps| caps[1].to_string()),
        );
        current = SHOW_PATTERN.replace_all(&current, "").into_owned();
    }

    let clean_text = WHITESPACE_RUN.replace_all(&current, " ").trim().to_string();
    debug!(?keys, "Visual directives extracted");

    Extraction { clean_text, keys }
}

/// Drops repeated keys while keeping first-seen order.
pub fn dedup_keys(keys: &[String]) -> Vec<String> {
    let mut seen = Vec::with_capacity(keys.len());
    for key in keys {
        if !seen.contains(key) {
            seen.push(key.clone());
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_extracts_single_marker() {
        let out = extract("This is letter A. [SHOW:letter_A] Say Aaa!");
        assert_eq!(out.clean_text, "This is letter A. Say Aaa!");
        assert_eq!(out.keys, vec!["letter_A".to_string()]);
    }

    #[test]
    fn test_keeps_order_and_duplicates() {
        let out = extract("[SHOW:letter_A] A and [SHOW:number_1] one, again [SHOW:letter_A]");
        assert_eq!(out.keys, vec!["letter_A", "number_1", "letter_A"]);
        assert_eq!(out.clean_text, "A and one, again");
        assert_eq!(dedup_keys(&out.keys), vec!["letter_A", "number_1"]);
    }

    #[test]
    fn test_text_without_markers_is_unchanged() {
        let text = "  Plain   text stays\nexactly as it was.  ";
        let out = extract(text);
        assert_eq!(out.clean_text, text);
        assert!(out.keys.is_empty());
        assert!(!out.has_directives());
    }

    #[test]
    fn test_malformed_markers_are_left_alone() {
        let out = extract("Look [SHOW:] here [SHOW:letter_B");
        assert!(out.keys.is_empty());
        assert_eq!(out.clean_text, "Look [SHOW:] here [SHOW:letter_B");
    }

    #[test]
    fn test_marker_formed_by_removal_is_stripped() {
        let out = extract("a [SH[SHOW:x]OW:y] b");
        assert_eq!(out.keys, vec!["x", "y"]);
        assert_eq!(out.clean_text, "a b");
        assert_eq!(extract(&out.clean_text), Extraction {
            clean_text: "a b".to_string(),
            keys: vec![],
        });
    }

    #[test]
    fn test_key_may_contain_spaces_and_symbols() {
        let out = extract("[SHOW:fruit basket #2]Count them.");
        assert_eq!(out.keys, vec!["fruit basket #2"]);
        assert_eq!(out.clean_text, "Count them.");
    }

    proptest! {
        #[test]
        fn prop_all_markers_removed_in_order(
            parts in proptest::collection::vec(("[a-z .,!?]{0,12}", "[A-Za-z0-9_]{1,8}"), 0..6),
            tail in "[a-z .]{0,10}",
        ) {
            let mut text = String::new();
            let mut expected = Vec::new();
            for (prose, key) in &parts {
                text.push_str(prose);
                text.push_str(&format!("[SHOW:{key}]"));
                expected.push(key.clone());
            }
            text.push_str(&tail);

            let out = extract(&text);
            prop_assert_eq!(&out.keys, &expected);
            prop_assert!(!out.clean_text.contains("[SHOW:"));

            let again = extract(&out.clean_text);
            prop_assert_eq!(again.clean_text, out.clean_text);
            prop_assert!(again.keys.is_empty());
        }
    }
}
