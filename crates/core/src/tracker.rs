//! Session Tracking
//!
//! Watches one connection's teaching activity: which visuals were shown, which
//! concepts came up, how often the learner was praised and where they
//! struggled. At disconnect the tracker renders a short synopsis that the
//! next session's context opens with, so teaching can pick up where it left
//! off.

use crate::store::SummaryStore;
use anyhow::Result;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::{debug, info};

/// Rendered when nothing worth resuming from happened.
pub const NOTHING_COVERED: &str =
    "No specific concepts were covered yet; the student was still in onboarding or warming up.";

/// Number of visual keys listed in a synopsis.
const MAX_LISTED_VISUALS: usize = 5;

/// Keyword patterns that reveal a concept was taught, keyed by concept key.
const CONCEPT_PATTERNS: &[(&str, &[&str])] = &[
    ("letter_A", &["letter a", "अक्षर a", "अक्षर अ"]),
    ("letter_E", &["letter e", "अक्षर e", "अक्षर ए"]),
    ("letter_I", &["letter i", "अक्षर i", "अक्षर इ"]),
    ("letter_O", &["letter o", "अक्षर o", "अक्षर ओ"]),
    ("letter_U", &["letter u", "अक्षर u", "अक्षर उ"]),
    ("counting_1_5", &["one two three", "एक दो तीन", "ek do teen", "1 2 3"]),
    ("counting_6_10", &["six seven eight", "छह सात आठ", "6 7 8"]),
    ("counting_11_20", &["eleven twelve", "ग्यारह बारह", "11 12"]),
];

/// `CONCEPT_PATTERNS` as whole-phrase matchers, so "letter is" never reads as "letter i".
static CONCEPT_REGEXES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    CONCEPT_PATTERNS
        .iter()
        .map(|(key, phrases)| {
            let alternatives = phrases
                .iter()
                .map(|p| regex::escape(p))
                .collect::<Vec<_>>()
                .join("|");
            let pattern = Regex::new(&format!(r"(?i)\b(?:{alternatives})\b"))
                .expect("escaped phrases form a valid pattern");
            (*key, pattern)
        })
        .collect()
});

const PRAISE_WORDS: &[&str] = &[
    "बहुत अच्छे",
    "शाबाश",
    "great",
    "correct",
    "well done",
    "excellent",
    "perfect",
    "बिल्कुल सही",
    "ਬਹੁਤ ਵਧੀਆ",
];

const RETRY_PHRASES: &[&str] = &[
    "not quite",
    "try again",
    "let's try once more",
    "almost there",
    "फिर से कोशिश",
    "दोबारा",
];

/// One participant/assistant exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub user: String,
    pub assistant: String,
    pub at: DateTime<Utc>,
}

/// The persisted record of one finished session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub participant_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub concepts_taught: Vec<String>,
    pub visuals_shown: Vec<String>,
    pub successes: u32,
    pub exchanges: u32,
    pub struggles: Vec<String>,
    /// Natural-language synopsis read back at the next session.
    pub summary: String,
}

/// Maps a directive key to a readable concept label by its prefix.
pub fn concept_label(key: &str) -> String {
    let prefixes = [("letter_", "Letter"), ("number_", "Number"), ("vowel_", "Vowel")];
    for (prefix, label) in prefixes {
        if let Some(rest) = key.strip_prefix(prefix) {
            if !rest.is_empty() {
                return format!("{label} {rest}");
            }
        }
    }
    key.to_string()
}

fn push_unique(list: &mut Vec<String>, item: String) -> bool {
    if list.contains(&item) {
        false
    } else {
        list.push(item);
        true
    }
}

/// Accumulates one connection's teaching activity.
#[derive(Debug, Clone)]
pub struct SessionTracker {
    session_id: String,
    participant_id: String,
    started_at: DateTime<Utc>,
    visuals_shown: Vec<String>,
    concepts_taught: Vec<String>,
    exchanges: Vec<Exchange>,
    successes: u32,
    struggles: Vec<String>,
}

impl SessionTracker {
    pub fn new(session_id: &str, participant_id: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            participant_id: participant_id.to_string(),
            started_at,
            visuals_shown: Vec::new(),
            concepts_taught: Vec::new(),
            exchanges: Vec::new(),
            successes: 0,
            struggles: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn concepts(&self) -> &[String] {
        &self.concepts_taught
    }

    pub fn visuals(&self) -> &[String] {
        &self.visuals_shown
    }

    pub fn exchange_count(&self) -> usize {
        self.exchanges.len()
    }

    pub fn successes(&self) -> u32 {
        self.successes
    }

    /// Called every time a directive fires.
    pub fn record_visual(&mut self, key: &str) {
        push_unique(&mut self.visuals_shown, key.to_string());
        let concept = concept_label(key);
        if push_unique(&mut self.concepts_taught, concept.clone()) {
            debug!(%concept, "Concept tracked from visual");
        }
    }

    /// Called after each conversational turn.
    pub fn record_exchange(&mut self, user_text: &str, assistant_text: &str, at: DateTime<Utc>) {
        self.exchanges.push(Exchange {
            user: user_text.to_string(),
            assistant: assistant_text.to_string(),
            at,
        });

        let lowered = assistant_text.to_lowercase();
        if PRAISE_WORDS.iter().any(|w| lowered.contains(&w.to_lowercase())) {
            self.successes += 1;
        }
        self.detect_concepts(&lowered);
        if RETRY_PHRASES.iter().any(|p| lowered.contains(p)) {
            if let Some(current) = self.concepts_taught.last().cloned() {
                self.record_struggle(&current);
            }
        }
    }

    pub fn record_struggle(&mut self, label: &str) {
        if push_unique(&mut self.struggles, label.to_string()) {
            debug!(concept = %label, "Struggle tracked");
        }
    }

    fn detect_concepts(&mut self, lowered: &str) {
        for (key, pattern) in CONCEPT_REGEXES.iter() {
            if pattern.is_match(lowered) {
                let label = concept_label(key);
                if push_unique(&mut self.concepts_taught, label.clone()) {
                    debug!(concept = %label, "Concept tracked from text");
                }
            }
        }
    }

    /// Renders the synopsis the next session will open with.
    pub fn build_summary(&self) -> String {
        if self.concepts_taught.is_empty() && self.visuals_shown.is_empty() {
            return NOTHING_COVERED.to_string();
        }

        let concepts = if self.concepts_taught.is_empty() {
            "general introduction".to_string()
        } else {
            self.concepts_taught.join(", ")
        };
        let visuals = if self.visuals_shown.is_empty() {
            "none".to_string()
        } else {
            self.visuals_shown
                .iter()
                .take(MAX_LISTED_VISUALS)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut summary = format!(
            "Last session covered: {concepts}. Visual aids shown: {visuals}. \
             Student had {} successful responses across {} exchanges. ",
            self.successes,
            self.exchanges.len()
        );
        if self.struggles.is_empty() {
            summary.push_str("Student was engaged and responsive.");
        } else {
            summary.push_str(&format!(
                "Student struggled with: {}. Review these concepts before introducing new ones.",
                self.struggles.join(", ")
            ));
        }
        summary
    }

    /// Freezes the tracked activity into an immutable summary record.
    pub fn finish(&self, ended_at: DateTime<Utc>) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            participant_id: self.participant_id.clone(),
            started_at: self.started_at,
            ended_at,
            concepts_taught: self.concepts_taught.clone(),
            visuals_shown: self.visuals_shown.clone(),
            successes: self.successes,
            exchanges: u32::try_from(self.exchanges.len()).unwrap_or(u32::MAX),
            struggles: self.struggles.clone(),
            summary: self.build_summary(),
        }
    }

    /// Persists the summary and returns it.
    pub async fn save(&self, store: &dyn SummaryStore) -> Result<SessionSummary> {
        let summary = self.finish(Utc::now());
        store.save_summary(&summary).await?;
        info!(
            session_id = %self.session_id,
            concepts = ?self.concepts_taught,
            "Session summary saved"
        );
        Ok(summary)
    }
}

/// Loads the latest synopsis for a participant, if any.
pub async fn load_last_summary(
    store: &dyn SummaryStore,
    participant_id: &str,
) -> Result<Option<SessionSummary>> {
    store.last_summary(participant_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use chrono::{Duration, TimeZone};

    fn tracker() -> SessionTracker {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        SessionTracker::new("session-1", "learner-1", start)
    }

    #[test]
    fn test_concept_label_by_prefix() {
        assert_eq!(concept_label("letter_A"), "Letter A");
        assert_eq!(concept_label("number_7"), "Number 7");
        assert_eq!(concept_label("vowel_E"), "Vowel E");
        assert_eq!(concept_label("fruit_mango"), "fruit_mango");
        assert_eq!(concept_label("letter_"), "letter_");
    }

    #[test]
    fn test_empty_summary_sentence() {
        assert_eq!(tracker().build_summary(), NOTHING_COVERED);
    }

    #[test]
    fn test_summary_enumerates_concepts_keys_and_counts() {
        let mut t = tracker();
        let now = Utc::now();
        t.record_visual("letter_A");
        t.record_visual("letter_E");
        t.record_exchange("hello", "Welcome back! Today we learn.", now);
        t.record_exchange("A", "Great!", now);
        t.record_exchange("E", "Correct, well done.", now);
        t.record_exchange("O?", "Let us look again.", now);
        t.record_exchange("U", "Excellent!", now);

        let summary = t.build_summary();
        assert_eq!(t.concepts(), ["Letter A", "Letter E"]);
        assert!(summary.contains("Letter A, Letter E"));
        assert!(summary.contains("letter_A, letter_E"));
        assert!(summary.contains("3 successful responses"));
        assert!(summary.contains("5 exchanges"));
        assert!(summary.ends_with("Student was engaged and responsive."));
        assert_eq!(
            summary,
            "Last session covered: Letter A, Letter E. Visual aids shown: letter_A, letter_E. \
             Student had 3 successful responses across 5 exchanges. \
             Student was engaged and responsive."
        );
    }

    #[test]
    fn test_concepts_detected_from_text() {
        let mut t = tracker();
        t.record_exchange("", "Now the letter O. एक दो तीन!", Utc::now());
        assert_eq!(t.concepts(), ["Letter O", "counting_1_5"]);
        assert!(t.visuals().is_empty());
        assert!(t.build_summary().starts_with("Last session covered: Letter O, counting_1_5."));
        assert!(t.build_summary().contains("Visual aids shown: none."));
    }

    #[test]
    fn test_concepts_match_whole_phrases_only() {
        let mut t = tracker();
        let now = Utc::now();
        t.record_exchange("", "Do you know any letters? Tell me one letter if you know.", now);
        t.record_exchange("B", "This letter is B. Another letter, another sound.", now);
        t.record_exchange("", "One two three, eleven twelve.", now);
        assert_eq!(t.concepts(), ["counting_1_5", "counting_11_20"]);

        t.record_exchange("", "Now: Letter I!", now);
        assert_eq!(t.concepts(), ["counting_1_5", "counting_11_20", "Letter I"]);
    }

    #[test]
    fn test_visuals_without_known_concept_use_raw_key() {
        let mut t = tracker();
        t.record_visual("mango");
        t.record_visual("mango");
        assert_eq!(t.visuals(), ["mango"]);
        assert!(t.build_summary().contains("Last session covered: mango."));
    }

    #[test]
    fn test_only_five_visuals_are_listed() {
        let mut t = tracker();
        for n in 1..=7 {
            t.record_visual(&format!("number_{n}"));
        }
        let summary = t.build_summary();
        assert!(summary.contains("Visual aids shown: number_1, number_2, number_3, number_4, number_5."));
        assert!(!summary.contains("number_6,"));
    }

    #[test]
    fn test_struggles_request_review() {
        let mut t = tracker();
        t.record_visual("letter_I");
        t.record_exchange("E", "Not quite! Let us try again. [sound]", Utc::now());
        let summary = t.build_summary();
        assert!(summary.contains("Student struggled with: Letter I."));
        assert!(summary.ends_with("Review these concepts before introducing new ones."));
    }

    #[test]
    fn test_praise_is_case_insensitive() {
        let mut t = tracker();
        t.record_exchange("1", "PERFECT answer", Utc::now());
        t.record_exchange("2", "शाबाश!", Utc::now());
        assert_eq!(t.successes(), 2);
    }

    #[tokio::test]
    async fn test_save_and_load_last_summary() {
        let store = InMemoryStore::new();
        assert!(load_last_summary(&store, "learner-1").await.unwrap().is_none());

        let mut first = tracker();
        first.record_visual("letter_A");
        first.save(&store).await.unwrap();

        let later = Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap();
        let mut second = SessionTracker::new("session-2", "learner-1", later);
        second.record_visual("letter_E");
        let saved = second.save(&store).await.unwrap();
        assert!(saved.ended_at >= later - Duration::seconds(1));

        let last = load_last_summary(&store, "learner-1").await.unwrap().unwrap();
        assert_eq!(last.session_id, "session-2");
        assert_eq!(last.concepts_taught, vec!["Letter E"]);
        assert_eq!(last.summary, second.build_summary());
        assert!(load_last_summary(&store, "someone-else").await.unwrap().is_none());
    }
}
