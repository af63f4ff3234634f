//! Onboarding Interview
//!
//! New participants answer exactly seven spoken questions, one at a time and
//! always in the same order. Each free-text answer is mined for one
//! structured field with deliberately simple keyword and number detection;
//! when nothing useful is found the field keeps its default. Once the
//! interview is complete the answers are folded into a [`Profile`].

use crate::profile::{LITERACY, NUMERACY, Profile, SchoolHistory};
use chrono::{DateTime, Utc};
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Number of questions in every onboarding run.
pub const QUESTION_COUNT: usize = 7;

/// Marker the generation engine may emit to declare the interview finished.
pub const COMPLETION_MARKER: &str = "[ONBOARDING_COMPLETE]";

const DEFAULT_NAME: &str = "Friend";
const DEFAULT_LANGUAGE: &str = "unknown";
const DEFAULT_GOAL: &str = "literacy";
const DEFAULT_MOTIVATION: &str = "self";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OnboardingError {
    #[error("Onboarding is already complete; no further answers are accepted")]
    AlreadyComplete,
}

/// The fixed onboarding questions, in the order they are asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Question {
    Name,
    Language,
    Counting,
    Letters,
    Schooling,
    Goal,
    Motivation,
}

impl Question {
    pub const ALL: [Question; QUESTION_COUNT] = [
        Question::Name,
        Question::Language,
        Question::Counting,
        Question::Letters,
        Question::Schooling,
        Question::Goal,
        Question::Motivation,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Zero-based position in the sequence.
    pub fn index(self) -> usize {
        self as usize
    }

    /// One-based question number, as spoken in instructions.
    pub fn number(self) -> usize {
        self.index() + 1
    }

    /// The question as the participant should hear it.
    pub fn text(self) -> &'static str {
        match self {
            Question::Name => {
                "Hello! I am Vidya, your teacher. I am so happy to meet you! What is your name?"
            }
            Question::Language => "Which language do you speak at home?",
            Question::Counting => "Can you count to ten for me? Please try.",
            Question::Letters => "Do you know any letters? Tell me one letter if you know.",
            Question::Schooling => "Have you ever been to school before?",
            Question::Goal => {
                "What would you most like to learn: reading and writing, numbers, or something else?"
            }
            Question::Motivation => {
                "Why do you want to learn? Is it for work, for your family, or for yourself?"
            }
        }
    }
}

/// Everything collected during one onboarding run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingAnswers {
    /// Raw answer text keyed by zero-based question index.
    pub raw: BTreeMap<usize, String>,
    pub name: Option<String>,
    pub language: Option<String>,
    pub can_count_to_ten: bool,
    pub knows_letters: bool,
    pub school_history: SchoolHistory,
    pub learning_goal: Option<String>,
    pub motivation: Option<String>,
}

impl OnboardingAnswers {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_NAME)
    }

    fn absorb(&mut self, question: Question, answer: &str) {
        self.raw.insert(question.index(), answer.to_string());
        match question {
            Question::Name => self.name = extract_name(answer),
            Question::Language => self.language = detect_language(answer),
            Question::Counting => self.can_count_to_ten = detect_counting(answer),
            Question::Letters => self.knows_letters = detect_letter_knowledge(answer),
            Question::Schooling => self.school_history = parse_school_history(answer),
            Question::Goal => self.learning_goal = non_empty(answer),
            Question::Motivation => self.motivation = non_empty(answer),
        }
    }
}

/// Outcome of feeding one answer to the interview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnboardingStep {
    /// Ask this question next.
    Continue(Question),
    /// All questions are done; fold these answers into a profile.
    Complete(OnboardingAnswers),
}

/// Drives the fixed question sequence for one participant.
#[derive(Debug, Clone, Default)]
pub struct OnboardingFlow {
    next: usize,
    answers: OnboardingAnswers,
    complete: bool,
}

impl OnboardingFlow {
    pub fn new() -> Self {
        Self::default()
    }

    /// The question currently awaiting an answer.
    pub fn current_question(&self) -> Option<Question> {
        if self.complete {
            None
        } else {
            Question::from_index(self.next)
        }
    }

    pub fn answers(&self) -> &OnboardingAnswers {
        &self.answers
    }

    pub fn answered(&self) -> usize {
        self.next
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Records the answer to the current question and advances.
    ///
    /// An utterance that happens to answer several questions still only
    /// counts for the current one; later questions are asked regardless.
    pub fn record_answer(&mut self, answer: &str) -> Result<OnboardingStep, OnboardingError> {
        let question = self
            .current_question()
            .ok_or(OnboardingError::AlreadyComplete)?;
        self.answers.absorb(question, answer.trim());
        self.next += 1;
        debug!(question = question.number(), "Onboarding answer recorded");

        match Question::from_index(self.next) {
            Some(next) => Ok(OnboardingStep::Continue(next)),
            None => {
                self.complete = true;
                info!(name = %self.answers.display_name(), "Onboarding interview complete");
                Ok(OnboardingStep::Complete(self.answers.clone()))
            }
        }
    }

    /// Finishes the interview on an explicit completion signal.
    ///
    /// Unanswered questions keep their default values.
    pub fn complete_early(&mut self) -> Result<OnboardingAnswers, OnboardingError> {
        if self.complete {
            return Err(OnboardingError::AlreadyComplete);
        }
        self.complete = true;
        info!(
            answered = self.next,
            "Onboarding completed by explicit completion marker"
        );
        Ok(self.answers.clone())
    }
}

/// Removes the completion marker from generated text.
///
/// Returns the remaining text and whether the marker was present.
pub fn take_completion_marker(text: &str) -> (String, bool) {
    if text.contains(COMPLETION_MARKER) {
        let stripped = text.replace(COMPLETION_MARKER, " ");
        (stripped.split_whitespace().collect::<Vec<_>>().join(" "), true)
    } else {
        (text.to_string(), false)
    }
}

// --- Derivation rules ---

/// 0 = complete beginner, 1 = knows some letters without schooling,
/// 2 = some schooling reported.
pub fn assign_literacy_level(knows_letters: bool, school: SchoolHistory) -> u32 {
    match (school, knows_letters) {
        (SchoolHistory::No, false) => 0,
        (SchoolHistory::No, true) => 1,
        (SchoolHistory::Yes, _) => 2,
        (SchoolHistory::Unknown, _) => 0,
    }
}

pub fn assign_numeracy_level(can_count_to_ten: bool) -> u32 {
    if can_count_to_ten { 1 } else { 0 }
}

/// Picks an ordered subject path from the stated goal and motivation.
///
/// Rules are checked top to bottom and the first match wins.
pub fn assign_learning_path(goal: &str, motivation: &str) -> Vec<String> {
    let goal = goal.to_lowercase();
    let motivation = motivation.to_lowercase();
    let in_goal = |words: &[&str]| words.iter().any(|w| goal.contains(w));
    let in_motivation = |words: &[&str]| words.iter().any(|w| motivation.contains(w));

    let path: &[&str] = if in_goal(&["farm"]) || in_motivation(&["farm", "work"]) {
        &["literacy", "numeracy", "life_skills", "science", "vocational"]
    } else if in_motivation(&["child", "family", "parent"]) {
        &["literacy", "numeracy", "health", "life_skills", "science"]
    } else if in_goal(&["job", "work"]) || in_motivation(&["business"]) {
        &["literacy", "numeracy", "life_skills", "civics", "vocational"]
    } else if in_goal(&["math", "number", "count"]) {
        &["numeracy", "literacy", "life_skills", "science"]
    } else if in_goal(&["science"]) {
        &["literacy", "numeracy", "science", "geography", "life_skills"]
    } else {
        &["literacy", "numeracy", "life_skills"]
    };
    path.iter().map(|s| s.to_string()).collect()
}

/// Folds completed onboarding answers into a new profile.
pub fn build_profile(
    participant_id: &str,
    answers: &OnboardingAnswers,
    now: DateTime<Utc>,
) -> Profile {
    let literacy = assign_literacy_level(answers.knows_letters, answers.school_history);
    let numeracy = assign_numeracy_level(answers.can_count_to_ten);
    let learning_goal = answers
        .learning_goal
        .clone()
        .unwrap_or_else(|| DEFAULT_GOAL.to_string());
    let motivation = answers
        .motivation
        .clone()
        .unwrap_or_else(|| DEFAULT_MOTIVATION.to_string());
    let learning_path = assign_learning_path(&learning_goal, &motivation);
    let levels = BTreeMap::from([
        (LITERACY.to_string(), literacy),
        (NUMERACY.to_string(), numeracy),
    ]);
    let current_subject = learning_path
        .first()
        .cloned()
        .unwrap_or_else(|| LITERACY.to_string());
    let current_level = levels.get(&current_subject).copied().unwrap_or(0);

    let profile = Profile {
        participant_id: participant_id.to_string(),
        name: answers.display_name().to_string(),
        preferred_language: answers
            .language
            .clone()
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
        levels,
        current_subject,
        current_level,
        learning_goal,
        motivation,
        school_history: answers.school_history,
        learning_path,
        completed_topics: Vec::new(),
        points: 0,
        session_count: 1,
        created_at: now,
        last_seen: now,
        onboarding_complete: true,
    };
    info!(
        name = %profile.name,
        language = %profile.preferred_language,
        literacy_level = literacy,
        numeracy_level = numeracy,
        path = ?profile.learning_path,
        "Profile built from onboarding"
    );
    profile
}

// --- Answer heuristics ---

const NAME_PREFIXES: &[&str] = &[
    "my name is",
    "mera naam",
    "name is",
    "call me",
    "this is",
    "i am",
    "i'm",
    "naam",
];
const NAME_SKIP_LEADING: &[&str] = &["hello", "hi", "hey", "namaste", "ok", "okay", "yes", "ji"];
const NAME_STOP_WORDS: &[&str] = &[
    "and", "i", "from", "my", "hai", "hoon", "hun", "hu", "ji", "here", "sir", "madam",
];
const NEGATIVE_WORDS: &[&str] = &[
    "no", "not", "never", "nahi", "nahin", "illa", "ledu", "nope", "can't", "cant", "cannot",
    "don't", "dont",
];
const NEGATIVE_SCRIPTS: &[&str] = &["नहीं", "नही"];
const AFFIRMATIVE_LETTER_WORDS: &[&str] = &["yes", "haan", "han", "ha", "know", "sure"];
const SCHOOL_YES_WORDS: &[&str] = &[
    "yes", "haan", "han", "went", "studied", "class", "grade", "standard", "attended",
];
const LANGUAGES: &[(&str, &str)] = &[
    ("hindi", "Hindi"),
    ("english", "English"),
    ("telugu", "Telugu"),
    ("tamil", "Tamil"),
    ("kannada", "Kannada"),
    ("malayalam", "Malayalam"),
    ("bengali", "Bengali"),
    ("bangla", "Bengali"),
    ("marathi", "Marathi"),
    ("gujarati", "Gujarati"),
    ("punjabi", "Punjabi"),
    ("urdu", "Urdu"),
    ("odia", "Odia"),
    ("oriya", "Odia"),
];
const LANGUAGE_SCRIPTS: &[(&str, &str)] = &[
    ("हिंदी", "Hindi"),
    ("हिन्दी", "Hindi"),
    ("తెలుగు", "Telugu"),
    ("தமிழ்", "Tamil"),
    ("ಕನ್ನಡ", "Kannada"),
    ("বাংলা", "Bengali"),
];
const NUMBER_WORDS: &[(&str, u32)] = &[
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
    ("ek", 1),
    ("do", 2),
    ("teen", 3),
    ("char", 4),
    ("paanch", 5),
    ("chhe", 6),
    ("saat", 7),
    ("aath", 8),
    ("nau", 9),
    ("das", 10),
];

fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .map(|t| t.trim_matches('\''))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn has_negative(text: &str, words: &[String]) -> bool {
    words.iter().any(|w| NEGATIVE_WORDS.contains(&w.as_str()))
        || NEGATIVE_SCRIPTS.iter().any(|s| text.contains(s))
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Pulls a display name out of an introduction such as "my name is Ravi".
pub fn extract_name(answer: &str) -> Option<String> {
    let trimmed = answer.trim();
    // ASCII lowercasing keeps byte offsets valid for slicing `trimmed`.
    let lowered = trimmed.to_ascii_lowercase();
    let mut rest = trimmed;
    for prefix in NAME_PREFIXES {
        if let Some(pos) = lowered.find(prefix) {
            let at_word_start = pos == 0 || !lowered.as_bytes()[pos - 1].is_ascii_alphanumeric();
            if at_word_start {
                rest = &trimmed[pos + prefix.len()..];
                break;
            }
        }
    }

    let words: Vec<&str> = rest
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty())
        .skip_while(|w| NAME_SKIP_LEADING.contains(&w.to_lowercase().as_str()))
        .take_while(|w| !NAME_STOP_WORDS.contains(&w.to_lowercase().as_str()))
        .take(3)
        .collect();

    if words.is_empty() {
        None
    } else {
        Some(words.iter().map(|w| capitalize(w)).collect::<Vec<_>>().join(" "))
    }
}

/// Finds the spoken language, tolerating small misspellings.
pub fn detect_language(answer: &str) -> Option<String> {
    if let Some((_, name)) = LANGUAGE_SCRIPTS.iter().find(|(s, _)| answer.contains(s)) {
        return Some(name.to_string());
    }
    let words = tokens(answer);
    if let Some((_, name)) = LANGUAGES
        .iter()
        .find(|(key, _)| words.iter().any(|w| w == key))
    {
        return Some(name.to_string());
    }

    let matcher = SkimMatcherV2::default();
    for word in words.iter().filter(|w| w.chars().count() >= 4) {
        for (key, name) in LANGUAGES {
            if !word.starts_with(&key[..1]) {
                continue;
            }
            let len_gap = word.len().abs_diff(key.len());
            if len_gap > 2 {
                continue;
            }
            // Extra letters in the spoken word, or letters dropped from it.
            let close = matcher.fuzzy_match(word, key).is_some()
                || matcher.fuzzy_match(key, word).is_some();
            if close {
                debug!(word = %word, language = %name, "Language matched approximately");
                return Some(name.to_string());
            }
        }
    }
    None
}

/// True when the participant counted to (or claimed to count to) ten.
///
/// A spoken sequence of eight or more distinct numbers counts even alongside
/// a negative; a bare mention of ten only counts without one.
pub fn detect_counting(answer: &str) -> bool {
    let words = tokens(answer);
    let distinct: BTreeSet<u32> = words
        .iter()
        .filter_map(|w| {
            w.parse::<u32>().ok().filter(|n| (1..=10).contains(n)).or_else(|| {
                NUMBER_WORDS
                    .iter()
                    .find(|(word, _)| word == w)
                    .map(|(_, n)| *n)
            })
        })
        .collect();
    if distinct.len() >= 8 {
        return true;
    }
    if has_negative(answer, &words) {
        return false;
    }
    answer.contains("दस") || words.iter().any(|w| w == "10" || w == "ten" || w == "das")
}

/// True when the participant says or shows that they know a letter.
pub fn detect_letter_knowledge(answer: &str) -> bool {
    let words = tokens(answer);
    if has_negative(answer, &words) {
        return false;
    }
    if words
        .iter()
        .any(|w| AFFIRMATIVE_LETTER_WORDS.contains(&w.as_str()))
    {
        return true;
    }
    let single_letter = |w: &String| {
        let mut chars = w.chars();
        matches!((chars.next(), chars.next()), (Some(c), None) if c.is_alphabetic())
    };
    match words.as_slice() {
        [only] => single_letter(only),
        _ => words
            .iter()
            .any(|w| single_letter(w) && w != "i" && w != "a"),
    }
}

pub fn parse_school_history(answer: &str) -> SchoolHistory {
    let words = tokens(answer);
    if has_negative(answer, &words) {
        SchoolHistory::No
    } else if words.iter().any(|w| SCHOOL_YES_WORDS.contains(&w.as_str())) {
        SchoolHistory::Yes
    } else {
        SchoolHistory::Unknown
    }
}
