//! Instructional Context Composition
//!
//! Builds the full text handed to the generation engine. Everything here is a
//! pure function of its inputs so that the same profile, curriculum and
//! summary always produce byte-identical context.

use crate::onboarding::{COMPLETION_MARKER, Question};
use crate::profile::Profile;

const PERSONA: &str = "\
You are Vidya, a teacher. You only teach. You never do small talk.

STRICT RULES:
- Respond in 2-3 sentences maximum.
- Always end with one question or task.
- Never make the student feel bad.
- Always respond in whatever language the student speaks.
- Teach ONE concept at a time.
- NEVER show internal thoughts. No asterisks. No brackets except [SHOW:x].
- You are ALWAYS teaching. Never say \"How can I help\".

VISUAL TAGS (you MUST include these when teaching):
- Teaching any letter X -> include [SHOW:letter_X] in your response
- Teaching any number N -> include [SHOW:number_N] in your response
- Teaching a vowel X -> include [SHOW:vowel_X] in your response
- Example response: \"This is the letter A. [SHOW:letter_A] A is for Apple. Can you say A?\"
- These tags display images to the student. They are REQUIRED when teaching letters or numbers.";

const TEACHING_LOOP: &str = "\
TEACHING LOOP (follow for every concept):
1. TEACH: introduce the concept with a daily life example and a [SHOW:visual] if relevant
2. CHECK: ask one simple question
3. EVALUATE: right answer -> celebrate loudly | wrong -> try a completely different approach
4. NEVER repeat the same explanation; always use a new example
5. PROGRESS: when mastered, move to the next concept in the curriculum";

/// Composes the teaching context for a resolved profile.
///
/// With a `last_summary` the engine is told to review it before anything
/// new; without one it is told to welcome the learner and start from the
/// first concept.
pub fn compose(profile: &Profile, curriculum_text: &str, last_summary: Option<&str>) -> String {
    let continuity = match last_summary {
        Some(summary) => format!(
            "LAST SESSION:\n{}\nBriefly review last session before introducing anything new.",
            summary.trim()
        ),
        None => format!(
            "FIRST SESSION:\nWelcome {} warmly by name. Then begin the very first concept in their curriculum.",
            profile.name
        ),
    };

    let sections = [
        PERSONA.to_string(),
        render_profile(profile),
        format!("CURRICULUM FOR TODAY:\n{}", curriculum_text.trim()),
        continuity,
        TEACHING_LOOP.to_string(),
        format!(
            "{} is counting on you. Be warm, patient, and celebrate every small win.",
            profile.name
        ),
    ];
    sections.join("\n\n")
}

fn render_profile(profile: &Profile) -> String {
    let topics = if profile.completed_topics.is_empty() {
        "None yet, this is the beginning".to_string()
    } else {
        profile.completed_topics.join(", ")
    };
    format!(
        "STUDENT PROFILE:\n\
         - Name: {name}\n\
         - Preferred language: {language} (always speak to them in this language)\n\
         - Current subject: {subject}\n\
         - Current level: {level} (0=complete beginner, 4=advanced)\n\
         - Learning goal: {goal}\n\
         - Learning path: {path}\n\
         - Sessions completed: {sessions}\n\
         - Points earned: {points}\n\
         - Topics completed: {topics}",
        name = profile.name,
        language = profile.preferred_language,
        subject = profile.current_subject,
        level = profile.current_level,
        goal = profile.learning_goal,
        path = profile.learning_path.join(" -> "),
        sessions = profile.session_count,
        points = profile.points,
        topics = topics,
    )
}

/// Context used while the onboarding interview is running.
pub fn onboarding_context() -> String {
    let questions = Question::ALL
        .iter()
        .map(|q| format!("QUESTION {}: \"{}\"", q.number(), q.text()))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are Vidya, a teacher. You are meeting a new student for the first time.\n\n\
         You will be told which question to ask next. Ask EXACTLY that question, ONE AT A TIME.\n\
         Do NOT skip any question. Do NOT start teaching until all {count} are answered.\n\n\
         {questions}\n\n\
         STRICT RULES:\n\
         - Ask ONE question at a time. Wait for the answer.\n\
         - After each answer say something warm, then ask the question you were told to ask.\n\
         - Never teach anything until the interview is over.\n\
         - Respond in whatever language the student speaks.\n\
         - If the student clearly refuses to continue, say goodbye kindly and add {marker}.",
        count = Question::ALL.len(),
        marker = COMPLETION_MARKER,
    )
}

/// Instruction issued before each onboarding question.
pub fn ask_question_instruction(question: Question, name: Option<&str>) -> String {
    match (question, name) {
        (Question::Name, _) => format!(
            "A new student has just connected. Greet them warmly and ask QUESTION 1: \"{}\"",
            question.text()
        ),
        (_, Some(name)) => format!(
            "Thank {name} warmly for the answer, then ask QUESTION {}: \"{}\"",
            question.number(),
            question.text()
        ),
        (_, None) => format!(
            "Thank the student warmly for the answer, then ask QUESTION {}: \"{}\"",
            question.number(),
            question.text()
        ),
    }
}

/// Instruction issued once onboarding is complete and teaching starts.
pub fn teaching_transition_instruction(name: &str) -> String {
    format!(
        "Onboarding is complete. Say: \"Thank you {name}! Now let us begin learning together.\" \
         Then start teaching the first concept of the curriculum."
    )
}

/// Instruction issued when a returning learner connects.
pub fn resume_instruction(name: &str) -> String {
    format!(
        "{name} has just connected for a new session. Greet {name} by name, \
         then continue teaching as described above."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::fixtures::asha;

    const CURRICULUM: &str = "Level 1: vowels A, E, I, O, U.";

    #[test]
    fn test_compose_is_deterministic() {
        let profile = asha();
        let first = compose(&profile, CURRICULUM, Some("Last session covered: Letter A."));
        let second = compose(&profile, CURRICULUM, Some("Last session covered: Letter A."));
        assert_eq!(first, second);
        assert_eq!(compose(&profile, CURRICULUM, None), compose(&profile, CURRICULUM, None));
    }

    #[test]
    fn test_compose_includes_summary_and_review_instruction() {
        let summary = "Last session covered: Letter A, Letter E. Student was engaged and responsive.";
        let context = compose(&asha(), CURRICULUM, Some(summary));
        assert!(context.contains(summary));
        assert!(context.contains("Briefly review last session before introducing anything new."));
        assert!(!context.contains("FIRST SESSION"));

        let summary_at = context.find(summary).unwrap();
        let loop_at = context.find("TEACHING LOOP").unwrap();
        assert!(summary_at < loop_at);
    }

    #[test]
    fn test_compose_without_summary_welcomes_by_name() {
        let context = compose(&asha(), CURRICULUM, None);
        assert!(context.contains("FIRST SESSION:\nWelcome Asha warmly by name."));
        assert!(!context.contains("LAST SESSION"));
    }

    #[test]
    fn test_compose_renders_profile_and_curriculum() {
        let context = compose(&asha(), CURRICULUM, None);
        assert!(context.starts_with("You are Vidya, a teacher."));
        assert!(context.contains("- Name: Asha"));
        assert!(context.contains("- Preferred language: Hindi"));
        assert!(context.contains("- Current subject: literacy"));
        assert!(context.contains("- Current level: 1"));
        assert!(context.contains("- Learning path: literacy -> numeracy -> health -> life_skills -> science"));
        assert!(context.contains("- Sessions completed: 3"));
        assert!(context.contains("- Points earned: 4"));
        assert!(context.contains("- Topics completed: Letter A"));
        assert!(context.contains(&format!("CURRICULUM FOR TODAY:\n{CURRICULUM}")));
        assert!(context.ends_with("Asha is counting on you. Be warm, patient, and celebrate every small win."));
    }

    #[test]
    fn test_compose_notes_when_no_topics_completed() {
        let mut profile = asha();
        profile.completed_topics.clear();
        let context = compose(&profile, CURRICULUM, None);
        assert!(context.contains("- Topics completed: None yet, this is the beginning"));
    }

    #[test]
    fn test_onboarding_context_lists_all_questions() {
        let context = onboarding_context();
        for question in Question::ALL {
            assert!(context.contains(question.text()));
        }
        assert!(context.contains("QUESTION 7:"));
        assert!(context.contains(COMPLETION_MARKER));
    }

    #[test]
    fn test_question_instructions() {
        let first = ask_question_instruction(Question::Name, None);
        assert!(first.contains("QUESTION 1"));
        let second = ask_question_instruction(Question::Language, Some("Ravi"));
        assert!(second.starts_with("Thank Ravi warmly"));
        assert!(second.contains("QUESTION 2: \"Which language do you speak at home?\""));
        assert!(teaching_transition_instruction("Ravi").contains("Thank you Ravi!"));
        assert!(resume_instruction("Asha").starts_with("Asha has just connected"));
    }
}
