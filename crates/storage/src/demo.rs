//! Demo question bank used by the `seed` binary and the headless runner.

use proctor_core::model::{QuestionId, QuizId};

use crate::repository::{QuestionRecord, QuizRecord};

pub const DEMO_QUESTION_COUNT: u32 = 20;

/// Whole-quiz budget of the demo exam, in seconds.
pub const DEMO_TIME_BUDGET_SECS: u32 = 1800;

pub const DEMO_OPTIONS: [&str; 4] = [
    "Encrypts data in transit",
    "Improves SEO only",
    "Caches client inputs",
    "Manages server CPU",
];

/// Builds the demo quiz: `DEMO_QUESTION_COUNT` single-choice questions worth one
/// point each. Question ids are derived from the quiz id so several demo quizzes
/// can share one database.
#[must_use]
pub fn demo_quiz(quiz_id: QuizId) -> (QuizRecord, Vec<QuestionRecord>) {
    let quiz = QuizRecord {
        id: quiz_id,
        title: "Web security fundamentals".to_string(),
        time_budget_secs: Some(DEMO_TIME_BUDGET_SECS),
    };
    let base = quiz_id.value().saturating_mul(1000);
    let questions = (0..DEMO_QUESTION_COUNT)
        .map(|position| QuestionRecord {
            quiz_id,
            question_id: QuestionId::new(base + u64::from(position) + 1),
            position,
            prompt: format!("Question {}: Why is HTTPS important?", position + 1),
            options: DEMO_OPTIONS.iter().map(|o| (*o).to_string()).collect(),
            points: 1,
            duration_secs: None,
            correct_option: Some(DEMO_OPTIONS[0].to_string()),
        })
        .collect();
    (quiz, questions)
}
