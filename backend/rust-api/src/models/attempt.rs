use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::achievement::AchievementView;
use super::quiz::{Difficulty, Quiz};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Completed,
    Abandoned,
}

/// One answered question. Correctness is fixed at submission time and never
/// recomputed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_id: String,
    pub selected_option: u32,
    pub is_correct: bool,
    pub answered_at: DateTime<Utc>,
}

/// A user's run at a quiz. Immutable once completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub quiz_id: String,
    pub status: AttemptStatus,
    pub total_questions: u32,
    pub correct_answers: u32,
    pub score_percentage: f64,
    pub xp_earned: u32,
    pub time_taken: Option<u32>,
    pub answers: Vec<AnswerRecord>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Attempt {
    pub fn start(user_id: &str, quiz: &Quiz) -> Self {
        Attempt {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            quiz_id: quiz.id.clone(),
            status: AttemptStatus::InProgress,
            total_questions: quiz.question_count(),
            correct_answers: 0,
            score_percentage: 0.0,
            xp_earned: 0,
            time_taken: None,
            answers: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Grade a batch of submitted answers against the quiz. Unknown question
    /// ids and repeats of an already-answered question are skipped.
    pub fn grade(quiz: &Quiz, answers: &[SubmittedAnswer], now: DateTime<Utc>) -> Vec<AnswerRecord> {
        let mut records: Vec<AnswerRecord> = Vec::with_capacity(answers.len());
        for submitted in answers {
            if records.iter().any(|r| r.question_id == submitted.question_id) {
                continue;
            }
            let Some(question) = quiz.questions.iter().find(|q| q.id == submitted.question_id)
            else {
                continue;
            };
            records.push(AnswerRecord {
                question_id: submitted.question_id.clone(),
                selected_option: submitted.selected_option,
                is_correct: submitted.selected_option == question.correct_answer,
                answered_at: now,
            });
        }
        records
    }

    /// Complete the attempt: derive correctness count, percentage, and the
    /// XP award from the graded records and the quiz difficulty.
    pub fn finalize(
        &mut self,
        records: Vec<AnswerRecord>,
        difficulty: Difficulty,
        time_taken: Option<u32>,
        now: DateTime<Utc>,
    ) {
        self.correct_answers = records.iter().filter(|r| r.is_correct).count() as u32;
        self.score_percentage = score_percentage(self.correct_answers, self.total_questions);
        self.xp_earned = xp_for_score(self.correct_answers, difficulty);
        self.answers = records;
        self.time_taken = time_taken;
        self.status = AttemptStatus::Completed;
        self.completed_at = Some(now);
    }
}

/// `correct / total * 100`, defined as 0 for an empty quiz.
pub fn score_percentage(correct: u32, total: u32) -> f64 {
    if total == 0 {
        0.0
    } else {
        correct as f64 / total as f64 * 100.0
    }
}

/// Base 10 XP per correct answer, scaled by difficulty, rounded down.
pub fn xp_for_score(correct: u32, difficulty: Difficulty) -> u32 {
    let base = (correct * 10) as f64;
    (base * difficulty.xp_multiplier()).floor() as u32
}

#[derive(Debug, Deserialize)]
pub struct StartAttemptRequest {
    pub quiz_id: String,
}

#[derive(Debug, Serialize)]
pub struct StartAttemptResponse {
    pub attempt_id: String,
    pub quiz_id: String,
    pub total_questions: u32,
    pub time_limit: Option<u32>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmittedAnswer {
    pub question_id: String,
    pub selected_option: u32,
}

#[derive(Debug, Deserialize)]
pub struct SubmitAttemptRequest {
    pub attempt_id: String,
    pub answers: Vec<SubmittedAnswer>,
    pub time_taken: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct SubmitAttemptResponse {
    pub attempt: Attempt,
    pub score_percentage: f64,
    pub xp_earned: u32,
    pub new_level: u32,
    pub new_xp: u32,
    pub streak_lost: bool,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub unlocked_achievements: Vec<AchievementView>,
}

#[derive(Debug, Serialize)]
pub struct AttemptSummary {
    pub id: String,
    pub quiz_id: String,
    pub quiz_title: Option<String>,
    pub difficulty: Option<Difficulty>,
    pub status: AttemptStatus,
    pub total_questions: u32,
    pub correct_answers: u32,
    pub score_percentage: f64,
    pub xp_earned: u32,
    pub time_taken: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
