use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    /// XP multiplier applied to the base score of an attempt.
    pub fn xp_multiplier(&self) -> f64 {
        match self {
            Difficulty::Easy => 1.0,
            Difficulty::Medium => 1.5,
            Difficulty::Hard => 2.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Difficulty::Easy => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Hard => "Hard",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizSource {
    Manual,
    Generated,
}

impl QuizSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuizSource::Manual => "manual",
            QuizSource::Generated => "generated",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    /// Exactly four options.
    pub options: Vec<String>,
    /// Index (0-3) of the correct option.
    pub correct_answer: u32,
    #[serde(default)]
    pub explanation: Option<String>,
    pub order: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quiz {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub category: String,
    pub subject: String,
    pub difficulty: Difficulty,
    pub questions: Vec<Question>,
    /// Temporary quizzes produce non-counted attempts: no profile counters,
    /// no streak, no achievements.
    pub is_temporary: bool,
    /// Seconds allowed for one attempt.
    pub time_limit: Option<u32>,
    pub source: QuizSource,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Quiz {
    pub fn question_count(&self) -> u32 {
        self.questions.len() as u32
    }

    pub fn summary(&self) -> QuizSummary {
        QuizSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            category: self.category.clone(),
            subject: self.subject.clone(),
            difficulty: self.difficulty,
            question_count: self.question_count(),
            time_limit: self.time_limit,
            source: self.source,
            created_by: self.created_by.clone(),
            created_at: self.created_at,
        }
    }

    /// View for taking the quiz: correct answers and explanations stripped,
    /// question order as stored. The caller shuffles when appropriate.
    pub fn take_view(&self) -> TakeQuizView {
        TakeQuizView {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            category: self.category.clone(),
            subject: self.subject.clone(),
            difficulty: self.difficulty,
            time_limit: self.time_limit,
            questions: self.questions.iter().map(TakeQuestion::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QuizSummary {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub subject: String,
    pub difficulty: Difficulty,
    pub question_count: u32,
    pub time_limit: Option<u32>,
    pub source: QuizSource,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TakeQuizView {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub subject: String,
    pub difficulty: Difficulty,
    pub time_limit: Option<u32>,
    pub questions: Vec<TakeQuestion>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TakeQuestion {
    pub id: String,
    pub text: String,
    pub options: Vec<String>,
    pub order: u32,
}

impl From<&Question> for TakeQuestion {
    fn from(q: &Question) -> Self {
        TakeQuestion {
            id: q.id.clone(),
            text: q.text.clone(),
            options: q.options.clone(),
            order: q.order,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuizRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    pub description: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub category: String,
    #[validate(length(min = 1, max = 100))]
    pub subject: String,
    pub difficulty: Difficulty,
    #[validate(length(min = 5, max = 100), nested)]
    pub questions: Vec<QuestionInput>,
    #[serde(default)]
    pub is_temporary: bool,
    pub time_limit: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct QuestionInput {
    #[validate(length(min = 1, max = 2000))]
    pub text: String,
    #[validate(length(min = 4, max = 4))]
    pub options: Vec<String>,
    #[validate(range(max = 3))]
    pub correct_answer: u32,
    pub explanation: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GenerateQuizRequest {
    #[validate(length(max = 200))]
    pub title: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub category: String,
    #[validate(length(min = 1, max = 100))]
    pub subject: String,
    pub difficulty: Difficulty,
    #[validate(range(min = 5, max = 20))]
    pub num_questions: u32,
    #[serde(default)]
    pub is_temporary: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListQuizzesQuery {
    pub difficulty: Option<Difficulty>,
    pub category: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<u64>,
}
