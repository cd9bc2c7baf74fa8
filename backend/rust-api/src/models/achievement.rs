use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::attempt::Attempt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriteriaType {
    QuizzesTaken,
    StreakDays,
    PerfectScore,
    QuizzesCreated,
    FastQuiz,
    LevelReached,
}

impl CriteriaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CriteriaType::QuizzesTaken => "quizzes_taken",
            CriteriaType::StreakDays => "streak_days",
            CriteriaType::PerfectScore => "perfect_score",
            CriteriaType::QuizzesCreated => "quizzes_created",
            CriteriaType::FastQuiz => "fast_quiz",
            CriteriaType::LevelReached => "level_reached",
        }
    }
}

/// Static achievement definition. Seeded at startup, read-only at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Achievement {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub description: String,
    pub icon: String,
    pub color: String,
    pub xp_reward: u32,
    pub criteria_type: CriteriaType,
    pub criteria_value: u32,
}

/// Join record; exactly one per (user, achievement) pair, enforced by the
/// store. Never deleted in normal operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockedAchievement {
    pub user_id: String,
    pub achievement_id: String,
    pub unlocked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AchievementView {
    pub id: String,
    pub title: String,
    pub description: String,
    pub icon: String,
    pub color: String,
    pub xp_reward: u32,
}

impl From<&Achievement> for AchievementView {
    fn from(a: &Achievement) -> Self {
        AchievementView {
            id: a.id.clone(),
            title: a.title.clone(),
            description: a.description.clone(),
            icon: a.icon.clone(),
            color: a.color.clone(),
            xp_reward: a.xp_reward,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UnlockedAchievementView {
    pub achievement: AchievementView,
    pub unlocked_at: DateTime<Utc>,
}

/// Domain events that can unlock achievements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamificationEvent {
    QuizCompleted,
    StreakUpdated,
    QuizCreated,
    LevelUpdated,
}

impl GamificationEvent {
    /// Criteria families an event can possibly satisfy. Achievements outside
    /// this set are skipped without a store lookup.
    pub fn relevant_criteria(&self) -> &'static [CriteriaType] {
        match self {
            GamificationEvent::QuizCompleted => &[
                CriteriaType::QuizzesTaken,
                CriteriaType::PerfectScore,
                CriteriaType::FastQuiz,
            ],
            GamificationEvent::StreakUpdated => &[CriteriaType::StreakDays],
            GamificationEvent::QuizCreated => &[CriteriaType::QuizzesCreated],
            GamificationEvent::LevelUpdated => &[CriteriaType::LevelReached],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GamificationEvent::QuizCompleted => "quiz_completed",
            GamificationEvent::StreakUpdated => "streak_updated",
            GamificationEvent::QuizCreated => "quiz_created",
            GamificationEvent::LevelUpdated => "level_updated",
        }
    }
}

/// Facts about the triggering attempt, read by attempt-scoped criteria
/// (perfect_score, fast_quiz).
#[derive(Debug, Clone, Copy)]
pub struct AttemptFacts {
    pub score_percentage: f64,
    pub time_taken: Option<u32>,
    pub total_questions: u32,
}

impl From<&Attempt> for AttemptFacts {
    fn from(attempt: &Attempt) -> Self {
        AttemptFacts {
            score_percentage: attempt.score_percentage,
            time_taken: attempt.time_taken,
            total_questions: attempt.total_questions,
        }
    }
}

impl Achievement {
    /// The standard badge set, upserted by title at startup and by the
    /// seeding binary.
    pub fn standard_catalog() -> Vec<Achievement> {
        let badge = |id: &str,
                     title: &str,
                     description: &str,
                     icon: &str,
                     color: &str,
                     xp_reward: u32,
                     criteria_type: CriteriaType,
                     criteria_value: u32| Achievement {
            id: id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            icon: icon.to_string(),
            color: color.to_string(),
            xp_reward,
            criteria_type,
            criteria_value,
        };

        vec![
            badge(
                "first-steps",
                "First Steps",
                "Complete your first quiz",
                "Award",
                "from-blue-400 to-blue-600",
                50,
                CriteriaType::QuizzesTaken,
                1,
            ),
            badge(
                "week-warrior",
                "Week Warrior",
                "Maintain a 7-day quiz streak",
                "Target",
                "from-orange-400 to-orange-600",
                200,
                CriteriaType::StreakDays,
                7,
            ),
            badge(
                "knowledge-seeker",
                "Knowledge Seeker",
                "Complete 25 quizzes",
                "Brain",
                "from-purple-400 to-purple-600",
                500,
                CriteriaType::QuizzesTaken,
                25,
            ),
            badge(
                "perfect-score",
                "Perfect Score",
                "Score 100% on any quiz",
                "Trophy",
                "from-green-400 to-green-600",
                100,
                CriteriaType::PerfectScore,
                1,
            ),
            badge(
                "quiz-master",
                "Quiz Master",
                "Create 10 quizzes",
                "Trophy",
                "from-yellow-400 to-yellow-600",
                300,
                CriteriaType::QuizzesCreated,
                10,
            ),
            badge(
                "speed-demon",
                "Speed Demon",
                "Complete a quiz in under 60 seconds (min 5 questions)",
                "Zap",
                "from-cyan-400 to-cyan-600",
                150,
                CriteriaType::FastQuiz,
                60,
            ),
            badge(
                "consistent-learner",
                "Consistent Learner",
                "Maintain a 30-day quiz streak",
                "Trophy",
                "from-indigo-400 to-indigo-600",
                1000,
                CriteriaType::StreakDays,
                30,
            ),
            badge(
                "champion",
                "Champion",
                "Reach level 10",
                "Crown",
                "from-pink-400 to-pink-600",
                2000,
                CriteriaType::LevelReached,
                10,
            ),
        ]
    }
}
