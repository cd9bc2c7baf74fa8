pub mod achievement;
pub mod attempt;
pub mod profile;
pub mod quiz;

pub use achievement::{
    Achievement, AchievementView, AttemptFacts, CriteriaType, GamificationEvent,
    UnlockedAchievement, UnlockedAchievementView,
};
pub use attempt::{Attempt, AttemptStatus, SubmittedAnswer};
pub use profile::{LevelProgress, Profile, StreakChange};
pub use quiz::{Difficulty, Question, Quiz, QuizSource};
