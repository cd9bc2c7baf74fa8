use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    Achievement, Attempt, CriteriaType, Difficulty, Profile, Quiz, UnlockedAchievement,
};

pub mod memory;
pub mod mongo;

pub use memory::{MemoryAchievementStore, MemoryAttemptStore, MemoryProfileStore, MemoryQuizStore};
pub use mongo::{
    ensure_indexes, MongoAchievementStore, MongoAttemptStore, MongoProfileStore, MongoQuizStore,
};

/// Filters for quiz listing. Temporary quizzes are never listed.
#[derive(Debug, Clone)]
pub struct QuizFilter {
    pub difficulty: Option<Difficulty>,
    pub category: Option<String>,
    pub limit: i64,
    pub offset: u64,
}

impl Default for QuizFilter {
    fn default() -> Self {
        QuizFilter {
            difficulty: None,
            category: None,
            limit: 50,
            offset: 0,
        }
    }
}

/// Gamification profiles, one per user id (the JWT subject).
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<Profile>>;

    /// Fetch the profile, inserting a default one when missing. A missing
    /// profile is never an error.
    async fn get_or_create(&self, user_id: &str) -> Result<Profile>;

    /// Compare-and-swap write: persists `profile` with `version + 1` only if
    /// the stored version still equals `profile.version`. Returns false when
    /// another writer got there first.
    async fn update_cas(&self, profile: &Profile) -> Result<bool>;

    /// Top profiles ordered by (level, xp) descending.
    async fn top_by_progress(&self, limit: i64) -> Result<Vec<Profile>>;
}

#[async_trait]
pub trait QuizStore: Send + Sync {
    async fn insert(&self, quiz: &Quiz) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Quiz>>;

    async fn list(&self, filter: &QuizFilter) -> Result<Vec<Quiz>>;
}

#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn insert(&self, attempt: &Attempt) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Attempt>>;

    /// Persist the completed attempt only while the stored one is still
    /// `in_progress`. Returns false when a concurrent submission already
    /// completed it; the caller rejects the replay without touching profiles.
    async fn complete_if_in_progress(&self, attempt: &Attempt) -> Result<bool>;

    /// Completed attempts for a user, newest first.
    async fn completed_for_user(&self, user_id: &str, limit: i64) -> Result<Vec<Attempt>>;
}

/// Achievement catalog plus per-user unlock records.
#[async_trait]
pub trait AchievementStore: Send + Sync {
    /// Seed/update a catalog entry. `title` is the stable upsert key.
    async fn upsert_by_title(&self, achievement: &Achievement) -> Result<()>;

    async fn all(&self) -> Result<Vec<Achievement>>;

    /// Catalog entries whose criteria type is in `criteria`.
    async fn by_criteria(&self, criteria: &[CriteriaType]) -> Result<Vec<Achievement>>;

    /// Achievement ids the user has already unlocked. Always read fresh;
    /// this set is the sole dedup mechanism for the evaluator.
    async fn unlocked_ids_for(&self, user_id: &str) -> Result<HashSet<String>>;

    /// Insert-if-absent keyed by (user, achievement). Returns false when the
    /// unlock already exists (replay or lost race); the caller suppresses
    /// the reward in that case.
    async fn insert_unlock(&self, unlock: &UnlockedAchievement) -> Result<bool>;

    /// All unlock records for a user, newest first.
    async fn unlocks_for(&self, user_id: &str) -> Result<Vec<UnlockedAchievement>>;
}
