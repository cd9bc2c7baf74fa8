//! In-memory store implementations backing integration tests and
//! infrastructure-free local runs. Semantics mirror the MongoDB stores:
//! versioned CAS on profiles, insert-if-absent unlocks, status-gated
//! attempt completion.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{AchievementStore, AttemptStore, ProfileStore, QuizFilter, QuizStore};
use crate::models::{
    Achievement, Attempt, AttemptStatus, CriteriaType, Profile, Quiz, UnlockedAchievement,
};

#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: RwLock<HashMap<String, Profile>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get(&self, user_id: &str) -> Result<Option<Profile>> {
        Ok(self.profiles.read().await.get(user_id).cloned())
    }

    async fn get_or_create(&self, user_id: &str) -> Result<Profile> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .entry(user_id.to_string())
            .or_insert_with(|| Profile::new(user_id));
        Ok(profile.clone())
    }

    async fn update_cas(&self, profile: &Profile) -> Result<bool> {
        let mut profiles = self.profiles.write().await;
        match profiles.get(&profile.user_id) {
            Some(stored) if stored.version == profile.version => {
                let mut next = profile.clone();
                next.version += 1;
                profiles.insert(next.user_id.clone(), next);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn top_by_progress(&self, limit: i64) -> Result<Vec<Profile>> {
        let mut profiles: Vec<Profile> = self.profiles.read().await.values().cloned().collect();
        profiles.sort_by(|a, b| (b.level, b.xp).cmp(&(a.level, a.xp)));
        profiles.truncate(limit.max(0) as usize);
        Ok(profiles)
    }
}

#[derive(Default)]
pub struct MemoryQuizStore {
    quizzes: RwLock<HashMap<String, Quiz>>,
}

impl MemoryQuizStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuizStore for MemoryQuizStore {
    async fn insert(&self, quiz: &Quiz) -> Result<()> {
        self.quizzes
            .write()
            .await
            .insert(quiz.id.clone(), quiz.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Quiz>> {
        Ok(self.quizzes.read().await.get(id).cloned())
    }

    async fn list(&self, filter: &QuizFilter) -> Result<Vec<Quiz>> {
        let quizzes = self.quizzes.read().await;
        let mut matched: Vec<Quiz> = quizzes
            .values()
            .filter(|q| !q.is_temporary)
            .filter(|q| filter.difficulty.is_none_or(|d| q.difficulty == d))
            .filter(|q| filter.category.as_deref().is_none_or(|c| q.category == c))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryAttemptStore {
    attempts: RwLock<HashMap<String, Attempt>>,
}

impl MemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn insert(&self, attempt: &Attempt) -> Result<()> {
        self.attempts
            .write()
            .await
            .insert(attempt.id.clone(), attempt.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Attempt>> {
        Ok(self.attempts.read().await.get(id).cloned())
    }

    async fn complete_if_in_progress(&self, attempt: &Attempt) -> Result<bool> {
        let mut attempts = self.attempts.write().await;
        match attempts.get(&attempt.id) {
            Some(stored) if stored.status == AttemptStatus::InProgress => {
                attempts.insert(attempt.id.clone(), attempt.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn completed_for_user(&self, user_id: &str, limit: i64) -> Result<Vec<Attempt>> {
        let attempts = self.attempts.read().await;
        let mut completed: Vec<Attempt> = attempts
            .values()
            .filter(|a| a.user_id == user_id && a.status == AttemptStatus::Completed)
            .cloned()
            .collect();
        completed.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        completed.truncate(limit.max(0) as usize);
        Ok(completed)
    }
}

#[derive(Default)]
pub struct MemoryAchievementStore {
    catalog: RwLock<Vec<Achievement>>,
    unlocks: RwLock<Vec<UnlockedAchievement>>,
}

impl MemoryAchievementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with the standard catalog.
    pub async fn seeded() -> Self {
        let store = Self::default();
        for achievement in Achievement::standard_catalog() {
            // Infallible for the memory store.
            let _ = store.upsert_by_title(&achievement).await;
        }
        store
    }
}

#[async_trait]
impl AchievementStore for MemoryAchievementStore {
    async fn upsert_by_title(&self, achievement: &Achievement) -> Result<()> {
        let mut catalog = self.catalog.write().await;
        match catalog.iter_mut().find(|a| a.title == achievement.title) {
            Some(existing) => *existing = achievement.clone(),
            None => catalog.push(achievement.clone()),
        }
        Ok(())
    }

    async fn all(&self) -> Result<Vec<Achievement>> {
        Ok(self.catalog.read().await.clone())
    }

    async fn by_criteria(&self, criteria: &[CriteriaType]) -> Result<Vec<Achievement>> {
        Ok(self
            .catalog
            .read()
            .await
            .iter()
            .filter(|a| criteria.contains(&a.criteria_type))
            .cloned()
            .collect())
    }

    async fn unlocked_ids_for(&self, user_id: &str) -> Result<HashSet<String>> {
        Ok(self
            .unlocks
            .read()
            .await
            .iter()
            .filter(|u| u.user_id == user_id)
            .map(|u| u.achievement_id.clone())
            .collect())
    }

    async fn insert_unlock(&self, unlock: &UnlockedAchievement) -> Result<bool> {
        let mut unlocks = self.unlocks.write().await;
        let exists = unlocks
            .iter()
            .any(|u| u.user_id == unlock.user_id && u.achievement_id == unlock.achievement_id);
        if exists {
            return Ok(false);
        }
        unlocks.push(unlock.clone());
        Ok(true)
    }

    async fn unlocks_for(&self, user_id: &str) -> Result<Vec<UnlockedAchievement>> {
        let mut mine: Vec<UnlockedAchievement> = self
            .unlocks
            .read()
            .await
            .iter()
            .filter(|u| u.user_id == user_id)
            .cloned()
            .collect();
        mine.sort_by(|a, b| b.unlocked_at.cmp(&a.unlocked_at));
        Ok(mine)
    }
}
