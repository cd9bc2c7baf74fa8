//! MongoDB store implementations. Collections hold the serde models
//! directly; optimistic concurrency and insert-if-absent semantics are
//! expressed as filtered writes so races are settled by the database.

use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::options::IndexOptions;
use mongodb::{Collection, Database, IndexModel};

use super::{AchievementStore, AttemptStore, ProfileStore, QuizFilter, QuizStore};
use crate::metrics::track_db_operation;
use crate::models::{
    Achievement, Attempt, CriteriaType, Profile, Quiz, UnlockedAchievement,
};

const PROFILES: &str = "profiles";
const QUIZZES: &str = "quizzes";
const ATTEMPTS: &str = "attempts";
const ACHIEVEMENTS: &str = "achievements";
const UNLOCKED_ACHIEVEMENTS: &str = "unlocked_achievements";

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    if let mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(ref we)) =
        *err.kind
    {
        return we.code == 11000;
    }
    false
}

pub struct MongoProfileStore {
    collection: Collection<Profile>,
}

impl MongoProfileStore {
    pub fn new(mongo: &Database) -> Self {
        Self {
            collection: mongo.collection(PROFILES),
        }
    }
}

#[async_trait]
impl ProfileStore for MongoProfileStore {
    async fn get(&self, user_id: &str) -> Result<Option<Profile>> {
        track_db_operation("find_one", PROFILES, async {
            self.collection
                .find_one(doc! { "_id": user_id })
                .await
                .context("Failed to fetch profile")
        })
        .await
    }

    async fn get_or_create(&self, user_id: &str) -> Result<Profile> {
        if let Some(profile) = self.get(user_id).await? {
            return Ok(profile);
        }

        let fresh = Profile::new(user_id);
        let inserted = track_db_operation("insert", PROFILES, async {
            match self.collection.insert_one(&fresh).await {
                Ok(_) => Ok(true),
                // A concurrent request created it first; use theirs.
                Err(e) if is_duplicate_key(&e) => Ok(false),
                Err(e) => Err(e).context("Failed to create profile"),
            }
        })
        .await?;

        if inserted {
            return Ok(fresh);
        }
        self.get(user_id)
            .await?
            .context("Profile vanished after duplicate-key insert")
    }

    async fn update_cas(&self, profile: &Profile) -> Result<bool> {
        let mut next = profile.clone();
        next.version = profile.version + 1;

        let result = track_db_operation("replace", PROFILES, async {
            self.collection
                .replace_one(
                    doc! { "_id": &profile.user_id, "version": profile.version as i64 },
                    &next,
                )
                .await
                .context("Failed to persist profile")
        })
        .await?;

        Ok(result.modified_count == 1)
    }

    async fn top_by_progress(&self, limit: i64) -> Result<Vec<Profile>> {
        track_db_operation("find", PROFILES, async {
            let mut cursor = self
                .collection
                .find(doc! {})
                .sort(doc! { "level": -1, "xp": -1 })
                .limit(limit)
                .await
                .context("Failed to query top profiles")?;

            let mut profiles = Vec::new();
            while let Some(profile) = cursor
                .try_next()
                .await
                .context("Failed to read profile from cursor")?
            {
                profiles.push(profile);
            }
            Ok(profiles)
        })
        .await
    }
}

pub struct MongoQuizStore {
    collection: Collection<Quiz>,
}

impl MongoQuizStore {
    pub fn new(mongo: &Database) -> Self {
        Self {
            collection: mongo.collection(QUIZZES),
        }
    }
}

#[async_trait]
impl QuizStore for MongoQuizStore {
    async fn insert(&self, quiz: &Quiz) -> Result<()> {
        track_db_operation("insert", QUIZZES, async {
            self.collection
                .insert_one(quiz)
                .await
                .map(|_| ())
                .context("Failed to insert quiz")
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Option<Quiz>> {
        track_db_operation("find_one", QUIZZES, async {
            self.collection
                .find_one(doc! { "_id": id })
                .await
                .context("Failed to fetch quiz")
        })
        .await
    }

    async fn list(&self, filter: &QuizFilter) -> Result<Vec<Quiz>> {
        let mut query = doc! { "is_temporary": false };
        if let Some(difficulty) = filter.difficulty {
            query.insert("difficulty", difficulty.as_str());
        }
        if let Some(ref category) = filter.category {
            query.insert("category", category);
        }

        track_db_operation("find", QUIZZES, async {
            let mut cursor = self
                .collection
                .find(query)
                .sort(doc! { "created_at": -1 })
                .skip(filter.offset)
                .limit(filter.limit)
                .await
                .context("Failed to query quizzes")?;

            let mut quizzes = Vec::new();
            while let Some(quiz) = cursor
                .try_next()
                .await
                .context("Failed to read quiz from cursor")?
            {
                quizzes.push(quiz);
            }
            Ok(quizzes)
        })
        .await
    }
}

pub struct MongoAttemptStore {
    collection: Collection<Attempt>,
}

impl MongoAttemptStore {
    pub fn new(mongo: &Database) -> Self {
        Self {
            collection: mongo.collection(ATTEMPTS),
        }
    }
}

#[async_trait]
impl AttemptStore for MongoAttemptStore {
    async fn insert(&self, attempt: &Attempt) -> Result<()> {
        track_db_operation("insert", ATTEMPTS, async {
            self.collection
                .insert_one(attempt)
                .await
                .map(|_| ())
                .context("Failed to insert attempt")
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Option<Attempt>> {
        track_db_operation("find_one", ATTEMPTS, async {
            self.collection
                .find_one(doc! { "_id": id })
                .await
                .context("Failed to fetch attempt")
        })
        .await
    }

    async fn complete_if_in_progress(&self, attempt: &Attempt) -> Result<bool> {
        // Filtering on status makes the completion transition a CAS: the
        // second submission of the same attempt matches nothing.
        let result = track_db_operation("replace", ATTEMPTS, async {
            self.collection
                .replace_one(
                    doc! { "_id": &attempt.id, "status": "in_progress" },
                    attempt,
                )
                .await
                .context("Failed to complete attempt")
        })
        .await?;

        Ok(result.modified_count == 1)
    }

    async fn completed_for_user(&self, user_id: &str, limit: i64) -> Result<Vec<Attempt>> {
        track_db_operation("find", ATTEMPTS, async {
            let mut cursor = self
                .collection
                .find(doc! { "user_id": user_id, "status": "completed" })
                .sort(doc! { "completed_at": -1 })
                .limit(limit)
                .await
                .context("Failed to query attempts")?;

            let mut attempts = Vec::new();
            while let Some(attempt) = cursor
                .try_next()
                .await
                .context("Failed to read attempt from cursor")?
            {
                attempts.push(attempt);
            }
            Ok(attempts)
        })
        .await
    }
}

pub struct MongoAchievementStore {
    achievements: Collection<Achievement>,
    unlocks: Collection<UnlockedAchievement>,
}

impl MongoAchievementStore {
    pub fn new(mongo: &Database) -> Self {
        Self {
            achievements: mongo.collection(ACHIEVEMENTS),
            unlocks: mongo.collection(UNLOCKED_ACHIEVEMENTS),
        }
    }
}

#[async_trait]
impl AchievementStore for MongoAchievementStore {
    async fn upsert_by_title(&self, achievement: &Achievement) -> Result<()> {
        track_db_operation("upsert", ACHIEVEMENTS, async {
            self.achievements
                .replace_one(doc! { "title": &achievement.title }, achievement)
                .with_options(
                    mongodb::options::ReplaceOptions::builder()
                        .upsert(true)
                        .build(),
                )
                .await
                .map(|_| ())
                .context("Failed to upsert achievement")
        })
        .await
    }

    async fn all(&self) -> Result<Vec<Achievement>> {
        track_db_operation("find", ACHIEVEMENTS, async {
            let mut cursor = self
                .achievements
                .find(doc! {})
                .await
                .context("Failed to query achievements")?;

            let mut achievements = Vec::new();
            while let Some(achievement) = cursor
                .try_next()
                .await
                .context("Failed to read achievement from cursor")?
            {
                achievements.push(achievement);
            }
            Ok(achievements)
        })
        .await
    }

    async fn by_criteria(&self, criteria: &[CriteriaType]) -> Result<Vec<Achievement>> {
        let names: Vec<&str> = criteria.iter().map(|c| c.as_str()).collect();
        track_db_operation("find", ACHIEVEMENTS, async {
            let mut cursor = self
                .achievements
                .find(doc! { "criteria_type": { "$in": names } })
                .await
                .context("Failed to query achievements by criteria")?;

            let mut achievements = Vec::new();
            while let Some(achievement) = cursor
                .try_next()
                .await
                .context("Failed to read achievement from cursor")?
            {
                achievements.push(achievement);
            }
            Ok(achievements)
        })
        .await
    }

    async fn unlocked_ids_for(&self, user_id: &str) -> Result<HashSet<String>> {
        track_db_operation("find", UNLOCKED_ACHIEVEMENTS, async {
            let mut cursor = self
                .unlocks
                .find(doc! { "user_id": user_id })
                .await
                .context("Failed to query unlocked achievements")?;

            let mut ids = HashSet::new();
            while let Some(unlock) = cursor
                .try_next()
                .await
                .context("Failed to read unlock from cursor")?
            {
                ids.insert(unlock.achievement_id);
            }
            Ok(ids)
        })
        .await
    }

    async fn insert_unlock(&self, unlock: &UnlockedAchievement) -> Result<bool> {
        // The unique (user_id, achievement_id) index settles unlock races:
        // the loser gets a duplicate-key error and reports "already present".
        track_db_operation("insert", UNLOCKED_ACHIEVEMENTS, async {
            match self.unlocks.insert_one(unlock).await {
                Ok(_) => Ok(true),
                Err(e) if is_duplicate_key(&e) => Ok(false),
                Err(e) => Err(e).context("Failed to insert unlock"),
            }
        })
        .await
    }

    async fn unlocks_for(&self, user_id: &str) -> Result<Vec<UnlockedAchievement>> {
        track_db_operation("find", UNLOCKED_ACHIEVEMENTS, async {
            let mut cursor = self
                .unlocks
                .find(doc! { "user_id": user_id })
                .sort(doc! { "unlocked_at": -1 })
                .await
                .context("Failed to query unlocks")?;

            let mut unlocks = Vec::new();
            while let Some(unlock) = cursor
                .try_next()
                .await
                .context("Failed to read unlock from cursor")?
            {
                unlocks.push(unlock);
            }
            Ok(unlocks)
        })
        .await
    }
}

/// Create the indexes the stores rely on. Idempotent; called at startup and
/// by the seeding binary.
pub async fn ensure_indexes(mongo: &Database) -> Result<()> {
    let unique = || IndexOptions::builder().unique(true).build();

    // Authoritative dedup for unlocks.
    mongo
        .collection::<Document>(UNLOCKED_ACHIEVEMENTS)
        .create_index(
            IndexModel::builder()
                .keys(doc! { "user_id": 1, "achievement_id": 1 })
                .options(unique())
                .build(),
        )
        .await
        .context("Failed to create unlock index")?;

    // Seed upsert key.
    mongo
        .collection::<Document>(ACHIEVEMENTS)
        .create_index(
            IndexModel::builder()
                .keys(doc! { "title": 1 })
                .options(unique())
                .build(),
        )
        .await
        .context("Failed to create achievement title index")?;

    // Leaderboard ordering.
    mongo
        .collection::<Document>(PROFILES)
        .create_index(
            IndexModel::builder()
                .keys(doc! { "level": -1, "xp": -1 })
                .build(),
        )
        .await
        .context("Failed to create profile leaderboard index")?;

    // Attempt history.
    mongo
        .collection::<Document>(ATTEMPTS)
        .create_index(
            IndexModel::builder()
                .keys(doc! { "user_id": 1, "status": 1, "completed_at": -1 })
                .build(),
        )
        .await
        .context("Failed to create attempt history index")?;

    // Quiz listing.
    mongo
        .collection::<Document>(QUIZZES)
        .create_index(
            IndexModel::builder()
                .keys(doc! { "is_temporary": 1, "created_at": -1 })
                .build(),
        )
        .await
        .context("Failed to create quiz listing index")?;

    tracing::info!("MongoDB indexes ensured");
    Ok(())
}
