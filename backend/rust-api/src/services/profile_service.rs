use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};

use crate::metrics::{
    record_cache_hit, record_cache_miss, track_cache_operation, STREAK_EVENTS_TOTAL,
};
use crate::models::{Achievement, AchievementView, Profile, UnlockedAchievementView};
use crate::storage::{AchievementStore, ProfileStore};

use super::gamification_service::mutate_profile;

const LEADERBOARD_SIZE: i64 = 10;
const LEADERBOARD_CACHE_KEY: &str = "leaderboard:top";
const LEADERBOARD_CACHE_TTL_SECONDS: u64 = 60;

/// Profile as the API reports it, with the derived accuracy attached.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileView {
    #[serde(flatten)]
    pub profile: Profile,
    /// Percentage of lifetime answers that were correct, one decimal.
    pub accuracy: f64,
}

impl From<Profile> for ProfileView {
    fn from(profile: Profile) -> Self {
        let accuracy = profile.accuracy();
        ProfileView { profile, accuracy }
    }
}

/// One leaderboard row. Serializable both ways so the rendered board can be
/// parked in Redis as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub user_id: String,
    pub level: u32,
    pub xp: u32,
    pub current_streak: u32,
    pub total_quizzes_taken: u32,
}

impl LeaderboardEntry {
    fn from_profile(rank: u32, profile: &Profile) -> Self {
        LeaderboardEntry {
            rank,
            user_id: profile.user_id.clone(),
            level: profile.level,
            xp: profile.xp,
            current_streak: profile.current_streak,
            total_quizzes_taken: profile.total_quizzes_taken,
        }
    }
}

/// Read side of the gamification state: profile lookups, the achievement
/// catalog, a user's unlocks and the leaderboard.
pub struct ProfileService {
    profiles: Arc<dyn ProfileStore>,
    achievements: Arc<dyn AchievementStore>,
    redis: Option<ConnectionManager>,
}

impl ProfileService {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        achievements: Arc<dyn AchievementStore>,
        redis: Option<ConnectionManager>,
    ) -> Self {
        Self {
            profiles,
            achievements,
            redis,
        }
    }

    /// Fetch-or-create the caller's profile. A streak that lapsed since the
    /// last activity is zeroed before reporting; the decay is the only case
    /// where a read writes, and it goes through the usual CAS path.
    pub async fn profile(&self, user_id: &str, today: NaiveDate) -> Result<ProfileView> {
        let mut profile = self.profiles.get_or_create(user_id).await?;

        let mut probe = profile.clone();
        if probe.check_streak(today) {
            let (persisted, decayed) =
                mutate_profile(self.profiles.as_ref(), user_id, |p| p.check_streak(today))
                    .await?;
            if decayed {
                STREAK_EVENTS_TOTAL.with_label_values(&["decayed"]).inc();
                tracing::info!(
                    "Streak lapsed: user={}, last activity {:?}, zeroed on read",
                    user_id,
                    persisted.last_activity_date
                );
            }
            profile = persisted;
        }

        Ok(ProfileView::from(profile))
    }

    /// Full achievement catalog, locked and unlocked alike.
    pub async fn catalog(&self) -> Result<Vec<Achievement>> {
        self.achievements.all().await
    }

    /// The caller's unlocks with catalog details embedded. Unlocks whose
    /// definition was retired from the catalog are dropped from the view.
    pub async fn unlocked(&self, user_id: &str) -> Result<Vec<UnlockedAchievementView>> {
        let unlocks = self.achievements.unlocks_for(user_id).await?;
        let catalog = self.achievements.all().await?;
        let by_id: HashMap<&str, &Achievement> =
            catalog.iter().map(|a| (a.id.as_str(), a)).collect();

        let views = unlocks
            .into_iter()
            .filter_map(|unlock| {
                by_id.get(unlock.achievement_id.as_str()).map(|a| {
                    UnlockedAchievementView {
                        achievement: AchievementView::from(*a),
                        unlocked_at: unlock.unlocked_at,
                    }
                })
            })
            .collect();

        Ok(views)
    }

    /// Top profiles by (level, xp) descending, ranked from 1. Served from
    /// Redis when a fresh copy is cached there; cache failures fall through
    /// to the store.
    pub async fn leaderboard(&self) -> Result<Vec<LeaderboardEntry>> {
        if self.redis.is_some() {
            if let Some(cached) = self.cached_leaderboard().await {
                record_cache_hit();
                return Ok(cached);
            }
            record_cache_miss();
        }

        let top = self.profiles.top_by_progress(LEADERBOARD_SIZE).await?;
        let entries: Vec<LeaderboardEntry> = top
            .iter()
            .enumerate()
            .map(|(i, profile)| LeaderboardEntry::from_profile(i as u32 + 1, profile))
            .collect();

        self.cache_leaderboard(&entries).await;
        Ok(entries)
    }

    async fn cached_leaderboard(&self) -> Option<Vec<LeaderboardEntry>> {
        let mut conn = self.redis.as_ref()?.clone();
        let result = track_cache_operation("get", async {
            redis::cmd("GET")
                .arg(LEADERBOARD_CACHE_KEY)
                .query_async::<Option<String>>(&mut conn)
                .await
                .context("Failed to read leaderboard cache")
        })
        .await;

        match result {
            Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!("Leaderboard cache read failed: {}", e);
                None
            }
        }
    }

    async fn cache_leaderboard(&self, entries: &[LeaderboardEntry]) {
        let Some(conn) = self.redis.as_ref() else {
            return;
        };
        let Ok(raw) = serde_json::to_string(entries) else {
            return;
        };

        let mut conn = conn.clone();
        let result = track_cache_operation("setex", async {
            redis::cmd("SETEX")
                .arg(LEADERBOARD_CACHE_KEY)
                .arg(LEADERBOARD_CACHE_TTL_SECONDS)
                .arg(raw)
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to write leaderboard cache")
        })
        .await;

        if let Err(e) = result {
            tracing::debug!("Leaderboard cache write failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UnlockedAchievement;
    use crate::storage::{MemoryAchievementStore, MemoryProfileStore};
    use chrono::Utc;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn service(
        profiles: Arc<dyn ProfileStore>,
        achievements: Arc<dyn AchievementStore>,
    ) -> ProfileService {
        ProfileService::new(profiles, achievements, None)
    }

    #[tokio::test]
    async fn profile_read_creates_default() {
        let profiles: Arc<dyn ProfileStore> = Arc::new(MemoryProfileStore::new());
        let achievements: Arc<dyn AchievementStore> = Arc::new(MemoryAchievementStore::new());
        let svc = service(profiles.clone(), achievements);

        let view = svc.profile("fresh-user", date(2024, 3, 1)).await.unwrap();
        assert_eq!(view.profile.level, 1);
        assert_eq!(view.profile.xp, 0);
        assert_eq!(view.profile.current_streak, 0);
        assert_eq!(view.accuracy, 0.0);

        // A fresh profile has nothing to decay, so the read must not write.
        let stored = profiles.get("fresh-user").await.unwrap().unwrap();
        assert_eq!(stored.version, view.profile.version);
    }

    #[tokio::test]
    async fn lapsed_streak_is_zeroed_and_persisted() {
        let profiles: Arc<dyn ProfileStore> = Arc::new(MemoryProfileStore::new());
        let achievements: Arc<dyn AchievementStore> = Arc::new(MemoryAchievementStore::new());
        let svc = service(profiles.clone(), achievements);

        let (seeded, _) = mutate_profile(profiles.as_ref(), "u1", |p| {
            p.update_streak(date(2024, 3, 1));
            p.update_streak(date(2024, 3, 2));
        })
        .await
        .unwrap();
        assert_eq!(seeded.current_streak, 2);

        // Two days later the streak is gone, and the store sees the decay.
        let view = svc.profile("u1", date(2024, 3, 4)).await.unwrap();
        assert_eq!(view.profile.current_streak, 0);
        assert_eq!(view.profile.longest_streak, 2);

        let stored = profiles.get("u1").await.unwrap().unwrap();
        assert_eq!(stored.current_streak, 0);
        assert!(stored.version > seeded.version);
    }

    #[tokio::test]
    async fn intact_streak_read_does_not_write() {
        let profiles: Arc<dyn ProfileStore> = Arc::new(MemoryProfileStore::new());
        let achievements: Arc<dyn AchievementStore> = Arc::new(MemoryAchievementStore::new());
        let svc = service(profiles.clone(), achievements);

        let (seeded, _) = mutate_profile(profiles.as_ref(), "u1", |p| {
            p.update_streak(date(2024, 3, 2));
        })
        .await
        .unwrap();

        // Next-day read: streak still reachable by playing today, no decay.
        let view = svc.profile("u1", date(2024, 3, 3)).await.unwrap();
        assert_eq!(view.profile.current_streak, 1);

        let stored = profiles.get("u1").await.unwrap().unwrap();
        assert_eq!(stored.version, seeded.version);
    }

    #[tokio::test]
    async fn leaderboard_ranks_by_level_then_xp() {
        let profiles: Arc<dyn ProfileStore> = Arc::new(MemoryProfileStore::new());
        let achievements: Arc<dyn AchievementStore> = Arc::new(MemoryAchievementStore::new());

        for (user, xp) in [("low", 30u32), ("high", 500), ("mid", 140)] {
            mutate_profile(profiles.as_ref(), user, |p| {
                p.add_xp(xp);
            })
            .await
            .unwrap();
        }

        let svc = service(profiles.clone(), achievements);
        let board = svc.leaderboard().await.unwrap();

        assert_eq!(board.len(), 3);
        assert_eq!(board[0].user_id, "high");
        assert_eq!(board[1].user_id, "mid");
        assert_eq!(board[2].user_id, "low");
        assert_eq!(board[0].rank, 1);
        assert_eq!(board[2].rank, 3);
        assert!(board[0].level >= board[1].level);
    }

    #[tokio::test]
    async fn unlocked_view_embeds_catalog_details() {
        let profiles: Arc<dyn ProfileStore> = Arc::new(MemoryProfileStore::new());
        let achievements = Arc::new(MemoryAchievementStore::seeded().await);

        achievements
            .insert_unlock(&UnlockedAchievement {
                user_id: "u1".to_string(),
                achievement_id: "first-steps".to_string(),
                unlocked_at: Utc::now(),
            })
            .await
            .unwrap();

        let svc = service(profiles, achievements);
        let unlocked = svc.unlocked("u1").await.unwrap();

        assert_eq!(unlocked.len(), 1);
        assert_eq!(unlocked[0].achievement.id, "first-steps");
        assert_eq!(unlocked[0].achievement.title, "First Steps");
        assert!(unlocked[0].achievement.xp_reward > 0);

        assert!(svc.unlocked("nobody").await.unwrap().is_empty());
    }
}
