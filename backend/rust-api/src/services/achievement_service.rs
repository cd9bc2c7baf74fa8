use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;

use crate::metrics::ACHIEVEMENTS_UNLOCKED_TOTAL;
use crate::models::{
    Achievement, AttemptFacts, CriteriaType, GamificationEvent, Profile, UnlockedAchievement,
};
use crate::storage::AchievementStore;

/// Questions an attempt needs before it can count toward a fast-quiz badge.
/// Keeps two-question sprints from farming Speed Demon.
const FAST_QUIZ_MIN_QUESTIONS: u32 = 5;

pub struct AchievementService {
    achievements: Arc<dyn AchievementStore>,
}

impl AchievementService {
    pub fn new(achievements: Arc<dyn AchievementStore>) -> Self {
        Self { achievements }
    }

    /// Evaluate one event against the catalog and record every unlock the
    /// profile now qualifies for. Returns the newly unlocked achievements;
    /// granting their XP rewards is the caller's job.
    ///
    /// Calling this twice over identical state unlocks nothing the second
    /// time: the exclusion set is read fresh from the store on every call
    /// and the (user, achievement) unique key settles concurrent inserts.
    pub async fn evaluate(
        &self,
        profile: &Profile,
        event: GamificationEvent,
        attempt: Option<&AttemptFacts>,
    ) -> Result<Vec<Achievement>> {
        let criteria = event.relevant_criteria();

        let candidates = self.achievements.by_criteria(criteria).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let unlocked = self
            .achievements
            .unlocked_ids_for(&profile.user_id)
            .await?;

        let mut newly_unlocked = Vec::new();
        for achievement in candidates {
            if unlocked.contains(&achievement.id) {
                continue;
            }
            if !criterion_met(&achievement, profile, attempt) {
                continue;
            }

            let unlock = UnlockedAchievement {
                user_id: profile.user_id.clone(),
                achievement_id: achievement.id.clone(),
                unlocked_at: Utc::now(),
            };
            if !self.achievements.insert_unlock(&unlock).await? {
                // Lost the race or a replay: someone already holds this
                // unlock, so its reward must not be granted again.
                tracing::debug!(
                    "Unlock already present: user={}, achievement={}",
                    profile.user_id,
                    achievement.id
                );
                continue;
            }

            tracing::info!(
                "Achievement unlocked: user={}, achievement={}, event={}, reward={}",
                profile.user_id,
                achievement.id,
                event.as_str(),
                achievement.xp_reward
            );
            ACHIEVEMENTS_UNLOCKED_TOTAL
                .with_label_values(&[achievement.criteria_type.as_str()])
                .inc();
            newly_unlocked.push(achievement);
        }

        Ok(newly_unlocked)
    }
}

/// Whether one achievement's criterion holds for the profile and, for
/// attempt-scoped criteria, the attempt that fired the event.
pub fn criterion_met(
    achievement: &Achievement,
    profile: &Profile,
    attempt: Option<&AttemptFacts>,
) -> bool {
    let value = achievement.criteria_value;
    match achievement.criteria_type {
        CriteriaType::QuizzesTaken => profile.total_quizzes_taken >= value,
        // A streak badge once earned via a long run stays earnable even if
        // the current streak lapsed before evaluation ran.
        CriteriaType::StreakDays => {
            profile.current_streak >= value || profile.longest_streak >= value
        }
        // Exact comparison: a full score is computed as correct == total,
        // which divides to exactly 100.0.
        CriteriaType::PerfectScore => attempt.is_some_and(|a| a.score_percentage == 100.0),
        CriteriaType::QuizzesCreated => profile.total_quizzes_created >= value,
        CriteriaType::FastQuiz => attempt.is_some_and(|a| {
            a.total_questions >= FAST_QUIZ_MIN_QUESTIONS
                && a.time_taken.is_some_and(|t| t <= value)
        }),
        CriteriaType::LevelReached => profile.level >= value,
    }
}
