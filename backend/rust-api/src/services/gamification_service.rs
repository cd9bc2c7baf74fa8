use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::Result;
use chrono::{NaiveDate, Utc};

use crate::metrics::{
    LEVEL_UPS_TOTAL, PROFILE_VERSION_RACES_TOTAL, STREAK_EVENTS_TOTAL, XP_GRANTED_TOTAL,
};
use crate::models::{
    Achievement, Attempt, AttemptFacts, GamificationEvent, Profile, StreakChange,
};
use crate::storage::{AchievementStore, ProfileStore};
use crate::utils::retry::{retry_async_with_config, RetryConfig};

use super::achievement_service::AchievementService;

/// Everything a submission response needs after the pipeline converged.
pub struct AttemptOutcome {
    pub profile: Profile,
    pub streak: StreakChange,
    pub unlocked: Vec<Achievement>,
}

/// Runs profile mutations and achievement evaluation as one explicit,
/// ordered pipeline: counters, XP, and streak are applied under a CAS retry
/// loop, then an event queue drives the evaluator to quiescence. Reward XP
/// can re-queue a level check, and only then; since every unlock permanently
/// shrinks the candidate set, the queue always drains.
pub struct GamificationService {
    profiles: Arc<dyn ProfileStore>,
    evaluator: AchievementService,
}

impl GamificationService {
    pub fn new(profiles: Arc<dyn ProfileStore>, achievements: Arc<dyn AchievementStore>) -> Self {
        Self {
            profiles,
            evaluator: AchievementService::new(achievements),
        }
    }

    /// Fold a counted, completed attempt into the profile and evaluate every
    /// achievement it can trigger. XP from unlocked rewards is already
    /// applied to the returned profile.
    pub async fn apply_attempt(
        &self,
        user_id: &str,
        attempt: &Attempt,
        today: NaiveDate,
    ) -> Result<AttemptOutcome> {
        let xp = attempt.xp_earned;
        let correct = attempt.correct_answers;
        let total = attempt.total_questions;

        let (profile, (progress, streak)) =
            mutate_profile(self.profiles.as_ref(), user_id, |profile| {
                profile.total_quizzes_taken = profile.total_quizzes_taken.saturating_add(1);
                profile.total_questions_answered =
                    profile.total_questions_answered.saturating_add(total);
                profile.total_correct_answers =
                    profile.total_correct_answers.saturating_add(correct);
                let progress = profile.add_xp(xp);
                let streak = profile.update_streak(today);
                (progress, streak)
            })
            .await?;

        if streak == StreakChange::ClockSkew {
            tracing::warn!(
                "Streak clock skew: user={}, today={} precedes last activity {:?}; streak untouched",
                user_id,
                today,
                profile.last_activity_date
            );
        }
        STREAK_EVENTS_TOTAL
            .with_label_values(&[streak.as_str()])
            .inc();
        XP_GRANTED_TOTAL
            .with_label_values(&["attempt"])
            .inc_by(xp as u64);
        if progress.levels_gained > 0 {
            LEVEL_UPS_TOTAL.inc_by(progress.levels_gained as u64);
        }

        let facts = AttemptFacts::from(attempt);
        let (profile, unlocked) = self
            .run_events(
                profile,
                vec![
                    (GamificationEvent::QuizCompleted, Some(facts)),
                    (GamificationEvent::StreakUpdated, None),
                    (GamificationEvent::LevelUpdated, None),
                ],
            )
            .await?;

        Ok(AttemptOutcome {
            profile,
            streak,
            unlocked,
        })
    }

    /// Count a freshly created quiz for its creator and evaluate creation
    /// badges.
    pub async fn apply_quiz_created(
        &self,
        user_id: &str,
    ) -> Result<(Profile, Vec<Achievement>)> {
        let (profile, ()) = mutate_profile(self.profiles.as_ref(), user_id, |profile| {
            profile.total_quizzes_created = profile.total_quizzes_created.saturating_add(1);
        })
        .await?;

        self.run_events(profile, vec![(GamificationEvent::QuizCreated, None)])
            .await
    }

    /// Drain the event queue. Each unlock grants its reward through a CAS
    /// write; a reward that levels the profile queues one more level check.
    /// Termination is structural: the catalog is finite and an unlocked
    /// achievement never becomes a candidate again.
    async fn run_events(
        &self,
        mut profile: Profile,
        seed: Vec<(GamificationEvent, Option<AttemptFacts>)>,
    ) -> Result<(Profile, Vec<Achievement>)> {
        let mut queue: VecDeque<(GamificationEvent, Option<AttemptFacts>)> = seed.into();
        let mut unlocked = Vec::new();

        while let Some((event, facts)) = queue.pop_front() {
            let newly = self
                .evaluator
                .evaluate(&profile, event, facts.as_ref())
                .await?;

            for achievement in newly {
                let reward = achievement.xp_reward;
                unlocked.push(achievement);
                if reward == 0 {
                    continue;
                }

                let (updated, progress) =
                    mutate_profile(self.profiles.as_ref(), &profile.user_id, |p| {
                        p.add_xp(reward)
                    })
                    .await?;
                profile = updated;

                XP_GRANTED_TOTAL
                    .with_label_values(&["achievement"])
                    .inc_by(reward as u64);
                if progress.levels_gained > 0 {
                    LEVEL_UPS_TOTAL.inc_by(progress.levels_gained as u64);
                    queue.push_back((GamificationEvent::LevelUpdated, None));
                }
            }
        }

        Ok((profile, unlocked))
    }
}

/// Load-mutate-store under optimistic concurrency: the mutation is a pure
/// function of the loaded profile, so a lost version race just replays it on
/// the fresh copy. Returns the persisted profile and the mutation's output.
pub(crate) async fn mutate_profile<T, F>(
    profiles: &dyn ProfileStore,
    user_id: &str,
    mutate: F,
) -> Result<(Profile, T)>
where
    F: Fn(&mut Profile) -> T,
{
    let result = retry_async_with_config(RetryConfig::aggressive(), || async {
        let mut profile = profiles.get_or_create(user_id).await?;
        let value = mutate(&mut profile);
        profile.updated_at = Utc::now();

        if profiles.update_cas(&profile).await? {
            profile.version += 1;
            Ok((profile, value))
        } else {
            PROFILE_VERSION_RACES_TOTAL.inc();
            tracing::debug!("Profile version race: user={}, replaying", user_id);
            anyhow::bail!("Profile version conflict for user {}", user_id)
        }
    })
    .await;

    if result.is_err() {
        tracing::warn!(
            "Profile mutation gave up after repeated version conflicts: user={}",
            user_id
        );
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Difficulty, Question, Quiz, QuizSource, SubmittedAnswer};
    use crate::storage::{MemoryAchievementStore, MemoryProfileStore};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn quiz(n: u32, difficulty: Difficulty) -> Quiz {
        let questions = (0..n)
            .map(|i| Question {
                id: format!("q{i}"),
                text: format!("Question {i}?"),
                options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                correct_answer: 0,
                explanation: None,
                order: i + 1,
            })
            .collect();
        Quiz {
            id: "quiz1".into(),
            title: "Pipeline quiz".into(),
            description: None,
            category: "General".into(),
            subject: "Testing".into(),
            difficulty,
            questions,
            is_temporary: false,
            time_limit: None,
            source: QuizSource::Manual,
            created_by: "author".into(),
            created_at: Utc::now(),
        }
    }

    fn completed_attempt(
        quiz: &Quiz,
        correct: u32,
        time_taken: Option<u32>,
    ) -> Attempt {
        let answers: Vec<SubmittedAnswer> = (0..quiz.question_count())
            .map(|i| SubmittedAnswer {
                question_id: format!("q{i}"),
                // correct_answer is always 0 in `quiz`.
                selected_option: if i < correct { 0 } else { 1 },
            })
            .collect();
        let mut attempt = Attempt::start("u1", quiz);
        let records = Attempt::grade(quiz, &answers, Utc::now());
        attempt.finalize(records, quiz.difficulty, time_taken, Utc::now());
        attempt
    }

    async fn service() -> (GamificationService, Arc<dyn ProfileStore>) {
        let profiles: Arc<dyn ProfileStore> = Arc::new(MemoryProfileStore::new());
        let achievements: Arc<dyn AchievementStore> =
            Arc::new(MemoryAchievementStore::seeded().await);
        (
            GamificationService::new(profiles.clone(), achievements),
            profiles,
        )
    }

    #[tokio::test]
    async fn perfect_first_attempt_folds_rewards_into_profile() {
        let (service, profiles) = service().await;
        let quiz = quiz(10, Difficulty::Medium);
        let attempt = completed_attempt(&quiz, 10, None);
        assert_eq!(attempt.xp_earned, 150);

        let outcome = service
            .apply_attempt("u1", &attempt, date(2026, 3, 10))
            .await
            .unwrap();

        // 150 attempt XP: level 2, 50/120. First Steps +50: 100/120.
        // Perfect Score +100: level 3, 80/144.
        let ids: Vec<&str> = outcome.unlocked.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["first-steps", "perfect-score"]);
        assert_eq!(outcome.profile.level, 3);
        assert_eq!(outcome.profile.xp, 80);
        assert_eq!(outcome.profile.xp_to_next_level, 144);
        assert_eq!(outcome.profile.current_streak, 1);
        assert_eq!(outcome.streak, StreakChange::Started);
        assert_eq!(outcome.profile.total_quizzes_taken, 1);
        assert_eq!(outcome.profile.total_correct_answers, 10);
        assert_eq!(outcome.profile.total_questions_answered, 10);

        // One counter/XP/streak write plus two reward grants.
        let stored = profiles.get("u1").await.unwrap().unwrap();
        assert_eq!(stored.version, 3);
        assert_eq!(stored.level, 3);
    }

    #[tokio::test]
    async fn repeat_submission_unlocks_nothing_new() {
        let (service, _) = service().await;
        let quiz = quiz(10, Difficulty::Medium);
        let attempt = completed_attempt(&quiz, 10, None);
        let today = date(2026, 3, 10);

        let first = service.apply_attempt("u1", &attempt, today).await.unwrap();
        assert_eq!(first.unlocked.len(), 2);

        let second = service.apply_attempt("u1", &attempt, today).await.unwrap();
        assert!(second.unlocked.is_empty());
        assert_eq!(second.streak, StreakChange::Unchanged);
        assert_eq!(second.profile.total_quizzes_taken, 2);
    }

    #[tokio::test]
    async fn reward_xp_requeues_level_check() {
        let (service, profiles) = service().await;

        // One more level-up away from Champion, with a requirement small
        // enough that the First Steps reward alone crosses it.
        let mut profile = profiles.get_or_create("u1").await.unwrap();
        profile.level = 9;
        profile.xp = 0;
        profile.xp_to_next_level = 40;
        assert!(profiles.update_cas(&profile).await.unwrap());

        let quiz = quiz(10, Difficulty::Easy);
        // Zero correct answers: no attempt XP, no perfect score.
        let attempt = completed_attempt(&quiz, 0, None);
        assert_eq!(attempt.xp_earned, 0);

        let outcome = service
            .apply_attempt("u1", &attempt, date(2026, 3, 10))
            .await
            .unwrap();

        let ids: Vec<&str> = outcome.unlocked.iter().map(|a| a.id.as_str()).collect();
        assert!(ids.contains(&"first-steps"));
        assert!(ids.contains(&"champion"), "level check did not re-run: {ids:?}");
        assert!(outcome.profile.level >= 10);
    }

    #[tokio::test]
    async fn quiz_creation_counts_toward_creator_badges() {
        let (service, profiles) = service().await;

        let mut profile = profiles.get_or_create("u1").await.unwrap();
        profile.total_quizzes_created = 9;
        assert!(profiles.update_cas(&profile).await.unwrap());

        let (profile, unlocked) = service.apply_quiz_created("u1").await.unwrap();
        assert_eq!(profile.total_quizzes_created, 10);
        assert_eq!(unlocked.len(), 1);
        assert_eq!(unlocked[0].id, "quiz-master");
        // Quiz Master reward is applied immediately.
        assert!(profile.level > 1 || profile.xp > 0);
    }

    #[tokio::test]
    async fn clock_skew_applies_xp_but_not_streak() {
        let (service, profiles) = service().await;

        let mut profile = profiles.get_or_create("u1").await.unwrap();
        profile.current_streak = 4;
        profile.longest_streak = 4;
        profile.last_activity_date = Some(date(2026, 3, 10));
        assert!(profiles.update_cas(&profile).await.unwrap());

        let quiz = quiz(10, Difficulty::Easy);
        let attempt = completed_attempt(&quiz, 5, None);

        let outcome = service
            .apply_attempt("u1", &attempt, date(2026, 3, 9))
            .await
            .unwrap();

        assert_eq!(outcome.streak, StreakChange::ClockSkew);
        assert_eq!(outcome.profile.current_streak, 4);
        assert_eq!(outcome.profile.last_activity_date, Some(date(2026, 3, 10)));
        // Counters and XP still land.
        assert_eq!(outcome.profile.total_quizzes_taken, 1);
        assert_eq!(outcome.profile.xp, 50);
    }

    #[tokio::test]
    async fn concurrent_submissions_lose_no_updates() {
        let (service, profiles) = service().await;
        let service = Arc::new(service);
        let quiz = quiz(4, Difficulty::Easy);
        let today = date(2026, 3, 10);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            let attempt = completed_attempt(&quiz, 4, None);
            handles.push(tokio::spawn(async move {
                service.apply_attempt("u1", &attempt, today).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stored = profiles.get("u1").await.unwrap().unwrap();
        assert_eq!(stored.total_quizzes_taken, 8);
        assert_eq!(stored.total_questions_answered, 32);
        assert_eq!(stored.current_streak, 1);
    }
}
