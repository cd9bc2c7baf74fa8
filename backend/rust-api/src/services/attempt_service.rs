use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;

use crate::metrics::ATTEMPTS_SUBMITTED_TOTAL;
use crate::models::attempt::{
    AttemptSummary, StartAttemptResponse, SubmitAttemptResponse,
};
use crate::models::{Achievement, AchievementView, Attempt, Profile, Quiz, SubmittedAnswer};
use crate::storage::{AchievementStore, AttemptStore, ProfileStore, QuizStore};

use super::gamification_service::GamificationService;

pub enum SubmitResult {
    Completed(SubmitAttemptResponse),
    /// A concurrent submission already completed this attempt; nothing was
    /// applied.
    AlreadyCompleted,
}

pub struct AttemptService {
    quizzes: Arc<dyn QuizStore>,
    attempts: Arc<dyn AttemptStore>,
    profiles: Arc<dyn ProfileStore>,
    gamification: GamificationService,
}

impl AttemptService {
    pub fn new(
        quizzes: Arc<dyn QuizStore>,
        attempts: Arc<dyn AttemptStore>,
        profiles: Arc<dyn ProfileStore>,
        achievements: Arc<dyn AchievementStore>,
    ) -> Self {
        let gamification = GamificationService::new(profiles.clone(), achievements);
        Self {
            quizzes,
            attempts,
            profiles,
            gamification,
        }
    }

    pub async fn start(&self, user_id: &str, quiz: &Quiz) -> Result<StartAttemptResponse> {
        let attempt = Attempt::start(user_id, quiz);
        self.attempts.insert(&attempt).await?;

        tracing::info!(
            "Attempt started: user={}, quiz={}, attempt={}",
            user_id,
            quiz.id,
            attempt.id
        );

        Ok(StartAttemptResponse {
            attempt_id: attempt.id,
            quiz_id: attempt.quiz_id,
            total_questions: attempt.total_questions,
            time_limit: quiz.time_limit,
            started_at: attempt.started_at,
        })
    }

    /// Grade and complete an attempt the handler already verified to exist,
    /// belong to the caller, and be in progress. Counted attempts run the
    /// full gamification pipeline; attempts at temporary quizzes only store
    /// their result.
    pub async fn submit(
        &self,
        mut attempt: Attempt,
        quiz: &Quiz,
        answers: &[SubmittedAnswer],
        time_taken: Option<u32>,
    ) -> Result<SubmitResult> {
        let now = Utc::now();
        let records = Attempt::grade(quiz, answers, now);
        attempt.finalize(records, quiz.difficulty, time_taken, now);

        // The status transition is the concurrency gate for replays.
        if !self.attempts.complete_if_in_progress(&attempt).await? {
            tracing::warn!(
                "Attempt {} was completed by a concurrent submission",
                attempt.id
            );
            return Ok(SubmitResult::AlreadyCompleted);
        }

        let counted = !quiz.is_temporary;
        ATTEMPTS_SUBMITTED_TOTAL
            .with_label_values(&[
                quiz.difficulty.as_str(),
                if counted { "true" } else { "false" },
            ])
            .inc();

        if !counted {
            // Practice runs: no counters, no streak, no achievements.
            let profile = self.profiles.get_or_create(&attempt.user_id).await?;
            return Ok(SubmitResult::Completed(build_response(
                attempt,
                &profile,
                false,
                &[],
            )));
        }

        let outcome = self
            .gamification
            .apply_attempt(&attempt.user_id, &attempt, now.date_naive())
            .await?;

        tracing::info!(
            "Attempt submitted: user={}, attempt={}, score={:.1}, xp={}, level={}, unlocked={}",
            attempt.user_id,
            attempt.id,
            attempt.score_percentage,
            attempt.xp_earned,
            outcome.profile.level,
            outcome.unlocked.len()
        );

        Ok(SubmitResult::Completed(build_response(
            attempt,
            &outcome.profile,
            outcome.streak.lost(),
            &outcome.unlocked,
        )))
    }

    /// Completed attempts for the history view, newest first, joined with
    /// quiz metadata. Attempts at temporary quizzes are skipped.
    pub async fn history(&self, user_id: &str, limit: i64) -> Result<Vec<AttemptSummary>> {
        let attempts = self.attempts.completed_for_user(user_id, limit).await?;

        let mut quiz_cache: HashMap<String, Option<Quiz>> = HashMap::new();
        let mut summaries = Vec::with_capacity(attempts.len());

        for attempt in attempts {
            if !quiz_cache.contains_key(&attempt.quiz_id) {
                let quiz = self.quizzes.get(&attempt.quiz_id).await?;
                quiz_cache.insert(attempt.quiz_id.clone(), quiz);
            }
            let quiz = quiz_cache
                .get(&attempt.quiz_id)
                .and_then(|q| q.as_ref());

            if quiz.is_some_and(|q| q.is_temporary) {
                continue;
            }

            summaries.push(AttemptSummary {
                id: attempt.id,
                quiz_id: attempt.quiz_id,
                quiz_title: quiz.map(|q| q.title.clone()),
                difficulty: quiz.map(|q| q.difficulty),
                status: attempt.status,
                total_questions: attempt.total_questions,
                correct_answers: attempt.correct_answers,
                score_percentage: attempt.score_percentage,
                xp_earned: attempt.xp_earned,
                time_taken: attempt.time_taken,
                started_at: attempt.started_at,
                completed_at: attempt.completed_at,
            });
        }

        Ok(summaries)
    }
}

fn build_response(
    attempt: Attempt,
    profile: &Profile,
    streak_lost: bool,
    unlocked: &[Achievement],
) -> SubmitAttemptResponse {
    SubmitAttemptResponse {
        score_percentage: attempt.score_percentage,
        xp_earned: attempt.xp_earned,
        new_level: profile.level,
        new_xp: profile.xp,
        streak_lost,
        current_streak: profile.current_streak,
        longest_streak: profile.longest_streak,
        unlocked_achievements: unlocked.iter().map(AchievementView::from).collect(),
        attempt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Difficulty, Question, QuizSource};
    use crate::storage::{
        MemoryAchievementStore, MemoryAttemptStore, MemoryProfileStore, MemoryQuizStore,
    };

    fn sample_quiz(id: &str, n: u32, temporary: bool) -> Quiz {
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
            id: id.to_string(),
            title: format!("Quiz {id}"),
            description: None,
            category: "General".into(),
            subject: "Testing".into(),
            difficulty: Difficulty::Medium,
            questions,
            is_temporary: temporary,
            time_limit: None,
            source: QuizSource::Manual,
            created_by: "author".into(),
            created_at: Utc::now(),
        }
    }

    fn all_correct(n: u32) -> Vec<SubmittedAnswer> {
        (0..n)
            .map(|i| SubmittedAnswer {
                question_id: format!("q{i}"),
                selected_option: 0,
            })
            .collect()
    }

    async fn service_with_stores() -> (AttemptService, Arc<dyn QuizStore>, Arc<dyn ProfileStore>)
    {
        let quizzes: Arc<dyn QuizStore> = Arc::new(MemoryQuizStore::new());
        let attempts: Arc<dyn AttemptStore> = Arc::new(MemoryAttemptStore::new());
        let profiles: Arc<dyn ProfileStore> = Arc::new(MemoryProfileStore::new());
        let achievements: Arc<dyn AchievementStore> =
            Arc::new(MemoryAchievementStore::seeded().await);
        let service = AttemptService::new(
            quizzes.clone(),
            attempts.clone(),
            profiles.clone(),
            achievements,
        );
        (service, quizzes, profiles)
    }

    #[tokio::test]
    async fn temporary_quiz_submission_leaves_profile_untouched() {
        let (service, quizzes, profiles) = service_with_stores().await;
        let quiz = sample_quiz("tmp", 5, true);
        quizzes.insert(&quiz).await.unwrap();

        let attempt = Attempt::start("u1", &quiz);
        service.attempts.insert(&attempt).await.unwrap();

        let result = service
            .submit(attempt, &quiz, &all_correct(5), Some(20))
            .await
            .unwrap();

        let SubmitResult::Completed(response) = result else {
            panic!("expected completion");
        };
        assert_eq!(response.score_percentage, 100.0);
        assert!(!response.streak_lost);
        assert!(response.unlocked_achievements.is_empty());
        assert_eq!(response.new_level, 1);
        assert_eq!(response.new_xp, 0);

        let profile = profiles.get_or_create("u1").await.unwrap();
        assert_eq!(profile.total_quizzes_taken, 0);
        assert_eq!(profile.current_streak, 0);
        assert_eq!(profile.xp, 0);
    }

    #[tokio::test]
    async fn second_submission_of_same_attempt_is_rejected() {
        let (service, quizzes, _) = service_with_stores().await;
        let quiz = sample_quiz("quiz", 5, false);
        quizzes.insert(&quiz).await.unwrap();

        let attempt = Attempt::start("u1", &quiz);
        service.attempts.insert(&attempt).await.unwrap();

        let first = service
            .submit(attempt.clone(), &quiz, &all_correct(5), None)
            .await
            .unwrap();
        assert!(matches!(first, SubmitResult::Completed(_)));

        let second = service
            .submit(attempt, &quiz, &all_correct(5), None)
            .await
            .unwrap();
        assert!(matches!(second, SubmitResult::AlreadyCompleted));
    }

    #[tokio::test]
    async fn history_joins_quiz_metadata_and_skips_temporary() {
        let (service, quizzes, _) = service_with_stores().await;
        let counted = sample_quiz("counted", 5, false);
        let temporary = sample_quiz("tmp", 5, true);
        quizzes.insert(&counted).await.unwrap();
        quizzes.insert(&temporary).await.unwrap();

        for quiz in [&counted, &temporary] {
            let attempt = Attempt::start("u1", quiz);
            service.attempts.insert(&attempt).await.unwrap();
            service
                .submit(attempt, quiz, &all_correct(5), None)
                .await
                .unwrap();
        }

        let history = service.history("u1", 50).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].quiz_id, "counted");
        assert_eq!(history[0].quiz_title.as_deref(), Some("Quiz counted"));
        assert_eq!(history[0].difficulty, Some(Difficulty::Medium));
        assert_eq!(history[0].score_percentage, 100.0);
    }
}
