use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use rand::seq::SliceRandom;
use uuid::Uuid;

use crate::metrics::QUIZZES_CREATED_TOTAL;
use crate::models::quiz::{
    CreateQuizRequest, GenerateQuizRequest, ListQuizzesQuery, QuizSummary, TakeQuizView,
};
use crate::models::{Achievement, Question, Quiz, QuizSource};
use crate::storage::{AchievementStore, ProfileStore, QuizFilter, QuizStore};

use super::gamification_service::GamificationService;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 100;
/// Generated quizzes get a time limit the author never set by hand.
const SECONDS_PER_GENERATED_QUESTION: u32 = 60;

pub struct QuizService {
    quizzes: Arc<dyn QuizStore>,
    gamification: GamificationService,
}

impl QuizService {
    pub fn new(
        quizzes: Arc<dyn QuizStore>,
        profiles: Arc<dyn ProfileStore>,
        achievements: Arc<dyn AchievementStore>,
    ) -> Self {
        Self {
            quizzes,
            gamification: GamificationService::new(profiles, achievements),
        }
    }

    /// Store a quiz authored from explicit questions. Question and quiz ids
    /// are assigned here; `order` is 1-based input order.
    pub async fn create(
        &self,
        user_id: &str,
        request: CreateQuizRequest,
    ) -> Result<(Quiz, Vec<Achievement>)> {
        let questions = request
            .questions
            .into_iter()
            .enumerate()
            .map(|(i, q)| Question {
                id: Uuid::new_v4().to_string(),
                text: q.text,
                options: q.options,
                correct_answer: q.correct_answer,
                explanation: q.explanation,
                order: i as u32 + 1,
            })
            .collect();

        let quiz = Quiz {
            id: Uuid::new_v4().to_string(),
            title: request.title,
            description: request.description,
            category: request.category,
            subject: request.subject,
            difficulty: request.difficulty,
            questions,
            is_temporary: request.is_temporary,
            time_limit: request.time_limit,
            source: QuizSource::Manual,
            created_by: user_id.to_string(),
            created_at: Utc::now(),
        };

        self.persist(quiz).await
    }

    /// Store a quiz assembled from generated questions.
    pub async fn create_generated(
        &self,
        user_id: &str,
        request: GenerateQuizRequest,
        questions: Vec<Question>,
    ) -> Result<(Quiz, Vec<Achievement>)> {
        let title = request
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| format!("{} Quiz", request.subject));
        let time_limit = questions.len() as u32 * SECONDS_PER_GENERATED_QUESTION;

        let quiz = Quiz {
            id: Uuid::new_v4().to_string(),
            title,
            description: None,
            category: request.category,
            subject: request.subject,
            difficulty: request.difficulty,
            questions,
            is_temporary: request.is_temporary,
            time_limit: Some(time_limit),
            source: QuizSource::Generated,
            created_by: user_id.to_string(),
            created_at: Utc::now(),
        };

        self.persist(quiz).await
    }

    async fn persist(&self, quiz: Quiz) -> Result<(Quiz, Vec<Achievement>)> {
        self.quizzes.insert(&quiz).await?;
        QUIZZES_CREATED_TOTAL
            .with_label_values(&[quiz.source.as_str()])
            .inc();

        tracing::info!(
            "Quiz created: id={}, user={}, source={}, questions={}, temporary={}",
            quiz.id,
            quiz.created_by,
            quiz.source.as_str(),
            quiz.questions.len(),
            quiz.is_temporary
        );

        // Temporary quizzes stay off the creator's record.
        let unlocked = if quiz.is_temporary {
            Vec::new()
        } else {
            let (_, unlocked) = self
                .gamification
                .apply_quiz_created(&quiz.created_by)
                .await?;
            unlocked
        };

        Ok((quiz, unlocked))
    }

    pub async fn list(&self, query: &ListQuizzesQuery) -> Result<Vec<QuizSummary>> {
        let filter = QuizFilter {
            difficulty: query.difficulty,
            category: query.category.clone(),
            limit: query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            offset: query.offset.unwrap_or(0),
        };
        let quizzes = self.quizzes.list(&filter).await?;
        Ok(quizzes.iter().map(Quiz::summary).collect())
    }
}

/// Player-facing rendition of a quiz: answers and explanations stripped,
/// questions shuffled with `order` rewritten to the shuffled positions.
pub fn shuffled_take_view(quiz: &Quiz) -> TakeQuizView {
    let mut view = quiz.take_view();
    view.questions.shuffle(&mut rand::rng());
    for (i, question) in view.questions.iter_mut().enumerate() {
        question.order = i as u32 + 1;
    }
    view
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::quiz::QuestionInput;
    use crate::models::Difficulty;
    use crate::storage::{MemoryAchievementStore, MemoryProfileStore, MemoryQuizStore};

    fn question_inputs(n: usize) -> Vec<QuestionInput> {
        (0..n)
            .map(|i| QuestionInput {
                text: format!("Question {i}?"),
                options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                correct_answer: (i % 4) as u32,
                explanation: None,
            })
            .collect()
    }

    fn create_request(n: usize, temporary: bool) -> CreateQuizRequest {
        CreateQuizRequest {
            title: "Rust ownership".into(),
            description: None,
            category: "Programming".into(),
            subject: "Rust".into(),
            difficulty: Difficulty::Medium,
            questions: question_inputs(n),
            is_temporary: temporary,
            time_limit: Some(300),
        }
    }

    async fn service() -> (QuizService, Arc<dyn ProfileStore>) {
        let profiles: Arc<dyn ProfileStore> = Arc::new(MemoryProfileStore::new());
        let achievements: Arc<dyn AchievementStore> =
            Arc::new(MemoryAchievementStore::seeded().await);
        let quizzes: Arc<dyn QuizStore> = Arc::new(MemoryQuizStore::new());
        (
            QuizService::new(quizzes, profiles.clone(), achievements),
            profiles,
        )
    }

    #[tokio::test]
    async fn create_assigns_ids_and_counts_toward_creator() {
        let (service, profiles) = service().await;

        let (quiz, _) = service.create("author", create_request(5, false)).await.unwrap();

        assert_eq!(quiz.questions.len(), 5);
        assert!(quiz.questions.iter().all(|q| !q.id.is_empty()));
        assert_eq!(
            quiz.questions.iter().map(|q| q.order).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );
        assert_eq!(quiz.source, QuizSource::Manual);

        let profile = profiles.get_or_create("author").await.unwrap();
        assert_eq!(profile.total_quizzes_created, 1);
    }

    #[tokio::test]
    async fn temporary_quiz_creation_skips_creator_counters() {
        let (service, profiles) = service().await;

        let (quiz, unlocked) = service.create("author", create_request(5, true)).await.unwrap();

        assert!(quiz.is_temporary);
        assert!(unlocked.is_empty());
        let profile = profiles.get_or_create("author").await.unwrap();
        assert_eq!(profile.total_quizzes_created, 0);
    }

    #[tokio::test]
    async fn generated_quiz_gets_fallback_title() {
        let (service, _) = service().await;
        let request = GenerateQuizRequest {
            title: Some("   ".into()),
            category: "Science".into(),
            subject: "Physics".into(),
            difficulty: Difficulty::Hard,
            num_questions: 5,
            is_temporary: false,
        };
        let questions = (0..5)
            .map(|i| Question {
                id: Uuid::new_v4().to_string(),
                text: format!("Q{i}"),
                options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                correct_answer: 0,
                explanation: None,
                order: i + 1,
            })
            .collect();

        let (quiz, _) = service
            .create_generated("author", request, questions)
            .await
            .unwrap();

        assert_eq!(quiz.title, "Physics Quiz");
        assert_eq!(quiz.source, QuizSource::Generated);
        assert_eq!(quiz.time_limit, Some(300));
    }

    #[test]
    fn take_view_strips_answers_and_renumbers() {
        let quiz = {
            let mut quiz = Quiz {
                id: "q".into(),
                title: "t".into(),
                description: None,
                category: "c".into(),
                subject: "s".into(),
                difficulty: Difficulty::Easy,
                questions: Vec::new(),
                is_temporary: false,
                time_limit: None,
                source: QuizSource::Manual,
                created_by: "u".into(),
                created_at: Utc::now(),
            };
            quiz.questions = (0..10)
                .map(|i| Question {
                    id: format!("q{i}"),
                    text: format!("Question {i}"),
                    options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                    correct_answer: 2,
                    explanation: Some("because".into()),
                    order: i + 1,
                })
                .collect();
            quiz
        };

        let view = shuffled_take_view(&quiz);

        assert_eq!(view.questions.len(), 10);
        assert_eq!(
            view.questions.iter().map(|q| q.order).collect::<Vec<_>>(),
            (1..=10).collect::<Vec<_>>()
        );
        // Same ids survive, regardless of order.
        let mut ids: Vec<_> = view.questions.iter().map(|q| q.id.clone()).collect();
        ids.sort();
        let mut expected: Vec<_> = quiz.questions.iter().map(|q| q.id.clone()).collect();
        expected.sort();
        assert_eq!(ids, expected);
    }
}
