use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use serde_json::json;
use tower::ServiceExt;

mod common;

#[tokio::test]
async fn test_perfect_run_cascades_xp_and_unlocks_badges() {
    let (app, state) = common::create_test_app().await;
    let author = common::auth_token(&state, "gami-author");
    let player = common::auth_token(&state, "gami-player");

    let created = create_quiz(&app, &author, 10, "medium", false).await;
    let quiz = &created["quiz"];
    let quiz_id = quiz["_id"].as_str().unwrap();

    let started = start_attempt(&app, &player, quiz_id).await;
    assert_eq!(started["total_questions"], 10);
    assert_eq!(started["quiz_id"], *quiz_id);

    let attempt_id = started["attempt_id"].as_str().unwrap();
    let (status, result) =
        submit_attempt(&app, &player, attempt_id, answers_from(quiz, 10), Some(120)).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(result["score_percentage"], 100.0);
    assert_eq!(result["xp_earned"], 150);
    // 150 attempt XP lifts level 1 -> 2 (50/120); the First Steps and
    // Perfect Score rewards push past 120 into level 3 with 80 left over.
    assert_eq!(result["new_level"], 3);
    assert_eq!(result["new_xp"], 80);
    assert_eq!(result["streak_lost"], false);
    assert_eq!(result["current_streak"], 1);
    assert_eq!(result["longest_streak"], 1);

    let unlocked: Vec<&str> = result["unlocked_achievements"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["id"].as_str().unwrap())
        .collect();
    assert_eq!(unlocked, vec!["first-steps", "perfect-score"]);

    // The profile endpoint reflects the folded rewards, not just the
    // attempt XP.
    let profile = get_authed(&app, "/api/v1/user/profile", &player).await;
    assert_eq!(profile["_id"], "gami-player");
    assert_eq!(profile["level"], 3);
    assert_eq!(profile["xp"], 80);
    assert_eq!(profile["xp_to_next_level"], 144);
    assert_eq!(profile["current_streak"], 1);
    assert_eq!(profile["longest_streak"], 1);
    assert_eq!(profile["total_quizzes_taken"], 1);
    assert_eq!(profile["total_quizzes_created"], 0);
    assert_eq!(profile["total_correct_answers"], 10);
    assert_eq!(profile["total_questions_answered"], 10);
    assert_eq!(profile["accuracy"], 100.0);
}

#[tokio::test]
async fn test_partial_score_earns_proportional_xp() {
    let (app, state) = common::create_test_app().await;
    let author = common::auth_token(&state, "partial-author");
    let player = common::auth_token(&state, "partial-player");

    let created = create_quiz(&app, &author, 5, "easy", false).await;
    let quiz = &created["quiz"];
    let quiz_id = quiz["_id"].as_str().unwrap();

    let started = start_attempt(&app, &player, quiz_id).await;
    let attempt_id = started["attempt_id"].as_str().unwrap();

    // 3 of 5 correct on easy: 3 * 10 * 1.0 = 30 XP, no perfect badge.
    let (status, result) =
        submit_attempt(&app, &player, attempt_id, answers_from(quiz, 3), Some(90)).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(result["score_percentage"], 60.0);
    assert_eq!(result["xp_earned"], 30);
    assert_eq!(result["new_level"], 1);
    // 30 attempt XP plus the 50 First Steps reward stays below 100.
    assert_eq!(result["new_xp"], 80);
    assert_eq!(result["current_streak"], 1);

    let unlocked: Vec<&str> = result["unlocked_achievements"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["id"].as_str().unwrap())
        .collect();
    assert_eq!(unlocked, vec!["first-steps"]);

    let profile = get_authed(&app, "/api/v1/user/profile", &player).await;
    assert_eq!(profile["total_correct_answers"], 3);
    assert_eq!(profile["total_questions_answered"], 5);
    assert_eq!(profile["accuracy"], 60.0);
}

#[tokio::test]
async fn test_second_quiz_same_day_keeps_streak_at_one() {
    let (app, state) = common::create_test_app().await;
    let author = common::auth_token(&state, "streak-author");
    let player = common::auth_token(&state, "streak-player");

    for round in 0..2 {
        let created = create_quiz(&app, &author, 10, "medium", false).await;
        let quiz = &created["quiz"];
        let quiz_id = quiz["_id"].as_str().unwrap();

        let started = start_attempt(&app, &player, quiz_id).await;
        let attempt_id = started["attempt_id"].as_str().unwrap();
        let (status, result) =
            submit_attempt(&app, &player, attempt_id, answers_from(quiz, 10), Some(120)).await;
        assert_eq!(status, StatusCode::OK);

        assert_eq!(result["current_streak"], 1);
        assert_eq!(result["longest_streak"], 1);
        assert_eq!(result["streak_lost"], false);
        if round == 1 {
            // Badges were all earned in round 0.
            assert_eq!(result["unlocked_achievements"].as_array().unwrap().len(), 0);
        }
    }

    let profile = get_authed(&app, "/api/v1/user/profile", &player).await;
    assert_eq!(profile["total_quizzes_taken"], 2);
    assert_eq!(profile["current_streak"], 1);
}

#[tokio::test]
async fn test_profile_is_created_on_first_read() {
    let (app, state) = common::create_test_app().await;
    let token = common::auth_token(&state, "fresh-user");

    let profile = get_authed(&app, "/api/v1/user/profile", &token).await;

    assert_eq!(profile["_id"], "fresh-user");
    assert_eq!(profile["level"], 1);
    assert_eq!(profile["xp"], 0);
    assert_eq!(profile["xp_to_next_level"], 100);
    assert_eq!(profile["current_streak"], 0);
    assert_eq!(profile["longest_streak"], 0);
    assert_eq!(profile["last_activity_date"], serde_json::Value::Null);
    assert_eq!(profile["total_quizzes_taken"], 0);
    assert_eq!(profile["accuracy"], 0.0);
}

#[tokio::test]
async fn test_leaderboard_ranks_by_level_then_xp() {
    let (app, state) = common::create_test_app().await;
    let author = common::auth_token(&state, "board-author");
    let leader = common::auth_token(&state, "board-leader");
    let runner_up = common::auth_token(&state, "board-runner-up");
    let newcomer = common::auth_token(&state, "board-newcomer");

    // Two perfect runs for the leader, one for the runner-up, a bare
    // profile for the newcomer.
    for (token, runs) in [(&leader, 2), (&runner_up, 1)] {
        for _ in 0..runs {
            let created = create_quiz(&app, &author, 10, "medium", false).await;
            let quiz = &created["quiz"];
            let quiz_id = quiz["_id"].as_str().unwrap();

            let started = start_attempt(&app, token, quiz_id).await;
            let attempt_id = started["attempt_id"].as_str().unwrap();
            let (status, _) =
                submit_attempt(&app, token, attempt_id, answers_from(quiz, 10), Some(120)).await;
            assert_eq!(status, StatusCode::OK);
        }
    }
    get_authed(&app, "/api/v1/user/profile", &newcomer).await;

    let body = get_authed(&app, "/api/v1/leaderboard", &leader).await;
    let entries = body["leaderboard"].as_array().unwrap();

    // The author sits at the same (level, xp) as the newcomer; ties have no
    // guaranteed order, so only the players are asserted.
    let players: Vec<&str> = entries
        .iter()
        .map(|e| e["user_id"].as_str().unwrap())
        .filter(|u| *u != "board-author")
        .collect();
    assert_eq!(
        players,
        vec!["board-leader", "board-runner-up", "board-newcomer"]
    );

    let ranks: Vec<u64> = entries.iter().map(|e| e["rank"].as_u64().unwrap()).collect();
    assert_eq!(ranks, (1..=entries.len() as u64).collect::<Vec<_>>());

    let top = &entries[0];
    assert_eq!(top["level"], 4);
    assert_eq!(top["xp"], 86);
    assert_eq!(top["current_streak"], 1);
    assert_eq!(top["total_quizzes_taken"], 2);
}

async fn create_quiz(
    app: &axum::Router,
    token: &str,
    num_questions: u32,
    difficulty: &str,
    is_temporary: bool,
) -> serde_json::Value {
    let questions: Vec<serde_json::Value> = (0..num_questions)
        .map(|i| {
            json!({
                "text": format!("Question {}?", i),
                "options": ["a", "b", "c", "d"],
                "correct_answer": i % 4,
                "explanation": "because",
            })
        })
        .collect();

    let body = json!({
        "title": "Integration quiz",
        "category": "Programming",
        "subject": "Rust",
        "difficulty": difficulty,
        "questions": questions,
        "is_temporary": is_temporary,
        "time_limit": 300,
    });

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/quizzes")
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {}", token))
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    if status != StatusCode::CREATED {
        panic!(
            "quiz creation failed with {} body {}",
            status,
            String::from_utf8_lossy(&bytes)
        );
    }
    serde_json::from_slice(&bytes).unwrap()
}

async fn start_attempt(app: &axum::Router, token: &str, quiz_id: &str) -> serde_json::Value {
    let body = json!({ "quiz_id": quiz_id });

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/quiz/start")
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {}", token))
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    if status != StatusCode::CREATED {
        panic!(
            "attempt start failed with {} body {}",
            status,
            String::from_utf8_lossy(&bytes)
        );
    }
    serde_json::from_slice(&bytes).unwrap()
}

async fn submit_attempt(
    app: &axum::Router,
    token: &str,
    attempt_id: &str,
    answers: serde_json::Value,
    time_taken: Option<u32>,
) -> (StatusCode, serde_json::Value) {
    let body = json!({
        "attempt_id": attempt_id,
        "answers": answers,
        "time_taken": time_taken,
    });

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/quiz/submit")
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {}", token))
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

/// Answers for the first `correct` questions picked right, the rest
/// deliberately wrong.
fn answers_from(quiz: &serde_json::Value, correct: usize) -> serde_json::Value {
    let answers: Vec<serde_json::Value> = quiz["questions"]
        .as_array()
        .unwrap()
        .iter()
        .enumerate()
        .map(|(i, q)| {
            let right = q["correct_answer"].as_u64().unwrap();
            let pick = if i < correct { right } else { (right + 1) % 4 };
            json!({
                "question_id": q["id"],
                "selected_option": pick,
            })
        })
        .collect();
    serde_json::Value::Array(answers)
}

async fn get_authed(app: &axum::Router, uri: &str, token: &str) -> serde_json::Value {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(uri)
                .header("authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    if status != StatusCode::OK {
        panic!(
            "GET {} failed with {} body {}",
            uri,
            status,
            String::from_utf8_lossy(&bytes)
        );
    }
    serde_json::from_slice(&bytes).unwrap()
}
