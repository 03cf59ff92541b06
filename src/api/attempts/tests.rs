use axum::http::{Method, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use crate::api::router::router;
use crate::core::config::Settings;
use crate::core::time::primitive_now_utc;
use crate::db::types::{AccessMode, AttemptStatus, SubmissionTrigger, UserRole};
use crate::repositories;
use crate::services::attempts;
use crate::test_support::{self, TestContext};

async fn send(
    ctx: &TestContext,
    method: Method,
    uri: &str,
    token: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(method, uri, Some(token), body))
        .await
        .expect("response");
    let status = response.status();
    (status, test_support::read_json(response).await)
}

/// Open exam with a single true/false question worth two marks.
async fn true_false_exam(ctx: &TestContext, max_attempts: i32) -> (String, String) {
    let db = ctx.state.db();
    let exam = test_support::insert_exam(db, "Biology quiz", max_attempts, AccessMode::Open).await;
    let question = test_support::insert_question(
        db,
        &exam.id,
        "biology",
        1,
        "TrueFalse",
        &[],
        json!(true),
        2.0,
        0.5,
    )
    .await;
    (exam.id, question)
}

#[tokio::test]
async fn students_cannot_view_standings() {
    let _guard = test_support::env_lock().await;
    test_support::set_test_env();
    let settings = Settings::load().expect("settings");
    let token = test_support::bearer_token("student-1", UserRole::Student, &settings);
    let app = router(test_support::lazy_state(settings));

    let response = app
        .oneshot(test_support::json_request(
            Method::GET,
            "/api/v1/exams/exam-1/standings",
            Some(&token),
            None,
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn negative_time_sync_is_rejected_before_storage() {
    let _guard = test_support::env_lock().await;
    test_support::set_test_env();
    let settings = Settings::load().expect("settings");
    let token = test_support::bearer_token("student-1", UserRole::Student, &settings);
    let app = router(test_support::lazy_state(settings));

    let response = app
        .oneshot(test_support::json_request(
            Method::POST,
            "/api/v1/attempts/attempt-1/time",
            Some(&token),
            Some(json!({"time_remaining_seconds": -5})),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invalid_list_limit_is_rejected() {
    let _guard = test_support::env_lock().await;
    test_support::set_test_env();
    let settings = Settings::load().expect("settings");
    let token = test_support::bearer_token("student-1", UserRole::Student, &settings);
    let app = router(test_support::lazy_state(settings));

    let response = app
        .oneshot(test_support::json_request(
            Method::GET,
            "/api/v1/attempts?limit=0",
            Some(&token),
            None,
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn student_answers_and_submits_attempt() {
    let ctx = test_support::setup_test_context().await;
    let db = ctx.state.db();

    let exam = test_support::insert_exam(db, "Physics quiz", 1, AccessMode::Open).await;
    let q1 = test_support::insert_question(
        db,
        &exam.id,
        "physics",
        1,
        "MCQ_Single",
        &["A", "B", "C"],
        json!("B"),
        4.0,
        1.0,
    )
    .await;
    let q2 = test_support::insert_question(
        db,
        &exam.id,
        "physics",
        2,
        "Integer",
        &[],
        json!(42),
        4.0,
        0.0,
    )
    .await;

    let token = test_support::bearer_token("student-1", UserRole::Student, ctx.state.settings());

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/exams/{}/attempts", exam.id),
            Some(&token),
            None,
        ))
        .await
        .expect("start attempt");
    let status = response.status();
    let started = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::CREATED, "response: {started}");
    assert_eq!(started["status"], "started");
    assert_eq!(started["max_score"], 8.0);
    let attempt_id = started["id"].as_str().expect("attempt id").to_string();

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::PUT,
            &format!("/api/v1/attempts/{attempt_id}/answers/{q1}"),
            Some(&token),
            Some(json!({"answer": "A", "time_spent_seconds": 20})),
        ))
        .await
        .expect("answer q1");
    let status = response.status();
    let graded = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::OK, "response: {graded}");
    assert_eq!(graded["score"], -1.0);
    assert_eq!(graded["status"], "in_progress");

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::PUT,
            &format!("/api/v1/attempts/{attempt_id}/answers/{q2}"),
            Some(&token),
            Some(json!({"answer": "forty-two"})),
        ))
        .await
        .expect("malformed answer");
    let status = response.status();
    let rejected = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "response: {rejected}");
    assert_eq!(rejected["code"], "malformed_answer");

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::PUT,
            &format!("/api/v1/attempts/{attempt_id}/answers/{q2}"),
            Some(&token),
            Some(json!({"answer": 42, "time_spent_seconds": 35})),
        ))
        .await
        .expect("answer q2");
    let graded = test_support::read_json(response).await;
    assert_eq!(graded["live_total_score"], 3.0);

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::PUT,
            &format!("/api/v1/attempts/{attempt_id}/answers/{q2}/review"),
            Some(&token),
            Some(json!({"marked": true})),
        ))
        .await
        .expect("mark for review");
    assert_eq!(response.status(), StatusCode::OK);

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/attempts/{attempt_id}/complete"),
            Some(&token),
            None,
        ))
        .await
        .expect("complete");
    let status = response.status();
    let submitted = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::OK, "response: {submitted}");
    assert_eq!(submitted["total_score"], 3.0);
    assert_eq!(submitted["percentage"], 38);
    assert_eq!(submitted["submission_trigger"], "manual");
    assert_eq!(submitted["rank"], 1);
    assert_eq!(submitted["percentile"], 100);

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/attempts/{attempt_id}/complete"),
            Some(&token),
            None,
        ))
        .await
        .expect("complete twice");
    let status = response.status();
    let again = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(again["code"], "already_submitted");

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/exams/{}/attempts", exam.id),
            Some(&token),
            None,
        ))
        .await
        .expect("second start");
    let status = response.status();
    let limited = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(limited["code"], "attempt_limit_reached");

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::GET,
            &format!("/api/v1/attempts/{attempt_id}"),
            Some(&token),
            None,
        ))
        .await
        .expect("get attempt");
    let attempt = test_support::read_json(response).await;
    let sections = attempt["section_stats"].as_array().expect("sections");
    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0]["answered_count"], 2);
    assert_eq!(sections[0]["marked_for_review_count"], 1);

    let reviewer = test_support::bearer_token("teacher-1", UserRole::Teacher, ctx.state.settings());
    let response = ctx
        .app
        .oneshot(test_support::json_request(
            Method::GET,
            &format!("/api/v1/exams/{}/standings", exam.id),
            Some(&reviewer),
            None,
        ))
        .await
        .expect("standings");
    let standings = test_support::read_json(response).await;
    assert_eq!(standings["population"], 1);
    assert_eq!(standings["standings"][0]["attempt_id"], attempt_id);
}

#[tokio::test]
async fn enrolled_exam_rejects_outsiders_and_parallel_starts() {
    let ctx = test_support::setup_test_context().await;
    let db = ctx.state.db();

    let exam = test_support::insert_exam(db, "Chemistry quiz", 3, AccessMode::Enrolled).await;
    test_support::insert_question(
        db,
        &exam.id,
        "chemistry",
        1,
        "TrueFalse",
        &[],
        json!(true),
        2.0,
        0.0,
    )
    .await;
    test_support::enroll(db, &exam.id, "student-1").await;

    let outsider = test_support::bearer_token("student-2", UserRole::Student, ctx.state.settings());
    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/exams/{}/attempts", exam.id),
            Some(&outsider),
            None,
        ))
        .await
        .expect("outsider start");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let token = test_support::bearer_token("student-1", UserRole::Student, ctx.state.settings());
    let uri = format!("/api/v1/exams/{}/attempts", exam.id);
    let first = ctx.app.clone().oneshot(test_support::json_request(
        Method::POST,
        &uri,
        Some(&token),
        None,
    ));
    let second = ctx.app.clone().oneshot(test_support::json_request(
        Method::POST,
        &uri,
        Some(&token),
        None,
    ));
    let (first, second) = tokio::join!(first, second);

    let mut statuses = vec![first.expect("first").status(), second.expect("second").status()];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::CREATED, StatusCode::CONFLICT]);
}

#[tokio::test]
async fn second_start_while_active_is_rejected() {
    let ctx = test_support::setup_test_context().await;
    let (exam_id, _) = true_false_exam(&ctx, 3).await;
    let token = test_support::bearer_token("student-1", UserRole::Student, ctx.state.settings());
    let uri = format!("/api/v1/exams/{exam_id}/attempts");

    let (status, first) = send(&ctx, Method::POST, &uri, &token, None).await;
    assert_eq!(status, StatusCode::CREATED, "response: {first}");

    let (status, second) = send(&ctx, Method::POST, &uri, &token, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(second["code"], "attempt_already_active");
}

#[tokio::test]
async fn closed_exam_window_rejects_start() {
    let ctx = test_support::setup_test_context().await;
    let now = primitive_now_utc();
    let exam = test_support::insert_exam_with_window(
        ctx.state.db(),
        "Finished quiz",
        1,
        AccessMode::Open,
        now - time::Duration::hours(3),
        now - time::Duration::hours(1),
    )
    .await;
    let token = test_support::bearer_token("student-1", UserRole::Student, ctx.state.settings());

    let (status, body) =
        send(&ctx, Method::POST, &format!("/api/v1/exams/{}/attempts", exam.id), &token, None)
            .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "exam_not_open");
}

#[tokio::test]
async fn answer_after_deadline_submits_then_rejects() {
    let ctx = test_support::setup_test_context().await;
    let (exam_id, question_id) = true_false_exam(&ctx, 1).await;
    let token = test_support::bearer_token("student-1", UserRole::Student, ctx.state.settings());

    let (_, started) =
        send(&ctx, Method::POST, &format!("/api/v1/exams/{exam_id}/attempts"), &token, None).await;
    let attempt_id = started["id"].as_str().expect("attempt id").to_string();
    let answer_uri = format!("/api/v1/attempts/{attempt_id}/answers/{question_id}");

    let (status, graded) =
        send(&ctx, Method::PUT, &answer_uri, &token, Some(json!({"answer": true}))).await;
    assert_eq!(status, StatusCode::OK, "response: {graded}");

    test_support::backdate_deadline(ctx.state.db(), &attempt_id).await;

    let (status, rejected) =
        send(&ctx, Method::PUT, &answer_uri, &token, Some(json!({"answer": false}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(rejected["code"], "attempt_not_active");

    let (_, attempt) =
        send(&ctx, Method::GET, &format!("/api/v1/attempts/{attempt_id}"), &token, None).await;
    assert_eq!(attempt["status"], "submitted");
    assert_eq!(attempt["submission_trigger"], "time_expired");
    assert_eq!(attempt["total_score"], 2.0);
    assert_eq!(attempt["rank"], 1);
}

#[tokio::test]
async fn start_closes_an_overdue_attempt_first() {
    let ctx = test_support::setup_test_context().await;
    let (exam_id, _) = true_false_exam(&ctx, 2).await;
    let token = test_support::bearer_token("student-1", UserRole::Student, ctx.state.settings());
    let uri = format!("/api/v1/exams/{exam_id}/attempts");

    let (_, first) = send(&ctx, Method::POST, &uri, &token, None).await;
    let first_id = first["id"].as_str().expect("attempt id").to_string();
    test_support::backdate_deadline(ctx.state.db(), &first_id).await;

    let (status, second) = send(&ctx, Method::POST, &uri, &token, None).await;
    assert_eq!(status, StatusCode::CREATED, "response: {second}");
    assert_eq!(second["attempt_number"], 2);

    let previous = repositories::attempts::find_by_id(ctx.state.db(), &first_id)
        .await
        .expect("load attempt")
        .expect("attempt exists");
    assert_eq!(previous.status, AttemptStatus::Submitted);
    assert_eq!(previous.submission_trigger, Some(SubmissionTrigger::TimeExpired));
}

#[tokio::test]
async fn deadline_sweep_submits_overdue_attempts() {
    let ctx = test_support::setup_test_context().await;
    let db = ctx.state.db();
    let (exam_id, _) = true_false_exam(&ctx, 1).await;
    let token = test_support::bearer_token("student-1", UserRole::Student, ctx.state.settings());

    let (_, started) =
        send(&ctx, Method::POST, &format!("/api/v1/exams/{exam_id}/attempts"), &token, None).await;
    let attempt_id = started["id"].as_str().expect("attempt id").to_string();

    assert_eq!(attempts::expire_overdue_attempts(db).await.expect("sweep"), 0);

    test_support::backdate_deadline(db, &attempt_id).await;
    assert_eq!(attempts::expire_overdue_attempts(db).await.expect("sweep"), 1);
    assert_eq!(attempts::expire_overdue_attempts(db).await.expect("sweep"), 0);

    let swept = repositories::attempts::find_by_id(db, &attempt_id)
        .await
        .expect("load attempt")
        .expect("attempt exists");
    assert_eq!(swept.status, AttemptStatus::Submitted);
    assert_eq!(swept.submission_trigger, Some(SubmissionTrigger::TimeExpired));
    assert_eq!(swept.time_remaining_seconds, 0);
    assert_eq!(swept.rank, Some(1));
}

#[tokio::test]
async fn ranking_retry_fills_missing_ranks() {
    let ctx = test_support::setup_test_context().await;
    let db = ctx.state.db();
    let (exam_id, question_id) = true_false_exam(&ctx, 1).await;

    let mut attempt_ids = Vec::new();
    for (user, answer) in [("student-1", true), ("student-2", false)] {
        let token = test_support::bearer_token(user, UserRole::Student, ctx.state.settings());
        let (_, started) =
            send(&ctx, Method::POST, &format!("/api/v1/exams/{exam_id}/attempts"), &token, None)
                .await;
        let attempt_id = started["id"].as_str().expect("attempt id").to_string();
        send(
            &ctx,
            Method::PUT,
            &format!("/api/v1/attempts/{attempt_id}/answers/{question_id}"),
            &token,
            Some(json!({"answer": answer})),
        )
        .await;
        let (status, _) = send(
            &ctx,
            Method::POST,
            &format!("/api/v1/attempts/{attempt_id}/complete"),
            &token,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        attempt_ids.push(attempt_id);
    }

    for attempt_id in &attempt_ids {
        test_support::clear_ranking(db, attempt_id).await;
    }

    assert_eq!(attempts::retry_missing_rankings(db).await.expect("retry"), 2);
    assert_eq!(attempts::retry_missing_rankings(db).await.expect("retry"), 0);

    let top = repositories::attempts::find_by_id(db, &attempt_ids[0])
        .await
        .expect("load attempt")
        .expect("attempt exists");
    let bottom = repositories::attempts::find_by_id(db, &attempt_ids[1])
        .await
        .expect("load attempt")
        .expect("attempt exists");
    assert_eq!((top.rank, top.percentile), (Some(1), Some(100)));
    assert_eq!(bottom.rank, Some(2));
}
