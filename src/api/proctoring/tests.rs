use axum::http::{Method, StatusCode};
use axum::Router;
use serde_json::json;
use tower::ServiceExt;

use crate::api::router::router;
use crate::core::config::Settings;
use crate::db::types::UserRole;
use crate::test_support;

struct Harness {
    app: Router,
    student: String,
    teacher: String,
}

fn harness(settings: Settings) -> Harness {
    let student = test_support::bearer_token("student-1", UserRole::Student, &settings);
    let teacher = test_support::bearer_token("teacher-1", UserRole::Teacher, &settings);
    Harness { app: router(test_support::lazy_state(settings)), student, teacher }
}

async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    token: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(test_support::json_request(method, uri, Some(token), body))
        .await
        .expect("response");
    let status = response.status();
    (status, test_support::read_json(response).await)
}

#[tokio::test]
async fn session_lifecycle_accumulates_violations() {
    let _guard = test_support::env_lock().await;
    test_support::set_test_env();
    let h = harness(Settings::load().expect("settings"));
    let base = "/api/v1/proctoring/exams/exam-1";

    let (status, started) = call(
        &h.app,
        Method::POST,
        &format!("{base}/session"),
        &h.student,
        Some(json!({"webcam": true, "microphone": false})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "response: {started}");
    assert_eq!(started["created"], true);
    assert_eq!(started["session"]["status"], "active");
    assert_eq!(started["session"]["devices"]["webcam"], true);

    let (status, again) =
        call(&h.app, Method::POST, &format!("{base}/session"), &h.student, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["created"], false);

    for _ in 0..2 {
        let (_, recorded) = call(
            &h.app,
            Method::POST,
            &format!("{base}/violations"),
            &h.student,
            Some(json!({"kind": "tab_switch"})),
        )
        .await;
        assert_eq!(recorded["recorded"], true);
    }

    let (_, recorded) = call(
        &h.app,
        Method::POST,
        &format!("{base}/violations"),
        &h.student,
        Some(json!({"kind": "fullscreen_exit", "details": "pressed escape"})),
    )
    .await;
    assert_eq!(recorded["suspicion_score"], 35);
    assert_eq!(recorded["status"], "suspicious");
    assert_eq!(recorded["violation"]["details"], "pressed escape");

    let (_, recorded) = call(
        &h.app,
        Method::POST,
        &format!("{base}/violations"),
        &h.student,
        Some(json!({"kind": "device_lost", "details": "webcam"})),
    )
    .await;
    assert_eq!(recorded["suspicion_score"], 55);

    let (_, recorded) = call(
        &h.app,
        Method::POST,
        &format!("{base}/violations"),
        &h.student,
        Some(json!({"kind": "tab_switch"})),
    )
    .await;
    assert_eq!(recorded["status"], "flagged");
    assert_eq!(recorded["newly_flagged"], true);

    let (status, current) =
        call(&h.app, Method::GET, &format!("{base}/session"), &h.student, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(current["session"]["violation_count"], 5);
    assert_eq!(current["session"]["suspicion_score"], 65);

    let (status, listed) = call(
        &h.app,
        Method::GET,
        "/api/v1/proctoring/sessions?status=flagged",
        &h.teacher,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().expect("sessions").len(), 1);
    assert_eq!(listed[0]["user_id"], "student-1");

    let (status, ended) =
        call(&h.app, Method::DELETE, &format!("{base}/session"), &h.student, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ended["ended"], true);
    assert_eq!(ended["summary"]["final_status"], "flagged");
    assert_eq!(ended["summary"]["final_score"], 65);

    let (_, gone) = call(&h.app, Method::GET, &format!("{base}/session"), &h.student, None).await;
    assert!(gone["session"].is_null());

    let (_, twice) =
        call(&h.app, Method::DELETE, &format!("{base}/session"), &h.student, None).await;
    assert_eq!(twice["ended"], false);
}

#[tokio::test]
async fn events_without_a_session_are_not_recorded() {
    let _guard = test_support::env_lock().await;
    test_support::set_test_env();
    let h = harness(Settings::load().expect("settings"));

    let (status, recorded) = call(
        &h.app,
        Method::POST,
        "/api/v1/proctoring/exams/exam-9/violations",
        &h.student,
        Some(json!({"kind": "tab_switch"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(recorded["recorded"], false);

    let (status, heartbeat) = call(
        &h.app,
        Method::POST,
        "/api/v1/proctoring/exams/exam-9/activity",
        &h.student,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(heartbeat["session"].is_null());
}

#[tokio::test]
async fn inactivity_kind_is_reserved_for_server_checks() {
    let _guard = test_support::env_lock().await;
    test_support::set_test_env();
    let h = harness(Settings::load().expect("settings"));

    let (status, body) = call(
        &h.app,
        Method::POST,
        "/api/v1/proctoring/exams/exam-1/violations",
        &h.student,
        Some(json!({"kind": "inactivity"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
}

#[tokio::test]
async fn fresh_session_passes_inactivity_check() {
    let _guard = test_support::env_lock().await;
    test_support::set_test_env();
    let h = harness(Settings::load().expect("settings"));
    let base = "/api/v1/proctoring/exams/exam-2";

    call(&h.app, Method::POST, &format!("{base}/session"), &h.student, None).await;

    let (status, checked) = call(
        &h.app,
        Method::POST,
        &format!("{base}/inactivity-check"),
        &h.student,
        Some(json!({"max_idle_seconds": 60})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(checked["recorded"], false);

    let (status, _) = call(
        &h.app,
        Method::POST,
        &format!("{base}/inactivity-check"),
        &h.student,
        Some(json!({"max_idle_seconds": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn session_list_requires_reviewer_and_known_status() {
    let _guard = test_support::env_lock().await;
    test_support::set_test_env();
    let h = harness(Settings::load().expect("settings"));

    let (status, _) =
        call(&h.app, Method::GET, "/api/v1/proctoring/sessions", &h.student, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(
        &h.app,
        Method::GET,
        "/api/v1/proctoring/sessions?status=sleepy",
        &h.teacher,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Unknown session status 'sleepy'");
}
