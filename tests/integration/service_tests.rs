//! HTTP surface tests, driven through the router in-process

use crate::common::{
    harness, harness_with_store, send, wait_for_status, FailingStore, FaultyStore, GatedWork,
    HangingWork, InstantWork,
};
use axum::http::{Method, StatusCode};
use chrono::{Duration as ChronoDuration, Utc};
use runkeeper::storage::{RunId, StoreHandle, Transition};
use runkeeper::{RunStatus, TriggerSource};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const HOUR: Duration = Duration::from_secs(3600);

#[tokio::test]
async fn test_fresh_service_is_healthy() {
    let h = harness(Arc::new(InstantWork("r1")), Duration::from_secs(60), HOUR);

    let (status, body) = send(&h.router, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"]["status"], "ok");
    assert!(body.get("current_run").is_none());
}

#[tokio::test]
async fn test_index_lists_endpoints() {
    let h = harness(Arc::new(InstantWork("r1")), Duration::from_secs(60), HOUR);

    let (status, body) = send(&h.router, Method::GET, "/", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "runkeeper");
    assert_eq!(body["endpoints"]["trigger"], "POST /run");
}

#[tokio::test]
async fn test_second_request_rejected_while_running_then_status_reports_result() {
    let (work, release) = GatedWork::succeeding("r1");
    let h = harness(work, Duration::from_secs(60), HOUR);

    let (status, body) = send(
        &h.router,
        Method::POST,
        "/run",
        Some(json!({ "source": "scheduled" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let run_id = RunId::from(body["run_id"].as_str().unwrap());
    wait_for_status(&h.store, &run_id, RunStatus::Running).await;

    let (status, body) = send(
        &h.router,
        Method::POST,
        "/run",
        Some(json!({ "source": "scheduled" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["reason"], "already_running");
    assert_eq!(body["blocking_run_id"], run_id.as_str());

    let (_, body) = send(&h.router, Method::GET, "/status", None).await;
    assert_eq!(body["current_run"]["run_id"], run_id.as_str());
    assert_eq!(body["current_run"]["status"], "running");

    release.notify_one();
    wait_for_status(&h.store, &run_id, RunStatus::Succeeded).await;

    let (status, body) = send(&h.router, Method::GET, "/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["last_succeeded"]["result_ref"], "r1");
    assert_eq!(body["last_succeeded"]["trigger_source"], "scheduled");
    assert!(body["current_run"].is_null());
    assert_eq!(body["last_finished"]["run_id"], run_id.as_str());
}

#[tokio::test]
async fn test_overrunning_run_times_out_and_service_stays_healthy() {
    let h = harness(Arc::new(HangingWork), Duration::from_millis(100), HOUR);

    let (status, body) = send(&h.router, Method::POST, "/run", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let run_id = RunId::from(body["run_id"].as_str().unwrap());

    let run = wait_for_status(&h.store, &run_id, RunStatus::TimedOut).await;
    assert!(run.error_detail.is_some());
    assert!(run.result_ref.is_none());

    let (status, _) = send(&h.router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_stuck_run_reported_until_forced_transition() {
    let h = harness(Arc::new(HangingWork), Duration::from_secs(60), HOUR);

    // A run left `running` well past the deadline, with no watchdog firing
    let started = Utc::now() - ChronoDuration::minutes(10);
    let run_id = h
        .store
        .with(|s| {
            let id = s.create(TriggerSource::Scheduled, started)?;
            s.transition(&id, Transition::Start, started)?;
            Ok(id)
        })
        .unwrap();

    let (status, body) = send(&h.router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
    assert!(body["reason"].as_str().unwrap().contains(run_id.as_str()));
    assert_eq!(body["current_run"]["run_id"], run_id.as_str());

    h.store
        .with(|s| {
            s.transition(
                &run_id,
                Transition::TimeOut {
                    error_detail: "deadline passed".to_string(),
                },
                Utc::now(),
            )
        })
        .unwrap();

    let (status, body) = send(&h.router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_rapid_scheduled_fires_are_too_soon() {
    let h = harness(Arc::new(InstantWork("r1")), Duration::from_secs(60), HOUR);

    let (status, body) = send(
        &h.router,
        Method::POST,
        "/run",
        Some(json!({ "source": "scheduled" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let first = RunId::from(body["run_id"].as_str().unwrap());
    wait_for_status(&h.store, &first, RunStatus::Succeeded).await;

    let (status, body) = send(
        &h.router,
        Method::POST,
        "/run",
        Some(json!({ "source": "scheduled" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["reason"], "too_soon");
    assert_eq!(body["blocking_run_id"], first.as_str());

    // Manual triggers bypass the interval by default
    let (status, _) = send(&h.router, Method::POST, "/run", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_malformed_run_body_is_bad_request() {
    let h = harness(Arc::new(InstantWork("r1")), Duration::from_secs(60), HOUR);

    let (status, _) = send(
        &h.router,
        Method::POST,
        "/run",
        Some(json!({ "source": "whenever" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(h.store.with(|s| s.recent_runs(10)).unwrap().is_empty());
}

#[tokio::test]
async fn test_run_history_and_lookup() {
    let h = harness(Arc::new(InstantWork("r1")), Duration::from_secs(60), Duration::ZERO);

    let mut ids = Vec::new();
    for _ in 0..3 {
        let (status, body) = send(&h.router, Method::POST, "/run", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let run_id = RunId::from(body["run_id"].as_str().unwrap());
        wait_for_status(&h.store, &run_id, RunStatus::Succeeded).await;
        ids.push(run_id);
    }

    let (status, body) = send(&h.router, Method::GET, "/runs?limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    let runs = body["runs"].as_array().unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0]["run_id"], ids[2].as_str());
    assert_eq!(runs[1]["run_id"], ids[1].as_str());

    let (status, body) = send(&h.router, Method::GET, &format!("/runs/{}", ids[0]), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "succeeded");
    assert_eq!(body["trigger_source"], "manual");

    let (status, _) = send(&h.router, Method::GET, "/runs/no-such-run", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unavailable_store_is_503_and_spends_budget() {
    let h = harness_with_store(
        StoreHandle::new(FailingStore),
        Arc::new(InstantWork("r1")),
        Duration::from_secs(60),
        HOUR,
    );

    let (status, body) = send(&h.router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["store"]["status"], "error");
    assert!(body["store"]["error"].is_string());

    let (status, _) = send(&h.router, Method::GET, "/status", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(!h.state.budget.is_exhausted());

    let (status, _) = send(&h.router, Method::POST, "/run", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    // Harness tolerates three consecutive failures
    assert!(h.state.budget.is_exhausted());
    tokio::time::timeout(Duration::from_secs(1), h.state.budget.exhausted())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_failed_start_abandons_run_and_frees_slot() {
    let h = harness_with_store(
        StoreHandle::new(FaultyStore::failing_starts(1)),
        Arc::new(InstantWork("r2")),
        Duration::from_secs(60),
        HOUR,
    );

    let (status, body) = send(&h.router, Method::POST, "/run", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let first = RunId::from(body["run_id"].as_str().unwrap());

    let run = wait_for_status(&h.store, &first, RunStatus::Abandoned).await;
    assert!(run.started_at.is_none());
    assert!(run.finished_at.is_some());

    let (status, _) = send(&h.router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);

    // Neither the slot nor the quiet window is held by the abandoned run
    let (status, body) = send(
        &h.router,
        Method::POST,
        "/run",
        Some(json!({ "source": "scheduled" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let second = RunId::from(body["run_id"].as_str().unwrap());
    let run = wait_for_status(&h.store, &second, RunStatus::Succeeded).await;
    assert_eq!(run.result_ref.as_deref(), Some("r2"));
}

#[tokio::test]
async fn test_never_started_run_is_reported() {
    let h = harness(Arc::new(InstantWork("r1")), Duration::from_secs(60), HOUR);

    // Admitted ten minutes ago and never picked up
    let admitted = Utc::now() - ChronoDuration::minutes(10);
    let run_id = h
        .store
        .with(|s| s.create(TriggerSource::Scheduled, admitted))
        .unwrap();

    let (status, body) = send(&h.router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["reason"].as_str().unwrap().contains(run_id.as_str()));
    assert_eq!(body["store"]["status"], "ok");
}

#[tokio::test]
async fn test_corrupt_store_does_not_spend_budget() {
    let h = harness_with_store(
        StoreHandle::new(FaultyStore::corrupt()),
        Arc::new(InstantWork("r1")),
        Duration::from_secs(60),
        HOUR,
    );

    for _ in 0..5 {
        let (status, body) = send(&h.router, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["store"]["status"], "error");
    }

    assert_eq!(h.state.budget.consecutive_failures(), 0);
    assert!(!h.state.budget.is_exhausted());
}
