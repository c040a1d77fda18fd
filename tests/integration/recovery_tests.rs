//! Restart behavior against a file-backed store

use chrono::Utc;
use runkeeper::gate::{AdmissionPolicy, ScheduleGate};
use runkeeper::server::startup_recovery;
use runkeeper::storage::{open_storage, RetryPolicy, StoreHandle, Transition};
use runkeeper::{RunStatus, TriggerSource};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn open(path: &Path) -> StoreHandle {
    StoreHandle::new(open_storage(path, RetryPolicy::default(), "cfg-hash").unwrap())
}

fn gate(store: &StoreHandle) -> ScheduleGate {
    ScheduleGate::new(
        store.clone(),
        AdmissionPolicy {
            minimum_interval: Duration::from_secs(3600),
            manual_bypasses_interval: true,
        },
    )
}

#[test]
fn test_restart_abandons_running_run() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("runs.db");

    let run_id = {
        let store = open(&db_path);
        let admission = gate(&store).request_run(TriggerSource::Scheduled).unwrap();
        let run_id = admission.run_id().unwrap().clone();
        store
            .with(|s| s.transition(&run_id, Transition::Start, Utc::now()))
            .unwrap();
        run_id
        // Process dies here without a terminal transition
    };

    let store = open(&db_path);
    assert_eq!(
        store.with(|s| s.current_running()).unwrap().unwrap().run_id,
        run_id
    );

    let recovered = startup_recovery(&store).unwrap();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].run_id, run_id);
    assert_eq!(recovered[0].status, RunStatus::Abandoned);
    assert!(recovered[0].finished_at.is_some());

    assert!(store.with(|s| s.current_running()).unwrap().is_none());
    let abandoned = store
        .with(|s| s.recent_runs(10))
        .unwrap()
        .into_iter()
        .filter(|r| r.status == RunStatus::Abandoned)
        .count();
    assert_eq!(abandoned, 1);

    // Abandoned runs do not hold the slot or the quiet window
    assert!(gate(&store)
        .request_run(TriggerSource::Scheduled)
        .unwrap()
        .is_admitted());
}

#[test]
fn test_restart_abandons_never_started_run() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("runs.db");

    let run_id = {
        let store = open(&db_path);
        gate(&store)
            .request_run(TriggerSource::Manual)
            .unwrap()
            .run_id()
            .unwrap()
            .clone()
    };

    let store = open(&db_path);
    let recovered = startup_recovery(&store).unwrap();

    assert_eq!(recovered.len(), 1);
    let run = store.with(|s| s.get_run(&run_id)).unwrap();
    assert_eq!(run.status, RunStatus::Abandoned);
    assert!(run.started_at.is_none());
}

#[test]
fn test_outcomes_survive_restart() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("runs.db");

    let run_id = {
        let store = open(&db_path);
        let run_id = gate(&store)
            .request_run(TriggerSource::Scheduled)
            .unwrap()
            .run_id()
            .unwrap()
            .clone();
        store
            .with(|s| {
                s.transition(&run_id, Transition::Start, Utc::now())?;
                s.transition(
                    &run_id,
                    Transition::Succeed {
                        result_ref: "schedules/2026-10-19.json".to_string(),
                    },
                    Utc::now(),
                )
            })
            .unwrap();
        run_id
    };

    let store = open(&db_path);
    assert!(startup_recovery(&store).unwrap().is_empty());

    let latest = store.with(|s| s.latest_succeeded()).unwrap().unwrap();
    assert_eq!(latest.run_id, run_id);
    assert_eq!(latest.result_ref.as_deref(), Some("schedules/2026-10-19.json"));
    assert_eq!(latest.config_hash, "cfg-hash");

    // The quiet window is durable too
    assert!(!gate(&store)
        .request_run(TriggerSource::Scheduled)
        .unwrap()
        .is_admitted());
}
