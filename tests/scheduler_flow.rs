//! End-to-end flow over the public surface: seed an inventory, tick the
//! scheduler, and check that due tasks fan out into per-device results.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;

use routerops::db::entities::device::DeviceCredentials;
use routerops::db::entities::task;
use routerops::db::enums::{ExecutionStatus, ResultStatus, TargetKind, TaskKind, TriggeredBy};
use routerops::db::memory::MemoryStore;
use routerops::db::TaskStore;
use routerops::scheduler::handlers::HandlerError;
use routerops::scheduler::{Dispatcher, Scheduler, TaskRunner};

struct RecordingRunner {
    runs: Mutex<Vec<(i64, i64)>>,
    fail_device: Option<i64>,
}

#[async_trait]
impl TaskRunner for RecordingRunner {
    async fn run(
        &self,
        task: &task::Model,
        device_id: i64,
    ) -> Result<serde_json::Value, HandlerError> {
        self.runs.lock().unwrap().push((task.id, device_id));
        if self.fail_device == Some(device_id) {
            return Err(HandlerError::DeviceNotFound(device_id));
        }
        Ok(json!({ "device": device_id, "kind": task.kind.as_str() }))
    }
}

fn device(id: i64) -> DeviceCredentials {
    DeviceCredentials {
        device_id: id,
        host: format!("192.0.2.{id}"),
        username: "admin".to_string(),
        password: "secret".to_string(),
        api_port: 8728,
        ssh_port: 22,
        use_tls: false,
    }
}

fn availability_task(id: i64, expression: &str) -> task::Model {
    task::Model {
        id,
        name: format!("availability-{id}"),
        kind: TaskKind::CheckAvailability,
        schedule_expression: expression.to_string(),
        schedule_timezone: "UTC".to_string(),
        is_enabled: true,
        payload: None,
        status: "active".to_string(),
        last_run_at: None,
        next_run_at: None,
        created_at: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        updated_at: None,
    }
}

async fn seeded(fail_device: Option<i64>) -> (Arc<MemoryStore>, Arc<RecordingRunner>, Scheduler) {
    let store = Arc::new(MemoryStore::new());
    for id in 1..=3 {
        store.insert_device(device(id)).await;
    }
    store.insert_group(7, vec![1, 2, 3]).await;

    let runner = Arc::new(RecordingRunner {
        runs: Mutex::new(Vec::new()),
        fail_device,
    });
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        store.clone(),
        runner.clone(),
        60,
    ));
    let scheduler = Scheduler::new(store.clone(), dispatcher, Duration::from_secs(60), 60);
    (store, runner, scheduler)
}

#[tokio::test]
async fn bootstrap_then_dispatch_across_two_ticks() {
    let (store, runner, scheduler) = seeded(None).await;
    store.insert_task(availability_task(1, "*/5 * * * *")).await;
    store.add_target(1, TargetKind::Group, None, Some(7)).await;

    // First sighting only computes next_run_at.
    let first = Utc.with_ymd_and_hms(2025, 6, 2, 10, 3, 0).unwrap();
    scheduler.run_tick(first).await;
    assert!(store.executions_for_task(1).await.is_empty());
    let next_run = store
        .get_task(1)
        .await
        .unwrap()
        .unwrap()
        .next_run_at
        .unwrap();
    assert_eq!(next_run, Utc.with_ymd_and_hms(2025, 6, 2, 10, 5, 0).unwrap());

    // Once the due minute arrives the task fans out to the whole group.
    scheduler.run_tick(next_run).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let executions = store.executions_for_task(1).await;
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, ExecutionStatus::Success);
    assert_eq!(executions[0].triggered_by, TriggeredBy::Schedule);

    let results = store.results_for_execution(executions[0].execution_id).await;
    let devices: Vec<i64> = results.iter().map(|r| r.device_id).collect();
    assert_eq!(devices, vec![1, 2, 3]);
    assert!(results.iter().all(|r| r.status == ResultStatus::Success));

    let mut runs = runner.runs.lock().unwrap().clone();
    runs.sort_unstable();
    assert_eq!(runs, vec![(1, 1), (1, 2), (1, 3)]);
}

#[tokio::test]
async fn partial_failure_rolls_the_execution_up_as_failed() {
    let (store, _runner, scheduler) = seeded(Some(2)).await;
    store.insert_task(availability_task(1, "* * * * *")).await;
    store.add_target(1, TargetKind::Group, None, Some(7)).await;

    let first = Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap();
    scheduler.run_tick(first).await;
    let next_run = store
        .get_task(1)
        .await
        .unwrap()
        .unwrap()
        .next_run_at
        .unwrap();
    scheduler.run_tick(next_run).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let executions = store.executions_for_task(1).await;
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, ExecutionStatus::Failed);

    let results = store.results_for_execution(executions[0].execution_id).await;
    assert_eq!(results.len(), 3);
    let failed: Vec<i64> = results
        .iter()
        .filter(|r| r.status == ResultStatus::Failed)
        .map(|r| r.device_id)
        .collect();
    assert_eq!(failed, vec![2]);
}

#[tokio::test]
async fn manual_dispatch_ignores_the_schedule_entirely() {
    let (store, _runner, _scheduler) = seeded(None).await;
    // An expression that never matches this month still runs manually.
    store.insert_task(availability_task(1, "0 0 1 1 *")).await;
    store.add_target(1, TargetKind::Device, Some(3), None).await;

    let runner = Arc::new(RecordingRunner {
        runs: Mutex::new(Vec::new()),
        fail_device: None,
    });
    let dispatcher = Dispatcher::new(store.clone(), store.clone(), runner, 60);

    let execution_id = dispatcher
        .execute(1, TriggeredBy::Manual)
        .await
        .unwrap()
        .unwrap();

    let execution = store.get_execution(execution_id).await.unwrap();
    assert_eq!(execution.triggered_by, TriggeredBy::Manual);
    assert_eq!(execution.status, ExecutionStatus::Success);
    let results = store.results_for_execution(execution_id).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].device_id, 3);
}
