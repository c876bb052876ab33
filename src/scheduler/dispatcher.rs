//! Fans one task execution out across its target devices.
//!
//! Target lists are de-duplicated after group expansion, every device gets
//! its own result record, device runs proceed concurrently and one device
//! failing never aborts the others. The execution rolls up to failed if any
//! device failed.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cron::compute_next_run;
use crate::db::entities::{task, task_target};
use crate::db::enums::{ExecutionStatus, ResultStatus, TargetKind, TriggeredBy};
use crate::db::{DeviceDirectory, StoreError, TaskStore};
use crate::scheduler::runner::TaskRunner;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct Dispatcher {
    store: Arc<dyn TaskStore>,
    directory: Arc<dyn DeviceDirectory>,
    runner: Arc<dyn TaskRunner>,
    lookahead_minutes: u32,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn TaskStore>,
        directory: Arc<dyn DeviceDirectory>,
        runner: Arc<dyn TaskRunner>,
        lookahead_minutes: u32,
    ) -> Self {
        Self {
            store,
            directory,
            runner,
            lookahead_minutes,
        }
    }

    /// Runs one task now. An absent or disabled task is logged and skipped
    /// rather than treated as an error, since tasks can be deleted or
    /// disabled between scheduling and dispatch.
    pub async fn execute(
        &self,
        task_id: i64,
        triggered_by: TriggeredBy,
    ) -> Result<Option<Uuid>, DispatchError> {
        let Some(task) = self.store.get_task(task_id).await? else {
            warn!(task_id, "Task vanished before dispatch, skipping.");
            return Ok(None);
        };
        if !task.is_enabled {
            warn!(task_id, "Task was disabled before dispatch, skipping.");
            return Ok(None);
        }

        let execution = self.store.create_execution(task_id, triggered_by).await?;

        // A store failure mid-fan-out must not leave the execution dangling
        // in running state.
        let failures = match self.fan_out(&task, execution.execution_id).await {
            Ok(failures) => failures,
            Err(e) => {
                error!(
                    task_id,
                    execution_id = %execution.execution_id,
                    error = %e,
                    "Fan-out aborted, finalizing execution as failed."
                );
                self.store
                    .finish_execution(execution.execution_id, ExecutionStatus::Failed, Utc::now())
                    .await?;
                return Err(e);
            }
        };

        let status = if failures > 0 {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Success
        };
        self.store
            .finish_execution(execution.execution_id, status, Utc::now())
            .await?;

        let now = Utc::now();
        match compute_next_run(now, &task.schedule_expression, self.lookahead_minutes) {
            Ok(next_run) => {
                self.store
                    .update_task_schedule(task_id, Some(now), next_run)
                    .await?;
            }
            Err(e) => {
                warn!(task_id, error = %e, "Could not advance schedule after dispatch.");
            }
        }

        info!(
            task_id,
            execution_id = %execution.execution_id,
            status = %status,
            failures,
            "Task execution finished."
        );
        Ok(Some(execution.execution_id))
    }

    /// Expands the targets, runs every device concurrently and records the
    /// per-device results. Returns the failure count.
    async fn fan_out(
        &self,
        task: &task::Model,
        execution_id: Uuid,
    ) -> Result<usize, DispatchError> {
        let device_ids = self.expand_targets(task.id).await?;
        info!(
            task_id = task.id,
            execution_id = %execution_id,
            device_count = device_ids.len(),
            kind = %task.kind,
            "Dispatching task execution."
        );

        let mut pending = Vec::with_capacity(device_ids.len());
        for device_id in device_ids {
            let result = self.store.create_result(execution_id, device_id).await?;
            pending.push((result.result_id, device_id));
        }

        let runs = pending.iter().map(|&(result_id, device_id)| {
            let runner = self.runner.clone();
            let task = task.clone();
            async move { (result_id, device_id, runner.run(&task, device_id).await) }
        });
        let outcomes = futures::future::join_all(runs).await;

        let mut failures = 0usize;
        for (result_id, device_id, outcome) in outcomes {
            match outcome {
                Ok(output) => {
                    self.store
                        .finish_result(result_id, ResultStatus::Success, Some(output), None, Utc::now())
                        .await?;
                }
                Err(e) => {
                    failures += 1;
                    error!(
                        task_id = task.id,
                        device_id,
                        execution_id = %execution_id,
                        error = %e,
                        "Device run failed."
                    );
                    self.store
                        .finish_result(
                            result_id,
                            ResultStatus::Failed,
                            None,
                            Some(e.to_string()),
                            Utc::now(),
                        )
                        .await?;
                }
            }
        }
        Ok(failures)
    }

    /// Resolves the task's device and group targets into a sorted,
    /// de-duplicated device id list.
    pub(crate) async fn expand_targets(&self, task_id: i64) -> Result<Vec<i64>, DispatchError> {
        let targets = self.store.list_targets(task_id).await?;
        let mut ids = BTreeSet::new();
        for target in targets {
            match target {
                task_target::Model {
                    target_kind: TargetKind::Device,
                    device_id: Some(device_id),
                    ..
                } => {
                    ids.insert(device_id);
                }
                task_target::Model {
                    target_kind: TargetKind::Group,
                    group_id: Some(group_id),
                    ..
                } => {
                    for device_id in self.directory.device_ids_in_group(group_id).await? {
                        ids.insert(device_id);
                    }
                }
                other => {
                    warn!(task_id, target_id = other.id, "Malformed target row, skipping.");
                }
            }
        }
        Ok(ids.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use serde_json::json;

    use crate::db::entities::device::DeviceCredentials;
    use crate::db::entities::{task, task_execution, task_result};
    use crate::db::enums::TaskKind;
    use crate::db::memory::MemoryStore;
    use crate::scheduler::handlers::HandlerError;

    struct FakeRunner {
        failing_devices: HashSet<i64>,
        seen: Mutex<Vec<i64>>,
    }

    impl FakeRunner {
        fn new(failing_devices: impl IntoIterator<Item = i64>) -> Self {
            Self {
                failing_devices: failing_devices.into_iter().collect(),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TaskRunner for FakeRunner {
        async fn run(
            &self,
            _task: &task::Model,
            device_id: i64,
        ) -> Result<serde_json::Value, HandlerError> {
            self.seen.lock().unwrap().push(device_id);
            if self.failing_devices.contains(&device_id) {
                Err(HandlerError::DeviceNotFound(device_id))
            } else {
                Ok(json!({ "device": device_id }))
            }
        }
    }

    fn sample_task(id: i64, enabled: bool) -> task::Model {
        task::Model {
            id,
            name: format!("task-{id}"),
            kind: TaskKind::CheckAvailability,
            schedule_expression: "* * * * *".to_string(),
            schedule_timezone: "UTC".to_string(),
            is_enabled: enabled,
            payload: None,
            status: "active".to_string(),
            last_run_at: None,
            next_run_at: None,
            created_at: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
            updated_at: None,
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

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for id in 1..=3 {
            store.insert_device(device(id)).await;
        }
        store.insert_group(10, vec![1, 2, 3]).await;
        store
    }

    fn dispatcher(store: Arc<MemoryStore>, runner: Arc<FakeRunner>) -> Dispatcher {
        Dispatcher::new(store.clone(), store, runner, 60)
    }

    #[tokio::test]
    async fn task_with_no_targets_succeeds_with_zero_results() {
        let store = seeded_store().await;
        store.insert_task(sample_task(1, true)).await;
        let runner = Arc::new(FakeRunner::new([]));
        let dispatcher = dispatcher(store.clone(), runner);

        let execution_id = dispatcher
            .execute(1, TriggeredBy::Manual)
            .await
            .unwrap()
            .unwrap();

        let execution = store.get_execution(execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Success);
        assert!(store.results_for_execution(execution_id).await.is_empty());
    }

    #[tokio::test]
    async fn overlapping_group_and_device_targets_deduplicate() {
        let store = seeded_store().await;
        store.insert_task(sample_task(1, true)).await;
        store
            .add_target(1, TargetKind::Group, None, Some(10))
            .await;
        store
            .add_target(1, TargetKind::Device, Some(2), None)
            .await;
        let runner = Arc::new(FakeRunner::new([]));
        let dispatcher = dispatcher(store.clone(), runner.clone());

        let execution_id = dispatcher
            .execute(1, TriggeredBy::Schedule)
            .await
            .unwrap()
            .unwrap();

        let results = store.results_for_execution(execution_id).await;
        let targeted: Vec<i64> = results.iter().map(|r| r.device_id).collect();
        assert_eq!(targeted, vec![1, 2, 3]);

        let mut seen = runner.seen.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn one_device_failure_fails_the_execution_but_not_the_others() {
        let store = seeded_store().await;
        store.insert_task(sample_task(1, true)).await;
        store
            .add_target(1, TargetKind::Group, None, Some(10))
            .await;
        let runner = Arc::new(FakeRunner::new([2]));
        let dispatcher = dispatcher(store.clone(), runner);

        let execution_id = dispatcher
            .execute(1, TriggeredBy::Schedule)
            .await
            .unwrap()
            .unwrap();

        let execution = store.get_execution(execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);

        let results = store.results_for_execution(execution_id).await;
        assert_eq!(results.len(), 3);
        for result in &results {
            if result.device_id == 2 {
                assert_eq!(result.status, ResultStatus::Failed);
                assert!(result.error_message.as_deref().is_some_and(|m| !m.is_empty()));
                assert!(result.output.is_none());
            } else {
                assert_eq!(result.status, ResultStatus::Success);
                assert_eq!(result.output, Some(json!({ "device": result.device_id })));
            }
            assert!(result.finished_at.is_some());
        }
    }

    #[tokio::test]
    async fn disabled_and_missing_tasks_are_skipped_without_an_execution() {
        let store = seeded_store().await;
        store.insert_task(sample_task(1, false)).await;
        let runner = Arc::new(FakeRunner::new([]));
        let dispatcher = dispatcher(store.clone(), runner);

        assert!(dispatcher.execute(1, TriggeredBy::Schedule).await.unwrap().is_none());
        assert!(dispatcher.execute(99, TriggeredBy::Schedule).await.unwrap().is_none());
        assert!(store.executions_for_task(1).await.is_empty());
    }

    /// Delegates to a memory store but fails target listing, standing in for
    /// a storage backend dropping out mid-dispatch.
    struct TargetListingFails {
        inner: Arc<MemoryStore>,
    }

    #[async_trait]
    impl TaskStore for TargetListingFails {
        async fn list_enabled_tasks(&self) -> Result<Vec<task::Model>, StoreError> {
            self.inner.list_enabled_tasks().await
        }

        async fn get_task(&self, task_id: i64) -> Result<Option<task::Model>, StoreError> {
            self.inner.get_task(task_id).await
        }

        async fn list_targets(
            &self,
            _task_id: i64,
        ) -> Result<Vec<task_target::Model>, StoreError> {
            Err(StoreError::Backend("target listing unavailable".to_string()))
        }

        async fn update_task_schedule(
            &self,
            task_id: i64,
            last_run_at: Option<DateTime<Utc>>,
            next_run_at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.inner
                .update_task_schedule(task_id, last_run_at, next_run_at)
                .await
        }

        async fn create_execution(
            &self,
            task_id: i64,
            triggered_by: TriggeredBy,
        ) -> Result<task_execution::Model, StoreError> {
            self.inner.create_execution(task_id, triggered_by).await
        }

        async fn finish_execution(
            &self,
            execution_id: Uuid,
            status: ExecutionStatus,
            finished_at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.inner
                .finish_execution(execution_id, status, finished_at)
                .await
        }

        async fn create_result(
            &self,
            execution_id: Uuid,
            device_id: i64,
        ) -> Result<task_result::Model, StoreError> {
            self.inner.create_result(execution_id, device_id).await
        }

        async fn finish_result(
            &self,
            result_id: Uuid,
            status: ResultStatus,
            output: Option<serde_json::Value>,
            error_message: Option<String>,
            finished_at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.inner
                .finish_result(result_id, status, output, error_message, finished_at)
                .await
        }
    }

    #[tokio::test]
    async fn store_failure_during_fan_out_finalizes_the_execution_as_failed() {
        let inner = seeded_store().await;
        inner.insert_task(sample_task(1, true)).await;
        inner.add_target(1, TargetKind::Group, None, Some(10)).await;

        let store = Arc::new(TargetListingFails {
            inner: inner.clone(),
        });
        let runner = Arc::new(FakeRunner::new([]));
        let dispatcher = Dispatcher::new(store, inner.clone(), runner, 60);

        let err = dispatcher
            .execute(1, TriggeredBy::Manual)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Store(StoreError::Backend(_))));

        // The execution must not be left dangling in running state.
        let executions = inner.executions_for_task(1).await;
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].status, ExecutionStatus::Failed);
        assert!(executions[0].finished_at.is_some());
        assert!(inner
            .results_for_execution(executions[0].execution_id)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn dispatch_advances_last_and_next_run() {
        let store = seeded_store().await;
        store.insert_task(sample_task(1, true)).await;
        let runner = Arc::new(FakeRunner::new([]));
        let dispatcher = dispatcher(store.clone(), runner);

        let before = Utc::now();
        dispatcher.execute(1, TriggeredBy::Schedule).await.unwrap();

        let task = store.get_task(1).await.unwrap().unwrap();
        let last_run = task.last_run_at.unwrap();
        let next_run = task.next_run_at.unwrap();
        assert!(last_run >= before);
        assert!(next_run > last_run);
    }
}
