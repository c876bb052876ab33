use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::entities::device::DeviceCredentials;
use crate::db::entities::{task, task_execution, task_result, task_target};
use crate::db::enums::{ExecutionStatus, ResultStatus, TriggeredBy};
use crate::db::{DeviceDirectory, StoreError, TaskStore};

#[derive(Default)]
struct Inner {
    tasks: HashMap<i64, task::Model>,
    targets: HashMap<i64, Vec<task_target::Model>>,
    executions: HashMap<Uuid, task_execution::Model>,
    results: HashMap<Uuid, task_result::Model>,
    devices: HashMap<i64, DeviceCredentials>,
    groups: HashMap<i64, Vec<i64>>,
    next_target_id: i64,
}

/// In-process store backing the scheduler when no external persistence layer
/// is wired in, and the harness every test builds on.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_task(&self, model: task::Model) {
        self.inner.write().await.tasks.insert(model.id, model);
    }

    pub async fn insert_target(&self, target: task_target::Model) {
        let mut inner = self.inner.write().await;
        inner.targets.entry(target.task_id).or_default().push(target);
    }

    pub async fn add_target(
        &self,
        task_id: i64,
        target_kind: crate::db::enums::TargetKind,
        device_id: Option<i64>,
        group_id: Option<i64>,
    ) {
        let mut inner = self.inner.write().await;
        inner.next_target_id += 1;
        let id = inner.next_target_id;
        inner.targets.entry(task_id).or_default().push(task_target::Model {
            id,
            task_id,
            target_kind,
            device_id,
            group_id,
        });
    }

    pub async fn insert_device(&self, creds: DeviceCredentials) {
        self.inner.write().await.devices.insert(creds.device_id, creds);
    }

    pub async fn insert_group(&self, group_id: i64, device_ids: Vec<i64>) {
        self.inner.write().await.groups.insert(group_id, device_ids);
    }

    pub async fn get_execution(&self, execution_id: Uuid) -> Option<task_execution::Model> {
        self.inner.read().await.executions.get(&execution_id).cloned()
    }

    pub async fn results_for_execution(&self, execution_id: Uuid) -> Vec<task_result::Model> {
        let inner = self.inner.read().await;
        let mut results: Vec<_> = inner
            .results
            .values()
            .filter(|r| r.execution_id == execution_id)
            .cloned()
            .collect();
        results.sort_by_key(|r| r.device_id);
        results
    }

    pub async fn executions_for_task(&self, task_id: i64) -> Vec<task_execution::Model> {
        let inner = self.inner.read().await;
        let mut executions: Vec<_> = inner
            .executions
            .values()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect();
        executions.sort_by_key(|e| e.started_at);
        executions
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn list_enabled_tasks(&self) -> Result<Vec<task::Model>, StoreError> {
        let inner = self.inner.read().await;
        let mut tasks: Vec<_> = inner
            .tasks
            .values()
            .filter(|t| t.is_enabled)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.id);
        Ok(tasks)
    }

    async fn get_task(&self, task_id: i64) -> Result<Option<task::Model>, StoreError> {
        Ok(self.inner.read().await.tasks.get(&task_id).cloned())
    }

    async fn list_targets(&self, task_id: i64) -> Result<Vec<task_target::Model>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .targets
            .get(&task_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_task_schedule(
        &self,
        task_id: i64,
        last_run_at: Option<DateTime<Utc>>,
        next_run_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(&task_id)
            .ok_or(StoreError::TaskNotFound(task_id))?;
        if last_run_at.is_some() {
            task.last_run_at = last_run_at;
        }
        task.next_run_at = Some(next_run_at);
        task.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn create_execution(
        &self,
        task_id: i64,
        triggered_by: TriggeredBy,
    ) -> Result<task_execution::Model, StoreError> {
        let execution = task_execution::Model {
            execution_id: Uuid::new_v4(),
            task_id,
            status: ExecutionStatus::Running,
            triggered_by,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.inner
            .write()
            .await
            .executions
            .insert(execution.execution_id, execution.clone());
        Ok(execution)
    }

    async fn finish_execution(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        finished_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let execution = inner
            .executions
            .get_mut(&execution_id)
            .ok_or(StoreError::ExecutionNotFound(execution_id))?;
        execution.status = status;
        execution.finished_at = Some(finished_at);
        Ok(())
    }

    async fn create_result(
        &self,
        execution_id: Uuid,
        device_id: i64,
    ) -> Result<task_result::Model, StoreError> {
        let result = task_result::Model {
            result_id: Uuid::new_v4(),
            execution_id,
            device_id,
            status: ResultStatus::Running,
            output: None,
            error_message: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.inner
            .write()
            .await
            .results
            .insert(result.result_id, result.clone());
        Ok(result)
    }

    async fn finish_result(
        &self,
        result_id: Uuid,
        status: ResultStatus,
        output: Option<serde_json::Value>,
        error_message: Option<String>,
        finished_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let result = inner
            .results
            .get_mut(&result_id)
            .ok_or(StoreError::ResultNotFound(result_id))?;
        result.status = status;
        result.output = output;
        result.error_message = error_message;
        result.finished_at = Some(finished_at);
        Ok(())
    }
}

#[async_trait]
impl DeviceDirectory for MemoryStore {
    async fn device_credentials(
        &self,
        device_id: i64,
    ) -> Result<Option<DeviceCredentials>, StoreError> {
        Ok(self.inner.read().await.devices.get(&device_id).cloned())
    }

    async fn device_ids_in_group(&self, group_id: i64) -> Result<Vec<i64>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .groups
            .get(&group_id)
            .cloned()
            .unwrap_or_default())
    }
}
