pub mod artifacts;
pub mod entities;
pub mod enums;
pub mod inventory;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::entities::device::DeviceCredentials;
use crate::db::entities::{task, task_execution, task_result, task_target};
use crate::db::enums::{BackupKind, ExecutionStatus, ResultStatus, TriggeredBy};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    TaskNotFound(i64),
    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),
    #[error("result {0} not found")]
    ResultNotFound(Uuid),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistence operations for tasks, executions and per-device results.
///
/// Relational persistence itself lives outside the core; the scheduler and
/// dispatcher only ever talk to this interface. Each execution and result
/// record is owned by exactly one in-flight dispatch, so no compare-and-swap
/// semantics are needed here.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn list_enabled_tasks(&self) -> Result<Vec<task::Model>, StoreError>;

    async fn get_task(&self, task_id: i64) -> Result<Option<task::Model>, StoreError>;

    async fn list_targets(&self, task_id: i64) -> Result<Vec<task_target::Model>, StoreError>;

    /// Persists the run-tracking fields after a dispatch or catch-up.
    async fn update_task_schedule(
        &self,
        task_id: i64,
        last_run_at: Option<DateTime<Utc>>,
        next_run_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn create_execution(
        &self,
        task_id: i64,
        triggered_by: TriggeredBy,
    ) -> Result<task_execution::Model, StoreError>;

    async fn finish_execution(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        finished_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn create_result(
        &self,
        execution_id: Uuid,
        device_id: i64,
    ) -> Result<task_result::Model, StoreError>;

    async fn finish_result(
        &self,
        result_id: Uuid,
        status: ResultStatus,
        output: Option<serde_json::Value>,
        error_message: Option<String>,
        finished_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Read-only view onto the device inventory owned by the external CRUD layer.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Returns `None` when the device id does not resolve.
    async fn device_credentials(
        &self,
        device_id: i64,
    ) -> Result<Option<DeviceCredentials>, StoreError>;

    async fn device_ids_in_group(&self, group_id: i64) -> Result<Vec<i64>, StoreError>;
}

/// Sink for backup artifacts pulled off a device.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Stores the artifact bytes and returns the storage path they ended up at.
    async fn store_artifact(
        &self,
        device_id: i64,
        kind: BackupKind,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<String, StoreError>;
}
