use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::db::entities::device::DeviceCredentials;
use crate::db::entities::task;
use crate::db::enums::{TargetKind, TaskKind};
use crate::db::memory::MemoryStore;

/// Declarative seed for the in-memory store, so the daemon can run without
/// the external CRUD layer. Credentials in this file stay in memory only.
#[derive(Debug, Deserialize)]
pub struct InventoryFile {
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
    #[serde(default)]
    pub tasks: Vec<TaskEntry>,
}

#[derive(Debug, Deserialize)]
pub struct DeviceEntry {
    #[serde(flatten)]
    pub credentials: DeviceCredentials,
    #[serde(default)]
    pub group_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TaskEntry {
    pub id: i64,
    pub name: String,
    pub kind: TaskKind,
    pub schedule_expression: String,
    #[serde(default = "default_timezone")]
    pub schedule_timezone: String,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub targets: Vec<TargetEntry>,
}

#[derive(Debug, Deserialize)]
pub struct TargetEntry {
    pub target_kind: TargetKind,
    #[serde(default)]
    pub device_id: Option<i64>,
    #[serde(default)]
    pub group_id: Option<i64>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("failed to read inventory file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse inventory file: {0}")]
    Parse(#[from] serde_json::Error),
}

impl InventoryFile {
    pub async fn load(path: &Path) -> Result<Self, InventoryError> {
        let contents = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Seeds a memory store with the inventory contents. Group membership is
    /// derived from each device's `group_id`.
    pub async fn apply(&self, store: &MemoryStore) {
        let mut groups: std::collections::HashMap<i64, Vec<i64>> = std::collections::HashMap::new();
        for device in &self.devices {
            store.insert_device(device.credentials.clone()).await;
            if let Some(group_id) = device.group_id {
                groups.entry(group_id).or_default().push(device.credentials.device_id);
            }
        }
        for (group_id, device_ids) in groups {
            store.insert_group(group_id, device_ids).await;
        }

        let now = chrono::Utc::now();
        for entry in &self.tasks {
            store
                .insert_task(task::Model {
                    id: entry.id,
                    name: entry.name.clone(),
                    kind: entry.kind,
                    schedule_expression: entry.schedule_expression.clone(),
                    schedule_timezone: entry.schedule_timezone.clone(),
                    is_enabled: entry.is_enabled,
                    payload: entry.payload.clone(),
                    status: "idle".to_string(),
                    last_run_at: None,
                    next_run_at: None,
                    created_at: now,
                    updated_at: None,
                })
                .await;
            for target in &entry.targets {
                store
                    .add_target(entry.id, target.target_kind, target.device_id, target.group_id)
                    .await;
            }
        }
        info!(
            devices = self.devices.len(),
            tasks = self.tasks.len(),
            "Loaded inventory into in-memory store."
        );
    }
}
