//! Per-device task execution: resolves credentials, opens a gated client,
//! routes to the handler for the task kind and always tears the client down.

use std::sync::Arc;

use async_trait::async_trait;

use crate::db::entities::task;
use crate::db::{ArtifactStore, DeviceDirectory};
use crate::db::enums::TaskKind;
use crate::scheduler::handlers::{self, HandlerError};
use crate::transport::{ConnectionGate, DeviceClient, TransportConfig};

/// Executes one task against one device. The dispatcher fans a task out to a
/// `TaskRunner` per target device; tests substitute a fake.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(
        &self,
        task: &task::Model,
        device_id: i64,
    ) -> Result<serde_json::Value, HandlerError>;
}

pub struct DeviceTaskRunner {
    directory: Arc<dyn DeviceDirectory>,
    artifacts: Arc<dyn ArtifactStore>,
    gate: ConnectionGate,
    transport: TransportConfig,
}

impl DeviceTaskRunner {
    pub fn new(
        directory: Arc<dyn DeviceDirectory>,
        artifacts: Arc<dyn ArtifactStore>,
        gate: ConnectionGate,
        transport: TransportConfig,
    ) -> Self {
        Self {
            directory,
            artifacts,
            gate,
            transport,
        }
    }
}

#[async_trait]
impl TaskRunner for DeviceTaskRunner {
    async fn run(
        &self,
        task: &task::Model,
        device_id: i64,
    ) -> Result<serde_json::Value, HandlerError> {
        let credentials = self
            .directory
            .device_credentials(device_id)
            .await?
            .ok_or(HandlerError::DeviceNotFound(device_id))?;

        if task.kind == TaskKind::CheckAvailability {
            return handlers::check_availability(&credentials, &self.gate, self.transport).await;
        }

        // Payload validation happens before any connection is opened.
        let mut client = DeviceClient::new(credentials, self.transport);
        let result = match task.kind {
            TaskKind::CheckAvailability => unreachable!("handled above"),
            TaskKind::RunScript => {
                let payload = handlers::parse_payload(&task.payload)?;
                client.connect(&self.gate).await;
                handlers::run_script(&mut client, &payload).await
            }
            TaskKind::FirewallUpdate => {
                let payload = handlers::parse_payload(&task.payload)?;
                client.connect(&self.gate).await;
                handlers::firewall_update(&mut client, &payload).await
            }
            TaskKind::CreateBackup => {
                let payload = handlers::parse_payload(&task.payload)?;
                client.connect(&self.gate).await;
                handlers::create_backup(&mut client, device_id, &payload, self.artifacts.as_ref())
                    .await
            }
            TaskKind::Reboot => {
                client.connect(&self.gate).await;
                handlers::reboot(&mut client).await
            }
            TaskKind::ResetConfiguration => {
                let payload = match &task.payload {
                    Some(_) => handlers::parse_payload(&task.payload)?,
                    None => handlers::ResetPayload::default(),
                };
                client.connect(&self.gate).await;
                handlers::reset_configuration(&mut client, &payload).await
            }
        };
        client.disconnect().await;
        result
    }
}
