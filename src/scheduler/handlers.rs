//! One handler per task kind, each translated into device transport calls.

use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpStream;
use tracing::warn;

use crate::db::entities::device::DeviceCredentials;
use crate::db::enums::{BackupKind, FirewallListKind};
use crate::db::{ArtifactStore, StoreError};
use crate::transport::{
    ChannelError, ConnectionGate, DeviceClient, Params, Record, RosAction, TransportConfig,
    TransportError,
};

const ADDRESS_LIST_PATH: &str = "/ip/firewall/address-list";
const PORT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("device {0} not found or credentials missing")]
    DeviceNotFound(i64),
    #[error("invalid task payload: {0}")]
    Validation(String),
    #[error("address '{address}' already exists in list '{list}'")]
    AddressAlreadyExists { list: String, address: String },
    #[error("address '{address}' not found in list '{list}'")]
    AddressNotFound { list: String, address: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn parse_payload<T: serde::de::DeserializeOwned>(
    payload: &Option<serde_json::Value>,
) -> Result<T, HandlerError> {
    let value = payload
        .clone()
        .ok_or_else(|| HandlerError::Validation("payload is required for this task kind".to_string()))?;
    serde_json::from_value(value).map_err(|e| HandlerError::Validation(e.to_string()))
}

#[derive(Debug, Deserialize)]
pub struct ScriptPayload {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub script_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirewallOperation {
    Add,
    Remove,
}

#[derive(Debug, Deserialize)]
pub struct FirewallPayload {
    pub operation: FirewallOperation,
    pub list: FirewallListKind,
    pub address: String,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupMode {
    Backup,
    Export,
    Both,
}

impl BackupMode {
    fn kinds(self) -> Vec<BackupKind> {
        match self {
            BackupMode::Backup => vec![BackupKind::Backup],
            BackupMode::Export => vec![BackupKind::Export],
            BackupMode::Both => vec![BackupKind::Backup, BackupKind::Export],
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BackupPayload {
    pub backup_type: BackupMode,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResetPayload {
    #[serde(default)]
    pub keep_users: bool,
    #[serde(default)]
    pub no_defaults: bool,
    #[serde(default)]
    pub skip_backup: bool,
}

#[derive(Debug, Default, Serialize)]
struct AvailabilityStatus {
    is_online: bool,
    api_available: bool,
    ssh_available: bool,
    connection_time_ms: Option<u64>,
    error_message: Option<String>,
}

/// TCP probe of the command port, then a full handshake over both channels.
pub async fn check_availability(
    credentials: &DeviceCredentials,
    gate: &ConnectionGate,
    config: TransportConfig,
) -> Result<serde_json::Value, HandlerError> {
    let mut status = AvailabilityStatus::default();
    let started = Instant::now();
    let probe = tokio::time::timeout(
        PORT_PROBE_TIMEOUT,
        TcpStream::connect((credentials.host.as_str(), credentials.api_port)),
    )
    .await;
    status.connection_time_ms = Some(started.elapsed().as_millis() as u64);

    match probe {
        Ok(Ok(_stream)) => {
            let mut client = DeviceClient::new(credentials.clone(), config);
            client.connect(gate).await;
            status.ssh_available = client.shell_is_open();
            status.api_available = client.api_is_open() && client.structured_probe().await;
            status.is_online = true;
            client.disconnect().await;
        }
        Ok(Err(e)) => {
            status.error_message = Some(e.to_string());
        }
        Err(_) => {
            status.error_message = Some("Port is closed".to_string());
        }
    }

    Ok(serde_json::to_value(status)?)
}

/// Runs an inline script under a transient random name, or a pre-existing
/// named script as-is. Shell channel only.
pub async fn run_script(
    client: &mut DeviceClient,
    payload: &ScriptPayload,
) -> Result<serde_json::Value, HandlerError> {
    match (&payload.source, &payload.script_name) {
        (Some(source), _) => {
            let name = format!("job-{:08x}", rand::rng().random::<u32>());
            client
                .run_raw_command(&format!(
                    "/system script add name={name} source={}",
                    quote_script_source(source)
                ))
                .await?;
            let output = client
                .run_raw_command(&format!("/system script run {name}"))
                .await?;
            if let Err(e) = client
                .run_raw_command(&format!("/system script remove {name}"))
                .await
            {
                warn!(host = %client.host(), script = %name, error = %e,
                    "Failed to remove transient script.");
            }
            Ok(json!({ "script": name, "transient": true, "output": output }))
        }
        (None, Some(name)) => {
            let output = client
                .run_raw_command(&format!("/system script run {name}"))
                .await?;
            Ok(json!({ "script": name, "transient": false, "output": output }))
        }
        (None, None) => Err(HandlerError::Validation(
            "either 'source' or 'script_name' must be provided".to_string(),
        )),
    }
}

fn quote_script_source(source: &str) -> String {
    format!(
        "\"{}\"",
        source
            .replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('\r', "")
            .replace('\n', "\\n")
    )
}

async fn matching_entries(
    client: &mut DeviceClient,
    list_name: &str,
    address: &str,
) -> Result<Vec<Record>, HandlerError> {
    let mut filter = Params::new();
    filter.insert("list".to_string(), list_name.to_string());
    filter.insert("address".to_string(), address.to_string());
    let records = client
        .execute(ADDRESS_LIST_PATH, RosAction::Print, &Params::new(), &filter)
        .await?;
    // The shell fallback parser is lossy, so the filter is re-applied here
    // rather than trusted.
    Ok(records
        .into_iter()
        .filter(|r| {
            r.get("list").map(String::as_str) == Some(list_name)
                && r.get("address").map(String::as_str) == Some(address)
        })
        .collect())
}

/// Adds or removes one address on a device address-list. A duplicate add and
/// a remove of an absent address surface as conflicts, distinct from
/// transport failures.
pub async fn firewall_update(
    client: &mut DeviceClient,
    payload: &FirewallPayload,
) -> Result<serde_json::Value, HandlerError> {
    let list_name = payload.list.device_list_name();

    match payload.operation {
        FirewallOperation::Add => {
            let existing = matching_entries(client, list_name, &payload.address).await?;
            if !existing.is_empty() {
                return Err(HandlerError::AddressAlreadyExists {
                    list: list_name.to_string(),
                    address: payload.address.clone(),
                });
            }
            let mut params = Params::new();
            params.insert("list".to_string(), list_name.to_string());
            params.insert("address".to_string(), payload.address.clone());
            if let Some(comment) = &payload.comment {
                params.insert("comment".to_string(), comment.clone());
            }
            client
                .execute(ADDRESS_LIST_PATH, RosAction::Add, &params, &Params::new())
                .await?;
            Ok(json!({
                "list": list_name,
                "address": payload.address,
                "status": "added",
            }))
        }
        FirewallOperation::Remove => {
            let existing = matching_entries(client, list_name, &payload.address).await?;
            if existing.is_empty() {
                return Err(HandlerError::AddressNotFound {
                    list: list_name.to_string(),
                    address: payload.address.clone(),
                });
            }
            let ids: Vec<String> = existing
                .iter()
                .filter_map(|entry| entry.get(".id").cloned())
                .collect();
            if ids.is_empty() {
                return Err(HandlerError::Validation(format!(
                    "matching entries in '{list_name}' carry no '.id'; cannot remove"
                )));
            }
            for id in ids {
                let mut params = Params::new();
                params.insert(".id".to_string(), id);
                client
                    .execute(ADDRESS_LIST_PATH, RosAction::Remove, &params, &Params::new())
                    .await?;
            }
            Ok(json!({
                "list": list_name,
                "address": payload.address,
                "status": "removed",
            }))
        }
    }
}

/// Triggers a native backup and/or a configuration export, pulls the
/// artifact back over the file-transfer sub-channel and hands the bytes to
/// the artifact store.
pub async fn create_backup(
    client: &mut DeviceClient,
    device_id: i64,
    payload: &BackupPayload,
    artifacts: &dyn ArtifactStore,
) -> Result<serde_json::Value, HandlerError> {
    if !client.shell_is_open() {
        return Err(TransportError::ShellUnavailable {
            host: client.host().to_string(),
        }
        .into());
    }

    let mut stored = Vec::new();
    for kind in payload.backup_type.kinds() {
        let timestamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let base_name = format!("device{device_id}_{timestamp}_{kind}");
        let remote_file = format!("{base_name}.{}", kind.file_extension());
        let command = match kind {
            BackupKind::Backup => format!("/system backup save name={base_name}"),
            BackupKind::Export => format!("/export file={base_name}"),
        };

        client.run_raw_command(&command).await?;

        let staging = tempfile::tempdir()?;
        let local = staging.path().join(&remote_file);
        client.download_file(&remote_file, &local).await?;
        let bytes = tokio::fs::read(&local).await?;
        let storage_path = artifacts
            .store_artifact(device_id, kind, &remote_file, bytes)
            .await?;
        stored.push(json!({
            "kind": kind,
            "filename": remote_file,
            "storage_path": storage_path,
        }));
    }

    Ok(json!({ "artifacts": stored }))
}

/// The reboot (and factory reset) commands drop the SSH session as soon as
/// they take effect, so a torn connection after issuing counts as success.
fn issued_despite_teardown(error: &TransportError) -> bool {
    matches!(
        error,
        TransportError::Channel(ChannelError::Io(_) | ChannelError::Ssh(_))
    )
}

pub async fn reboot(client: &mut DeviceClient) -> Result<serde_json::Value, HandlerError> {
    if !client.shell_is_open() {
        return Err(TransportError::ShellUnavailable {
            host: client.host().to_string(),
        }
        .into());
    }
    match client.run_raw_command("/system reboot").await {
        Ok(_) => Ok(json!({ "status": "reboot_issued" })),
        Err(e) if issued_despite_teardown(&e) => Ok(json!({ "status": "reboot_issued" })),
        Err(e) => Err(e.into()),
    }
}

pub fn build_reset_command(payload: &ResetPayload) -> String {
    let mut command = String::from("/system reset-configuration");
    if payload.keep_users {
        command.push_str(" keep-users=yes");
    }
    if payload.no_defaults {
        command.push_str(" no-defaults=yes");
    }
    if payload.skip_backup {
        command.push_str(" skip-backup=yes");
    }
    command
}

pub async fn reset_configuration(
    client: &mut DeviceClient,
    payload: &ResetPayload,
) -> Result<serde_json::Value, HandlerError> {
    if !client.shell_is_open() {
        return Err(TransportError::ShellUnavailable {
            host: client.host().to_string(),
        }
        .into());
    }
    let command = build_reset_command(payload);
    match client.run_raw_command(&command).await {
        Ok(_) => Ok(json!({ "status": "reset_issued", "command": command })),
        Err(e) if issued_despite_teardown(&e) => {
            Ok(json!({ "status": "reset_issued", "command": command }))
        }
        Err(e) => Err(e.into()),
    }
}
