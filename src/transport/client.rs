//! Unified device client over the structured API channel and the SSH shell
//! channel, with automatic fallback from the former to the latter.

use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::db::entities::device::DeviceCredentials;
use crate::transport::api::ApiChannel;
use crate::transport::gate::{ConnectionGate, ConnectionSlot};
use crate::transport::ssh::SshShellChannel;
use crate::transport::{
    ChannelError, Params, Record, RosAction, ShellChannel, StructuredChannel, TransportError,
};

#[derive(Debug, Clone, Copy)]
pub struct TransportConfig {
    pub api_timeout: Duration,
    pub shell_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            api_timeout: Duration::from_secs(5),
            shell_timeout: Duration::from_secs(10),
        }
    }
}

pub struct DeviceClient {
    credentials: DeviceCredentials,
    config: TransportConfig,
    api: Option<Box<dyn StructuredChannel>>,
    shell: Option<Box<dyn ShellChannel>>,
    slot: Option<ConnectionSlot>,
}

impl DeviceClient {
    pub fn new(credentials: DeviceCredentials, config: TransportConfig) -> Self {
        Self {
            credentials,
            config,
            api: None,
            shell: None,
            slot: None,
        }
    }

    /// Builds a client over pre-opened channels. Used by tests to exercise
    /// the fallback contract with fake channels.
    pub fn from_channels(
        credentials: DeviceCredentials,
        api: Option<Box<dyn StructuredChannel>>,
        shell: Option<Box<dyn ShellChannel>>,
    ) -> Self {
        Self {
            credentials,
            config: TransportConfig::default(),
            api,
            shell,
            slot: None,
        }
    }

    pub fn host(&self) -> &str {
        &self.credentials.host
    }

    pub fn api_is_open(&self) -> bool {
        self.api.is_some()
    }

    pub fn shell_is_open(&self) -> bool {
        self.shell.is_some()
    }

    /// Opens both channels. Each failure is logged and tolerated; callers
    /// decide per operation which channel they need. A connection slot is
    /// taken from the gate first and held until `disconnect`.
    pub async fn connect(&mut self, gate: &ConnectionGate) {
        self.slot = Some(gate.acquire().await);
        let creds = &self.credentials;

        match ApiChannel::connect(
            &creds.host,
            creds.api_port,
            &creds.username,
            &creds.password,
            creds.use_tls,
            self.config.api_timeout,
        )
        .await
        {
            Ok(channel) => {
                info!(host = %creds.host, port = creds.api_port, "API channel connected.");
                self.api = Some(Box::new(channel));
            }
            Err(e) => {
                warn!(host = %creds.host, port = creds.api_port, error = %e, "API channel connection failed.");
            }
        }

        match SshShellChannel::connect(
            &creds.host,
            creds.ssh_port,
            &creds.username,
            &creds.password,
            self.config.shell_timeout,
        )
        .await
        {
            Ok(channel) => {
                info!(host = %creds.host, port = creds.ssh_port, "Shell channel connected.");
                self.shell = Some(Box::new(channel));
            }
            Err(e) => {
                warn!(host = %creds.host, port = creds.ssh_port, error = %e, "Shell channel connection failed.");
            }
        }
    }

    /// Tears both channels down independently and returns the connection
    /// slot. Safe to call at any time, including repeatedly.
    pub async fn disconnect(&mut self) {
        if let Some(mut api) = self.api.take() {
            api.close().await;
        }
        if let Some(mut shell) = self.shell.take() {
            shell.close().await;
        }
        self.slot.take();
    }

    /// Unified command execution: structured channel first, shell fallback
    /// on any channel failure, connectivity error when neither is open.
    pub async fn execute(
        &mut self,
        path: &str,
        action: RosAction,
        params: &Params,
        filter: &Params,
    ) -> Result<Vec<Record>, TransportError> {
        if action == RosAction::Remove && !params.contains_key(".id") {
            return Err(TransportError::InvalidRequest(
                "remove requires an '.id' parameter".to_string(),
            ));
        }

        if let Some(api) = &mut self.api {
            match api.execute(path, action, params, filter).await {
                Ok(records) => return Ok(records),
                Err(e) => {
                    warn!(host = %self.credentials.host, path, action = %action, error = %e,
                        "API execution failed, falling back to shell channel.");
                }
            }
        }

        let Some(shell) = &mut self.shell else {
            return Err(TransportError::NoChannel {
                host: self.credentials.host.clone(),
            });
        };

        let command = render_shell_command(path, action, params, filter);
        let output = shell.run_command(&command).await?;
        match action {
            RosAction::Print => Ok(parse_print_output(&output)),
            RosAction::Add | RosAction::Remove => Ok(Vec::new()),
        }
    }

    /// Runs a raw CLI command over the shell channel.
    pub async fn run_raw_command(&mut self, command: &str) -> Result<String, TransportError> {
        let Some(shell) = &mut self.shell else {
            return Err(TransportError::ShellUnavailable {
                host: self.credentials.host.clone(),
            });
        };
        Ok(shell.run_command(command).await?)
    }

    pub async fn upload_file(&mut self, local: &Path, remote: &str) -> Result<(), TransportError> {
        let Some(shell) = &mut self.shell else {
            return Err(TransportError::ShellUnavailable {
                host: self.credentials.host.clone(),
            });
        };
        Ok(shell.upload(local, remote).await?)
    }

    pub async fn download_file(
        &mut self,
        remote: &str,
        local: &Path,
    ) -> Result<(), TransportError> {
        let Some(shell) = &mut self.shell else {
            return Err(TransportError::ShellUnavailable {
                host: self.credentials.host.clone(),
            });
        };
        Ok(shell.download(remote, local).await?)
    }

    /// Availability probe of the structured channel only: runs a harmless
    /// identity print and reports whether it produced records.
    pub async fn structured_probe(&mut self) -> bool {
        let Some(api) = &mut self.api else {
            return false;
        };
        match api
            .execute("/system/identity", RosAction::Print, &Params::new(), &Params::new())
            .await
        {
            Ok(records) => !records.is_empty(),
            Err(e) => {
                warn!(host = %self.credentials.host, error = %e, "Structured channel probe failed.");
                false
            }
        }
    }
}

/// Translates a path/action/params triple into RouterOS CLI syntax.
/// `print detail` is used so the output carries `key=value` pairs the
/// fallback parser can reconstruct records from.
fn render_shell_command(path: &str, action: RosAction, params: &Params, filter: &Params) -> String {
    let base = path.trim_matches('/').replace('/', " ");
    match action {
        RosAction::Print => {
            let mut command = format!("/{base} print detail");
            if !filter.is_empty() {
                let clauses: Vec<String> = filter
                    .iter()
                    .map(|(k, v)| format!("{k}={}", quote_value(v)))
                    .collect();
                command.push_str(" where ");
                command.push_str(&clauses.join(" "));
            }
            command
        }
        RosAction::Add => {
            let args: Vec<String> = params
                .iter()
                .map(|(k, v)| format!("{k}={}", quote_value(v)))
                .collect();
            format!("/{base} add {}", args.join(" "))
        }
        RosAction::Remove => {
            // Presence of `.id` is validated before rendering.
            let id = params.get(".id").map(String::as_str).unwrap_or_default();
            format!("/{base} remove {id}")
        }
    }
}

fn quote_value(value: &str) -> String {
    if value.chars().any(|c| c.is_whitespace() || c == '"') {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

/// Best-effort parser for `print detail` output: whitespace tokens split on
/// the first `=`, tokens without `=` ignored, lines yielding no pairs
/// contribute no record. Lossy; callers re-apply any filter they rely on.
fn parse_print_output(output: &str) -> Vec<Record> {
    let mut records = Vec::new();
    for line in output.lines() {
        if !line.contains('=') {
            continue;
        }
        let mut record = Record::new();
        for token in line.split_whitespace() {
            if let Some((key, value)) = token.split_once('=') {
                record.insert(key.to_string(), value.to_string());
            }
        }
        if !record.is_empty() {
            records.push(record);
        }
    }
    records
}
