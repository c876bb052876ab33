pub mod api;
pub mod client;
pub mod gate;
pub mod ssh;

pub use client::{DeviceClient, TransportConfig};
pub use gate::{ConnectionGate, ConnectionSlot};

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

/// One structured record from the device, as returned by the API channel or
/// reconstructed from shell output.
pub type Record = BTreeMap<String, String>;

/// Key/value parameters for `add`/`remove`, or a `print` filter.
pub type Params = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosAction {
    Print,
    Add,
    Remove,
}

impl fmt::Display for RosAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RosAction::Print => write!(f, "print"),
            RosAction::Add => write!(f, "add"),
            RosAction::Remove => write!(f, "remove"),
        }
    }
}

/// Failure of a single channel. Any of these coming out of the structured
/// channel makes the client fall back to the shell channel; request
/// validation happens before a channel is touched and never falls back.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel is not connected")]
    NotConnected,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ssh error: {0}")]
    Ssh(#[from] ssh2::Error),
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("device returned an error: {0}")]
    Trap(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("remote command failed: {0}")]
    CommandFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no structured or shell channel available to {host}")]
    NoChannel { host: String },
    #[error("shell channel to {host} is not available")]
    ShellUnavailable { host: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// The RPC-style channel exposing typed print/add/remove operations.
#[async_trait]
pub trait StructuredChannel: Send {
    async fn execute(
        &mut self,
        path: &str,
        action: RosAction,
        params: &Params,
        filter: &Params,
    ) -> Result<Vec<Record>, ChannelError>;

    async fn close(&mut self);
}

/// The interactive shell fallback, with its file-transfer sub-channel.
#[async_trait]
pub trait ShellChannel: Send {
    async fn run_command(&mut self, command: &str) -> Result<String, ChannelError>;

    async fn upload(&mut self, local: &Path, remote: &str) -> Result<(), ChannelError>;

    async fn download(&mut self, remote: &str, local: &Path) -> Result<(), ChannelError>;

    async fn close(&mut self);
}
