use serde::{Deserialize, Serialize};

/// Connection parameters for one device, handed out by the external
/// credential store and dropped as soon as the transport client is torn down.
/// The core never persists these.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCredentials {
    pub device_id: i64,
    pub host: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    #[serde(default)]
    pub use_tls: bool,
}

fn default_api_port() -> u16 {
    8728
}

fn default_ssh_port() -> u16 {
    22
}
