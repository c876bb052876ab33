use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    CheckAvailability,
    RunScript,
    FirewallUpdate,
    CreateBackup,
    Reboot,
    ResetConfiguration,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::CheckAvailability => "check_availability",
            TaskKind::RunScript => "run_script",
            TaskKind::FirewallUpdate => "firewall_update",
            TaskKind::CreateBackup => "create_backup",
            TaskKind::Reboot => "reboot",
            TaskKind::ResetConfiguration => "reset_configuration",
        }
    }
}

impl FromStr for TaskKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "check_availability" => Ok(TaskKind::CheckAvailability),
            "run_script" => Ok(TaskKind::RunScript),
            "firewall_update" => Ok(TaskKind::FirewallUpdate),
            "create_backup" => Ok(TaskKind::CreateBackup),
            "reboot" => Ok(TaskKind::Reboot),
            "reset_configuration" => Ok(TaskKind::ResetConfiguration),
            _ => Err(()),
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Device,
    Group,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Device => write!(f, "device"),
            TargetKind::Group => write!(f, "group"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Pending => write!(f, "pending"),
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Success => write!(f, "success"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultStatus::Pending => write!(f, "pending"),
            ResultStatus::Running => write!(f, "running"),
            ResultStatus::Success => write!(f, "success"),
            ResultStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    Schedule,
    Manual,
}

impl fmt::Display for TriggeredBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggeredBy::Schedule => write!(f, "schedule"),
            TriggeredBy::Manual => write!(f, "manual"),
        }
    }
}

/// Logical firewall list, mapped onto the device's internal list names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirewallListKind {
    Whitelist,
    Blacklist,
}

impl FirewallListKind {
    /// Name of the address-list as it exists on the device.
    pub fn device_list_name(&self) -> &'static str {
        match self {
            FirewallListKind::Whitelist => "WhiteList",
            FirewallListKind::Blacklist => "BLAddress",
        }
    }
}

impl fmt::Display for FirewallListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirewallListKind::Whitelist => write!(f, "whitelist"),
            FirewallListKind::Blacklist => write!(f, "blacklist"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    Backup,
    Export,
}

impl BackupKind {
    pub fn file_extension(&self) -> &'static str {
        match self {
            BackupKind::Backup => "backup",
            BackupKind::Export => "rsc",
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupKind::Backup => write!(f, "backup"),
            BackupKind::Export => write!(f, "export"),
        }
    }
}
