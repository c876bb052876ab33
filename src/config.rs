use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::transport::TransportConfig;

#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_scheduler_interval_secs")]
    pub scheduler_interval_secs: u64,

    #[serde(default = "default_lookahead_minutes")]
    pub scheduler_lookahead_minutes: u32,

    #[serde(default = "default_max_parallel_connections")]
    pub max_parallel_connections: usize,

    #[serde(default = "default_api_timeout_secs")]
    pub api_timeout_secs: u64,

    #[serde(default = "default_shell_timeout_secs")]
    pub shell_timeout_secs: u64,

    #[serde(default = "default_backup_storage_root")]
    pub backup_storage_root: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    pub inventory_file: Option<String>,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialServerConfig {
    scheduler_interval_secs: Option<u64>,
    scheduler_lookahead_minutes: Option<u32>,
    max_parallel_connections: Option<usize>,
    api_timeout_secs: Option<u64>,
    shell_timeout_secs: Option<u64>,
    backup_storage_root: Option<String>,
    log_dir: Option<String>,
    inventory_file: Option<String>,
}

fn default_scheduler_interval_secs() -> u64 {
    60
}

fn default_lookahead_minutes() -> u32 {
    crate::cron::DEFAULT_LOOKAHEAD_MINUTES
}

fn default_max_parallel_connections() -> usize {
    crate::transport::gate::DEFAULT_MAX_PARALLEL_CONNECTIONS
}

fn default_api_timeout_secs() -> u64 {
    5
}

fn default_shell_timeout_secs() -> u64 {
    10
}

fn default_backup_storage_root() -> String {
    "storage/backups".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl ServerConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, String> {
        dotenv::dotenv().ok();

        // 1. Load from file (optional)
        let file_config: PartialServerConfig = if let Some(path_str) = config_path {
            let path = Path::new(path_str);
            if path.exists() {
                let contents = fs::read_to_string(path)
                    .map_err(|e| format!("Failed to read config file at {path:?}: {e}"))?;
                toml::from_str(&contents)
                    .map_err(|e| format!("Failed to parse TOML from config file at {path:?}: {e}"))?
            } else {
                PartialServerConfig::default()
            }
        } else {
            PartialServerConfig::default()
        };

        // 2. Load from environment variables
        let env_config: PartialServerConfig = envy::from_env::<PartialServerConfig>()
            .map_err(|e| format!("Failed to load config from environment: {e}"))?;

        // 3. Merge: environment overrides file
        let final_config = ServerConfig {
            scheduler_interval_secs: env_config
                .scheduler_interval_secs
                .or(file_config.scheduler_interval_secs)
                .unwrap_or_else(default_scheduler_interval_secs),
            scheduler_lookahead_minutes: env_config
                .scheduler_lookahead_minutes
                .or(file_config.scheduler_lookahead_minutes)
                .unwrap_or_else(default_lookahead_minutes),
            max_parallel_connections: env_config
                .max_parallel_connections
                .or(file_config.max_parallel_connections)
                .unwrap_or_else(default_max_parallel_connections),
            api_timeout_secs: env_config
                .api_timeout_secs
                .or(file_config.api_timeout_secs)
                .unwrap_or_else(default_api_timeout_secs),
            shell_timeout_secs: env_config
                .shell_timeout_secs
                .or(file_config.shell_timeout_secs)
                .unwrap_or_else(default_shell_timeout_secs),
            backup_storage_root: env_config
                .backup_storage_root
                .or(file_config.backup_storage_root)
                .unwrap_or_else(default_backup_storage_root),
            log_dir: env_config
                .log_dir
                .or(file_config.log_dir)
                .unwrap_or_else(default_log_dir),
            inventory_file: env_config.inventory_file.or(file_config.inventory_file),
        };

        if final_config.max_parallel_connections == 0 {
            return Err("MAX_PARALLEL_CONNECTIONS must be at least 1".to_string());
        }

        Ok(final_config)
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_secs)
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            api_timeout: Duration::from_secs(self.api_timeout_secs),
            shell_timeout: Duration::from_secs(self.shell_timeout_secs),
        }
    }
}
