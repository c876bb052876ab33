use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::enums::ResultStatus;

/// Outcome of one task execution against one device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub result_id: Uuid,
    pub execution_id: Uuid,
    pub device_id: i64,
    pub status: ResultStatus,
    pub output: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}
