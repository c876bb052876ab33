use serde::{Deserialize, Serialize};

use crate::db::enums::TaskKind;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: i64,
    pub name: String,
    pub kind: TaskKind,
    pub schedule_expression: String,
    pub schedule_timezone: String,
    pub is_enabled: bool,
    pub payload: Option<serde_json::Value>,
    pub status: String,
    pub last_run_at: Option<chrono::DateTime<chrono::Utc>>,
    pub next_run_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}
