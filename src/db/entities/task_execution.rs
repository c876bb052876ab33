use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::enums::{ExecutionStatus, TriggeredBy};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub execution_id: Uuid,
    pub task_id: i64,
    pub status: ExecutionStatus,
    pub triggered_by: TriggeredBy,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}
