use serde::{Deserialize, Serialize};

use crate::db::enums::TargetKind;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub id: i64,
    pub task_id: i64,
    pub target_kind: TargetKind,
    pub device_id: Option<i64>,
    pub group_id: Option<i64>,
}
