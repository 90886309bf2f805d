use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentMode {
    Auto,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub drone_id: Uuid,
    pub delivery_id: Uuid,
    pub mode: AssignmentMode,
    pub assigned_by: String,
    pub assigned_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Assignment {
    /// An assignment stays active until its delivery reaches a terminal
    /// state; `completed_at` doubles as the active flag.
    pub fn is_active(&self) -> bool {
        self.completed_at.is_none()
    }
}
