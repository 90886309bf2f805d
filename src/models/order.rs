use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::drone::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    ReadyForDelivery,
    Assigned,
    Delivered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub pickup: Option<GeoPoint>,
    pub dropoff: Option<GeoPoint>,
    pub status: OrderStatus,
    pub delivery_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
