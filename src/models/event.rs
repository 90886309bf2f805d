use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::drone::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    GpsUpdate,
    StatusChange,
    DeliveryStart,
    DeliveryComplete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub event_type: EventType,
    pub position: Option<GeoPoint>,
    pub speed_kmh: Option<f64>,
    pub battery_pct: Option<f64>,
    pub ts: DateTime<Utc>,
}
