use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DroneStatus {
    Idle,
    Assigned,
    EnRouteToStore,
    EnRouteToCustomer,
    Arriving,
    ReturnToBase,
    Maintenance,
    Offline,
}

impl DroneStatus {
    /// A drone in maintenance or offline never enters the assignment pool.
    pub fn is_out_of_service(self) -> bool {
        matches!(self, DroneStatus::Maintenance | DroneStatus::Offline)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Drone {
    pub id: Uuid,
    pub serial: String,
    pub model: Option<String>,
    pub status: DroneStatus,
    pub battery_pct: f64,
    pub home: GeoPoint,
    pub current_position: Option<GeoPoint>,
    pub last_assigned_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Drone {
    /// Launch point for a new route; drones without a position fix launch from home.
    pub fn position_or_home(&self) -> GeoPoint {
        self.current_position.unwrap_or(self.home)
    }
}
