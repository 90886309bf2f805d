use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::drone::{DroneStatus, GeoPoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
}

impl DeliveryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Completed | DeliveryStatus::Failed)
    }
}

/// Leg of the fixed four-waypoint route. Every delivery walks the same
/// sequence: launch point to store, store to customer, a dwell at the
/// customer, done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Segment {
    #[serde(rename = "W0_W1")]
    ToStore,
    #[serde(rename = "W1_W2")]
    ToCustomer,
    #[serde(rename = "DWELL")]
    Dwell,
    #[serde(rename = "DONE")]
    Done,
}

impl Segment {
    pub fn next(self) -> Option<Segment> {
        match self {
            Segment::ToStore => Some(Segment::ToCustomer),
            Segment::ToCustomer => Some(Segment::Dwell),
            Segment::Dwell => Some(Segment::Done),
            Segment::Done => None,
        }
    }

    /// Drone status reported while flying this leg. `Done` has no flying
    /// status; the drone returns to `Idle` through delivery completion.
    pub fn drone_status(self) -> Option<DroneStatus> {
        match self {
            Segment::ToStore => Some(DroneStatus::EnRouteToStore),
            Segment::ToCustomer => Some(DroneStatus::EnRouteToCustomer),
            Segment::Dwell => Some(DroneStatus::Arriving),
            Segment::Done => None,
        }
    }

    pub fn is_moving(self) -> bool {
        matches!(self, Segment::ToStore | Segment::ToCustomer)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Segment::ToStore => "W0_W1",
            Segment::ToCustomer => "W1_W2",
            Segment::Dwell => "DWELL",
            Segment::Done => "DONE",
        };
        f.write_str(tag)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    pub order_id: Uuid,
    pub drone_id: Uuid,
    pub status: DeliveryStatus,
    pub w0: GeoPoint,
    pub w1: GeoPoint,
    pub w2: GeoPoint,
    pub w3: GeoPoint,
    pub current_segment: Segment,
    pub segment_started_at: DateTime<Utc>,
    pub eta_seconds: i64,
    pub dwell_ticks_remaining: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    /// Start and end waypoints of the current segment. The dwell holds at
    /// the customer; a finished route parks at the drone's home.
    pub fn segment_endpoints(&self) -> (GeoPoint, GeoPoint) {
        match self.current_segment {
            Segment::ToStore => (self.w0, self.w1),
            Segment::ToCustomer => (self.w1, self.w2),
            Segment::Dwell => (self.w2, self.w2),
            Segment::Done => (self.w3, self.w3),
        }
    }
}
