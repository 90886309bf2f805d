use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::engine::simulator;
use crate::error::AppError;
use crate::models::delivery::{Delivery, DeliveryStatus, Segment};
use crate::models::drone::{DroneStatus, GeoPoint};
use crate::state::AppState;

/// Topic-tagged message fanned out to every websocket subscriber.
#[derive(Debug, Clone, Serialize)]
pub struct TrackingMessage {
    pub topic: String,
    pub payload: Value,
}

pub struct TrackingBroadcaster {
    tx: broadcast::Sender<TrackingMessage>,
}

impl TrackingBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _unused_rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackingMessage> {
        self.tx.subscribe()
    }

    /// Fan a message out to all subscribers. Lossy on purpose: with no
    /// live subscriber the message is dropped, never queued.
    pub fn publish(&self, topic: impl Into<String>, payload: Value) {
        let message = TrackingMessage {
            topic: topic.into(),
            payload,
        };

        if self.tx.send(message).is_err() {
            debug!("tracking message dropped: no subscribers");
        }
    }

    pub fn gps_update(
        &self,
        delivery: &Delivery,
        position: GeoPoint,
        eta_seconds: i64,
        battery_pct: f64,
        ts: DateTime<Utc>,
    ) {
        self.publish(
            format!("delivery/{}", delivery.order_id),
            json!({
                "event_type": "GPS_UPDATE",
                "delivery_id": delivery.id,
                "order_id": delivery.order_id,
                "drone_id": delivery.drone_id,
                "lat": position.lat,
                "lng": position.lng,
                "segment": delivery.current_segment,
                "eta_seconds": eta_seconds,
                "battery_pct": battery_pct,
                "ts": ts,
            }),
        );
    }

    pub fn state_change(&self, delivery: &Delivery, new_state: &str, ts: DateTime<Utc>) {
        self.publish(
            format!("delivery/{}", delivery.order_id),
            json!({
                "event_type": "STATE_CHANGE",
                "delivery_id": delivery.id,
                "order_id": delivery.order_id,
                "drone_id": delivery.drone_id,
                "new_state": new_state,
                "ts": ts,
            }),
        );
    }

    pub fn drone_status_change(
        &self,
        drone_id: Uuid,
        from: DroneStatus,
        to: DroneStatus,
        ts: DateTime<Utc>,
    ) {
        self.publish(
            "drone-status",
            json!({
                "drone_id": drone_id,
                "from": from,
                "to": to,
                "ts": ts,
            }),
        );
    }

    pub fn eta_update(&self, delivery_id: Uuid, order_id: Uuid, eta_seconds: i64, ts: DateTime<Utc>) {
        self.publish(
            "delivery-eta",
            json!({
                "delivery_id": delivery_id,
                "order_id": order_id,
                "eta_seconds": eta_seconds,
                "eta_minutes": (eta_seconds as f64 / 60.0).ceil(),
                "ts": ts,
            }),
        );
    }

    pub fn fleet_status(&self, positions: &[DronePosition], ts: DateTime<Utc>) {
        self.publish(
            "fleet-status",
            json!({
                "drones": positions,
                "count": positions.len(),
                "ts": ts,
            }),
        );
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DronePosition {
    pub drone_id: Uuid,
    pub serial: String,
    pub status: DroneStatus,
    pub battery_pct: f64,
    pub position: Option<GeoPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment: Option<Segment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<i64>,
}

/// Positions of every in-service drone, joined with the delivery it is
/// currently flying, if any.
pub fn fleet_positions(state: &AppState) -> Vec<DronePosition> {
    state
        .drones
        .iter()
        .filter(|entry| !entry.value().status.is_out_of_service())
        .map(|entry| {
            let drone = entry.value();
            let assignment = state.active_assignment_for_drone(drone.id);
            let delivery = assignment
                .as_ref()
                .and_then(|a| state.deliveries.get(&a.delivery_id))
                .map(|d| d.value().clone());

            DronePosition {
                drone_id: drone.id,
                serial: drone.serial.clone(),
                status: drone.status,
                battery_pct: drone.battery_pct,
                position: drone.current_position,
                delivery_id: delivery.as_ref().map(|d| d.id),
                order_id: delivery.as_ref().map(|d| d.order_id),
                segment: delivery.as_ref().map(|d| d.current_segment),
                eta_seconds: delivery.as_ref().map(|d| d.eta_seconds),
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryTracking {
    pub delivery_id: Uuid,
    pub order_id: Uuid,
    pub drone_id: Uuid,
    pub drone_serial: String,
    pub status: DeliveryStatus,
    pub segment: Segment,
    pub eta_seconds: i64,
    pub eta_minutes: f64,
    pub position: Option<GeoPoint>,
    pub battery_pct: f64,
    pub waypoints: [GeoPoint; 4],
}

/// Customer-facing snapshot of a single delivery. In-flight deliveries
/// report the interpolated live fix; everything else reports the last
/// persisted drone position.
pub fn delivery_tracking(state: &AppState, delivery_id: Uuid) -> Result<DeliveryTracking, AppError> {
    let delivery = state
        .deliveries
        .get(&delivery_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("delivery {} not found", delivery_id)))?;

    let drone = state
        .drones
        .get(&delivery.drone_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("drone {} not found", delivery.drone_id)))?;

    let (position, eta_seconds) =
        simulator::live_position_eta(&delivery, &drone, &state.timing, Utc::now());

    Ok(DeliveryTracking {
        delivery_id: delivery.id,
        order_id: delivery.order_id,
        drone_id: drone.id,
        drone_serial: drone.serial,
        status: delivery.status,
        segment: delivery.current_segment,
        eta_seconds,
        eta_minutes: (eta_seconds as f64 / 60.0).ceil(),
        position,
        battery_pct: drone.battery_pct,
        waypoints: [delivery.w0, delivery.w1, delivery.w2, delivery.w3],
    })
}
