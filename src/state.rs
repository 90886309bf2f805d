use dashmap::DashMap;
use uuid::Uuid;

use crate::config::Config;
use crate::engine::simulator::{DroneSimulator, SimTiming};
use crate::models::assignment::Assignment;
use crate::models::delivery::Delivery;
use crate::models::drone::Drone;
use crate::models::event::DeliveryEvent;
use crate::models::order::Order;
use crate::observability::metrics::Metrics;
use crate::tracking::TrackingBroadcaster;

pub struct AppState {
    pub drones: DashMap<Uuid, Drone>,
    pub orders: DashMap<Uuid, Order>,
    pub deliveries: DashMap<Uuid, Delivery>,
    pub assignments: DashMap<Uuid, Assignment>,
    pub delivery_events: DashMap<Uuid, Vec<DeliveryEvent>>,
    pub broadcaster: TrackingBroadcaster,
    pub simulator: DroneSimulator,
    pub timing: SimTiming,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        let metrics = Metrics::new();

        Self {
            drones: DashMap::new(),
            orders: DashMap::new(),
            deliveries: DashMap::new(),
            assignments: DashMap::new(),
            delivery_events: DashMap::new(),
            broadcaster: TrackingBroadcaster::new(config.event_buffer_size),
            simulator: DroneSimulator::new(metrics.clone()),
            timing: config.timing,
            metrics,
        }
    }

    pub fn active_assignment_for_drone(&self, drone_id: Uuid) -> Option<Assignment> {
        self.assignments
            .iter()
            .find(|entry| entry.value().drone_id == drone_id && entry.value().is_active())
            .map(|entry| entry.value().clone())
    }

    pub fn active_assignment_for_delivery(&self, delivery_id: Uuid) -> Option<Assignment> {
        self.assignments
            .iter()
            .find(|entry| entry.value().delivery_id == delivery_id && entry.value().is_active())
            .map(|entry| entry.value().clone())
    }

    pub fn active_assignments(&self) -> Vec<Assignment> {
        self.assignments
            .iter()
            .filter(|entry| entry.value().is_active())
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn append_event(&self, event: DeliveryEvent) {
        self.delivery_events
            .entry(event.delivery_id)
            .or_default()
            .push(event);
    }
}
