use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo;
use crate::models::delivery::{Delivery, DeliveryStatus, Segment};
use crate::models::drone::{Drone, DroneStatus, GeoPoint};
use crate::models::event::{DeliveryEvent, EventType};
use crate::models::order::OrderStatus;
use crate::observability::metrics::Metrics;
use crate::state::AppState;

/// Route timing shared by every simulated delivery. Leg durations are
/// fixed constants, not functions of distance.
#[derive(Debug, Clone, Copy)]
pub struct SimTiming {
    pub tick_secs: u64,
    pub leg_to_store_secs: u64,
    pub leg_to_customer_secs: u64,
    pub dwell_ticks: u32,
}

impl SimTiming {
    pub fn segment_duration_secs(&self, segment: Segment) -> u64 {
        match segment {
            Segment::ToStore => self.leg_to_store_secs,
            Segment::ToCustomer => self.leg_to_customer_secs,
            Segment::Dwell => self.dwell_secs(),
            Segment::Done => 0,
        }
    }

    pub fn dwell_secs(&self) -> u64 {
        u64::from(self.dwell_ticks) * self.tick_secs
    }

    /// Customer-facing ETA at dispatch: both flight legs plus the dwell.
    /// The return leg to base never counts against the delivery.
    pub fn initial_eta_secs(&self) -> i64 {
        (self.leg_to_store_secs + self.leg_to_customer_secs + self.dwell_secs()) as i64
    }
}

enum SimCommand {
    Stop,
}

struct SimulationHandle {
    commands: mpsc::Sender<SimCommand>,
    task: JoinHandle<()>,
    generation: u64,
}

/// Registry of per-delivery simulation tasks. Each running delivery owns
/// exactly one tokio task; restarting a delivery replaces its task.
pub struct DroneSimulator {
    simulations: DashMap<Uuid, SimulationHandle>,
    generation: AtomicU64,
    metrics: Metrics,
}

impl DroneSimulator {
    pub fn new(metrics: Metrics) -> Self {
        Self {
            simulations: DashMap::new(),
            generation: AtomicU64::new(0),
            metrics,
        }
    }

    /// Arm the delivery and schedule its tick task. Restarting an already
    /// running delivery cancels the old task first, so a double start
    /// never stacks timers.
    pub fn start(&self, state: &Arc<AppState>, delivery_id: Uuid) -> Result<(), AppError> {
        arm_delivery(state, delivery_id, Utc::now())?;

        self.stop(delivery_id);

        let (commands, command_rx) = mpsc::channel(4);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(run_simulation(
            state.clone(),
            delivery_id,
            generation,
            command_rx,
        ));

        self.simulations.insert(
            delivery_id,
            SimulationHandle {
                commands,
                task,
                generation,
            },
        );
        self.metrics
            .active_simulations
            .set(self.simulations.len() as i64);

        info!(delivery_id = %delivery_id, "simulation started");
        Ok(())
    }

    /// Cancel the delivery's tick task if one is registered. A tick in
    /// flight finishes first; the task exits before the next one. Unknown
    /// deliveries are a no-op.
    pub fn stop(&self, delivery_id: Uuid) {
        if let Some((_, handle)) = self.simulations.remove(&delivery_id) {
            let _ = handle.commands.try_send(SimCommand::Stop);
            self.metrics
                .active_simulations
                .set(self.simulations.len() as i64);
            info!(delivery_id = %delivery_id, "simulation stopped");
        }
    }

    pub fn is_running(&self, delivery_id: Uuid) -> bool {
        self.simulations
            .get(&delivery_id)
            .map(|handle| !handle.task.is_finished())
            .unwrap_or(false)
    }

    pub fn running_ids(&self) -> Vec<Uuid> {
        self.simulations
            .iter()
            .filter(|entry| !entry.value().task.is_finished())
            .map(|entry| *entry.key())
            .collect()
    }

    /// Drain the registry on server shutdown.
    pub fn shutdown(&self) {
        let ids: Vec<Uuid> = self.simulations.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.stop(id);
        }
    }

    /// Tasks remove themselves when their loop ends, but only their own
    /// registration; a restart may already own the slot.
    fn deregister(&self, delivery_id: Uuid, generation: u64) {
        self.simulations
            .remove_if(&delivery_id, |_, handle| handle.generation == generation);
        self.metrics
            .active_simulations
            .set(self.simulations.len() as i64);
    }
}

async fn run_simulation(
    state: Arc<AppState>,
    delivery_id: Uuid,
    generation: u64,
    mut commands: mpsc::Receiver<SimCommand>,
) {
    let mut ticker = interval(Duration::from_secs(state.timing.tick_secs.max(1)));
    // A late tick postpones the next one instead of bursting to catch up.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                // Stop command, or all senders dropped.
                let _ = cmd;
                break;
            }
            _ = ticker.tick() => {
                match tick_at(&state, delivery_id, Utc::now()) {
                    Ok(TickOutcome::Completed) => break,
                    Ok(TickOutcome::Inactive) => {
                        info!(delivery_id = %delivery_id, "delivery no longer in progress; halting simulation");
                        break;
                    }
                    Ok(_) => {
                        state
                            .metrics
                            .simulation_ticks_total
                            .with_label_values(&["ok"])
                            .inc();
                    }
                    Err(AppError::NotFound(msg)) => {
                        warn!(delivery_id = %delivery_id, "{msg}; halting simulation");
                        break;
                    }
                    Err(err) => {
                        state
                            .metrics
                            .simulation_ticks_total
                            .with_label_values(&["error"])
                            .inc();
                        error!(delivery_id = %delivery_id, error = %err, "simulation tick failed");
                    }
                }
            }
        }
    }

    state.simulator.deregister(delivery_id, generation);
}

/// Transition a delivery into flight. An assigned delivery starts its
/// first leg; an in-progress one resumes where its segment clock left
/// off; terminal and pending deliveries refuse to start.
pub fn arm_delivery(state: &AppState, delivery_id: Uuid, now: DateTime<Utc>) -> Result<(), AppError> {
    let delivery = state
        .deliveries
        .get(&delivery_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("delivery {} not found", delivery_id)))?;

    match delivery.status {
        DeliveryStatus::Assigned => {
            {
                let mut tracked = state
                    .deliveries
                    .get_mut(&delivery_id)
                    .ok_or_else(|| AppError::NotFound(format!("delivery {} not found", delivery_id)))?;
                tracked.status = DeliveryStatus::InProgress;
                tracked.current_segment = Segment::ToStore;
                tracked.segment_started_at = now;
                tracked.updated_at = now;
            }

            super::set_drone_status(state, delivery.drone_id, DroneStatus::EnRouteToStore, now)?;

            state.append_event(DeliveryEvent {
                id: Uuid::new_v4(),
                delivery_id,
                event_type: EventType::DeliveryStart,
                position: Some(delivery.w0),
                speed_kmh: None,
                battery_pct: None,
                ts: now,
            });

            let mut started = delivery;
            started.status = DeliveryStatus::InProgress;
            started.current_segment = Segment::ToStore;
            state.broadcaster.state_change(&started, "IN_PROGRESS", now);

            info!(delivery_id = %delivery_id, "delivery armed");
            Ok(())
        }
        DeliveryStatus::InProgress => Ok(()),
        other => Err(AppError::InvalidState(format!(
            "delivery {} cannot start from {:?}",
            delivery_id, other
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Position and ETA refreshed, same segment.
    Progressed,
    /// The delivery crossed into the given segment.
    Advanced(Segment),
    /// The route is exhausted and the delivery is complete.
    Completed,
    /// The delivery is not in progress; nothing to tick.
    Inactive,
}

/// One simulation step, evaluated against an explicit clock: refresh the
/// drone fix and ETA, persist and publish them, then advance the segment
/// if its time is up.
pub fn tick_at(
    state: &AppState,
    delivery_id: Uuid,
    now: DateTime<Utc>,
) -> Result<TickOutcome, AppError> {
    let delivery = state
        .deliveries
        .get(&delivery_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("delivery {} not found", delivery_id)))?;

    if delivery.status != DeliveryStatus::InProgress {
        return Ok(TickOutcome::Inactive);
    }

    let position = current_position(&delivery, &state.timing, now);
    let eta_seconds = remaining_eta_secs(&delivery, &state.timing, now);
    let eta_changed = delivery.eta_seconds != eta_seconds;

    let battery_pct = {
        let mut drone = state
            .drones
            .get_mut(&delivery.drone_id)
            .ok_or_else(|| AppError::NotFound(format!("drone {} not found", delivery.drone_id)))?;
        drone.current_position = Some(position);
        drone.last_seen_at = Some(now);
        drone.battery_pct
    };

    if let Some(mut tracked) = state.deliveries.get_mut(&delivery_id) {
        tracked.eta_seconds = eta_seconds;
        tracked.updated_at = now;
    }

    state.append_event(DeliveryEvent {
        id: Uuid::new_v4(),
        delivery_id,
        event_type: EventType::GpsUpdate,
        position: Some(position),
        speed_kmh: effective_speed_kmh(&delivery, &state.timing),
        battery_pct: Some(battery_pct),
        ts: now,
    });

    state
        .broadcaster
        .gps_update(&delivery, position, eta_seconds, battery_pct, now);
    if eta_changed {
        state
            .broadcaster
            .eta_update(delivery.id, delivery.order_id, eta_seconds, now);
    }

    let should_advance = match delivery.current_segment {
        Segment::ToStore | Segment::ToCustomer => {
            elapsed_secs(&delivery, now)
                >= state.timing.segment_duration_secs(delivery.current_segment) as i64
        }
        Segment::Dwell => {
            // The countdown persists on the record, so a stopped and
            // resumed dwell picks up where it left off.
            let mut tracked = state
                .deliveries
                .get_mut(&delivery_id)
                .ok_or_else(|| AppError::NotFound(format!("delivery {} not found", delivery_id)))?;
            let remaining = tracked.dwell_ticks_remaining.unwrap_or(0);
            if remaining > 0 {
                tracked.dwell_ticks_remaining = Some(remaining - 1);
                tracked.updated_at = now;
                remaining <= 1
            } else {
                true
            }
        }
        Segment::Done => false,
    };

    if !should_advance {
        return Ok(TickOutcome::Progressed);
    }

    match delivery.current_segment.next() {
        Some(Segment::Done) | None => {
            finalize_delivery(state, delivery_id, now)?;
            Ok(TickOutcome::Completed)
        }
        Some(next) => {
            enter_segment(state, &delivery, next, now)?;
            Ok(TickOutcome::Advanced(next))
        }
    }
}

fn enter_segment(
    state: &AppState,
    delivery: &Delivery,
    next: Segment,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    if let Some(status) = next.drone_status() {
        super::set_drone_status(state, delivery.drone_id, status, now)?;
    }

    {
        let mut tracked = state
            .deliveries
            .get_mut(&delivery.id)
            .ok_or_else(|| AppError::NotFound(format!("delivery {} not found", delivery.id)))?;
        tracked.current_segment = next;
        tracked.segment_started_at = now;
        tracked.updated_at = now;
        if next == Segment::Dwell {
            tracked.dwell_ticks_remaining = Some(state.timing.dwell_ticks);
        }
    }

    let reached = match next {
        Segment::ToStore => delivery.w0,
        Segment::ToCustomer => delivery.w1,
        Segment::Dwell => delivery.w2,
        Segment::Done => delivery.w3,
    };
    state.append_event(DeliveryEvent {
        id: Uuid::new_v4(),
        delivery_id: delivery.id,
        event_type: EventType::StatusChange,
        position: Some(reached),
        speed_kmh: None,
        battery_pct: None,
        ts: now,
    });

    let mut advanced = delivery.clone();
    advanced.current_segment = next;
    state
        .broadcaster
        .state_change(&advanced, &next.to_string(), now);

    info!(delivery_id = %delivery.id, segment = %next, "delivery advanced");
    Ok(())
}

/// Terminal bookkeeping for a finished delivery, shared by the tick path
/// and the operator complete endpoint. Idempotent: a delivery already in
/// a terminal state is left untouched.
pub(crate) fn finalize_delivery(
    state: &AppState,
    delivery_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let delivery = state
        .deliveries
        .get(&delivery_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("delivery {} not found", delivery_id)))?;

    if delivery.status.is_terminal() {
        return Ok(());
    }

    {
        let mut tracked = state
            .deliveries
            .get_mut(&delivery_id)
            .ok_or_else(|| AppError::NotFound(format!("delivery {} not found", delivery_id)))?;
        tracked.status = DeliveryStatus::Completed;
        tracked.current_segment = Segment::Done;
        tracked.eta_seconds = 0;
        tracked.dwell_ticks_remaining = None;
        tracked.updated_at = now;
    }

    if let Some(mut order) = state.orders.get_mut(&delivery.order_id) {
        order.status = OrderStatus::Delivered;
    }

    if let Some(assignment) = state.active_assignment_for_delivery(delivery_id) {
        if let Some(mut tracked) = state.assignments.get_mut(&assignment.id) {
            tracked.completed_at = Some(now);
        }
    }

    // The drone always comes home: park it at W3 and free it up.
    let from = {
        let mut drone = state
            .drones
            .get_mut(&delivery.drone_id)
            .ok_or_else(|| AppError::NotFound(format!("drone {} not found", delivery.drone_id)))?;
        let from = drone.status;
        drone.status = DroneStatus::Idle;
        drone.current_position = Some(delivery.w3);
        drone.last_seen_at = Some(now);
        from
    };
    if from != DroneStatus::Idle {
        state
            .broadcaster
            .drone_status_change(delivery.drone_id, from, DroneStatus::Idle, now);
    }

    state.append_event(DeliveryEvent {
        id: Uuid::new_v4(),
        delivery_id,
        event_type: EventType::DeliveryComplete,
        position: Some(delivery.w2),
        speed_kmh: None,
        battery_pct: None,
        ts: now,
    });

    state.simulator.stop(delivery_id);

    let mut done = delivery;
    done.status = DeliveryStatus::Completed;
    done.current_segment = Segment::Done;
    state.broadcaster.state_change(&done, "COMPLETED", now);

    state.metrics.deliveries_completed_total.inc();
    info!(delivery_id = %delivery_id, "delivery completed");

    Ok(())
}

/// Operator shortcut: finish a delivery immediately from any non-terminal
/// state, stopping its simulation.
pub fn complete_delivery(state: &AppState, delivery_id: Uuid) -> Result<Delivery, AppError> {
    let delivery = state
        .deliveries
        .get(&delivery_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("delivery {} not found", delivery_id)))?;

    if delivery.status.is_terminal() {
        return Err(AppError::InvalidState(format!(
            "delivery {} already finished",
            delivery_id
        )));
    }

    finalize_delivery(state, delivery_id, Utc::now())?;

    state
        .deliveries
        .get(&delivery_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("delivery {} not found", delivery_id)))
}

fn elapsed_secs(delivery: &Delivery, now: DateTime<Utc>) -> i64 {
    (now - delivery.segment_started_at).num_seconds().max(0)
}

/// Linear interpolation along the current segment. The fraction clamps to
/// [0, 1], so the fix sits exactly on the start waypoint at launch and
/// exactly on the end waypoint once the leg time has elapsed.
pub fn current_position(delivery: &Delivery, timing: &SimTiming, now: DateTime<Utc>) -> GeoPoint {
    let (start, end) = delivery.segment_endpoints();
    let duration = timing.segment_duration_secs(delivery.current_segment);

    let u = if duration == 0 {
        1.0
    } else {
        (elapsed_secs(delivery, now) as f64 / duration as f64).clamp(0.0, 1.0)
    };

    GeoPoint {
        lat: (1.0 - u) * start.lat + u * end.lat,
        lng: (1.0 - u) * start.lng + u * end.lng,
    }
}

/// Seconds until completion as of `now`: the rest of the current leg plus
/// every leg still ahead, dwell included, return leg excluded.
pub fn remaining_eta_secs(delivery: &Delivery, timing: &SimTiming, now: DateTime<Utc>) -> i64 {
    let remaining_in_segment = (timing.segment_duration_secs(delivery.current_segment) as i64
        - elapsed_secs(delivery, now))
    .max(0);

    match delivery.current_segment {
        Segment::ToStore => {
            remaining_in_segment + (timing.leg_to_customer_secs + timing.dwell_secs()) as i64
        }
        Segment::ToCustomer => remaining_in_segment + timing.dwell_secs() as i64,
        Segment::Dwell => {
            i64::from(delivery.dwell_ticks_remaining.unwrap_or(0)) * timing.tick_secs as i64
        }
        Segment::Done => 0,
    }
}

/// Position and ETA as of `now`: interpolated live while in flight,
/// otherwise the persisted values.
pub fn live_position_eta(
    delivery: &Delivery,
    drone: &Drone,
    timing: &SimTiming,
    now: DateTime<Utc>,
) -> (Option<GeoPoint>, i64) {
    if delivery.status == DeliveryStatus::InProgress {
        (
            Some(current_position(delivery, timing, now)),
            remaining_eta_secs(delivery, timing, now),
        )
    } else {
        (drone.current_position, delivery.eta_seconds)
    }
}

/// Effective ground speed over the current leg, for telemetry. Dwell and
/// finished routes report none.
fn effective_speed_kmh(delivery: &Delivery, timing: &SimTiming) -> Option<f64> {
    if !delivery.current_segment.is_moving() {
        return None;
    }

    let duration = timing.segment_duration_secs(delivery.current_segment);
    if duration == 0 {
        return None;
    }

    let (start, end) = delivery.segment_endpoints();
    Some(geo::haversine_km(&start, &end) / (duration as f64 / 3600.0))
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationStatus {
    pub delivery_id: Uuid,
    pub order_id: Uuid,
    pub running: bool,
    pub delivery_status: DeliveryStatus,
    pub current_segment: Segment,
    pub eta_seconds: i64,
    pub drone_id: Uuid,
    pub drone_serial: String,
    pub drone_status: DroneStatus,
    pub drone_position: Option<GeoPoint>,
    pub battery_pct: f64,
}

pub fn simulation_status(state: &AppState, delivery_id: Uuid) -> Result<SimulationStatus, AppError> {
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

    let (drone_position, eta_seconds) =
        live_position_eta(&delivery, &drone, &state.timing, Utc::now());

    Ok(SimulationStatus {
        delivery_id: delivery.id,
        order_id: delivery.order_id,
        running: state.simulator.is_running(delivery_id),
        delivery_status: delivery.status,
        current_segment: delivery.current_segment,
        eta_seconds,
        drone_id: drone.id,
        drone_serial: drone.serial,
        drone_status: drone.status,
        drone_position,
        battery_pct: drone.battery_pct,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveSimulation {
    pub delivery_id: Uuid,
    pub order_id: Uuid,
    pub drone_id: Uuid,
    pub current_segment: Segment,
    pub eta_seconds: i64,
}

pub fn active_simulations(state: &AppState) -> Vec<ActiveSimulation> {
    state
        .simulator
        .running_ids()
        .into_iter()
        .filter_map(|id| {
            state
                .deliveries
                .get(&id)
                .map(|entry| entry.value().clone())
        })
        .filter(|delivery| delivery.status == DeliveryStatus::InProgress)
        .map(|delivery| ActiveSimulation {
            delivery_id: delivery.id,
            order_id: delivery.order_id,
            drone_id: delivery.drone_id,
            current_segment: delivery.current_segment,
            eta_seconds: delivery.eta_seconds,
        })
        .collect()
}
