use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo;
use crate::models::assignment::{Assignment, AssignmentMode};
use crate::models::delivery::{Delivery, DeliveryStatus, Segment};
use crate::models::drone::{Drone, DroneStatus, GeoPoint};
use crate::models::order::{Order, OrderStatus};
use crate::state::AppState;

pub fn available_drones(state: &AppState) -> Vec<Drone> {
    state
        .drones
        .iter()
        .filter(|entry| entry.value().status == DroneStatus::Idle)
        .map(|entry| entry.value().clone())
        .collect()
}

/// Round-robin over the idle pool: the drone that has waited longest since
/// its last assignment wins. Never-assigned drones sort before everything
/// else, and ties break on the smaller id so the pick is deterministic.
pub fn select_drone(pool: &[Drone]) -> Option<&Drone> {
    pool.iter()
        .min_by_key(|drone| (drone.last_assigned_at, drone.id))
}

pub fn auto_assign(state: &AppState, order_id: Uuid) -> Result<Assignment, AppError> {
    let order = state
        .orders
        .get(&order_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("order {} not found", order_id)))?;

    let (pickup, dropoff) = match validated_route(&order) {
        Ok(route) => route,
        Err(err) => {
            record_assignment(state, "auto", "rejected");
            return Err(err);
        }
    };

    let pool = available_drones(state);
    let Some(drone) = select_drone(&pool).cloned() else {
        record_assignment(state, "auto", "no_capacity");
        warn!(order_id = %order.id, "no idle drones for auto assignment");
        return Err(AppError::NoIdleDrones);
    };

    let assignment = create_assignment(
        state,
        &order,
        &drone,
        pickup,
        dropoff,
        AssignmentMode::Auto,
        "system",
    )?;
    record_assignment(state, "auto", "assigned");

    Ok(assignment)
}

pub fn manual_assign(
    state: &AppState,
    order_id: Uuid,
    drone_id: Uuid,
    assigned_by: &str,
) -> Result<Assignment, AppError> {
    let order = state
        .orders
        .get(&order_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("order {} not found", order_id)))?;

    let (pickup, dropoff) = match validated_route(&order) {
        Ok(route) => route,
        Err(err) => {
            record_assignment(state, "manual", "rejected");
            return Err(err);
        }
    };

    let drone = state
        .drones
        .get(&drone_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("drone {} not found", drone_id)))?;

    if drone.status != DroneStatus::Idle {
        record_assignment(state, "manual", "rejected");
        return Err(AppError::InvalidState(format!(
            "drone {} is not idle",
            drone_id
        )));
    }

    let assignment = create_assignment(
        state,
        &order,
        &drone,
        pickup,
        dropoff,
        AssignmentMode::Manual,
        assigned_by,
    )?;
    record_assignment(state, "manual", "assigned");

    Ok(assignment)
}

pub fn complete_assignment(state: &AppState, assignment_id: Uuid) -> Result<Assignment, AppError> {
    let now = Utc::now();

    let completed = {
        let mut assignment = state
            .assignments
            .get_mut(&assignment_id)
            .ok_or_else(|| AppError::NotFound(format!("assignment {} not found", assignment_id)))?;

        if assignment.completed_at.is_some() {
            return Err(AppError::InvalidState(format!(
                "assignment {} already completed",
                assignment_id
            )));
        }

        assignment.completed_at = Some(now);
        assignment.clone()
    };

    if state.drones.contains_key(&completed.drone_id) {
        super::set_drone_status(state, completed.drone_id, DroneStatus::Idle, now)?;
    }

    info!(
        assignment_id = %assignment_id,
        drone_id = %completed.drone_id,
        "assignment completed"
    );

    Ok(completed)
}

pub fn current_assignment(state: &AppState, drone_id: Uuid) -> Option<Assignment> {
    state.active_assignment_for_drone(drone_id)
}

/// Orders only enter the fleet while ready for dispatch and locatable on
/// both ends of the route.
fn validated_route(order: &Order) -> Result<(GeoPoint, GeoPoint), AppError> {
    if order.status != OrderStatus::ReadyForDelivery {
        return Err(AppError::Validation(format!(
            "order {} is not ready for delivery",
            order.id
        )));
    }

    let pickup = order.pickup.ok_or_else(|| {
        AppError::Validation(format!("order {} has no pickup coordinates", order.id))
    })?;
    let dropoff = order.dropoff.ok_or_else(|| {
        AppError::Validation(format!("order {} has no dropoff coordinates", order.id))
    })?;

    Ok((pickup, dropoff))
}

fn create_assignment(
    state: &AppState,
    order: &Order,
    drone: &Drone,
    pickup: GeoPoint,
    dropoff: GeoPoint,
    mode: AssignmentMode,
    assigned_by: &str,
) -> Result<Assignment, AppError> {
    let now = Utc::now();

    // Claim the drone under its own entry lock; a concurrent assignment
    // that won the race leaves it non-idle and we bail out.
    {
        let mut tracked = state
            .drones
            .get_mut(&drone.id)
            .ok_or_else(|| AppError::NotFound(format!("drone {} not found", drone.id)))?;

        if tracked.status != DroneStatus::Idle {
            return Err(AppError::InvalidState(format!(
                "drone {} is no longer idle",
                drone.id
            )));
        }

        tracked.status = DroneStatus::Assigned;
        tracked.last_assigned_at = Some(now);
    }
    state
        .broadcaster
        .drone_status_change(drone.id, DroneStatus::Idle, DroneStatus::Assigned, now);

    let w0 = drone.position_or_home();
    let w3 = drone.home;

    // One delivery record per order: a re-dispatched order reuses its
    // record with a fresh route.
    let existing = order
        .delivery_id
        .filter(|id| state.deliveries.contains_key(id));

    let delivery_id = match existing {
        Some(id) => {
            if let Some(mut delivery) = state.deliveries.get_mut(&id) {
                delivery.drone_id = drone.id;
                delivery.status = DeliveryStatus::Assigned;
                delivery.w0 = w0;
                delivery.w1 = pickup;
                delivery.w2 = dropoff;
                delivery.w3 = w3;
                delivery.current_segment = Segment::ToStore;
                delivery.segment_started_at = now;
                delivery.eta_seconds = state.timing.initial_eta_secs();
                delivery.dwell_ticks_remaining = None;
                delivery.updated_at = now;
            }
            id
        }
        None => {
            let delivery = Delivery {
                id: Uuid::new_v4(),
                order_id: order.id,
                drone_id: drone.id,
                status: DeliveryStatus::Assigned,
                w0,
                w1: pickup,
                w2: dropoff,
                w3,
                current_segment: Segment::ToStore,
                segment_started_at: now,
                eta_seconds: state.timing.initial_eta_secs(),
                dwell_ticks_remaining: None,
                created_at: now,
                updated_at: now,
            };
            let id = delivery.id;
            state.deliveries.insert(id, delivery);
            id
        }
    };

    if let Some(mut tracked) = state.orders.get_mut(&order.id) {
        tracked.status = OrderStatus::Assigned;
        tracked.delivery_id = Some(delivery_id);
    }

    let assignment = Assignment {
        id: Uuid::new_v4(),
        order_id: order.id,
        drone_id: drone.id,
        delivery_id,
        mode,
        assigned_by: assigned_by.to_string(),
        assigned_at: now,
        completed_at: None,
    };
    state.assignments.insert(assignment.id, assignment.clone());

    let route_km = geo::haversine_km(&w0, &pickup) + geo::haversine_km(&pickup, &dropoff);
    info!(
        order_id = %order.id,
        drone_id = %drone.id,
        delivery_id = %delivery_id,
        mode = ?mode,
        route_km = route_km,
        est_flight_minutes = geo::eta_minutes(route_km, geo::DEFAULT_SPEED_KMH),
        "drone assigned"
    );

    Ok(assignment)
}

fn record_assignment(state: &AppState, mode: &str, outcome: &str) {
    state
        .metrics
        .assignments_total
        .with_label_values(&[mode, outcome])
        .inc();
}
