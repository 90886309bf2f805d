use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::delivery::Delivery;
use crate::models::event::DeliveryEvent;
use crate::state::AppState;
use crate::tracking::{self, DeliveryTracking, DronePosition};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tracking/positions", get(fleet_positions))
        .route("/tracking/delivery/:id", get(delivery_tracking))
        .route("/tracking/broadcast-fleet", post(broadcast_fleet))
        .route("/deliveries/:id", get(get_delivery))
        .route("/deliveries/:id/events", get(delivery_events))
}

async fn fleet_positions(State(state): State<Arc<AppState>>) -> Json<Vec<DronePosition>> {
    Json(tracking::fleet_positions(&state))
}

async fn delivery_tracking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryTracking>, AppError> {
    Ok(Json(tracking::delivery_tracking(&state, id)?))
}

/// Push a one-off fleet snapshot to every websocket subscriber; returns
/// the snapshot that was published.
async fn broadcast_fleet(State(state): State<Arc<AppState>>) -> Json<Vec<DronePosition>> {
    let positions = tracking::fleet_positions(&state);
    state.broadcaster.fleet_status(&positions, Utc::now());
    Json(positions)
}

async fn get_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = state
        .deliveries
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("delivery {} not found", id)))?;

    Ok(Json(delivery.value().clone()))
}

async fn delivery_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<DeliveryEvent>>, AppError> {
    if !state.deliveries.contains_key(&id) {
        return Err(AppError::NotFound(format!("delivery {} not found", id)));
    }

    let events = state
        .delivery_events
        .get(&id)
        .map(|entry| entry.value().clone())
        .unwrap_or_default();

    Ok(Json(events))
}
