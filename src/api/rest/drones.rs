use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::fleet;
use crate::error::AppError;
use crate::models::assignment::Assignment;
use crate::models::drone::{Drone, DroneStatus, GeoPoint};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drones", post(register_drone).get(list_drones))
        .route("/drones/available", get(list_available_drones))
        .route("/drones/:id", get(get_drone))
        .route("/drones/:id/status", patch(update_drone_status))
}

#[derive(Deserialize)]
pub struct RegisterDroneRequest {
    pub serial: String,
    pub model: Option<String>,
    pub home: GeoPoint,
    pub battery_pct: Option<f64>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: DroneStatus,
}

#[derive(Deserialize)]
pub struct ListDronesQuery {
    pub status: Option<DroneStatus>,
}

#[derive(Serialize)]
pub struct DroneDetailResponse {
    #[serde(flatten)]
    pub drone: Drone,
    pub current_assignment: Option<Assignment>,
}

async fn register_drone(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterDroneRequest>,
) -> Result<Json<Drone>, AppError> {
    let serial = payload.serial.trim().to_string();
    if serial.is_empty() {
        return Err(AppError::Validation("serial cannot be empty".to_string()));
    }

    let duplicate = state
        .drones
        .iter()
        .any(|entry| entry.value().serial == serial);
    if duplicate {
        return Err(AppError::InvalidState(format!(
            "serial {} already registered",
            serial
        )));
    }

    let drone = Drone {
        id: Uuid::new_v4(),
        serial,
        model: payload.model,
        status: DroneStatus::Idle,
        battery_pct: payload.battery_pct.unwrap_or(100.0).clamp(0.0, 100.0),
        home: payload.home,
        current_position: Some(payload.home),
        last_assigned_at: None,
        last_seen_at: None,
        created_at: Utc::now(),
    };

    state.drones.insert(drone.id, drone.clone());
    Ok(Json(drone))
}

async fn list_drones(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListDronesQuery>,
) -> Json<Vec<Drone>> {
    let drones = state
        .drones
        .iter()
        .filter(|entry| match query.status {
            Some(status) => entry.value().status == status,
            None => true,
        })
        .map(|entry| entry.value().clone())
        .collect();

    Json(drones)
}

async fn list_available_drones(State(state): State<Arc<AppState>>) -> Json<Vec<Drone>> {
    Json(fleet::available_drones(&state))
}

async fn get_drone(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DroneDetailResponse>, AppError> {
    let drone = state
        .drones
        .get(&id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("drone {} not found", id)))?;

    Ok(Json(DroneDetailResponse {
        current_assignment: fleet::current_assignment(&state, drone.id),
        drone,
    }))
}

async fn update_drone_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Drone>, AppError> {
    if !state.drones.contains_key(&id) {
        return Err(AppError::NotFound(format!("drone {} not found", id)));
    }

    // Never pull a drone out of service mid-delivery.
    if payload.status.is_out_of_service() {
        if let Some(assignment) = state.active_assignment_for_drone(id) {
            return Err(AppError::InvalidState(format!(
                "drone {} has active assignment {}",
                id, assignment.id
            )));
        }
    }

    crate::engine::set_drone_status(&state, id, payload.status, Utc::now())?;

    let drone = state
        .drones
        .get(&id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("drone {} not found", id)))?;

    Ok(Json(drone))
}
