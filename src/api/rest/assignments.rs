use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::fleet;
use crate::error::AppError;
use crate::models::assignment::Assignment;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/assignments/auto", post(auto_assign))
        .route("/assignments/manual", post(manual_assign))
        .route("/assignments/active", get(list_active_assignments))
        .route("/assignments/:id/complete", post(complete_assignment))
        .route("/assignments/drone/:drone_id", get(drone_assignment))
}

#[derive(Deserialize)]
pub struct AutoAssignRequest {
    pub order_id: Uuid,
}

#[derive(Deserialize)]
pub struct ManualAssignRequest {
    pub order_id: Uuid,
    pub drone_id: Uuid,
    pub assigned_by: String,
}

async fn auto_assign(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AutoAssignRequest>,
) -> Result<Json<Assignment>, AppError> {
    let assignment = fleet::auto_assign(&state, payload.order_id)?;
    Ok(Json(assignment))
}

async fn manual_assign(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ManualAssignRequest>,
) -> Result<Json<Assignment>, AppError> {
    if payload.assigned_by.trim().is_empty() {
        return Err(AppError::Validation(
            "assigned_by cannot be empty".to_string(),
        ));
    }

    let assignment = fleet::manual_assign(
        &state,
        payload.order_id,
        payload.drone_id,
        payload.assigned_by.trim(),
    )?;
    Ok(Json(assignment))
}

async fn list_active_assignments(State(state): State<Arc<AppState>>) -> Json<Vec<Assignment>> {
    Json(state.active_assignments())
}

async fn complete_assignment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Assignment>, AppError> {
    let assignment = fleet::complete_assignment(&state, id)?;
    Ok(Json(assignment))
}

async fn drone_assignment(
    State(state): State<Arc<AppState>>,
    Path(drone_id): Path<Uuid>,
) -> Result<Json<Assignment>, AppError> {
    let assignment = fleet::current_assignment(&state, drone_id).ok_or_else(|| {
        AppError::NotFound(format!("no active assignment for drone {}", drone_id))
    })?;

    Ok(Json(assignment))
}
