use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;

use crate::engine::simulator::{self, ActiveSimulation, SimulationStatus};
use crate::error::AppError;
use crate::models::delivery::Delivery;
use crate::state::AppState;
use uuid::Uuid;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/simulation/delivery/:id/start", post(start_simulation))
        .route("/simulation/delivery/:id/stop", post(stop_simulation))
        .route(
            "/simulation/delivery/:id/complete",
            post(complete_delivery),
        )
        .route("/simulation/delivery/:id/status", get(simulation_status))
        .route("/simulation/active", get(list_active_simulations))
}

async fn start_simulation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SimulationStatus>, AppError> {
    state.simulator.start(&state, id)?;
    Ok(Json(simulator::simulation_status(&state, id)?))
}

async fn stop_simulation(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> StatusCode {
    state.simulator.stop(id);
    StatusCode::NO_CONTENT
}

async fn complete_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = simulator::complete_delivery(&state, id)?;
    Ok(Json(delivery))
}

async fn simulation_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SimulationStatus>, AppError> {
    Ok(Json(simulator::simulation_status(&state, id)?))
}

async fn list_active_simulations(
    State(state): State<Arc<AppState>>,
) -> Json<Vec<ActiveSimulation>> {
    Json(simulator::active_simulations(&state))
}
