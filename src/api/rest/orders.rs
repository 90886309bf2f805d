use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::drone::GeoPoint;
use crate::models::order::{Order, OrderStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub pickup: Option<GeoPoint>,
    pub dropoff: Option<GeoPoint>,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<Order>, AppError> {
    let order = Order {
        id: Uuid::new_v4(),
        pickup: payload.pickup,
        dropoff: payload.dropoff,
        status: OrderStatus::ReadyForDelivery,
        delivery_id: None,
        created_at: Utc::now(),
    };

    state.orders.insert(order.id, order.clone());
    Ok(Json(order))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .orders
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("order {} not found", id)))?;

    Ok(Json(order.value().clone()))
}
