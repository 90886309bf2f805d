pub mod fleet;
pub mod simulator;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::drone::DroneStatus;
use crate::state::AppState;

/// Move a drone to a new status and broadcast the change. No-op when the
/// status is already current.
pub(crate) fn set_drone_status(
    state: &AppState,
    drone_id: Uuid,
    status: DroneStatus,
    ts: DateTime<Utc>,
) -> Result<(), AppError> {
    let from = {
        let mut drone = state
            .drones
            .get_mut(&drone_id)
            .ok_or_else(|| AppError::NotFound(format!("drone {} not found", drone_id)))?;

        let from = drone.status;
        if from == status {
            return Ok(());
        }

        drone.status = status;
        from
    };

    state
        .broadcaster
        .drone_status_change(drone_id, from, status, ts);

    Ok(())
}
