// [apps/bridge-agent/src/handlers/status.rs]
/*!
 * =================================================================
 * APARATO: STATUS HANDLER
 * CLASIFICACIÓN: API HANDLER (ESTRATO L4)
 * RESPONSABILIDAD: FOTOGRAFÍA OPERATIVA DEL DISPOSITIVO
 * =================================================================
 */

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api_error::{ApiError, ApiErrorCode, RequestContext};
use crate::state::AppState;
use turngate_domain_models::status::DoorState;
use turngate_domain_models::tier::ResourceTier;

#[derive(Debug, Serialize)]
pub struct DeviceStatusView {
    pub device_id: String,
    pub paired: bool,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub started_at: String,
    pub tier: ResourceTier,
    pub door_state: DoorState,
    pub adapters_registered: usize,
    pub adapters_active: usize,
    pub queue_pending: u64,
    pub queue_capacity: u64,
    pub uplink_paused: bool,
}

pub async fn handle_status(
    State(state): State<AppState>,
    context: RequestContext,
) -> Result<Json<DeviceStatusView>, ApiError> {
    let queue_stats = state.event_queue.stats().await.map_err(|stats_fault| {
        ApiError::new(context, ApiErrorCode::QueueManagerUnavailable, stats_fault.to_string())
    })?;

    Ok(Json(DeviceStatusView {
        device_id: state.device_id(),
        paired: state.is_paired(),
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        started_at: state.started_at.to_rfc3339(),
        tier: state.tier(),
        door_state: state.door_control.door_state(),
        adapters_registered: state.adapter_registry.names().len(),
        adapters_active: state.adapter_registry.active_count(),
        queue_pending: queue_stats.pending,
        queue_capacity: state.runtime_knobs.queue_capacity(),
        uplink_paused: state.runtime_knobs.uplink_paused(),
    }))
}
