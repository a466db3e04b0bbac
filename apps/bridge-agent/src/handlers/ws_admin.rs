// [apps/bridge-agent/src/handlers/ws_admin.rs]
/*!
 * =================================================================
 * APARATO: WEBSOCKET ADMIN HANDLERS
 * CLASIFICACIÓN: API HANDLER (ESTRATO L4)
 * RESPONSABILIDAD: OPERACIONES ADMINISTRATIVAS DEL CANAL DE DIFUSIÓN
 * =================================================================
 */

use std::sync::atomic::Ordering;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api_error::{ApiError, ApiErrorCode, RequestContext};
use crate::state::AppState;
use turngate_domain_models::fault::FaultSeverity;

#[derive(Debug, Serialize)]
pub struct StreamStatusView {
    pub active_connections: usize,
    pub connection_cap: usize,
    pub bus_subscribers: usize,
    pub broadcast_enabled: bool,
}

pub async fn handle_ws_status(State(state): State<AppState>) -> Json<StreamStatusView> {
    let connection_cap = {
        let config_guard = state.config.read().expect("config lock poisoned");
        config_guard.server.websocket_max_connections
    };

    Json(StreamStatusView {
        active_connections: state.websocket_connection_count.load(Ordering::SeqCst),
        connection_cap,
        bus_subscribers: state.event_bus.subscriber_count(),
        broadcast_enabled: state.runtime_knobs.websocket_broadcast_enabled(),
    })
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequestBody {
    pub data: serde_json::Value,
    #[serde(default)]
    pub severity: Option<FaultSeverity>,
}

#[derive(Debug, Serialize)]
pub struct BroadcastReceipt {
    pub delivered_to: usize,
}

pub async fn handle_ws_broadcast(
    State(state): State<AppState>,
    context: RequestContext,
    payload: Result<Json<BroadcastRequestBody>, JsonRejection>,
) -> Result<Json<BroadcastReceipt>, ApiError> {
    let Json(body) = payload
        .map_err(|rejection| ApiError::new(context.clone(), ApiErrorCode::InvalidJson, rejection.to_string()))?;

    let subscriber_count = state.event_bus.subscriber_count();
    state
        .event_bus
        .publish_system(body.data, body.severity.unwrap_or(FaultSeverity::Info));

    info!(
        target: "audit",
        request_id = %context.request_identifier,
        subscribers = subscriber_count,
        "📢 [WS_ADMIN]: Operator broadcast dispatched."
    );

    Ok(Json(BroadcastReceipt {
        delivered_to: subscriber_count,
    }))
}
