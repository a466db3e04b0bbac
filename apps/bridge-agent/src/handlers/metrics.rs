// [apps/bridge-agent/src/handlers/metrics.rs]
/*!
 * =================================================================
 * APARATO: METRICS HANDLER
 * CLASIFICACIÓN: API HANDLER (ESTRATO L4)
 * RESPONSABILIDAD: CONTADORES DEL PIPELINE Y TELEMETRÍA DEL HOST
 *
 * Bajo nivel Lite (o degradación) el detalle se suprime y queda el
 * resumen mínimo de cola y enlace.
 * =================================================================
 */

use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::Json;

use crate::api_error::{ApiError, ApiErrorCode, RequestContext};
use crate::state::AppState;

pub async fn handle_metrics(
    State(state): State<AppState>,
    context: RequestContext,
) -> Result<Json<serde_json::Value>, ApiError> {
    let queue_stats = state.event_queue.stats().await.map_err(|stats_fault| {
        ApiError::new(context, ApiErrorCode::QueueManagerUnavailable, stats_fault.to_string())
    })?;

    let metrics = &state.pipeline_metrics;

    let mut view = serde_json::json!({
        "queue": queue_stats,
        "uplink": {
            "batches_delivered": metrics.batches_delivered.load(Ordering::Relaxed),
            "events_delivered": metrics.events_delivered.load(Ordering::Relaxed),
            "last_success_at": metrics.last_uplink_success_at(),
            "auth_failing": metrics.uplink_auth_failing(),
        },
        "tier": state.tier(),
    });

    // Detalle completo solo con la capacidad de métricas encendida.
    if state.runtime_knobs.metrics_enabled() {
        view["pipeline"] = serde_json::json!({
            "events_processed": metrics.events_processed.load(Ordering::Relaxed),
            "validation_rejected": metrics.validation_rejected.load(Ordering::Relaxed),
            "unmapped_users": metrics.unmapped_users.load(Ordering::Relaxed),
            "duplicates_dropped": metrics.duplicates_dropped.load(Ordering::Relaxed),
            "events_rejected_by_server": metrics.events_rejected_by_server.load(Ordering::Relaxed),
            "uplink_auth_failures": metrics.uplink_auth_failures.load(Ordering::Relaxed),
        });
        view["door"] = serde_json::to_value(state.door_control.stats()).unwrap_or_default();
        view["resources"] = serde_json::to_value(state.resources_snapshot()).unwrap_or_default();
        view["recovery"] = serde_json::to_value(state.recovery_engine.stats()).unwrap_or_default();
        view["websocket_connections"] = serde_json::json!(
            state.websocket_connection_count.load(Ordering::Relaxed)
        );
    }

    Ok(Json(view))
}
