// [apps/bridge-agent/src/handlers/config.rs]
/*!
 * =================================================================
 * APARATO: CONFIG HANDLERS
 * CLASIFICACIÓN: API HANDLER (ESTRATO L4)
 * RESPONSABILIDAD: LECTURA REDACTADA, PARCHE PARCIAL Y RELECTURA
 *
 * La lectura siempre sale redactada. El parche reporta los campos
 * efectivamente cambiados y si exigen reinicio; los campos calientes
 * (cuota, CORS, puerta) se re-aplican de inmediato.
 * =================================================================
 */

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use tracing::info;

use crate::api_error::{ApiError, ApiErrorCode, RequestContext};
use crate::config::ConfigUpdateReceipt;
use crate::state::AppState;

pub async fn handle_config_read(State(state): State<AppState>) -> Json<serde_json::Value> {
    let redacted = state.config.read().expect("config lock poisoned").redacted_view();
    Json(redacted)
}

pub async fn handle_config_update(
    State(state): State<AppState>,
    context: RequestContext,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<ConfigUpdateReceipt>, ApiError> {
    let Json(patch) = payload
        .map_err(|rejection| ApiError::new(context.clone(), ApiErrorCode::InvalidJson, rejection.to_string()))?;

    let receipt = {
        let mut config_guard = state.config.write().expect("config lock poisoned");
        config_guard
            .apply_partial_update(&patch)
            .map_err(|update_fault| {
                ApiError::new(context.clone(), ApiErrorCode::ValidationError, update_fault.to_string())
            })?
    };

    info!(
        target: "audit",
        request_id = %context.request_identifier,
        changed = ?receipt.changed_fields,
        requires_restart = receipt.requires_restart,
        "🛠️  [CONFIG]: Partial update applied."
    );

    Ok(Json(receipt))
}

pub async fn handle_config_reload(
    State(state): State<AppState>,
    context: RequestContext,
) -> Result<Json<ConfigUpdateReceipt>, ApiError> {
    let Some(config_path) = state.config_file_path.clone() else {
        return Err(ApiError::new(
            context,
            ApiErrorCode::ConfigManagerUnavailable,
            "no configuration file bound to this run",
        ));
    };

    let receipt = {
        let mut config_guard = state.config.write().expect("config lock poisoned");
        config_guard.reload_from_file(&config_path).map_err(|reload_fault| {
            ApiError::new(context.clone(), ApiErrorCode::ValidationError, reload_fault.to_string())
        })?
    };

    info!(
        target: "audit",
        request_id = %context.request_identifier,
        changed = ?receipt.changed_fields,
        "🔄 [CONFIG]: File reload applied."
    );

    Ok(Json(receipt))
}
