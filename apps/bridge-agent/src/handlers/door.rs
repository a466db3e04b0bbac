// [apps/bridge-agent/src/handlers/door.rs]
/*!
 * =================================================================
 * APARATO: DOOR HANDLERS
 * CLASIFICACIÓN: API HANDLER (ESTRATO L4)
 * RESPONSABILIDAD: ACTUACIÓN ACOTADA Y ESTADO INFERIDO DE LA PUERTA
 *
 * `/door/unlock` exige duración en [1000, 30000] ms (por defecto la
 * de configuración); `/door/lock` es un acuse: el re-bloqueo real lo
 * gobiernan los temporizadores.
 * =================================================================
 */

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api_error::{ApiError, ApiErrorCode, RequestContext};
use crate::state::door_control::{DoorError, DoorStats, UnlockReceipt, UNLOCK_CEILING_MS, UNLOCK_FLOOR_MS};
use crate::state::AppState;
use turngate_domain_models::status::DoorState;

#[derive(Debug, Default, Deserialize)]
pub struct UnlockRequestBody {
    #[serde(default)]
    pub adapter: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

pub async fn handle_door_unlock(
    State(state): State<AppState>,
    context: RequestContext,
    payload: Result<Json<UnlockRequestBody>, JsonRejection>,
) -> Result<Json<UnlockReceipt>, ApiError> {
    let Json(body) = payload
        .map_err(|rejection| ApiError::new(context.clone(), ApiErrorCode::InvalidJson, rejection.to_string()))?;

    let default_duration = {
        let config_guard = state.config.read().expect("config lock poisoned");
        config_guard.door.default_unlock_ms
    };
    let requested_duration = body.duration_ms.unwrap_or(default_duration);

    if !(UNLOCK_FLOOR_MS..=UNLOCK_CEILING_MS).contains(&requested_duration) {
        return Err(ApiError::new(
            context,
            ApiErrorCode::ValidationError,
            format!("duration_ms must fall within [{UNLOCK_FLOOR_MS}, {UNLOCK_CEILING_MS}]"),
        ));
    }

    state
        .door_control
        .unlock(body.adapter.as_deref(), requested_duration)
        .await
        .map(Json)
        .map_err(|door_fault| match door_fault {
            DoorError::AdapterNotFound(name) => ApiError::new(
                context.clone(),
                ApiErrorCode::AdapterNotFound,
                format!("adapter '{name}' is not available"),
            ),
            DoorError::NoActiveAdapter => ApiError::new(
                context.clone(),
                ApiErrorCode::AdapterNotFound,
                "no active adapter can actuate the lock",
            ),
            DoorError::UnlockRejected(detail) => {
                ApiError::new(context.clone(), ApiErrorCode::UnlockFailed, detail.to_string())
            }
        })
}

#[derive(Debug, Serialize)]
pub struct LockAcknowledgement {
    pub acknowledged: bool,
    pub note: &'static str,
}

pub async fn handle_door_lock(context: RequestContext) -> Json<LockAcknowledgement> {
    // El bloqueo físico lo dispara el temporizador del adaptador; este
    // endpoint solo confirma la intención del operador.
    tracing::info!(
        target: "audit",
        request_id = %context.request_identifier,
        "🔒 [DOOR]: Lock acknowledgement recorded."
    );
    Json(LockAcknowledgement {
        acknowledged: true,
        note: "re-lock is timer-driven",
    })
}

#[derive(Debug, Serialize)]
pub struct DoorStatusView {
    pub state: DoorState,
    pub last_adapter: Option<String>,
    pub active_adapters: usize,
    #[serde(flatten)]
    pub stats: DoorStats,
}

pub async fn handle_door_status(State(state): State<AppState>) -> Json<DoorStatusView> {
    Json(DoorStatusView {
        state: state.door_control.door_state(),
        last_adapter: state.door_control.last_adapter(),
        active_adapters: state.adapter_registry.active_count(),
        stats: state.door_control.stats(),
    })
}
