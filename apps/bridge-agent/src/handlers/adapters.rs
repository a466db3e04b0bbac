// [apps/bridge-agent/src/handlers/adapters.rs]
/*!
 * =================================================================
 * APARATO: ADAPTERS HANDLERS
 * CLASIFICACIÓN: API HANDLER (ESTRATO L4)
 * RESPONSABILIDAD: INTROSPECCIÓN Y CICLO DE VIDA DE ADAPTADORES
 * =================================================================
 */

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use tracing::info;

use crate::api_error::{ApiError, ApiErrorCode, RequestContext};
use crate::state::AppState;
use turngate_domain_models::status::AdapterStatusReport;

pub async fn handle_adapters_list(State(state): State<AppState>) -> Json<Vec<AdapterStatusReport>> {
    Json(state.adapter_registry.status_reports())
}

pub async fn handle_adapter_detail(
    State(state): State<AppState>,
    context: RequestContext,
    Path(adapter_name): Path<String>,
) -> Result<Json<AdapterStatusReport>, ApiError> {
    state
        .adapter_registry
        .get(&adapter_name)
        .map(|adapter| Json(adapter.status()))
        .ok_or_else(|| adapter_not_found(context, &adapter_name))
}

pub async fn handle_adapter_enable(
    State(state): State<AppState>,
    context: RequestContext,
    Path(adapter_name): Path<String>,
) -> Result<Json<AdapterStatusReport>, ApiError> {
    state
        .adapter_registry
        .enable(&adapter_name)
        .await
        .map_err(|enable_fault| {
            if state.adapter_registry.get(&adapter_name).is_none() {
                adapter_not_found(context.clone(), &adapter_name)
            } else {
                ApiError::new(context.clone(), ApiErrorCode::InternalError, enable_fault.to_string())
            }
        })?;

    info!(target: "audit", adapter = %adapter_name, "✅ [ADAPTERS]: Enabled by operator.");
    detail_after_mutation(&state, context, &adapter_name)
}

pub async fn handle_adapter_disable(
    State(state): State<AppState>,
    context: RequestContext,
    Path(adapter_name): Path<String>,
) -> Result<Json<AdapterStatusReport>, ApiError> {
    state
        .adapter_registry
        .disable(&adapter_name)
        .await
        .map_err(|_| adapter_not_found(context.clone(), &adapter_name))?;

    info!(target: "audit", adapter = %adapter_name, "⛔ [ADAPTERS]: Disabled by operator.");
    detail_after_mutation(&state, context, &adapter_name)
}

pub async fn handle_adapter_config_update(
    State(state): State<AppState>,
    context: RequestContext,
    Path(adapter_name): Path<String>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<AdapterStatusReport>, ApiError> {
    let Json(options) = payload
        .map_err(|rejection| ApiError::new(context.clone(), ApiErrorCode::InvalidJson, rejection.to_string()))?;

    let adapter = state
        .adapter_registry
        .get(&adapter_name)
        .ok_or_else(|| adapter_not_found(context.clone(), &adapter_name))?;

    adapter
        .initialize(&options)
        .await
        .map_err(|config_fault| ApiError::new(context.clone(), ApiErrorCode::ValidationError, config_fault.to_string()))?;

    // La configuración nueva queda también en el árbol vigente.
    {
        let mut config_guard = state.config.write().expect("config lock poisoned");
        config_guard.adapters.configs.insert(adapter_name.clone(), options);
    }

    info!(target: "audit", adapter = %adapter_name, "🛠️  [ADAPTERS]: Options re-applied.");
    detail_after_mutation(&state, context, &adapter_name)
}

fn detail_after_mutation(
    state: &AppState,
    context: RequestContext,
    adapter_name: &str,
) -> Result<Json<AdapterStatusReport>, ApiError> {
    state
        .adapter_registry
        .status_reports()
        .into_iter()
        .find(|report| report.name == adapter_name)
        .map(Json)
        .ok_or_else(|| adapter_not_found(context, adapter_name))
}

fn adapter_not_found(context: RequestContext, adapter_name: &str) -> ApiError {
    ApiError::new(
        context,
        ApiErrorCode::AdapterNotFound,
        format!("adapter '{adapter_name}' is not registered"),
    )
}
