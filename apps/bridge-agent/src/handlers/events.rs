// [apps/bridge-agent/src/handlers/events.rs]
/*!
 * =================================================================
 * APARATO: EVENTS HANDLERS
 * CLASIFICACIÓN: API HANDLER (ESTRATO L4)
 * RESPONSABILIDAD: CONSULTA, ESTADÍSTICAS Y PURGA DE LA COLA
 *
 * Lectura de solo consulta sobre columnas planas: la carga sellada
 * jamás viaja por el plano de control.
 * =================================================================
 */

use axum::extract::{Query, State};
use axum::Json;
use serde::Serialize;
use tracing::info;

use crate::api_error::{ApiError, ApiErrorCode, RequestContext};
use crate::state::AppState;
use turngate_domain_models::events::{ClearCriteria, EventFilter, QueueStats, StandardAccessEvent};
use turngate_infra_store::StoreError;

/// Vista de un registro de la cola para el plano de control.
#[derive(Debug, Serialize)]
pub struct QueuedEventView {
    pub row_id: i64,
    #[serde(flatten)]
    pub event: StandardAccessEvent,
    pub created_at: String,
    pub sent_at: Option<String>,
    pub retry_count: u32,
}

#[derive(Debug, Serialize)]
pub struct EventsPage {
    pub events: Vec<QueuedEventView>,
    pub count: usize,
}

pub async fn handle_events_query(
    State(state): State<AppState>,
    context: RequestContext,
    Query(filter): Query<EventFilter>,
) -> Result<Json<EventsPage>, ApiError> {
    let queued_events = state
        .event_queue
        .query(&filter)
        .await
        .map_err(|query_fault| map_store_fault(context, query_fault))?;

    let events: Vec<QueuedEventView> = queued_events
        .into_iter()
        .map(|queued| QueuedEventView {
            row_id: queued.row_identifier,
            created_at: queued.created_at.to_rfc3339(),
            sent_at: queued.sent_at.map(|instant| instant.to_rfc3339()),
            retry_count: queued.retry_count,
            event: queued.event,
        })
        .collect();

    Ok(Json(EventsPage {
        count: events.len(),
        events,
    }))
}

pub async fn handle_events_stats(
    State(state): State<AppState>,
    context: RequestContext,
) -> Result<Json<QueueStats>, ApiError> {
    let stats = state
        .event_queue
        .stats()
        .await
        .map_err(|stats_fault| map_store_fault(context, stats_fault))?;
    Ok(Json(stats))
}

#[derive(Debug, Serialize)]
pub struct ClearReceipt {
    pub deleted: u64,
}

pub async fn handle_events_clear(
    State(state): State<AppState>,
    context: RequestContext,
    Query(criteria): Query<ClearCriteria>,
) -> Result<Json<ClearReceipt>, ApiError> {
    let deleted = state
        .event_queue
        .clear(&criteria)
        .await
        .map_err(|clear_fault| match clear_fault {
            StoreError::IncoherentCriteria(detail) => {
                ApiError::new(context.clone(), ApiErrorCode::ValidationError, detail)
            }
            other => map_store_fault(context.clone(), other),
        })?;

    info!(
        target: "audit",
        request_id = %context.request_identifier,
        deleted,
        "🧹 [EVENTS]: Criteria-based clear executed."
    );

    Ok(Json(ClearReceipt { deleted }))
}

fn map_store_fault(context: RequestContext, fault: StoreError) -> ApiError {
    ApiError::new(context, ApiErrorCode::QueueManagerUnavailable, fault.to_string())
}
