// [apps/bridge-agent/src/handlers/health.rs]
/*!
 * =================================================================
 * APARATO: HEALTH HANDLER
 * CLASIFICACIÓN: API HANDLER (ESTRATO L4)
 * RESPONSABILIDAD: LIVENESS SIN AUTENTICACIÓN
 *
 * `/health` responde siempre; la severidad viaja en el código HTTP:
 * 200 para healthy/degraded, 503 para unhealthy.
 * =================================================================
 */

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::services::health_monitor::HealthMonitor;
use crate::state::AppState;

pub async fn handle_health(State(state): State<AppState>) -> Response {
    let snapshot = HealthMonitor::new(state).snapshot().await;
    let http_status = StatusCode::from_u16(snapshot.overall.http_status()).unwrap_or(StatusCode::OK);
    (http_status, Json(snapshot)).into_response()
}
