// [apps/bridge-agent/src/routes.rs]
/*!
 * =================================================================
 * APARATO: BRIDGE ROUTING MATRIX
 * CLASIFICACIÓN: API ADAPTER LAYER (ESTRATO L4)
 * RESPONSABILIDAD: TOPOLOGÍA DE RUTAS Y ORDEN DE LA CADENA DE GUARDIAS
 *
 * La cadena envuelve toda petición, en este orden de entrada:
 *   logger -> escudo de pánicos -> cortacircuitos -> cuota -> CORS ->
 *   cabeceras de seguridad -> autenticación.
 * (En axum las capas se añaden en orden inverso: la última agregada
 * es la primera en ver la petición.) `/health` es la única ruta que
 * la guardia de autenticación deja pasar sin identidad.
 * =================================================================
 */

use std::sync::Arc;
use std::time::Duration;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post, put};
use axum::Router;

use crate::handlers::{adapters, config, door, events, health, metrics, status, stream, ws_admin};
use crate::middleware::{
    authentication_guard, cors_guard, panic_shield, rate_limit_guard, recovery_guard, request_logger,
    security_headers_guard, CircuitBreakerRegistry, RateLimiterRegistry,
};
use crate::state::AppState;

pub fn create_bridge_router(application_state: AppState) -> Router {
    let (rate_window_seconds, rate_max_requests) = {
        let config_guard = application_state.config.read().expect("config lock poisoned");
        (
            config_guard.rate_limit.window_seconds,
            config_guard.rate_limit.max_requests,
        )
    };

    let rate_limiter_registry = Arc::new(RateLimiterRegistry::new(
        Duration::from_secs(rate_window_seconds),
        rate_max_requests,
    ));
    let circuit_breaker_registry = Arc::new(CircuitBreakerRegistry::new());

    // ESTRATO DE CONSULTA: estado, métricas y configuración.
    let observation_stratum = Router::new()
        .route("/status", get(status::handle_status))
        .route("/metrics", get(metrics::handle_metrics))
        .route(
            "/config",
            get(config::handle_config_read).put(config::handle_config_update),
        )
        .route("/config/reload", post(config::handle_config_reload));

    // ESTRATO DE EVENTOS: consulta, estadísticas y purga de la cola.
    let events_stratum = Router::new()
        .route(
            "/events",
            get(events::handle_events_query).delete(events::handle_events_clear),
        )
        .route("/events/stats", get(events::handle_events_stats));

    // ESTRATO DE HARDWARE: adaptadores y puerta.
    let hardware_stratum = Router::new()
        .route("/adapters", get(adapters::handle_adapters_list))
        .route("/adapters/:name", get(adapters::handle_adapter_detail))
        .route("/adapters/:name/enable", post(adapters::handle_adapter_enable))
        .route("/adapters/:name/disable", post(adapters::handle_adapter_disable))
        .route("/adapters/:name/config", put(adapters::handle_adapter_config_update))
        .route("/door/unlock", post(door::handle_door_unlock))
        .route("/door/lock", post(door::handle_door_lock))
        .route("/door/status", get(door::handle_door_status));

    // ESTRATO NEURAL: difusión WebSocket y su administración.
    let stream_stratum = Router::new()
        .route("/ws", get(stream::handle_stream_upgrade))
        .route("/ws/status", get(ws_admin::handle_ws_status))
        .route("/ws/broadcast", post(ws_admin::handle_ws_broadcast));

    let api_v1 = Router::new()
        .route("/health", get(health::handle_health))
        .merge(observation_stratum)
        .merge(events_stratum)
        .merge(hardware_stratum)
        .merge(stream_stratum);

    Router::new()
        .route("/health", get(health::handle_health))
        .nest("/api/v1", api_v1)
        // Capas en orden inverso de ejecución (la última ve primero).
        .layer(from_fn_with_state(application_state.clone(), authentication_guard))
        .layer(from_fn_with_state(application_state.clone(), security_headers_guard))
        .layer(from_fn_with_state(application_state.clone(), cors_guard))
        .layer(from_fn_with_state(rate_limiter_registry, rate_limit_guard))
        .layer(from_fn_with_state(circuit_breaker_registry, recovery_guard))
        .layer(from_fn(panic_shield))
        .layer(from_fn(request_logger))
        .with_state(application_state)
}
