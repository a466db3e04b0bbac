// [apps/bridge-agent/src/middleware/recovery_shield.rs]
/*!
 * =================================================================
 * APARATO: RECOVERY SHIELD
 * CLASIFICACIÓN: MIDDLEWARE (ESTRATO L4)
 * RESPONSABILIDAD: CAPTURA DE PÁNICOS Y CORTACIRCUITOS POR RUTA
 *
 * Dos eslabones emparejados:
 * - `panic_shield`: red exterior; cualquier pánico que escape del
 *   resto de la cadena se convierte en un sobre INTERNAL_ERROR.
 * - `recovery_guard`: cortacircuitos por ruta. Cerrado -> abierto
 *   tras N fallos consecutivos (5xx o pánico); semiabierto tras el
 *   enfriamiento con sondas limitadas; cierra con M éxitos seguidos.
 *   Abierto responde 503 CIRCUIT_BREAKER_OPEN sin tocar el handler.
 *
 * Estado por llave bajo candado fino: rutas distintas no contienden.
 * =================================================================
 */

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::FutureExt;
use tracing::{error, warn};

use crate::api_error::{ApiError, ApiErrorCode, RequestContext};

/// Fallos consecutivos que abren el cortacircuitos.
const OPEN_AFTER_CONSECUTIVE_FAILURES: u32 = 5;
/// Enfriamiento antes de pasar a semiabierto.
const COOLDOWN_BEFORE_PROBE: Duration = Duration::from_secs(30);
/// Éxitos consecutivos en semiabierto que cierran el circuito.
const CLOSE_AFTER_CONSECUTIVE_SUCCESSES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerPhase {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    phase: BreakerPhase,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            phase: BreakerPhase::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
        }
    }
}

/// Registro de cortacircuitos por ruta.
pub struct CircuitBreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<Mutex<BreakerState>>>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
        }
    }

    fn breaker_for(&self, path: &str) -> Arc<Mutex<BreakerState>> {
        let mut registry_guard = self.breakers.lock().expect("breaker registry poisoned");
        Arc::clone(
            registry_guard
                .entry(path.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(BreakerState::new()))),
        )
    }

    /// `true` si la petición puede pasar; `false` si el circuito rechaza.
    pub fn admit(&self, path: &str) -> bool {
        let breaker = self.breaker_for(path);
        let mut state = breaker.lock().expect("breaker state poisoned");

        match state.phase {
            BreakerPhase::Closed => true,
            BreakerPhase::HalfOpen => true,
            BreakerPhase::Open => {
                let cooled = state
                    .opened_at
                    .map(|instant| instant.elapsed() >= COOLDOWN_BEFORE_PROBE)
                    .unwrap_or(true);
                if cooled {
                    state.phase = BreakerPhase::HalfOpen;
                    state.consecutive_successes = 0;
                    warn!("🔦 [BREAKER]: Path [{}] half-open; probing.", path);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Registra el desenlace de una petición admitida.
    pub fn record(&self, path: &str, failed: bool) {
        let breaker = self.breaker_for(path);
        let mut state = breaker.lock().expect("breaker state poisoned");

        if failed {
            state.consecutive_failures += 1;
            state.consecutive_successes = 0;

            let should_open = match state.phase {
                BreakerPhase::HalfOpen => true,
                _ => state.consecutive_failures >= OPEN_AFTER_CONSECUTIVE_FAILURES,
            };
            if should_open && state.phase != BreakerPhase::Open {
                state.phase = BreakerPhase::Open;
                state.opened_at = Some(Instant::now());
                warn!(
                    target: "audit",
                    "⛔ [BREAKER]: Path [{}] opened after {} consecutive failures.",
                    path, state.consecutive_failures
                );
            }
        } else {
            state.consecutive_failures = 0;
            match state.phase {
                BreakerPhase::HalfOpen => {
                    state.consecutive_successes += 1;
                    if state.consecutive_successes >= CLOSE_AFTER_CONSECUTIVE_SUCCESSES {
                        state.phase = BreakerPhase::Closed;
                        state.opened_at = None;
                        warn!("✅ [BREAKER]: Path [{}] closed again.", path);
                    }
                }
                _ => state.consecutive_successes = 0,
            }
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/**
 * Red exterior de pánicos: convierte cualquier desenrollado en un
 * sobre INTERNAL_ERROR con el `request_id` de la petición.
 */
pub async fn panic_shield(request: Request, next: Next) -> Response {
    let context = request
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_else(|| RequestContext::fresh(request.method().as_str(), request.uri().path()));

    match std::panic::AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(panic_payload) => {
            let panic_message = panic_payload
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| panic_payload.downcast_ref::<String>().map(|s| s.as_str()))
                .unwrap_or("UNDEFINED_PANIC_PAYLOAD");
            error!(
                request_id = %context.request_identifier,
                "🔥 [PANIC_SHIELD]: Handler chain panicked: {}",
                panic_message
            );
            ApiError::new(context, ApiErrorCode::InternalError, "internal fault contained").into_response()
        }
    }
}

/**
 * Cortacircuitos por ruta; también captura pánicos del handler para
 * contarlos como fallo del circuito.
 */
pub async fn recovery_guard(
    State(registry): State<Arc<CircuitBreakerRegistry>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let context = request
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_else(|| RequestContext::fresh(request.method().as_str(), &path));

    if !registry.admit(&path) {
        return ApiError::new(context, ApiErrorCode::CircuitBreakerOpen, "circuit breaker open for this path")
            .into_response();
    }

    match std::panic::AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => {
            registry.record(&path, response.status().is_server_error());
            response
        }
        Err(panic_payload) => {
            registry.record(&path, true);
            let panic_message = panic_payload
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| panic_payload.downcast_ref::<String>().map(|s| s.as_str()))
                .unwrap_or("UNDEFINED_PANIC_PAYLOAD");
            error!(
                request_id = %context.request_identifier,
                "🔥 [BREAKER]: Handler panicked: {}",
                panic_message
            );
            ApiError::new(context, ApiErrorCode::InternalError, "internal fault contained").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_opens_after_consecutive_failures_and_probes_after_cooldown() {
        let registry = CircuitBreakerRegistry::new();
        let path = "/api/v1/events";

        for _ in 0..OPEN_AFTER_CONSECUTIVE_FAILURES {
            assert!(registry.admit(path));
            registry.record(path, true);
        }
        // Abierto: rechaza sin enfriar.
        assert!(!registry.admit(path));

        // Forzamos el enfriamiento vencido.
        {
            let breaker = registry.breaker_for(path);
            let mut state = breaker.lock().unwrap();
            state.opened_at = Some(Instant::now() - COOLDOWN_BEFORE_PROBE - Duration::from_secs(1));
        }

        // Semiabierto: admite sondas y cierra tras M éxitos.
        assert!(registry.admit(path));
        registry.record(path, false);
        assert!(registry.admit(path));
        registry.record(path, false);

        assert!(registry.admit(path));
        registry.record(path, true); // en cerrado, un fallo aislado no reabre
        assert!(registry.admit(path));
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let registry = CircuitBreakerRegistry::new();
        let path = "/api/v1/status";

        for _ in 0..OPEN_AFTER_CONSECUTIVE_FAILURES {
            registry.admit(path);
            registry.record(path, true);
        }
        {
            let breaker = registry.breaker_for(path);
            breaker.lock().unwrap().opened_at = Some(Instant::now() - COOLDOWN_BEFORE_PROBE - Duration::from_secs(1));
        }

        assert!(registry.admit(path)); // sonda
        registry.record(path, true); // la sonda falló
        assert!(!registry.admit(path), "un fallo en semiabierto reabre de inmediato");
    }

    #[test]
    fn paths_are_isolated() {
        let registry = CircuitBreakerRegistry::new();
        for _ in 0..OPEN_AFTER_CONSECUTIVE_FAILURES {
            registry.admit("/api/v1/events");
            registry.record("/api/v1/events", true);
        }
        assert!(!registry.admit("/api/v1/events"));
        assert!(registry.admit("/api/v1/status"));
    }
}
