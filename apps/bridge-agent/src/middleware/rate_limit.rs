// [apps/bridge-agent/src/middleware/rate_limit.rs]
/*!
 * =================================================================
 * APARATO: SLIDING WINDOW RATE LIMITER
 * CLASIFICACIÓN: MIDDLEWARE (ESTRATO L4)
 * RESPONSABILIDAD: CUOTA DE PETICIONES POR IP DE CLIENTE
 *
 * Ventana deslizante por IP (X-Forwarded-For primero, X-Real-IP,
 * luego la dirección remota). Toda respuesta porta
 * `X-RateLimit-Limit/Remaining/Reset`; el desborde responde 429 con
 * `Reset` en el futuro. Cubetas por llave bajo candado fino.
 * =================================================================
 */

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::api_error::{ApiError, ApiErrorCode, RequestContext};

/// Veredicto de admisión de una petición.
#[derive(Debug, Clone, Copy)]
pub struct RateVerdict {
    pub admitted: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix seconds en que la ventana libera el próximo cupo.
    pub reset_epoch_seconds: u64,
}

/// Cubetas de ventana deslizante por llave de cliente.
pub struct RateLimiterRegistry {
    window: Duration,
    max_requests: u32,
    buckets: Mutex<HashMap<String, Arc<Mutex<VecDeque<Instant>>>>>,
}

impl RateLimiterRegistry {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn bucket_for(&self, client_key: &str) -> Arc<Mutex<VecDeque<Instant>>> {
        let mut registry_guard = self.buckets.lock().expect("bucket registry poisoned");
        Arc::clone(
            registry_guard
                .entry(client_key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new()))),
        )
    }

    /// Evalúa y registra (si admite) una petición de la llave dada.
    pub fn check(&self, client_key: &str) -> RateVerdict {
        let bucket = self.bucket_for(client_key);
        let mut window_entries = bucket.lock().expect("bucket poisoned");

        let now = Instant::now();
        while let Some(oldest) = window_entries.front() {
            if now.duration_since(*oldest) >= self.window {
                window_entries.pop_front();
            } else {
                break;
            }
        }

        let now_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        if (window_entries.len() as u32) < self.max_requests {
            window_entries.push_back(now);
            RateVerdict {
                admitted: true,
                limit: self.max_requests,
                remaining: self.max_requests - window_entries.len() as u32,
                reset_epoch_seconds: now_epoch + self.window.as_secs(),
            }
        } else {
            // El próximo cupo se libera cuando expire la entrada más vieja.
            let oldest_age = window_entries
                .front()
                .map(|oldest| now.duration_since(*oldest))
                .unwrap_or_default();
            let release_in = self.window.saturating_sub(oldest_age);
            RateVerdict {
                admitted: false,
                limit: self.max_requests,
                remaining: 0,
                reset_epoch_seconds: now_epoch + release_in.as_secs().max(1),
            }
        }
    }
}

/// Llave de cliente: primer salto de X-Forwarded-For, X-Real-IP o la
/// dirección remota del socket.
pub fn client_key_from(request: &Request) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(first_hop) = forwarded.split(',').next() {
            let trimmed = first_hop.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip").and_then(|value| value.to_str().ok()) {
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|connect_info| connect_info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn stamp_headers(response: &mut Response, verdict: &RateVerdict) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&verdict.limit.to_string()) {
        headers.insert("X-RateLimit-Limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&verdict.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", value);
    }
    if let Ok(value) = HeaderValue::from_str(&verdict.reset_epoch_seconds.to_string()) {
        headers.insert("X-RateLimit-Reset", value);
    }
}

pub async fn rate_limit_guard(
    State(registry): State<Arc<RateLimiterRegistry>>,
    request: Request,
    next: Next,
) -> Response {
    let client_key = client_key_from(&request);
    let verdict = registry.check(&client_key);

    if !verdict.admitted {
        let context = request
            .extensions()
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_else(|| RequestContext::fresh(request.method().as_str(), request.uri().path()));

        warn!(
            target: "audit",
            client = %client_key,
            request_id = %context.request_identifier,
            "🛑 [RATE_LIMIT]: Client quota exceeded."
        );

        let mut response =
            ApiError::new(context, ApiErrorCode::RateLimited, "request quota exceeded for this window").into_response();
        stamp_headers(&mut response, &verdict);
        return response;
    }

    let mut response = next.run(request).await;
    stamp_headers(&mut response, &verdict);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_quota_plus_one_request_is_rejected_with_future_reset() {
        let registry = RateLimiterRegistry::new(Duration::from_secs(60), 3);

        for ordinal in 1..=3 {
            let verdict = registry.check("10.0.0.9");
            assert!(verdict.admitted, "petición {ordinal} dentro de cuota");
            assert_eq!(verdict.remaining, 3 - ordinal);
        }

        let rejected = registry.check("10.0.0.9");
        assert!(!rejected.admitted);
        assert_eq!(rejected.remaining, 0);

        let now_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        assert!(rejected.reset_epoch_seconds > now_epoch, "Reset debe caer en el futuro");
    }

    #[test]
    fn clients_have_independent_buckets() {
        let registry = RateLimiterRegistry::new(Duration::from_secs(60), 1);
        assert!(registry.check("10.0.0.1").admitted);
        assert!(!registry.check("10.0.0.1").admitted);
        assert!(registry.check("10.0.0.2").admitted);
    }

    #[test]
    fn window_slides_and_frees_quota() {
        let registry = RateLimiterRegistry::new(Duration::from_millis(50), 1);
        assert!(registry.check("10.0.0.3").admitted);
        assert!(!registry.check("10.0.0.3").admitted);

        std::thread::sleep(Duration::from_millis(60));
        assert!(registry.check("10.0.0.3").admitted, "la ventana deslizó");
    }
}
