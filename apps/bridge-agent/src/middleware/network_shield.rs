// [apps/bridge-agent/src/middleware/network_shield.rs]
/*!
 * =================================================================
 * APARATO: NETWORK SHIELD (CORS + CABECERAS DE SEGURIDAD)
 * CLASIFICACIÓN: MIDDLEWARE (ESTRATO L4)
 * RESPONSABILIDAD: POLÍTICA DE ORIGEN CRUZADO Y ENDURECIMIENTO HTTP
 *
 * CORS: el `Origin` se coteja contra el conjunto permitido (exacto o
 * `*`). Un preflight desde un origen vetado recibe 403. Una petición
 * con credenciales jamás recibe `*` como eco: se devuelve el origen
 * concreto.
 *
 * Cabeceras: nosniff, frame-deny, XSS legacy, referrer mínimo, CSP
 * opcional y HSTS solo cuando la petición llegó por TLS (directo o
 * `X-Forwarded-Proto: https`).
 * =================================================================
 */

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::api_error::{ApiError, ApiErrorCode, RequestContext};
use crate::state::AppState;

/// Decide si el origen está dentro del conjunto permitido.
fn origin_allowed(allowed_origins: &[String], origin: &str) -> bool {
    allowed_origins
        .iter()
        .any(|candidate| candidate == "*" || candidate == origin)
}

/// La petición porta credenciales (Authorization o Cookie).
fn carries_credentials(request: &Request) -> bool {
    request.headers().contains_key(header::AUTHORIZATION) || request.headers().contains_key(header::COOKIE)
}

pub async fn cors_guard(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let (cors_enabled, allowed_origins) = {
        let config_guard = state.config.read().expect("config lock poisoned");
        (config_guard.cors.enabled, config_guard.cors.allowed_origins.clone())
    };

    if !cors_enabled {
        return next.run(request).await;
    }

    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());

    let Some(origin) = origin else {
        // Sin Origin no hay política que aplicar (tráfico same-origin o CLI).
        return next.run(request).await;
    };

    let allowed = origin_allowed(&allowed_origins, &origin);
    let is_preflight = request.method() == Method::OPTIONS;

    if !allowed {
        if is_preflight {
            let context = request
                .extensions()
                .get::<RequestContext>()
                .cloned()
                .unwrap_or_else(|| RequestContext::fresh("OPTIONS", request.uri().path()));
            warn!(
                target: "audit",
                %origin,
                "🚧 [CORS]: Preflight rejected for disallowed origin."
            );
            return ApiError::new(context, ApiErrorCode::Forbidden, "origin not allowed").into_response();
        }
        // Peticiones simples de origen vetado: sin cabeceras CORS, el
        // navegador bloquea la lectura por su cuenta.
        return next.run(request).await;
    }

    // Eco del origen: `*` solo cuando está configurado y no hay credenciales.
    let wildcard_configured = allowed_origins.iter().any(|candidate| candidate == "*");
    let echo_value = if wildcard_configured && !carries_credentials(&request) {
        "*".to_string()
    } else {
        origin.clone()
    };

    if is_preflight {
        let mut response = StatusCode::NO_CONTENT.into_response();
        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&echo_value) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(
                "Authorization, Content-Type, X-API-Key, X-Signature, X-Timestamp, X-Device-ID",
            ),
        );
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("3600"));
        headers.insert(header::VARY, HeaderValue::from_static("Origin"));
        return response;
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&echo_value) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    headers.insert(header::VARY, HeaderValue::from_static("Origin"));
    response
}

pub async fn security_headers_guard(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let (csp_enabled, csp_value) = {
        let config_guard = state.config.read().expect("config lock poisoned");
        (
            config_guard.security_headers.csp_enabled,
            config_guard.security_headers.csp_value.clone(),
        )
    };

    let arrived_over_tls = request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .map(|proto| proto.eq_ignore_ascii_case("https"))
        .unwrap_or(false);

    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert("X-XSS-Protection", HeaderValue::from_static("1; mode=block"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));

    if csp_enabled {
        if let Ok(value) = HeaderValue::from_str(&csp_value) {
            headers.insert("Content-Security-Policy", value);
        }
    }

    if arrived_over_tls {
        headers.insert(
            "Strict-Transport-Security",
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_matching_supports_exact_and_wildcard() {
        let exact = vec!["https://ops.example.com".to_string()];
        assert!(origin_allowed(&exact, "https://ops.example.com"));
        assert!(!origin_allowed(&exact, "https://evil.example.com"));

        let wildcard = vec!["*".to_string()];
        assert!(origin_allowed(&wildcard, "https://anything.example"));
    }
}
