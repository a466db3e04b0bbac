// [apps/bridge-agent/src/middleware/request_log.rs]
/*!
 * =================================================================
 * APARATO: STRUCTURED REQUEST LOGGER
 * CLASIFICACIÓN: MIDDLEWARE (ESTRATO L4)
 * RESPONSABILIDAD: IDENTIDAD DE PETICIÓN Y RASTRO ESTRUCTURADO
 *
 * Primer eslabón de la cadena: acuña el `request_id` (CSPRNG) que
 * viaja en las extensiones, en el sobre de error y como cabecera de
 * respuesta. Las rutas sensibles (`/door/...`, `/config`) se marcan en
 * el rastro; se registran tamaños, jamás cuerpos ni secretos.
 * =================================================================
 */

use std::time::Instant;

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::info;

use crate::api_error::RequestContext;

/// Rutas cuyo tráfico se marca como sensible en el rastro.
fn is_sensitive_path(path: &str) -> bool {
    path.contains("/door/") || path.ends_with("/config") || path.contains("/config/")
}

pub async fn request_logger(mut request: Request, next: Next) -> Response {
    let started = Instant::now();

    let context = RequestContext::fresh(request.method().as_str(), request.uri().path());
    let request_identifier = context.request_identifier.clone();
    let method = context.method.clone();
    let path = context.path.clone();
    let sensitive = is_sensitive_path(&path);
    let request_bytes = request
        .headers()
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(0);

    request.extensions_mut().insert(context);

    let mut response = next.run(request).await;

    let response_bytes = response
        .headers()
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(0);

    if let Ok(header_value) = HeaderValue::from_str(&request_identifier) {
        response.headers_mut().entry("X-Request-ID").or_insert(header_value);
    }

    info!(
        request_id = %request_identifier,
        %method,
        %path,
        status = response.status().as_u16(),
        duration_ms = started.elapsed().as_millis() as u64,
        request_bytes,
        response_bytes,
        sensitive,
        "📨 [HTTP]: Request completed."
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensitive_paths_are_flagged() {
        assert!(is_sensitive_path("/api/v1/door/unlock"));
        assert!(is_sensitive_path("/api/v1/config"));
        assert!(is_sensitive_path("/api/v1/config/reload"));
        assert!(!is_sensitive_path("/api/v1/events"));
        assert!(!is_sensitive_path("/health"));
    }
}
