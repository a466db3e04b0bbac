// [apps/bridge-agent/src/api_error.rs]
/*!
 * =================================================================
 * APARATO: API ERROR ENVELOPE
 * CLASIFICACIÓN: API ADAPTER LAYER (ESTRATO L4)
 * RESPONSABILIDAD: SOBRE DE ERROR UNIFORME DEL PLANO DE CONTROL
 *
 * Todo error del plano de control sale con el mismo sobre:
 * `{error, code, message, status, timestamp, request_id, path,
 * method}`; el `request_id` viaja además como cabecera de respuesta.
 * El código es un enum estable: los clientes programan contra él.
 * =================================================================
 */

use axum::http::request::Parts;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use turngate_core_crypto::random_hex;

/// Identidad y coordenadas de la petición en curso.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_identifier: String,
    pub path: String,
    pub method: String,
}

impl RequestContext {
    pub fn fresh(method: &str, path: &str) -> Self {
        Self {
            request_identifier: random_hex(8),
            path: path.to_string(),
            method: method.to_string(),
        }
    }
}

#[axum::async_trait]
impl<S: Send + Sync> axum::extract::FromRequestParts<S> for RequestContext {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_else(|| RequestContext::fresh(parts.method.as_str(), parts.uri.path())))
    }
}

/// Códigos estables del plano de control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ApiErrorCode {
    #[serde(rename = "INVALID_JSON")]
    InvalidJson,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "FORBIDDEN")]
    Forbidden,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "QUEUE_MANAGER_UNAVAILABLE")]
    QueueManagerUnavailable,
    #[serde(rename = "CONFIG_MANAGER_UNAVAILABLE")]
    ConfigManagerUnavailable,
    #[serde(rename = "ADAPTER_NOT_FOUND")]
    AdapterNotFound,
    #[serde(rename = "UNLOCK_FAILED")]
    UnlockFailed,
    #[serde(rename = "CIRCUIT_BREAKER_OPEN")]
    CircuitBreakerOpen,
    #[serde(rename = "RATE_LIMITED")]
    RateLimited,
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

impl ApiErrorCode {
    pub fn http_status(&self) -> StatusCode {
        match self {
            ApiErrorCode::InvalidJson | ApiErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ApiErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ApiErrorCode::NotFound | ApiErrorCode::AdapterNotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::QueueManagerUnavailable
            | ApiErrorCode::ConfigManagerUnavailable
            | ApiErrorCode::CircuitBreakerOpen => StatusCode::SERVICE_UNAVAILABLE,
            ApiErrorCode::UnlockFailed => StatusCode::BAD_GATEWAY,
            ApiErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Cuerpo serializado del sobre.
#[derive(Debug, Serialize)]
struct ErrorEnvelope<'a> {
    error: bool,
    code: ApiErrorCode,
    message: &'a str,
    status: u16,
    timestamp: String,
    request_id: &'a str,
    path: &'a str,
    method: &'a str,
}

#[derive(Debug)]
pub struct ApiError {
    pub context: RequestContext,
    pub code: ApiErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(context: RequestContext, code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            context,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.code.http_status();
        let envelope = ErrorEnvelope {
            error: true,
            code: self.code,
            message: &self.message,
            status: status.as_u16(),
            timestamp: Utc::now().to_rfc3339(),
            request_id: &self.context.request_identifier,
            path: &self.context.path,
            method: &self.context.method,
        };

        let mut response = (status, Json(&envelope)).into_response();
        if let Ok(header_value) = HeaderValue::from_str(&self.context.request_identifier) {
            response.headers_mut().insert("X-Request-ID", header_value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_the_expected_statuses() {
        assert_eq!(ApiErrorCode::Unauthorized.http_status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiErrorCode::RateLimited.http_status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ApiErrorCode::CircuitBreakerOpen.http_status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ApiErrorCode::AdapterNotFound.http_status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn envelope_serializes_with_stable_code_labels() {
        let serialized = serde_json::to_string(&ApiErrorCode::CircuitBreakerOpen).unwrap();
        assert_eq!(serialized, r#""CIRCUIT_BREAKER_OPEN""#);
    }
}
