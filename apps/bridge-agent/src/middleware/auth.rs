// [apps/bridge-agent/src/middleware/auth.rs]
/*!
 * =================================================================
 * APARATO: AUTHENTICATION GUARD
 * CLASIFICACIÓN: SECURITY MIDDLEWARE (ESTRATO L4)
 * RESPONSABILIDAD: VALIDACIÓN TRIPLE DE IDENTIDAD Y LISTA BLANCA IP
 *
 * Tres métodos probados en orden; cualquiera que pase autoriza:
 * 1. HMAC (`X-Signature` + `X-Timestamp`) con la misma cadena
 *    canónica del enlace ascendente y ventana de ±5 minutos; el
 *    cuerpo participa byte-exacto en la firma.
 * 2. Llave API (`X-API-Key` o `Authorization: Bearer`), comparada en
 *    tiempo constante contra el conjunto configurado.
 * 3. JWT HS256 (`Authorization: Bearer`), con verificación real de
 *    firma y rechazo por `exp` ausente, inválido o vencido.
 *
 * La lista blanca IP (exactas o CIDR) antecede a los tres métodos.
 * Los rechazos emiten auditoría de severidad crítica y jamás filtran
 * detalle al cliente.
 * =================================================================
 */

use std::net::IpAddr;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL;
use base64::Engine;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::api_error::{ApiError, ApiErrorCode, RequestContext};
use crate::middleware::rate_limit::client_key_from;
use crate::state::AppState;
use turngate_core_crypto::{constant_time_equals, hmac_sha256};

/// Ventana de tolerancia del reloj para firmas HMAC locales.
const HMAC_TOLERANCE_SECONDS: i64 = 300;
/// Tope de lectura del cuerpo para la verificación de firma.
const SIGNED_BODY_LIMIT_BYTES: usize = 1024 * 1024;

/// Claims mínimos del JWT local.
#[derive(Debug, Deserialize)]
struct LocalJwtClaims {
    #[serde(default)]
    exp: Option<i64>,
}

pub async fn authentication_guard(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let context = request
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_else(|| RequestContext::fresh(request.method().as_str(), request.uri().path()));

    // /health responde siempre, sin identidad.
    if request.uri().path() == "/health" || request.uri().path().ends_with("/health") {
        return next.run(request).await;
    }

    let (api_keys, jwt_secret, hmac_enabled, ip_allowlist) = {
        let config_guard = state.config.read().expect("config lock poisoned");
        (
            config_guard.auth.api_keys.clone(),
            config_guard.auth.jwt_secret.clone(),
            config_guard.auth.hmac_enabled,
            config_guard.auth.ip_allowlist.clone(),
        )
    };

    // --- COMPUERTA 0: LISTA BLANCA IP ---
    if !ip_allowlist.is_empty() {
        let client_key = client_key_from(&request);
        let client_ip: Option<IpAddr> = client_key.parse().ok();
        let admitted = client_ip
            .map(|ip| ip_allowed(&ip_allowlist, &ip))
            .unwrap_or(false);

        if !admitted {
            warn!(
                target: "audit",
                severity = "critical",
                client = %client_key,
                request_id = %context.request_identifier,
                "⛔ [AUTH]: Client IP outside the allowlist."
            );
            return ApiError::new(context, ApiErrorCode::Forbidden, "access denied").into_response();
        }
    }

    // --- MÉTODO 1: HMAC CON LLAVE DEL DISPOSITIVO ---
    let has_hmac_headers =
        request.headers().contains_key("x-signature") && request.headers().contains_key("x-timestamp");

    if hmac_enabled && has_hmac_headers {
        return match verify_hmac_request(&state, request).await {
            Ok(authorized_request) => next.run(authorized_request).await,
            Err(reason) => {
                warn!(
                    target: "audit",
                    severity = "critical",
                    request_id = %context.request_identifier,
                    "🔐 [AUTH]: HMAC rejection -> {}", reason
                );
                ApiError::new(context, ApiErrorCode::Unauthorized, "authentication failed").into_response()
            }
        };
    }

    // --- MÉTODO 2: LLAVE API (cabecera propia o Bearer) ---
    let presented_api_key = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let bearer_token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string);

    for candidate in presented_api_key.iter().chain(bearer_token.iter()) {
        if api_keys
            .iter()
            .any(|configured| constant_time_equals(configured.as_bytes(), candidate.as_bytes()))
        {
            debug!("🔑 [AUTH]: API key accepted.");
            return next.run(request).await;
        }
    }

    // --- MÉTODO 3: JWT HS256 LOCAL ---
    if let (Some(token), Some(secret)) = (bearer_token.as_deref(), jwt_secret.as_deref()) {
        if verify_local_jwt(token, secret) {
            debug!("🪪 [AUTH]: JWT accepted.");
            return next.run(request).await;
        }
    }

    warn!(
        target: "audit",
        severity = "critical",
        path = %context.path,
        request_id = %context.request_identifier,
        "⛔ [AUTH]: All authentication methods exhausted."
    );
    ApiError::new(context, ApiErrorCode::Unauthorized, "authentication required").into_response()
}

/**
 * Verificación HMAC local: reconstruye la cadena canónica con el
 * cuerpo byte-exacto y valida contra la llave del dispositivo.
 */
async fn verify_hmac_request(state: &AppState, request: Request) -> Result<Request, String> {
    let (parts, body) = request.into_parts();

    let timestamp: i64 = parts
        .headers
        .get("x-timestamp")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .ok_or("TIMESTAMP_UNPARSEABLE")?;

    let presented_signature = parts
        .headers
        .get("x-signature")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .ok_or("SIGNATURE_MISSING")?;

    let body_bytes = axum::body::to_bytes(body, SIGNED_BODY_LIMIT_BYTES)
        .await
        .map_err(|_| "BODY_UNREADABLE")?;

    let method = parts.method.as_str().to_string();
    let path = parts.uri.path().to_string();

    let signer = state.keystore.request_signer().map_err(|_| "DEVICE_NOT_PAIRED")?;
    signer
        .verify(
            &method,
            &path,
            timestamp,
            &body_bytes,
            &presented_signature,
            HMAC_TOLERANCE_SECONDS,
            Utc::now().timestamp(),
        )
        .map_err(|verify_fault| verify_fault.to_string())?;

    Ok(Request::from_parts(parts, Body::from(body_bytes)))
}

/**
 * Verificación JWT HS256: firma real sobre `header.payload` y `exp`
 * obligatorio y vigente.
 */
fn verify_local_jwt(token: &str, secret: &str) -> bool {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return false;
    }

    // El algoritmo declarado debe ser HS256.
    let Ok(header_bytes) = BASE64_URL.decode(segments[0]) else {
        return false;
    };
    let Ok(header_value) = serde_json::from_slice::<serde_json::Value>(&header_bytes) else {
        return false;
    };
    if header_value.get("alg").and_then(|alg| alg.as_str()) != Some("HS256") {
        return false;
    }

    // Verificación de firma sobre los dos primeros segmentos.
    let signed_portion = format!("{}.{}", segments[0], segments[1]);
    let expected_signature = hmac_sha256(secret.as_bytes(), signed_portion.as_bytes());
    let Ok(presented_signature) = BASE64_URL.decode(segments[2]) else {
        return false;
    };
    if !constant_time_equals(&expected_signature, &presented_signature) {
        return false;
    }

    // `exp` ausente, ilegible o vencido rechaza.
    let Ok(payload_bytes) = BASE64_URL.decode(segments[1]) else {
        return false;
    };
    let Ok(claims) = serde_json::from_slice::<LocalJwtClaims>(&payload_bytes) else {
        return false;
    };
    match claims.exp {
        Some(expiry) => expiry > Utc::now().timestamp(),
        None => false,
    }
}

/**
 * Lista blanca: IP exacta o pertenencia a un rango CIDR IPv4.
 * Las entradas IPv6 solo se cotejan por igualdad exacta.
 */
fn ip_allowed(allowlist: &[String], client_ip: &IpAddr) -> bool {
    for entry in allowlist {
        if let Some((network_text, prefix_text)) = entry.split_once('/') {
            let (Ok(network_ip), Ok(prefix_length)) = (network_text.parse::<IpAddr>(), prefix_text.parse::<u32>())
            else {
                continue;
            };
            if let (IpAddr::V4(network_v4), IpAddr::V4(client_v4)) = (network_ip, client_ip) {
                if prefix_length > 32 {
                    continue;
                }
                let mask = if prefix_length == 0 { 0 } else { u32::MAX << (32 - prefix_length) };
                if (u32::from(network_v4) & mask) == (u32::from(*client_v4) & mask) {
                    return true;
                }
            }
        } else if let Ok(exact_ip) = entry.parse::<IpAddr>() {
            if exact_ip == *client_ip {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forge_jwt(secret: &str, exp_offset_seconds: i64, algorithm: &str) -> String {
        let header = BASE64_URL.encode(format!(r#"{{"alg":"{algorithm}","typ":"JWT"}}"#));
        let payload = BASE64_URL.encode(format!(
            r#"{{"sub":"operator","exp":{}}}"#,
            Utc::now().timestamp() + exp_offset_seconds
        ));
        let signed_portion = format!("{header}.{payload}");
        let signature = BASE64_URL.encode(hmac_sha256(secret.as_bytes(), signed_portion.as_bytes()));
        format!("{signed_portion}.{signature}")
    }

    #[test]
    fn valid_hs256_jwt_passes() {
        let token = forge_jwt("local-secret", 3_600, "HS256");
        assert!(verify_local_jwt(&token, "local-secret"));
    }

    #[test]
    fn expired_wrong_secret_and_wrong_alg_fail() {
        let expired = forge_jwt("local-secret", -10, "HS256");
        assert!(!verify_local_jwt(&expired, "local-secret"));

        let valid = forge_jwt("local-secret", 3_600, "HS256");
        assert!(!verify_local_jwt(&valid, "other-secret"));

        let downgraded = forge_jwt("local-secret", 3_600, "none");
        assert!(!verify_local_jwt(&downgraded, "local-secret"));

        assert!(!verify_local_jwt("not.a.jwt.at.all", "local-secret"));
    }

    #[test]
    fn jwt_without_exp_is_rejected() {
        let header = BASE64_URL.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = BASE64_URL.encode(r#"{"sub":"operator"}"#);
        let signed_portion = format!("{header}.{payload}");
        let signature = BASE64_URL.encode(hmac_sha256(b"local-secret", signed_portion.as_bytes()));
        let token = format!("{signed_portion}.{signature}");

        assert!(!verify_local_jwt(&token, "local-secret"));
    }

    #[test]
    fn allowlist_matches_exact_and_cidr() {
        let allowlist = vec!["10.1.2.3".to_string(), "192.168.0.0/16".to_string()];

        assert!(ip_allowed(&allowlist, &"10.1.2.3".parse().unwrap()));
        assert!(ip_allowed(&allowlist, &"192.168.44.7".parse().unwrap()));
        assert!(!ip_allowed(&allowlist, &"172.16.0.1".parse().unwrap()));
        assert!(!ip_allowed(&allowlist, &"10.1.2.4".parse().unwrap()));
    }

    #[test]
    fn zero_prefix_cidr_admits_everything() {
        let allowlist = vec!["0.0.0.0/0".to_string()];
        assert!(ip_allowed(&allowlist, &"203.0.113.5".parse().unwrap()));
    }
}
