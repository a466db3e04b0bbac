// [tests/mirror/apps/bridge_agent/control_plane_guard.test.rs]
/*!
 * =================================================================
 * APARATO: CERTIFICADOR DE GUARDIAS DEL PLANO DE CONTROL
 * CLASIFICACIÓN: EVIDENCIA ESPEJO (ESTRATO L1-MIRROR)
 * RESPONSABILIDAD: AUDITORÍA DE AUTENTICACIÓN, CUOTA Y SOBRE DE ERROR
 *
 * Certifica la cadena de guardias de punta a punta contra el router
 * real: `/health` sin identidad, el sobre uniforme en los rechazos,
 * la ventana temporal de la firma HMAC (una firma válida con reloj
 * vencido jamás actúa la puerta) y la cuota deslizante con su
 * cabecera `Reset` en el futuro.
 * =================================================================
 */

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use tower::ServiceExt;

use turngate_bridge_lib::config::BridgeConfig;
use turngate_bridge_lib::routes::create_bridge_router;
use turngate_core_crypto::RequestSigner;

async fn response_json(response: axum::response::Response) -> serde_json::Value {
    let body_bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("BODY_FAULT");
    serde_json::from_slice(&body_bytes).unwrap_or(serde_json::Value::Null)
}

#[tokio::test]
async fn certify_health_is_open_and_the_rest_is_guarded() {
    println!("\n🧪 [INICIO]: Auditoría de guardias del plano de control...");
    let mut accumulated_anomalies = 0u32;

    let bench = common::assemble_bench("guard_open", BridgeConfig::default()).await;
    let router = create_bridge_router(bench.state.clone());

    // FASE 1: /health responde sin identidad.
    println!("   🧪 Fase 1: Liveness sin autenticación...");
    let health_response = router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .expect("ROUTER_FAULT");
    if health_response.status() == StatusCode::OK {
        println!("      ✅ /health abierto (200).");
    } else {
        println!("      ❌ FALLO: /health devolvió {}.", health_response.status());
        accumulated_anomalies += 1;
    }

    // FASE 2: una ruta autenticada sin credenciales rechaza con el sobre.
    println!("   🧪 Fase 2: Rechazo con sobre uniforme...");
    let status_response = router
        .clone()
        .oneshot(Request::builder().uri("/api/v1/status").body(Body::empty()).unwrap())
        .await
        .expect("ROUTER_FAULT");

    let has_request_id_header = status_response.headers().contains_key("X-Request-ID");
    let rejection_status = status_response.status();
    let envelope = response_json(status_response).await;

    if rejection_status == StatusCode::UNAUTHORIZED
        && envelope["code"] == serde_json::json!("UNAUTHORIZED")
        && envelope["error"] == serde_json::json!(true)
        && envelope["path"] == serde_json::json!("/api/v1/status")
        && has_request_id_header
    {
        println!("      ✅ 401 con sobre completo y X-Request-ID.");
    } else {
        println!("      ❌ FALLO: status={rejection_status} envelope={envelope}.");
        accumulated_anomalies += 1;
    }

    println!("\n🏁 [INFORME]: Guardias base auditadas.");
    assert_eq!(accumulated_anomalies, 0);
    drop(bench.shutdown_sender);
}

#[tokio::test]
async fn certify_api_key_grants_access_in_constant_time_lane() {
    let mut config = BridgeConfig::default();
    config.auth.api_keys = vec!["mirror-operator-key".into()];

    let bench = common::assemble_bench("guard_api_key", config).await;
    let router = create_bridge_router(bench.state.clone());

    let accepted = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/status")
                .header("X-API-Key", "mirror-operator-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("ROUTER_FAULT");
    assert_eq!(accepted.status(), StatusCode::OK);

    let rejected = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/status")
                .header("X-API-Key", "mirror-operator-kez")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("ROUTER_FAULT");
    assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);

    drop(bench.shutdown_sender);
}

#[tokio::test]
async fn certify_stale_hmac_signature_never_actuates_the_door() {
    println!("\n🧪 [INICIO]: Auditoría de ventana temporal HMAC...");

    let mut config = BridgeConfig::default();
    config.auth.hmac_enabled = true;

    let bench = common::assemble_bench("guard_hmac", config).await;
    let router = create_bridge_router(bench.state.clone());

    // Firma VÁLIDA pero con reloj vencido (now - 600s).
    let stale_timestamp = Utc::now().timestamp() - 600;
    let request_body = br#"{"duration_ms":2000}"#;
    let signer = RequestSigner::new("dev_mirror", vec![0x42; 32]);
    let stale_signature = signer.sign("POST", "/api/v1/door/unlock", stale_timestamp, request_body);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/door/unlock")
                .header("Content-Type", "application/json")
                .header("X-Device-ID", "dev_mirror")
                .header("X-Timestamp", stale_timestamp.to_string())
                .header("X-Signature", stale_signature)
                .body(Body::from(request_body.to_vec()))
                .unwrap(),
        )
        .await
        .expect("ROUTER_FAULT");

    let status = response.status();
    let envelope = response_json(response).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED, "reloj vencido debe rechazar");
    assert_eq!(envelope["code"], serde_json::json!("UNAUTHORIZED"));
    assert_eq!(
        bench.state.door_control.stats().unlock_count,
        0,
        "el adaptador jamás debe actuar ante una firma vencida"
    );

    // La misma petición con reloj vigente sí atraviesa la guardia.
    let fresh_timestamp = Utc::now().timestamp();
    let fresh_signature = signer.sign("POST", "/api/v1/door/unlock", fresh_timestamp, request_body);
    let fresh_response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/door/unlock")
                .header("Content-Type", "application/json")
                .header("X-Device-ID", "dev_mirror")
                .header("X-Timestamp", fresh_timestamp.to_string())
                .header("X-Signature", fresh_signature)
                .body(Body::from(request_body.to_vec()))
                .unwrap(),
        )
        .await
        .expect("ROUTER_FAULT");

    // Sin adaptadores registrados en el banco la actuación devuelve 404,
    // pero la autenticación ya quedó atravesada (no 401).
    assert_ne!(fresh_response.status(), StatusCode::UNAUTHORIZED);

    println!("🏁 [INFORME]: Ventana temporal HMAC certificada.");
    drop(bench.shutdown_sender);
}

#[tokio::test]
async fn certify_sliding_window_quota_with_future_reset() {
    println!("\n🧪 [INICIO]: Auditoría de cuota deslizante...");

    let mut config = BridgeConfig::default();
    config.rate_limit.max_requests = 3;
    config.rate_limit.window_seconds = 60;

    let bench = common::assemble_bench("guard_quota", config).await;
    let router = create_bridge_router(bench.state.clone());

    for ordinal in 1..=3 {
        let response = router
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .expect("ROUTER_FAULT");
        assert_eq!(response.status(), StatusCode::OK, "petición {ordinal} dentro de cuota");
        assert!(response.headers().contains_key("X-RateLimit-Remaining"));
    }

    let overflow_response = router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .expect("ROUTER_FAULT");

    assert_eq!(overflow_response.status(), StatusCode::TOO_MANY_REQUESTS);
    let reset_epoch: u64 = overflow_response
        .headers()
        .get("X-RateLimit-Reset")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .expect("RESET_HEADER_FAULT");
    let now_epoch = Utc::now().timestamp() as u64;
    assert!(reset_epoch > now_epoch, "Reset debe caer en el futuro");

    let envelope = response_json(overflow_response).await;
    assert_eq!(envelope["code"], serde_json::json!("RATE_LIMITED"));

    println!("🏁 [INFORME]: Cuota deslizante certificada.");
    drop(bench.shutdown_sender);
}
