// [libs/infra/uplink/src/client.rs]
/*!
 * =================================================================
 * APARATO: SOVEREIGN BRIDGE UPLINK
 * CLASIFICACIÓN: INFRASTRUCTURE ADAPTER (ESTRATO L3)
 * RESPONSABILIDAD: ENTREGA FIRMADA DE LOTES, LATIDOS Y EMPAREJAMIENTO
 *
 * Toda petición autenticada porta `X-Device-ID`, `X-Timestamp` (Unix
 * segundos) y `X-Signature` (HMAC-SHA256 hex de la cadena canónica
 * `METHOD || PATH || TIMESTAMP || BODY`, cuerpo byte-exacto). Los
 * lotes añaden `X-Idempotency-Key` (SHA-256 de los event ids
 * ordenados) para que el servidor deduplique reenvíos.
 *
 * El triaje de estados es el contrato del drenador:
 * 2xx => Delivered; 401/403 => AuthRejected (sin ack, pausa y relee
 * credenciales); otros 4xx => Rejected (ack local + contador);
 * 5xx / fallo físico => Retryable (nack + backoff).
 * =================================================================
 */

use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, instrument, warn};

use crate::errors::UplinkError;
use turngate_core_crypto::{batch_idempotency_key, RequestSigner};
use turngate_domain_models::events::StandardAccessEvent;
use turngate_domain_models::health::HealthSnapshot;
use turngate_domain_models::wire::{CheckinEnvelope, DeviceInfo, HeartbeatEnvelope, PairRequest, PairResponse};

/// Ruta del lote de eventos.
pub const CHECKIN_PATH: &str = "/api/v1/checkin";
/// Ruta del latido periódico.
pub const HEARTBEAT_PATH: &str = "/api/v1/devices/heartbeat";
/// Ruta del emparejamiento (única llamada sin firma).
pub const PAIR_PATH: &str = "/api/v1/devices/pair";

/// Veredicto del envío de un lote, listo para el triaje de la cola.
#[derive(Debug)]
pub enum BatchVerdict {
    /// 2xx: el servidor aceptó; corresponde `ack`.
    Delivered,
    /// 4xx no-auth: el servidor decidió que no los quiere; `ack` local
    /// con contador de rechazos y rastro de auditoría por evento.
    Rejected(u16),
    /// 401/403: sin `ack`; pausa y relectura de credenciales.
    AuthRejected(u16),
    /// 5xx, timeout o fallo físico: `nack` + backoff.
    Retryable(String),
}

pub struct UplinkClient {
    network_session_client: Client,
    api_base_endpoint: String,
}

impl UplinkClient {
    /**
     * Construye el cliente endurecido del enlace ascendente.
     *
     * @param api_base_url Endpoint raíz de la API remota.
     * @param attempt_timeout Tiempo máximo por intento (10s por defecto).
     */
    pub fn new(api_base_url: String, attempt_timeout: Duration) -> Result<Self, UplinkError> {
        let network_client = Client::builder()
            .timeout(attempt_timeout)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .user_agent(concat!("Turngate-Bridge/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            network_session_client: network_client,
            api_base_endpoint: api_base_url.trim_end_matches('/').to_string(),
        })
    }

    // --- ESTRATO DE EMPAREJAMIENTO (ÚNICO SIN FIRMA) ---

    /**
     * Canjea el código de emparejamiento por credenciales de larga vida.
     *
     * # Errors:
     * - `AuthRejected` si el código es inválido, vencido o ya usado.
     * - `KeyMaterialRejected` si la llave devuelta no decodifica.
     */
    #[instrument(skip(self, pair_code, device_info))]
    pub async fn pair(&self, pair_code: &str, device_info: &DeviceInfo) -> Result<(PairResponse, Vec<u8>), UplinkError> {
        let pair_payload = PairRequest {
            pair_code: pair_code.to_string(),
            device_info: device_info.clone(),
        };

        let target_url = format!("{}{}", self.api_base_endpoint, PAIR_PATH);
        let network_response = self
            .network_session_client
            .post(&target_url)
            .json(&pair_payload)
            .send()
            .await?;

        let http_status = network_response.status();
        if http_status == StatusCode::UNAUTHORIZED || http_status == StatusCode::FORBIDDEN {
            return Err(UplinkError::AuthRejected(http_status.as_u16()));
        }
        if !http_status.is_success() {
            return Err(UplinkError::ServerRejection(http_status.as_u16()));
        }

        let pair_response: PairResponse = network_response
            .json()
            .await
            .map_err(|decode_fault| UplinkError::ContractViolation(decode_fault.to_string()))?;

        let device_key_material = hex::decode(&pair_response.device_key)
            .map_err(|decode_fault| UplinkError::KeyMaterialRejected(decode_fault.to_string()))?;
        if device_key_material.is_empty() || pair_response.device_id.is_empty() {
            return Err(UplinkError::KeyMaterialRejected("EMPTY_IDENTITY_MATERIAL".into()));
        }

        info!("🤝 [UPLINK]: Pairing accepted. Device identity [{}] issued.", pair_response.device_id);
        Ok((pair_response, device_key_material))
    }

    // --- ESTRATO DE ENTREGA DE LOTES ---

    /**
     * Envía un lote FIFO de eventos; dentro del lote viajan ordenados
     * por timestamp ascendente.
     */
    #[instrument(skip(self, signer, batch_events), fields(batch = batch_events.len()))]
    pub async fn submit_batch(&self, signer: &RequestSigner, mut batch_events: Vec<StandardAccessEvent>) -> BatchVerdict {
        batch_events.sort_by_key(|event| event.timestamp);

        let member_identifiers: Vec<String> = batch_events
            .iter()
            .map(|event| event.event_identifier.clone())
            .collect();
        let idempotency_key = batch_idempotency_key(&member_identifiers);

        let envelope = CheckinEnvelope { events: batch_events };
        let body_bytes = match serde_json::to_vec(&envelope) {
            Ok(bytes) => bytes,
            Err(encode_fault) => return BatchVerdict::Retryable(format!("ENCODE_FAULT -> {encode_fault}")),
        };

        self.dispatch_signed(signer, CHECKIN_PATH, body_bytes, Some(idempotency_key)).await
    }

    /**
     * Publica el latido periódico con el snapshot de salud como cuerpo.
     */
    #[instrument(skip(self, signer, snapshot))]
    pub async fn push_heartbeat(&self, signer: &RequestSigner, snapshot: &HealthSnapshot) -> BatchVerdict {
        let envelope = HeartbeatEnvelope {
            snapshot: snapshot.clone(),
        };
        let body_bytes = match serde_json::to_vec(&envelope) {
            Ok(bytes) => bytes,
            Err(encode_fault) => return BatchVerdict::Retryable(format!("ENCODE_FAULT -> {encode_fault}")),
        };

        self.dispatch_signed(signer, HEARTBEAT_PATH, body_bytes, None).await
    }

    /// Motor común de envío firmado con triaje de estados.
    async fn dispatch_signed(
        &self,
        signer: &RequestSigner,
        request_path: &str,
        body_bytes: Vec<u8>,
        idempotency_key: Option<String>,
    ) -> BatchVerdict {
        let unix_timestamp = Utc::now().timestamp();
        let signature = signer.sign("POST", request_path, unix_timestamp, &body_bytes);

        let target_url = format!("{}{}", self.api_base_endpoint, request_path);
        let mut request_builder = self
            .network_session_client
            .post(&target_url)
            .header("Content-Type", "application/json")
            .header("X-Device-ID", signer.device_identifier())
            .header("X-Timestamp", unix_timestamp.to_string())
            .header("X-Signature", signature);

        if let Some(key) = idempotency_key {
            request_builder = request_builder.header("X-Idempotency-Key", key);
        }

        match request_builder.body(body_bytes).send().await {
            Ok(network_response) => {
                let http_status = network_response.status();
                if http_status.is_success() {
                    debug!("✅ [UPLINK]: {} accepted ({}).", request_path, http_status);
                    BatchVerdict::Delivered
                } else if http_status == StatusCode::UNAUTHORIZED || http_status == StatusCode::FORBIDDEN {
                    warn!("🔐 [UPLINK]: {} auth rejected ({}).", request_path, http_status);
                    BatchVerdict::AuthRejected(http_status.as_u16())
                } else if http_status.is_client_error() {
                    warn!("🚫 [UPLINK]: {} rejected by server ({}).", request_path, http_status);
                    BatchVerdict::Rejected(http_status.as_u16())
                } else {
                    BatchVerdict::Retryable(format!("HTTP_{}", http_status.as_u16()))
                }
            }
            Err(transport_fault) => BatchVerdict::Retryable(transport_fault.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_normalizes_trailing_slash() {
        let client = UplinkClient::new("https://api.example.com/".into(), Duration::from_secs(10)).unwrap();
        assert_eq!(client.api_base_endpoint, "https://api.example.com");
    }

    #[tokio::test]
    async fn unreachable_endpoint_yields_retryable_verdict() {
        let client = UplinkClient::new("http://127.0.0.1:1".into(), Duration::from_millis(400)).unwrap();
        let signer = RequestSigner::new("dev_test", vec![9u8; 32]);

        let verdict = client.submit_batch(&signer, Vec::new()).await;
        assert!(matches!(verdict, BatchVerdict::Retryable(_)));
    }
}
