// [libs/domain/models/src/wire.rs]
/*!
 * =================================================================
 * APARATO: REMOTE API WIRE CONTRACTS
 * CLASIFICACIÓN: DOMAIN MODELS (ESTRATO L2)
 * RESPONSABILIDAD: CUERPOS JSON DEL EMPAREJAMIENTO, CHECKIN Y LATIDO
 * =================================================================
 */

use serde::{Deserialize, Serialize};

use crate::events::StandardAccessEvent;
use crate::health::HealthSnapshot;
use crate::tier::ResourceTier;

/// Descripción del host enviada durante el emparejamiento.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub hostname: String,
    pub platform: String,
    pub version: String,
    pub tier: ResourceTier,
}

/// Cuerpo de `POST /api/v1/devices/pair`. Única llamada sin firma.
#[derive(Debug, Clone, Serialize)]
pub struct PairRequest {
    pub pair_code: String,
    pub device_info: DeviceInfo,
}

/// Parámetros operativos sugeridos por el servidor al emparejar.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerIssuedConfig {
    pub heartbeat_interval: Option<u64>,
    pub queue_max_size: Option<u64>,
    pub unlock_duration: Option<u64>,
}

/// Respuesta del emparejamiento: identidad de larga vida del puente.
#[derive(Debug, Clone, Deserialize)]
pub struct PairResponse {
    pub device_id: String,
    /// Secreto HMAC compartido, codificado en hex.
    pub device_key: String,
    #[serde(default)]
    pub config: Option<ServerIssuedConfig>,
}

/// Cuerpo de `POST /api/v1/checkin`: un lote FIFO de eventos.
/// Dentro del lote los eventos van ordenados por timestamp ascendente.
#[derive(Debug, Clone, Serialize)]
pub struct CheckinEnvelope {
    pub events: Vec<StandardAccessEvent>,
}

/// Cuerpo de `POST /api/v1/devices/heartbeat`: el snapshot de salud.
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatEnvelope {
    #[serde(flatten)]
    pub snapshot: HealthSnapshot,
}
