// [libs/domain/models/src/events.rs]
/*!
 * =================================================================
 * APARATO: ACCESS EVENT DOMAIN MODELS
 * CLASIFICACIÓN: DOMAIN MODELS (ESTRATO L2)
 * RESPONSABILIDAD: CONTRATOS DEL FLUJO DE EVENTOS DE ACCESO
 *
 * Un `RawAccessEvent` nace en el adaptador sin identidad de
 * dispositivo; el procesador lo eleva a `StandardAccessEvent` con
 * identidad determinista, y la cola lo custodia como
 * `QueuedAccessEvent` con la carga sellada en reposo.
 * =================================================================
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Clase de evento de acceso reportada por el hardware de puerta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Ingreso autorizado del socio.
    Entry,
    /// Egreso del socio.
    Exit,
    /// Intento rechazado por el control de acceso.
    Denied,
}

impl EventKind {
    /// Etiqueta estable usada en la derivación de identidad y en SQL.
    pub fn as_label(&self) -> &'static str {
        match self {
            EventKind::Entry => "entry",
            EventKind::Exit => "exit",
            EventKind::Denied => "denied",
        }
    }

    pub fn parse_label(label: &str) -> Option<Self> {
        match label {
            "entry" => Some(EventKind::Entry),
            "exit" => Some(EventKind::Exit),
            "denied" => Some(EventKind::Denied),
            _ => None,
        }
    }
}

/// Evento crudo tal como lo emite un adaptador de hardware.
/// No porta identidad de dispositivo ni identificador propio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAccessEvent {
    /// Identificador del socio en el espacio de nombres del vendor.
    pub external_user_identifier: String,
    /// Marca temporal provista por la fuente (UTC, resolución de ms).
    pub timestamp: DateTime<Utc>,
    pub event_kind: EventKind,
    /// Bolsa opaca con el material original del vendor.
    #[serde(default)]
    pub raw_data: serde_json::Value,
}

/// Evento canónico del pipeline, listo para encolar y transmitir.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardAccessEvent {
    /// Identidad estable de 128 bits; invariante a través de cada
    /// persistencia, relectura, reintento y transmisión.
    pub event_identifier: String,
    pub external_user_identifier: String,
    /// Identidad interna resuelta al momento de la ingesta; `None`
    /// cuando el mapa de socios no conoce al external id.
    pub internal_user_identifier: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub event_kind: EventKind,
    pub is_simulated: bool,
    pub device_identifier: String,
    /// Señal de desfase: la fuente reportó más de 24h en el pasado.
    #[serde(default)]
    pub clock_skew: bool,
    #[serde(default)]
    pub raw_data: serde_json::Value,
}

/// Registro de la cola durable: evento + carga sellada + rastro de envío.
#[derive(Debug, Clone)]
pub struct QueuedAccessEvent {
    /// Identificador monotónico de fila en el almacén.
    pub row_identifier: i64,
    pub event: StandardAccessEvent,
    /// AES-256-GCM de la serialización canónica del evento.
    pub payload_sealed: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
}

/// Filtro de consulta del plano de control sobre la cola de eventos.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub event_kind: Option<EventKind>,
    pub external_user_identifier: Option<String>,
    pub is_simulated: Option<bool>,
    /// `Some(true)` = solo enviados, `Some(false)` = solo pendientes.
    pub sent: Option<bool>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Criterios de purga física de la cola.
///
/// Invariante: `only_sent` y `only_failed` son mutuamente excluyentes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClearCriteria {
    pub older_than: Option<DateTime<Utc>>,
    #[serde(default)]
    pub only_sent: bool,
    /// "Fallado" = pendiente con al menos un reintento consumido.
    #[serde(default)]
    pub only_failed: bool,
    pub event_kind: Option<EventKind>,
}

impl ClearCriteria {
    pub fn is_coherent(&self) -> bool {
        !(self.only_sent && self.only_failed)
    }
}

/// Fotografía estadística de la cola para salud y plano de control.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    /// Registros totales presentes (enviados + pendientes).
    pub depth: u64,
    pub pending: u64,
    pub sent: u64,
    /// Pendientes con `retry_count > 0`.
    pub failed: u64,
    pub evicted_total: u64,
    pub duplicates_total: u64,
    pub oldest_pending_created_at: Option<DateTime<Utc>>,
    pub last_ack_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
}
