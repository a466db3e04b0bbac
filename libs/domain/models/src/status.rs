// [libs/domain/models/src/status.rs]
/*!
 * =================================================================
 * APARATO: ADAPTER & DOOR STATUS MODELS
 * CLASIFICACIÓN: DOMAIN MODELS (ESTRATO L2)
 * RESPONSABILIDAD: ESTADOS OBSERVABLES DE ADAPTADORES Y PUERTA
 * =================================================================
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Estado de ciclo de vida de un adaptador de hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterRuntimeState {
    /// Registrado pero aún sin escuchar eventos.
    Inactive,
    /// Escuchando y entregando eventos.
    Active,
    /// Falla reportada; el marco reintenta según política.
    Error,
    /// Suprimido por el operador o por degradación de recursos.
    Disabled,
}

impl AdapterRuntimeState {
    pub fn as_label(&self) -> &'static str {
        match self {
            AdapterRuntimeState::Inactive => "inactive",
            AdapterRuntimeState::Active => "active",
            AdapterRuntimeState::Error => "error",
            AdapterRuntimeState::Disabled => "disabled",
        }
    }

    pub fn parse_label(label: &str) -> Option<Self> {
        match label {
            "inactive" => Some(AdapterRuntimeState::Inactive),
            "active" => Some(AdapterRuntimeState::Active),
            "error" => Some(AdapterRuntimeState::Error),
            "disabled" => Some(AdapterRuntimeState::Disabled),
            _ => None,
        }
    }
}

/// Reporte de estado de un adaptador, persistido y expuesto por la API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterStatusReport {
    /// Nombre único dentro del registro.
    pub name: String,
    pub state: AdapterRuntimeState,
    pub last_event_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl AdapterStatusReport {
    pub fn inactive(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: AdapterRuntimeState::Inactive,
            last_event_at: None,
            error_message: None,
            updated_at: Utc::now(),
        }
    }
}

/// Estado inferido de la puerta; nunca leído de un sensor físico.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoorState {
    /// Un desbloqueo reciente sigue dentro de su ventana de duración.
    Unlocked,
    /// Sin desbloqueo vigente y con adaptadores activos.
    Locked,
    /// Sin adaptadores activos que puedan actuar la cerradura.
    Unknown,
}
