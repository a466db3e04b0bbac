// [libs/domain/adapters/src/lib.rs]
/*!
 * =================================================================
 * APARATO: DOOR ADAPTER FRAMEWORK
 * CLASIFICACIÓN: DOMAIN CONTRACT (ESTRATO L2)
 * RESPONSABILIDAD: CONTRATO DE CAPACIDADES DE HARDWARE Y SUMIDERO
 *                  DE EVENTOS
 *
 * Cada adaptador es polimórfico sobre este contrato; los adaptadores
 * no comparten estado ni se llaman entre sí. El sumidero registrado
 * solo puede recibir eventos dentro de la ventana
 * [start_listening exitoso, stop_listening].
 * =================================================================
 */

pub mod registry;
pub mod relay_board;
pub mod simulator;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use turngate_domain_models::events::RawAccessEvent;
use turngate_domain_models::status::AdapterStatusReport;

pub use registry::AdapterRegistry;

#[derive(Error, Debug)]
pub enum AdapterError {
    /// Opciones del adaptador incompletas o contradictorias.
    #[error("[L2_ADAPTER_FAULT]: CONFIG_REJECTED -> {0}")]
    ConfigError(String),

    /// El hardware no responde; el estado de la cerradura no cambió.
    #[error("[L2_ADAPTER_FAULT]: HARDWARE_UNAVAILABLE -> {0}")]
    HardwareUnavailable(String),

    /// El hardware respondió con una falla durante la operación.
    #[error("[L2_ADAPTER_FAULT]: HARDWARE_ERROR -> {0}")]
    HardwareError(String),

    /// La variante no implementa esta capacidad (ej. webhook sin actuador).
    #[error("[L2_ADAPTER_FAULT]: CAPABILITY_NOT_SUPPORTED -> {0}")]
    NotSupported(String),
}

/**
 * Sumidero de eventos crudos; la implementación vive en el pipeline.
 *
 * La entrega es síncrona y no suspensiva: el adaptador empuja hacia
 * un canal acotado y retorna de inmediato.
 */
pub trait EventSink: Send + Sync {
    fn deliver(&self, adapter_name: &str, event: RawAccessEvent);
}

/**
 * Contrato de capacidades de un adaptador de puerta.
 *
 * Garantías exigidas a toda implementación:
 * - `initialize` es idempotente.
 * - `stop_listening` es seguro en cualquier momento, incluso antes de
 *   `start_listening`.
 * - `unlock_door` garantiza el re-bloqueo en toda salida (éxito,
 *   timeout, error, cancelación) y falla con `HardwareError` sin
 *   alterar la cerradura si el hardware es inalcanzable.
 */
#[async_trait]
pub trait DoorAccessAdapter: Send + Sync {
    /// Nombre único dentro del registro.
    fn name(&self) -> &str;

    async fn initialize(&self, options: &serde_json::Value) -> Result<(), AdapterError>;

    /// Comienza la entrega de eventos; retorna cuando la escucha quedó
    /// establecida.
    async fn start_listening(&self) -> Result<(), AdapterError>;

    async fn stop_listening(&self) -> Result<(), AdapterError>;

    async fn unlock_door(&self, duration: Duration) -> Result<(), AdapterError>;

    fn status(&self) -> AdapterStatusReport;

    /// Registra el único callback de eventos de la instancia.
    fn bind_sink(&self, sink: Arc<dyn EventSink>);

    fn is_healthy(&self) -> bool;
}
