// [apps/bridge-agent/src/state/door_control.rs]
/*!
 * =================================================================
 * APARATO: DOOR CONTROL MANAGER
 * CLASIFICACIÓN: APPLICATION STATE (ESTRATO L1-APP)
 * RESPONSABILIDAD: ACTUACIÓN SERIALIZADA Y SEGURA DE LA CERRADURA
 *
 * Garantías:
 * - A lo sumo una actuación en vuelo por adaptador (candado fino).
 * - Duración acotada a [1000, 30000] ms antes de tocar hardware.
 * - El re-bloqueo queda garantizado por el temporizador del adaptador
 *   más la ventana inferida aquí: el estado `unlocked` expira solo.
 * - El estado de la puerta es inferido, nunca leído de un sensor.
 * =================================================================
 */

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use turngate_core_crypto::random_hex;
use turngate_domain_adapters::{AdapterError, AdapterRegistry};
use turngate_domain_models::status::DoorState;

/// Cota inferior de la ventana de desbloqueo.
pub const UNLOCK_FLOOR_MS: u64 = 1_000;
/// Cota superior de la ventana de desbloqueo.
pub const UNLOCK_CEILING_MS: u64 = 30_000;

#[derive(Error, Debug)]
pub enum DoorError {
    #[error("[L1_DOOR_FAULT]: ADAPTER_NOT_FOUND -> {0}")]
    AdapterNotFound(String),

    #[error("[L1_DOOR_FAULT]: NO_ACTIVE_ADAPTER")]
    NoActiveAdapter,

    #[error("[L1_DOOR_FAULT]: UNLOCK_REJECTED -> {0}")]
    UnlockRejected(#[from] AdapterError),
}

/// Recibo de una actuación aceptada.
#[derive(Debug, Clone, Serialize)]
pub struct UnlockReceipt {
    pub adapter: String,
    pub duration_ms: u64,
    pub request_identifier: String,
}

/// Estadísticas acumuladas del controlador.
#[derive(Debug, Clone, Serialize)]
pub struct DoorStats {
    pub unlock_count: u64,
    pub failure_count: u64,
    pub last_unlock_at: Option<DateTime<Utc>>,
    pub per_adapter_unlocks: HashMap<String, u64>,
}

struct ActiveWindow {
    adapter_name: String,
    opened_at: DateTime<Utc>,
    duration: Duration,
}

pub struct DoorControlManager {
    registry: Arc<AdapterRegistry>,
    /// Candado por adaptador: serializa actuaciones concurrentes.
    actuation_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    unlock_count: AtomicU64,
    failure_count: AtomicU64,
    last_window: RwLock<Option<ActiveWindow>>,
    per_adapter_unlocks: Mutex<HashMap<String, u64>>,
}

impl DoorControlManager {
    pub fn new(registry: Arc<AdapterRegistry>) -> Self {
        Self {
            registry,
            actuation_locks: Mutex::new(HashMap::new()),
            unlock_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            last_window: RwLock::new(None),
            per_adapter_unlocks: Mutex::new(HashMap::new()),
        }
    }

    /**
     * Desbloquea por el adaptador nombrado, o el primero sano si el
     * nombre viene vacío.
     *
     * # Errors:
     * - `AdapterNotFound` / `NoActiveAdapter` si no hay objetivo.
     * - `UnlockRejected` si el hardware rechazó la actuación; el
     *   contador de fallas se incrementa y la ventana no se abre.
     */
    pub async fn unlock(&self, adapter_name: Option<&str>, requested_duration_ms: u64) -> Result<UnlockReceipt, DoorError> {
        let bounded_duration_ms = requested_duration_ms.clamp(UNLOCK_FLOOR_MS, UNLOCK_CEILING_MS);
        let duration = Duration::from_millis(bounded_duration_ms);

        let target_adapter = match adapter_name {
            Some(name) if !name.is_empty() => self
                .registry
                .get(name)
                .filter(|_| !self.registry.is_disabled(name))
                .ok_or_else(|| DoorError::AdapterNotFound(name.to_string()))?,
            _ => self.registry.first_healthy().ok_or(DoorError::NoActiveAdapter)?,
        };

        let target_name = target_adapter.name().to_string();

        // Serialización por adaptador: un candado fino por nombre.
        let actuation_lock = {
            let mut locks_guard = self.actuation_locks.lock().expect("actuation locks poisoned");
            Arc::clone(
                locks_guard
                    .entry(target_name.clone())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        let _serialized = actuation_lock.lock().await;

        match target_adapter.unlock_door(duration).await {
            Ok(()) => {
                self.unlock_count.fetch_add(1, Ordering::Relaxed);
                {
                    let mut per_adapter = self.per_adapter_unlocks.lock().expect("per-adapter counters poisoned");
                    *per_adapter.entry(target_name.clone()).or_insert(0) += 1;
                }
                *self.last_window.write().expect("window lock poisoned") = Some(ActiveWindow {
                    adapter_name: target_name.clone(),
                    opened_at: Utc::now(),
                    duration,
                });

                let receipt = UnlockReceipt {
                    adapter: target_name,
                    duration_ms: bounded_duration_ms,
                    request_identifier: random_hex(8),
                };

                info!(
                    target: "audit",
                    adapter = %receipt.adapter,
                    duration_ms = receipt.duration_ms,
                    request_id = %receipt.request_identifier,
                    "🔓 [DOOR]: Unlock granted."
                );
                Ok(receipt)
            }
            Err(actuation_fault) => {
                self.failure_count.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target: "audit",
                    adapter = %target_name,
                    "❌ [DOOR]: Unlock rejected: {}", actuation_fault
                );
                Err(DoorError::UnlockRejected(actuation_fault))
            }
        }
    }

    /**
     * Estado inferido: `unlocked` si la última actuación sigue dentro
     * de su ventana; `locked` con adaptadores activos; `unknown` sin
     * ninguno.
     */
    pub fn door_state(&self) -> DoorState {
        if let Some(window) = self.last_window.read().expect("window lock poisoned").as_ref() {
            let elapsed = Utc::now().signed_duration_since(window.opened_at);
            if elapsed.num_milliseconds() >= 0 && (elapsed.num_milliseconds() as u128) < window.duration.as_millis() {
                return DoorState::Unlocked;
            }
        }

        if self.registry.active_count() > 0 {
            DoorState::Locked
        } else {
            DoorState::Unknown
        }
    }

    pub fn stats(&self) -> DoorStats {
        DoorStats {
            unlock_count: self.unlock_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            last_unlock_at: self
                .last_window
                .read()
                .expect("window lock poisoned")
                .as_ref()
                .map(|window| window.opened_at),
            per_adapter_unlocks: self.per_adapter_unlocks.lock().expect("per-adapter counters poisoned").clone(),
        }
    }

    /// Adaptador de la última ventana (para `/door/status`).
    pub fn last_adapter(&self) -> Option<String> {
        self.last_window
            .read()
            .expect("window lock poisoned")
            .as_ref()
            .map(|window| window.adapter_name.clone())
    }
}
