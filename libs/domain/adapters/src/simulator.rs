// [libs/domain/adapters/src/simulator.rs]
/*!
 * =================================================================
 * APARATO: SIMULATOR ADAPTER
 * CLASIFICACIÓN: ADAPTER VARIANT (ESTRATO L2)
 * RESPONSABILIDAD: TRÁFICO SINTÉTICO DE SOCIOS PARA PRUEBAS LOCALES
 *
 * Genera eventos de acceso con cadencia y proporción de rechazos
 * configurables. Todo evento emitido porta la marca `simulated` en su
 * bolsa cruda para que el pipeline lo etiquete como tal.
 * =================================================================
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{AdapterError, DoorAccessAdapter, EventSink};
use turngate_domain_models::events::{EventKind, RawAccessEvent};
use turngate_domain_models::status::{AdapterRuntimeState, AdapterStatusReport};

/// Opciones del simulador; todas con valores por defecto razonables.
#[derive(Debug, Clone, Deserialize)]
struct SimulatorOptions {
    /// Segundos entre eventos sintéticos.
    #[serde(default = "default_cadence_seconds")]
    cadence_seconds: u64,
    /// Proporción [0.0, 1.0] de intentos rechazados.
    #[serde(default = "default_denied_ratio")]
    denied_ratio: f64,
    /// Tamaño del padrón sintético de socios.
    #[serde(default = "default_member_pool_size")]
    member_pool_size: u32,
}

fn default_cadence_seconds() -> u64 {
    30
}
fn default_denied_ratio() -> f64 {
    0.1
}
fn default_member_pool_size() -> u32 {
    50
}

pub struct SimulatorAdapter {
    adapter_name: String,
    options: Mutex<Option<SimulatorOptions>>,
    event_sink: Arc<RwLock<Option<Arc<dyn EventSink>>>>,
    is_listening: Arc<AtomicBool>,
    is_unlocked: Arc<AtomicBool>,
    generator_task: Mutex<Option<JoinHandle<()>>>,
    last_event_at: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl SimulatorAdapter {
    pub fn new(adapter_name: impl Into<String>) -> Self {
        Self {
            adapter_name: adapter_name.into(),
            options: Mutex::new(None),
            event_sink: Arc::new(RwLock::new(None)),
            is_listening: Arc::new(AtomicBool::new(false)),
            is_unlocked: Arc::new(AtomicBool::new(false)),
            generator_task: Mutex::new(None),
            last_event_at: Arc::new(Mutex::new(None)),
        }
    }

    /// Fabrica un evento sintético del padrón configurado.
    fn synthesize_event(options: &SimulatorOptions) -> RawAccessEvent {
        let mut rng = rand::thread_rng();
        let member_ordinal = rng.gen_range(1..=options.member_pool_size.max(1));

        let event_kind = if rng.gen::<f64>() < options.denied_ratio {
            EventKind::Denied
        } else if rng.gen::<f64>() < 0.45 {
            EventKind::Exit
        } else {
            EventKind::Entry
        };

        RawAccessEvent {
            external_user_identifier: format!("fp_{:04}", member_ordinal),
            timestamp: Utc::now(),
            event_kind,
            raw_data: serde_json::json!({ "simulated": true, "source": "simulator" }),
        }
    }
}

#[async_trait]
impl DoorAccessAdapter for SimulatorAdapter {
    fn name(&self) -> &str {
        &self.adapter_name
    }

    async fn initialize(&self, options: &serde_json::Value) -> Result<(), AdapterError> {
        let parsed: SimulatorOptions = serde_json::from_value(options.clone())
            .map_err(|parse_fault| AdapterError::ConfigError(parse_fault.to_string()))?;

        if !(0.0..=1.0).contains(&parsed.denied_ratio) {
            return Err(AdapterError::ConfigError(format!(
                "DENIED_RATIO_OUT_OF_RANGE -> {}",
                parsed.denied_ratio
            )));
        }
        if parsed.cadence_seconds == 0 {
            return Err(AdapterError::ConfigError("CADENCE_ZERO_REJECTED".into()));
        }

        *self.options.lock().expect("options lock poisoned") = Some(parsed);
        Ok(())
    }

    async fn start_listening(&self) -> Result<(), AdapterError> {
        if self.is_listening.swap(true, Ordering::SeqCst) {
            return Ok(()); // ya escuchando
        }

        let options = self
            .options
            .lock()
            .expect("options lock poisoned")
            .clone()
            .ok_or_else(|| AdapterError::ConfigError("SIMULATOR_NOT_INITIALIZED".into()))?;

        let sink_handle = Arc::clone(&self.event_sink);
        let listening_flag = Arc::clone(&self.is_listening);
        let last_event_handle = Arc::clone(&self.last_event_at);
        let adapter_label = self.adapter_name.clone();

        let task_handle = tokio::spawn(async move {
            let mut cadence_timer = tokio::time::interval(Duration::from_secs(options.cadence_seconds));
            // El primer tick es inmediato; lo consumimos para no emitir
            // un evento antes de que el arranque termine de asentarse.
            cadence_timer.tick().await;

            while listening_flag.load(Ordering::SeqCst) {
                cadence_timer.tick().await;
                if !listening_flag.load(Ordering::SeqCst) {
                    break;
                }

                let synthetic_event = SimulatorAdapter::synthesize_event(&options);
                let maybe_sink = sink_handle.read().expect("sink lock poisoned").clone();

                if let Some(active_sink) = maybe_sink {
                    debug!("🎲 [SIMULATOR]: Emitting synthetic {:?} for {}.",
                        synthetic_event.event_kind, synthetic_event.external_user_identifier);
                    active_sink.deliver(&adapter_label, synthetic_event);
                    *last_event_handle.lock().expect("last_event lock poisoned") = Some(Utc::now());
                }
            }
        });

        *self.generator_task.lock().expect("task lock poisoned") = Some(task_handle);
        info!("🎬 [SIMULATOR]: [{}] listening with synthetic traffic.", self.adapter_name);
        Ok(())
    }

    async fn stop_listening(&self) -> Result<(), AdapterError> {
        self.is_listening.store(false, Ordering::SeqCst);
        if let Some(task_handle) = self.generator_task.lock().expect("task lock poisoned").take() {
            task_handle.abort();
        }
        Ok(())
    }

    async fn unlock_door(&self, duration: Duration) -> Result<(), AdapterError> {
        self.is_unlocked.store(true, Ordering::SeqCst);
        info!("🔓 [SIMULATOR]: [{}] virtual lock released for {:?}.", self.adapter_name, duration);

        // Temporizador de re-bloqueo propio del adaptador: se cumple
        // aunque el llamador cancele su propia espera.
        let lock_flag = Arc::clone(&self.is_unlocked);
        let adapter_label = self.adapter_name.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            lock_flag.store(false, Ordering::SeqCst);
            info!("🔒 [SIMULATOR]: [{}] virtual lock re-engaged.", adapter_label);
        });

        Ok(())
    }

    fn status(&self) -> AdapterStatusReport {
        let state = if self.is_listening.load(Ordering::SeqCst) {
            AdapterRuntimeState::Active
        } else {
            AdapterRuntimeState::Inactive
        };

        AdapterStatusReport {
            name: self.adapter_name.clone(),
            state,
            last_event_at: *self.last_event_at.lock().expect("last_event lock poisoned"),
            error_message: None,
            updated_at: Utc::now(),
        }
    }

    fn bind_sink(&self, sink: Arc<dyn EventSink>) {
        *self.event_sink.write().expect("sink lock poisoned") = Some(sink);
    }

    fn is_healthy(&self) -> bool {
        self.is_listening.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    struct ChannelSink {
        sender: mpsc::Sender<(String, RawAccessEvent)>,
    }

    impl EventSink for ChannelSink {
        fn deliver(&self, adapter_name: &str, event: RawAccessEvent) {
            let _ = self.sender.send((adapter_name.to_string(), event));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn simulator_emits_through_the_bound_sink() {
        let adapter = SimulatorAdapter::new("sim_test");
        adapter
            .initialize(&serde_json::json!({"cadence_seconds": 1, "denied_ratio": 0.0}))
            .await
            .unwrap();

        let (sender, receiver) = mpsc::channel();
        adapter.bind_sink(Arc::new(ChannelSink { sender }));
        adapter.start_listening().await.unwrap();

        // Avanzamos el reloj virtual más allá de dos cadencias.
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        adapter.stop_listening().await.unwrap();

        let (adapter_name, event) = receiver.try_recv().expect("el simulador debió emitir");
        assert_eq!(adapter_name, "sim_test");
        assert!(!event.external_user_identifier.is_empty());
        assert_eq!(event.raw_data["simulated"], serde_json::json!(true));
        assert_ne!(event.event_kind, EventKind::Denied, "denied_ratio 0.0");
    }

    #[tokio::test]
    async fn stop_before_start_is_harmless() {
        let adapter = SimulatorAdapter::new("sim_idle");
        adapter.stop_listening().await.expect("stop antes de start debe ser seguro");
        assert!(!adapter.is_healthy());
        assert_eq!(adapter.status().state, AdapterRuntimeState::Inactive);
    }

    #[tokio::test(start_paused = true)]
    async fn unlock_re_engages_after_the_window() {
        let adapter = SimulatorAdapter::new("sim_door");
        adapter.unlock_door(Duration::from_secs(2)).await.unwrap();
        assert!(adapter.is_unlocked.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(2_100)).await;
        // Cedemos el turno para que el temporizador de re-bloqueo corra.
        tokio::task::yield_now().await;
        assert!(!adapter.is_unlocked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn invalid_options_are_rejected() {
        let adapter = SimulatorAdapter::new("sim_bad");
        let verdict = adapter.initialize(&serde_json::json!({"denied_ratio": 1.5})).await;
        assert!(matches!(verdict, Err(AdapterError::ConfigError(_))));
    }
}
