// [libs/domain/adapters/src/relay_board.rs]
/*!
 * =================================================================
 * APARATO: RELAY BOARD ADAPTER (VENDOR STUB)
 * CLASIFICACIÓN: ADAPTER VARIANT (ESTRATO L2)
 * RESPONSABILIDAD: CONTROLADORAS DE RELÉ POR TCP DE LÍNEA
 *
 * Modela la familia de controladoras que hablan un protocolo de texto
 * por línea: `EVENT <user> <entry|exit|denied>` en sentido entrante y
 * `UNLOCK <ms>` / `LOCK` en sentido saliente con acuse `OK`.
 *
 * Si la placa es inalcanzable, `unlock_door` falla con
 * `HardwareUnavailable` sin reclamar cambio alguno de cerradura; tras
 * un `UNLOCK` acusado, el re-bloqueo por `LOCK` queda armado en una
 * tarea propia que sobrevive a la cancelación del llamador.
 * =================================================================
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{AdapterError, DoorAccessAdapter, EventSink};
use turngate_domain_models::events::{EventKind, RawAccessEvent};
use turngate_domain_models::status::{AdapterRuntimeState, AdapterStatusReport};

/// Pausa entre reintentos de conexión del oyente.
const LISTENER_RECONNECT_DELAY_SECONDS: u64 = 10;
/// Tiempo máximo de espera del acuse `OK` de la placa.
const ACTUATION_ACK_TIMEOUT_SECONDS: u64 = 5;

#[derive(Debug, Clone, Deserialize)]
struct RelayBoardOptions {
    /// Dirección TCP de la controladora, ej. `192.168.1.40:9001`.
    board_address: String,
    #[serde(default = "default_connect_timeout_ms")]
    connect_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    3_000
}

pub struct RelayBoardAdapter {
    adapter_name: String,
    options: Mutex<Option<RelayBoardOptions>>,
    event_sink: Arc<RwLock<Option<Arc<dyn EventSink>>>>,
    is_listening: Arc<AtomicBool>,
    listener_task: Mutex<Option<JoinHandle<()>>>,
    last_event_at: Arc<Mutex<Option<DateTime<Utc>>>>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl RelayBoardAdapter {
    pub fn new(adapter_name: impl Into<String>) -> Self {
        Self {
            adapter_name: adapter_name.into(),
            options: Mutex::new(None),
            event_sink: Arc::new(RwLock::new(None)),
            is_listening: Arc::new(AtomicBool::new(false)),
            listener_task: Mutex::new(None),
            last_event_at: Arc::new(Mutex::new(None)),
            last_error: Arc::new(Mutex::new(None)),
        }
    }

    fn options_snapshot(&self) -> Result<RelayBoardOptions, AdapterError> {
        self.options
            .lock()
            .expect("options lock poisoned")
            .clone()
            .ok_or_else(|| AdapterError::ConfigError("RELAY_BOARD_NOT_INITIALIZED".into()))
    }

    async fn open_board_link(options: &RelayBoardOptions) -> Result<TcpStream, AdapterError> {
        let connect_attempt = tokio::time::timeout(
            Duration::from_millis(options.connect_timeout_ms),
            TcpStream::connect(&options.board_address),
        )
        .await;

        match connect_attempt {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(io_fault)) => Err(AdapterError::HardwareUnavailable(format!(
                "BOARD_LINK_REFUSED -> {io_fault}"
            ))),
            Err(_) => Err(AdapterError::HardwareUnavailable("BOARD_LINK_TIMEOUT".into())),
        }
    }

    /// Parsea una línea entrante `EVENT <user> <kind>` de la placa.
    fn parse_board_line(line: &str) -> Option<RawAccessEvent> {
        let mut segments = line.split_whitespace();
        if segments.next()? != "EVENT" {
            return None;
        }
        let user_identifier = segments.next()?.to_string();
        let event_kind = EventKind::parse_label(segments.next()?)?;

        Some(RawAccessEvent {
            external_user_identifier: user_identifier,
            timestamp: Utc::now(),
            event_kind,
            raw_data: serde_json::json!({ "source": "relay_board", "line": line }),
        })
    }
}

#[async_trait]
impl DoorAccessAdapter for RelayBoardAdapter {
    fn name(&self) -> &str {
        &self.adapter_name
    }

    async fn initialize(&self, options: &serde_json::Value) -> Result<(), AdapterError> {
        let parsed: RelayBoardOptions = serde_json::from_value(options.clone())
            .map_err(|parse_fault| AdapterError::ConfigError(parse_fault.to_string()))?;

        if parsed.board_address.is_empty() {
            return Err(AdapterError::ConfigError("BOARD_ADDRESS_EMPTY".into()));
        }

        *self.options.lock().expect("options lock poisoned") = Some(parsed);
        Ok(())
    }

    async fn start_listening(&self) -> Result<(), AdapterError> {
        if self.is_listening.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let options = match self.options_snapshot() {
            Ok(options) => options,
            Err(config_fault) => {
                self.is_listening.store(false, Ordering::SeqCst);
                return Err(config_fault);
            }
        };

        let sink_handle = Arc::clone(&self.event_sink);
        let listening_flag = Arc::clone(&self.is_listening);
        let last_event_handle = Arc::clone(&self.last_event_at);
        let error_handle = Arc::clone(&self.last_error);
        let adapter_label = self.adapter_name.clone();

        let task_handle = tokio::spawn(async move {
            while listening_flag.load(Ordering::SeqCst) {
                match RelayBoardAdapter::open_board_link(&options).await {
                    Ok(stream) => {
                        *error_handle.lock().expect("error lock poisoned") = None;
                        info!("🔗 [RELAY_BOARD]: [{}] link established with {}.", adapter_label, options.board_address);

                        let mut line_reader = BufReader::new(stream).lines();
                        loop {
                            match line_reader.next_line().await {
                                Ok(Some(board_line)) => {
                                    if let Some(raw_event) = RelayBoardAdapter::parse_board_line(&board_line) {
                                        let maybe_sink =
                                            sink_handle.read().expect("sink lock poisoned").clone();
                                        if let Some(active_sink) = maybe_sink {
                                            if listening_flag.load(Ordering::SeqCst) {
                                                active_sink.deliver(&adapter_label, raw_event);
                                                *last_event_handle.lock().expect("last_event lock poisoned") =
                                                    Some(Utc::now());
                                            }
                                        }
                                    }
                                }
                                Ok(None) => break, // la placa cerró el enlace
                                Err(read_fault) => {
                                    warn!("⚠️ [RELAY_BOARD]: [{}] read fault: {}", adapter_label, read_fault);
                                    break;
                                }
                            }
                            if !listening_flag.load(Ordering::SeqCst) {
                                return;
                            }
                        }
                    }
                    Err(link_fault) => {
                        *error_handle.lock().expect("error lock poisoned") = Some(link_fault.to_string());
                    }
                }

                if listening_flag.load(Ordering::SeqCst) {
                    tokio::time::sleep(Duration::from_secs(LISTENER_RECONNECT_DELAY_SECONDS)).await;
                }
            }
        });

        *self.listener_task.lock().expect("task lock poisoned") = Some(task_handle);
        Ok(())
    }

    async fn stop_listening(&self) -> Result<(), AdapterError> {
        self.is_listening.store(false, Ordering::SeqCst);
        if let Some(task_handle) = self.listener_task.lock().expect("task lock poisoned").take() {
            task_handle.abort();
        }
        Ok(())
    }

    async fn unlock_door(&self, duration: Duration) -> Result<(), AdapterError> {
        let options = self.options_snapshot()?;
        let mut board_stream = Self::open_board_link(&options).await?;

        let unlock_command = format!("UNLOCK {}\n", duration.as_millis());
        board_stream
            .write_all(unlock_command.as_bytes())
            .await
            .map_err(|write_fault| AdapterError::HardwareError(format!("UNLOCK_WRITE_FAULT -> {write_fault}")))?;

        // Acuse obligatorio: sin `OK`, no reclamamos cambio de cerradura.
        let mut ack_reader = BufReader::new(&mut board_stream).lines();
        let ack_verdict = tokio::time::timeout(
            Duration::from_secs(ACTUATION_ACK_TIMEOUT_SECONDS),
            ack_reader.next_line(),
        )
        .await;

        match ack_verdict {
            Ok(Ok(Some(line))) if line.trim() == "OK" => {}
            Ok(Ok(other)) => {
                return Err(AdapterError::HardwareError(format!(
                    "UNLOCK_ACK_REJECTED -> {other:?}"
                )))
            }
            Ok(Err(read_fault)) => {
                return Err(AdapterError::HardwareError(format!("UNLOCK_ACK_READ_FAULT -> {read_fault}")))
            }
            Err(_) => return Err(AdapterError::HardwareError("UNLOCK_ACK_TIMEOUT".into())),
        }

        info!("🔓 [RELAY_BOARD]: [{}] lock released for {:?}.", self.adapter_name, duration);

        // Re-bloqueo garantizado: la tarea posee su propio enlace y no
        // depende de que el llamador siga esperando.
        let adapter_label = self.adapter_name.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            match RelayBoardAdapter::open_board_link(&options).await {
                Ok(mut relock_stream) => {
                    if let Err(relock_fault) = relock_stream.write_all(b"LOCK\n").await {
                        warn!("🚨 [RELAY_BOARD]: [{}] RE-LOCK WRITE FAILED: {}", adapter_label, relock_fault);
                    } else {
                        info!("🔒 [RELAY_BOARD]: [{}] lock re-engaged.", adapter_label);
                    }
                }
                Err(link_fault) => {
                    warn!("🚨 [RELAY_BOARD]: [{}] RE-LOCK LINK FAILED: {}", adapter_label, link_fault);
                }
            }
        });

        Ok(())
    }

    fn status(&self) -> AdapterStatusReport {
        let error_message = self.last_error.lock().expect("error lock poisoned").clone();
        let state = if self.is_listening.load(Ordering::SeqCst) {
            if error_message.is_some() {
                AdapterRuntimeState::Error
            } else {
                AdapterRuntimeState::Active
            }
        } else {
            AdapterRuntimeState::Inactive
        };

        AdapterStatusReport {
            name: self.adapter_name.clone(),
            state,
            last_event_at: *self.last_event_at.lock().expect("last_event lock poisoned"),
            error_message,
            updated_at: Utc::now(),
        }
    }

    fn bind_sink(&self, sink: Arc<dyn EventSink>) {
        *self.event_sink.write().expect("sink lock poisoned") = Some(sink);
    }

    fn is_healthy(&self) -> bool {
        self.is_listening.load(Ordering::SeqCst)
            && self.last_error.lock().expect("error lock poisoned").is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn board_lines_parse_into_raw_events() {
        let event = RelayBoardAdapter::parse_board_line("EVENT card_42 entry").expect("PARSE_FAULT");
        assert_eq!(event.external_user_identifier, "card_42");
        assert_eq!(event.event_kind, EventKind::Entry);

        assert!(RelayBoardAdapter::parse_board_line("HEARTBEAT 1").is_none());
        assert!(RelayBoardAdapter::parse_board_line("EVENT card_42 levitate").is_none());
        assert!(RelayBoardAdapter::parse_board_line("").is_none());
    }

    #[tokio::test]
    async fn unreachable_board_fails_without_claiming_lock_change() {
        let adapter = RelayBoardAdapter::new("back_door_relay");
        adapter
            .initialize(&serde_json::json!({
                "board_address": "127.0.0.1:1",
                "connect_timeout_ms": 200
            }))
            .await
            .unwrap();

        let verdict = adapter.unlock_door(Duration::from_secs(3)).await;
        assert!(matches!(verdict, Err(AdapterError::HardwareUnavailable(_))));
    }

    #[tokio::test]
    async fn unlock_waits_for_the_board_acknowledgement() {
        // Placa simulada: acusa `OK` al primer comando UNLOCK.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let board_address = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let (read_half, mut write_half) = socket.split();
                let mut line_reader = BufReader::new(read_half).lines();
                if let Ok(Some(line)) = line_reader.next_line().await {
                    assert!(line.starts_with("UNLOCK "));
                    let _ = write_half.write_all(b"OK\n").await;
                }
            }
        });

        let adapter = RelayBoardAdapter::new("front_relay");
        adapter
            .initialize(&serde_json::json!({"board_address": board_address}))
            .await
            .unwrap();

        adapter
            .unlock_door(Duration::from_millis(50))
            .await
            .expect("la placa acusó OK");
    }
}
