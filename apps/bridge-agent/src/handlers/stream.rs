// [apps/bridge-agent/src/handlers/stream.rs]
/*!
 * =================================================================
 * APARATO: EVENT STREAM SOCKET
 * CLASIFICACIÓN: API HANDLER (ESTRATO L4)
 * RESPONSABILIDAD: SESIONES WEBSOCKET DE DIFUSIÓN FILTRADA
 *
 * Orquestación de Triple Tarea por sesión con limpieza determinista:
 * - Worker interno: aplica directivas de filtro del cliente.
 * - Downstream: sifón del bus + latido ping cada 30s con plazo de
 *   pong de 60s.
 * - Upstream: lectura de red hacia el buffer de mando acotado.
 *
 * El buffer por conexión es acotado: un receptor rezagado (Lagged en
 * el bus) se desconecta en vez de degradar al resto. Tope global de
 * sesiones concurrentes con boleto de conteo RAII.
 * =================================================================
 */

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::AppState;
use turngate_domain_models::telemetry::{ClientDirective, StreamFilters, StreamFrame};

/// Latido de servidor hacia el cliente.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
/// Plazo máximo sin pong antes de cortar la sesión.
const PONG_DEADLINE_SECONDS: i64 = 60;
/// Capacidad del buffer de directivas del cliente.
const DIRECTIVE_BUFFER_CAPACITY: usize = 32;

/// Boleto RAII del tope global de conexiones.
struct ConnectionTicket {
    counter: Arc<AtomicUsize>,
}

impl Drop for ConnectionTicket {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

pub async fn handle_stream_upgrade(
    State(state): State<AppState>,
    websocket_upgrade: WebSocketUpgrade,
) -> Response {
    if !state.runtime_knobs.websocket_broadcast_enabled() {
        return (StatusCode::SERVICE_UNAVAILABLE, "websocket broadcast disabled at this tier").into_response();
    }

    let connection_cap = {
        let config_guard = state.config.read().expect("config lock poisoned");
        config_guard.server.websocket_max_connections
    };

    let previous_count = state.websocket_connection_count.fetch_add(1, Ordering::SeqCst);
    if previous_count >= connection_cap {
        state.websocket_connection_count.fetch_sub(1, Ordering::SeqCst);
        warn!("🚦 [STREAM]: Connection cap ({}) reached. Upgrade refused.", connection_cap);
        return (StatusCode::SERVICE_UNAVAILABLE, "connection cap reached").into_response();
    }

    let ticket = ConnectionTicket {
        counter: Arc::clone(&state.websocket_connection_count),
    };

    debug!("🔌 [STREAM]: Negotiating protocol upgrade for a new session...");
    websocket_upgrade.on_upgrade(move |socket| handle_active_session(socket, state, ticket))
}

async fn handle_active_session(socket: WebSocket, state: AppState, _ticket: ConnectionTicket) {
    let (mut socket_sender, mut socket_receiver) = socket.split();
    let mut bus_subscriber = state.event_bus.subscribe();

    let session_identifier = Uuid::new_v4().to_string();
    info!("⚡ [STREAM]: Session {} established.", session_identifier);

    // Saludo inicial con la identidad de la conexión.
    let welcome_frame = StreamFrame::Welcome {
        timestamp: Utc::now(),
        connection_identifier: session_identifier.clone(),
    };
    if let Ok(serialized) = serde_json::to_string(&welcome_frame) {
        if socket_sender.send(Message::Text(serialized)).await.is_err() {
            return;
        }
    }

    let session_filters = Arc::new(Mutex::new(StreamFilters::default()));
    let last_pong_epoch = Arc::new(AtomicI64::new(Utc::now().timestamp()));

    // --- CANAL DE MANDO INTERNO (DESACOPLAMIENTO) ---
    let (directive_sender, mut directive_receiver) = mpsc::channel::<ClientDirective>(DIRECTIVE_BUFFER_CAPACITY);
    // Tramas de respuesta (pong de aplicación) hacia el downstream.
    let (reply_sender, mut reply_receiver) = mpsc::channel::<StreamFrame>(8);

    // --- TAREA 1: WORKER DE DIRECTIVAS ---
    let filters_for_worker = Arc::clone(&session_filters);
    let session_id_worker = session_identifier.clone();
    let mut worker_task = tokio::spawn(async move {
        while let Some(directive) = directive_receiver.recv().await {
            match directive {
                ClientDirective::Ping => {
                    let _ = reply_sender.try_send(StreamFrame::Pong { timestamp: Utc::now() });
                }
                other_directive => {
                    filters_for_worker
                        .lock()
                        .expect("filters lock poisoned")
                        .apply(&other_directive);
                    debug!("🎛️  [STREAM]: Session {} filters updated.", session_id_worker);
                }
            }
        }
    });

    // --- TAREA 2: DOWNSTREAM (bus + keepalive -> socket) ---
    let filters_for_downstream = Arc::clone(&session_filters);
    let pong_for_downstream = Arc::clone(&last_pong_epoch);
    let session_id_downstream = session_identifier.clone();
    let mut downstream_task = tokio::spawn(async move {
        let mut keepalive_timer = tokio::time::interval(KEEPALIVE_INTERVAL);
        keepalive_timer.tick().await;

        loop {
            tokio::select! {
                _ = keepalive_timer.tick() => {
                    let silence = Utc::now().timestamp() - pong_for_downstream.load(Ordering::SeqCst);
                    if silence > PONG_DEADLINE_SECONDS {
                        warn!("💤 [STREAM]: Session {} silent for {}s. Dropping.", session_id_downstream, silence);
                        break;
                    }
                    if socket_sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                },
                reply_frame = reply_receiver.recv() => {
                    let Some(frame) = reply_frame else { break };
                    let Ok(serialized) = serde_json::to_string(&frame) else { continue };
                    if socket_sender.send(Message::Text(serialized)).await.is_err() {
                        break;
                    }
                },
                bus_reception = bus_subscriber.recv() => {
                    match bus_reception {
                        Ok(frame) => {
                            let admitted = filters_for_downstream
                                .lock()
                                .expect("filters lock poisoned")
                                .admits(&frame);
                            if !admitted {
                                continue;
                            }
                            let Ok(serialized) = serde_json::to_string(&frame) else { continue };
                            if socket_sender.send(Message::Text(serialized)).await.is_err() {
                                warn!("⚠️ [STREAM]: Session {} lost downstream link.", session_id_downstream);
                                break;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed_frames)) => {
                            // Buffer por conexión desbordado: el contrato es cortar.
                            warn!(
                                "🐢 [STREAM]: Session {} lagged {} frames. Dropping.",
                                session_id_downstream, missed_frames
                            );
                            break;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                },
            }
        }

        // Despedida explícita cuando el socket sigue vivo.
        let _ = socket_sender.send(Message::Close(None)).await;
    });

    // --- TAREA 3: UPSTREAM (socket -> canal de mando) ---
    let pong_for_upstream = Arc::clone(&last_pong_epoch);
    let session_id_upstream = session_identifier.clone();
    let mut upstream_task = tokio::spawn(async move {
        while let Some(network_read) = socket_receiver.next().await {
            match network_read {
                Ok(Message::Text(raw_directive)) => {
                    match serde_json::from_str::<ClientDirective>(&raw_directive) {
                        Ok(directive) => {
                            if directive_sender.send(directive).await.is_err() {
                                break;
                            }
                        }
                        Err(parse_fault) => {
                            debug!(
                                "🗑️  [STREAM]: Session {} sent unparseable directive: {}",
                                session_id_upstream, parse_fault
                            );
                        }
                    }
                }
                Ok(Message::Pong(_)) => {
                    pong_for_upstream.store(Utc::now().timestamp(), Ordering::SeqCst);
                }
                Ok(Message::Close(_)) => {
                    debug!("🔌 [STREAM]: Session {} closed by remote.", session_id_upstream);
                    break;
                }
                Err(network_fault) => {
                    debug!("❌ [STREAM]: Session {} network fault: {}", session_id_upstream, network_fault);
                    break;
                }
                _ => {} // Binary y Ping entrantes se descartan en este estrato
            }
        }
    });

    // --- LIMPIEZA ATÓMICA: el primero en terminar colapsa al resto ---
    tokio::select! {
        _ = (&mut downstream_task) => {
            upstream_task.abort();
            worker_task.abort();
        },
        _ = (&mut upstream_task) => {
            downstream_task.abort();
            worker_task.abort();
        },
        _ = (&mut worker_task) => {
            downstream_task.abort();
            upstream_task.abort();
        },
    }

    info!("💀 [STREAM]: Session {} resources released.", session_identifier);
}
