// [libs/domain/adapters/src/webhook.rs]
/*!
 * =================================================================
 * APARATO: WEBHOOK ADAPTER
 * CLASIFICACIÓN: ADAPTER VARIANT (ESTRATO L2)
 * RESPONSABILIDAD: RECEPCIÓN DE EVENTOS EMPUJADOS POR EL VENDOR
 *
 * Expone un oyente HTTP local (`POST /event`) para integraciones que
 * empujan en vez de ser sondeadas. El secreto compartido opcional se
 * compara en tiempo constante. Esta variante no posee actuador de
 * cerradura.
 * =================================================================
 */

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{AdapterError, DoorAccessAdapter, EventSink};
use turngate_core_crypto::constant_time_equals;
use turngate_domain_models::events::{EventKind, RawAccessEvent};
use turngate_domain_models::status::{AdapterRuntimeState, AdapterStatusReport};

/// Cabecera del secreto compartido del vendor.
const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

#[derive(Debug, Clone, Deserialize)]
struct WebhookOptions {
    /// Puerto local de escucha. Obligatorio.
    listen_port: u16,
    /// Secreto compartido opcional; sin él, la validación se omite.
    #[serde(default)]
    shared_secret: Option<String>,
}

/// Cuerpo aceptado del push del vendor.
#[derive(Debug, Deserialize)]
struct VendorPushPayload {
    external_user_id: String,
    /// RFC 3339; ausente = instante de recepción.
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    event_type: String,
    #[serde(default)]
    raw_data: serde_json::Value,
}

/// Estado compartido con los handlers del oyente.
struct WebhookShared {
    adapter_name: String,
    shared_secret: Option<String>,
    event_sink: Arc<RwLock<Option<Arc<dyn EventSink>>>>,
    last_event_at: Arc<Mutex<Option<DateTime<Utc>>>>,
}

pub struct WebhookAdapter {
    adapter_name: String,
    options: Mutex<Option<WebhookOptions>>,
    event_sink: Arc<RwLock<Option<Arc<dyn EventSink>>>>,
    is_listening: Arc<AtomicBool>,
    shutdown_signal: Arc<Notify>,
    server_task: Mutex<Option<JoinHandle<()>>>,
    last_event_at: Arc<Mutex<Option<DateTime<Utc>>>>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl WebhookAdapter {
    pub fn new(adapter_name: impl Into<String>) -> Self {
        Self {
            adapter_name: adapter_name.into(),
            options: Mutex::new(None),
            event_sink: Arc::new(RwLock::new(None)),
            is_listening: Arc::new(AtomicBool::new(false)),
            shutdown_signal: Arc::new(Notify::new()),
            server_task: Mutex::new(None),
            last_event_at: Arc::new(Mutex::new(None)),
            last_error: Arc::new(Mutex::new(None)),
        }
    }
}

/// Handler del push del vendor: valida secreto, normaliza y entrega.
async fn handle_vendor_push(
    State(shared): State<Arc<WebhookShared>>,
    headers: HeaderMap,
    Json(payload): Json<VendorPushPayload>,
) -> StatusCode {
    if let Some(expected_secret) = &shared.shared_secret {
        let presented_secret = headers
            .get(WEBHOOK_SECRET_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();

        if !constant_time_equals(expected_secret.as_bytes(), presented_secret.as_bytes()) {
            warn!(
                target: "audit",
                adapter = %shared.adapter_name,
                "🚫 [WEBHOOK]: Push rejected by shared-secret mismatch."
            );
            return StatusCode::UNAUTHORIZED;
        }
    }

    let Some(event_kind) = EventKind::parse_label(&payload.event_type) else {
        return StatusCode::UNPROCESSABLE_ENTITY;
    };

    if payload.external_user_id.is_empty() {
        return StatusCode::UNPROCESSABLE_ENTITY;
    }

    let raw_event = RawAccessEvent {
        external_user_identifier: payload.external_user_id,
        timestamp: payload.timestamp.unwrap_or_else(Utc::now),
        event_kind,
        raw_data: payload.raw_data,
    };

    let maybe_sink = shared.event_sink.read().expect("sink lock poisoned").clone();
    match maybe_sink {
        Some(active_sink) => {
            active_sink.deliver(&shared.adapter_name, raw_event);
            *shared.last_event_at.lock().expect("last_event lock poisoned") = Some(Utc::now());
            StatusCode::ACCEPTED
        }
        None => StatusCode::SERVICE_UNAVAILABLE,
    }
}

#[async_trait]
impl DoorAccessAdapter for WebhookAdapter {
    fn name(&self) -> &str {
        &self.adapter_name
    }

    async fn initialize(&self, options: &serde_json::Value) -> Result<(), AdapterError> {
        let parsed: WebhookOptions = serde_json::from_value(options.clone())
            .map_err(|parse_fault| AdapterError::ConfigError(parse_fault.to_string()))?;
        *self.options.lock().expect("options lock poisoned") = Some(parsed);
        Ok(())
    }

    async fn start_listening(&self) -> Result<(), AdapterError> {
        if self.is_listening.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let options = self
            .options
            .lock()
            .expect("options lock poisoned")
            .clone()
            .ok_or_else(|| AdapterError::ConfigError("WEBHOOK_NOT_INITIALIZED".into()))?;

        let bind_address = SocketAddr::from(([127, 0, 0, 1], options.listen_port));
        let tcp_listener = tokio::net::TcpListener::bind(bind_address).await.map_err(|bind_fault| {
            self.is_listening.store(false, Ordering::SeqCst);
            AdapterError::HardwareUnavailable(format!("WEBHOOK_BIND_REJECTED -> {bind_fault}"))
        })?;

        let shared_state = Arc::new(WebhookShared {
            adapter_name: self.adapter_name.clone(),
            shared_secret: options.shared_secret.clone(),
            event_sink: Arc::clone(&self.event_sink),
            last_event_at: Arc::clone(&self.last_event_at),
        });

        let listener_router = Router::new()
            .route("/event", post(handle_vendor_push))
            .with_state(shared_state);

        let shutdown_handle = Arc::clone(&self.shutdown_signal);
        let listening_flag = Arc::clone(&self.is_listening);
        let error_handle = Arc::clone(&self.last_error);
        let adapter_label = self.adapter_name.clone();

        let server_task = tokio::spawn(async move {
            let serve_verdict = axum::serve(tcp_listener, listener_router)
                .with_graceful_shutdown(async move { shutdown_handle.notified().await })
                .await;

            if let Err(serve_fault) = serve_verdict {
                warn!("❌ [WEBHOOK]: Listener [{}] collapsed: {}", adapter_label, serve_fault);
                *error_handle.lock().expect("error lock poisoned") = Some(serve_fault.to_string());
            }
            listening_flag.store(false, Ordering::SeqCst);
        });

        *self.server_task.lock().expect("task lock poisoned") = Some(server_task);
        info!("📡 [WEBHOOK]: [{}] listening on {}.", self.adapter_name, bind_address);
        Ok(())
    }

    async fn stop_listening(&self) -> Result<(), AdapterError> {
        if self.is_listening.load(Ordering::SeqCst) {
            self.shutdown_signal.notify_waiters();
        }
        self.is_listening.store(false, Ordering::SeqCst);
        if let Some(task_handle) = self.server_task.lock().expect("task lock poisoned").take() {
            // El apagado elegante ya fue señalado; el abort cubre el caso
            // de un oyente que nunca llegó a aceptar conexiones.
            task_handle.abort();
        }
        Ok(())
    }

    async fn unlock_door(&self, _duration: Duration) -> Result<(), AdapterError> {
        Err(AdapterError::NotSupported(
            "WEBHOOK_HAS_NO_LOCK_ACTUATOR".into(),
        ))
    }

    fn status(&self) -> AdapterStatusReport {
        let error_message = self.last_error.lock().expect("error lock poisoned").clone();
        let state = if error_message.is_some() {
            AdapterRuntimeState::Error
        } else if self.is_listening.load(Ordering::SeqCst) {
            AdapterRuntimeState::Active
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
    use std::sync::mpsc;

    struct ChannelSink {
        sender: mpsc::Sender<(String, RawAccessEvent)>,
    }

    impl EventSink for ChannelSink {
        fn deliver(&self, adapter_name: &str, event: RawAccessEvent) {
            let _ = self.sender.send((adapter_name.to_string(), event));
        }
    }

    #[tokio::test]
    async fn push_with_valid_secret_reaches_the_sink() {
        let adapter = WebhookAdapter::new("front_door_hook");
        adapter
            .initialize(&serde_json::json!({"listen_port": 47911, "shared_secret": "s3cr3t"}))
            .await
            .unwrap();

        let (sender, receiver) = mpsc::channel();
        adapter.bind_sink(Arc::new(ChannelSink { sender }));
        adapter.start_listening().await.unwrap();

        let client = reqwest::Client::new();
        let response = client
            .post("http://127.0.0.1:47911/event")
            .header("X-Webhook-Secret", "s3cr3t")
            .json(&serde_json::json!({
                "external_user_id": "card_777",
                "event_type": "entry",
                "raw_data": {"door": "front"}
            }))
            .send()
            .await
            .expect("PUSH_FAULT");
        assert_eq!(response.status().as_u16(), 202);

        let (adapter_name, event) = receiver.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
        assert_eq!(adapter_name, "front_door_hook");
        assert_eq!(event.external_user_identifier, "card_777");
        assert_eq!(event.event_kind, EventKind::Entry);

        adapter.stop_listening().await.unwrap();
    }

    #[tokio::test]
    async fn push_with_wrong_secret_is_unauthorized() {
        let adapter = WebhookAdapter::new("secure_hook");
        adapter
            .initialize(&serde_json::json!({"listen_port": 47912, "shared_secret": "correcto"}))
            .await
            .unwrap();
        adapter.bind_sink(Arc::new(ChannelSink { sender: mpsc::channel().0 }));
        adapter.start_listening().await.unwrap();

        let response = reqwest::Client::new()
            .post("http://127.0.0.1:47912/event")
            .header("X-Webhook-Secret", "incorrecto")
            .json(&serde_json::json!({"external_user_id": "c1", "event_type": "entry"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 401);

        adapter.stop_listening().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_event_type_is_unprocessable() {
        let adapter = WebhookAdapter::new("strict_hook");
        adapter
            .initialize(&serde_json::json!({"listen_port": 47913}))
            .await
            .unwrap();
        adapter.bind_sink(Arc::new(ChannelSink { sender: mpsc::channel().0 }));
        adapter.start_listening().await.unwrap();

        let response = reqwest::Client::new()
            .post("http://127.0.0.1:47913/event")
            .json(&serde_json::json!({"external_user_id": "c1", "event_type": "levitate"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 422);

        adapter.stop_listening().await.unwrap();
    }

    #[tokio::test]
    async fn webhook_reports_no_lock_actuator() {
        let adapter = WebhookAdapter::new("hook");
        let verdict = adapter.unlock_door(Duration::from_secs(3)).await;
        assert!(matches!(verdict, Err(AdapterError::NotSupported(_))));
    }
}
