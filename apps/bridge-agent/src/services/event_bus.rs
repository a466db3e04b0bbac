// [apps/bridge-agent/src/services/event_bus.rs]
/*!
 * =================================================================
 * APARATO: BRIDGE EVENT BUS
 * CLASIFICACIÓN: APPLICATION SERVICE (ESTRATO L4)
 * RESPONSABILIDAD: DIFUSIÓN DE TRAMAS HACIA LAS SESIONES WEBSOCKET
 *
 * Canal broadcast multi-productor: el despacho es O(1) respecto al
 * número de receptores y la pérdida de un suscriptor rezagado jamás
 * afecta al reactor principal.
 * =================================================================
 */

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::trace;

use turngate_domain_models::events::StandardAccessEvent;
use turngate_domain_models::fault::FaultSeverity;
use turngate_domain_models::telemetry::StreamFrame;

/// Capacidad del canal de difusión; absorbe ráfagas sin `Lagged`.
const BROADCAST_CHANNEL_CAPACITY: usize = 4_096;

#[derive(Debug, Clone)]
pub struct EventBus {
    transmission_channel: broadcast::Sender<StreamFrame>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CHANNEL_CAPACITY);
        Self {
            transmission_channel: sender,
        }
    }

    /// Nuevo receptor para una sesión WebSocket.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamFrame> {
        self.transmission_channel.subscribe()
    }

    /// Difunde un evento de acceso ya normalizado.
    pub fn publish_access_event(&self, event: StandardAccessEvent) {
        let frame = StreamFrame::AccessEvent {
            timestamp: Utc::now(),
            event_identifier: event.event_identifier.clone(),
            data: event,
        };
        self.dispatch(frame);
    }

    /// Difunde una señal de sistema (nivel, degradación, adaptadores).
    pub fn publish_system(&self, data: serde_json::Value, severity: FaultSeverity) {
        self.dispatch(StreamFrame::System {
            timestamp: Utc::now(),
            data,
            severity,
        });
    }

    fn dispatch(&self, frame: StreamFrame) {
        match self.transmission_channel.send(frame) {
            Ok(subscriber_count) => {
                trace!("📡 [EVENT_BUS]: Frame broadcast to {} links.", subscriber_count);
            }
            Err(_) => {
                // Sin suscriptores: descartar es el comportamiento nominal.
                trace!("💤 [EVENT_BUS]: Frame discarded. No active links.");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.transmission_channel.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
