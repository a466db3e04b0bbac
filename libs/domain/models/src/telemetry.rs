// [libs/domain/models/src/telemetry.rs]
/*!
 * =================================================================
 * APARATO: STREAM TELEMETRY CONTRACTS
 * CLASIFICACIÓN: DOMAIN MODELS (ESTRATO L2)
 * RESPONSABILIDAD: TRAMAS DEL CANAL WEBSOCKET Y DIRECTIVAS DE CLIENTE
 * =================================================================
 */

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{EventKind, StandardAccessEvent};
use crate::fault::FaultSeverity;

/// Trama saliente del canal de difusión hacia un cliente WebSocket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    /// Saludo inicial con la identidad de la conexión.
    Welcome {
        timestamp: DateTime<Utc>,
        connection_identifier: String,
    },
    /// Evento de acceso normalizado que atravesó el pipeline.
    AccessEvent {
        timestamp: DateTime<Utc>,
        data: StandardAccessEvent,
        event_identifier: String,
    },
    /// Señal de sistema (cambio de tier, degradación, adaptador caído).
    System {
        timestamp: DateTime<Utc>,
        data: serde_json::Value,
        severity: FaultSeverity,
    },
    /// Respuesta al `ping` de aplicación del cliente.
    Pong { timestamp: DateTime<Utc> },
}

/// Directiva entrante de un cliente del canal.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientDirective {
    /// Reemplaza el juego completo de filtros de la conexión.
    SetFilters {
        #[serde(default)]
        event_kinds: Option<HashSet<EventKind>>,
        #[serde(default)]
        device_identifier: Option<String>,
        #[serde(default)]
        user_identifier: Option<String>,
        #[serde(default)]
        minimum_severity: Option<FaultSeverity>,
        #[serde(default)]
        include_system: Option<bool>,
    },
    /// Añade clases de evento al conjunto suscrito.
    Subscribe { event_kinds: HashSet<EventKind> },
    /// Retira clases de evento del conjunto suscrito.
    Unsubscribe { event_kinds: HashSet<EventKind> },
    Ping,
}

/// Filtros vigentes de una conexión del canal.
#[derive(Debug, Clone)]
pub struct StreamFilters {
    /// `None` = todas las clases de evento.
    pub event_kinds: Option<HashSet<EventKind>>,
    pub device_identifier: Option<String>,
    pub user_identifier: Option<String>,
    pub minimum_severity: FaultSeverity,
    pub include_system: bool,
}

impl Default for StreamFilters {
    fn default() -> Self {
        Self {
            event_kinds: None,
            device_identifier: None,
            user_identifier: None,
            minimum_severity: FaultSeverity::Info,
            include_system: true,
        }
    }
}

impl StreamFilters {
    /// Decide si una trama atraviesa los filtros de la conexión.
    pub fn admits(&self, frame: &StreamFrame) -> bool {
        match frame {
            StreamFrame::Welcome { .. } | StreamFrame::Pong { .. } => true,
            StreamFrame::System { severity, .. } => self.include_system && *severity >= self.minimum_severity,
            StreamFrame::AccessEvent { data, .. } => {
                if let Some(kinds) = &self.event_kinds {
                    if !kinds.contains(&data.event_kind) {
                        return false;
                    }
                }
                if let Some(device) = &self.device_identifier {
                    if device != &data.device_identifier {
                        return false;
                    }
                }
                if let Some(user) = &self.user_identifier {
                    let matches_external = &data.external_user_identifier == user;
                    let matches_internal = data.internal_user_identifier.as_deref() == Some(user.as_str());
                    if !matches_external && !matches_internal {
                        return false;
                    }
                }
                true
            }
        }
    }

    /// Aplica una directiva de cliente sobre los filtros vigentes.
    pub fn apply(&mut self, directive: &ClientDirective) {
        match directive {
            ClientDirective::SetFilters {
                event_kinds,
                device_identifier,
                user_identifier,
                minimum_severity,
                include_system,
            } => {
                self.event_kinds = event_kinds.clone();
                self.device_identifier = device_identifier.clone();
                self.user_identifier = user_identifier.clone();
                if let Some(severity) = minimum_severity {
                    self.minimum_severity = *severity;
                }
                if let Some(include) = include_system {
                    self.include_system = *include;
                }
            }
            ClientDirective::Subscribe { event_kinds } => {
                let current = self.event_kinds.get_or_insert_with(HashSet::new);
                current.extend(event_kinds.iter().copied());
            }
            ClientDirective::Unsubscribe { event_kinds } => {
                if let Some(current) = self.event_kinds.as_mut() {
                    for kind in event_kinds {
                        current.remove(kind);
                    }
                } else {
                    // Sin filtro previo: el conjunto implícito era "todo";
                    // materializamos el complemento de lo retirado.
                    let mut remaining: HashSet<EventKind> =
                        [EventKind::Entry, EventKind::Exit, EventKind::Denied].into_iter().collect();
                    for kind in event_kinds {
                        remaining.remove(kind);
                    }
                    self.event_kinds = Some(remaining);
                }
            }
            ClientDirective::Ping => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(kind: EventKind) -> StreamFrame {
        StreamFrame::AccessEvent {
            timestamp: Utc::now(),
            event_identifier: "abc123".into(),
            data: StandardAccessEvent {
                event_identifier: "abc123".into(),
                external_user_identifier: "fp_123".into(),
                internal_user_identifier: Some("member_9".into()),
                timestamp: Utc::now(),
                event_kind: kind,
                is_simulated: false,
                device_identifier: "dev_alpha".into(),
                clock_skew: false,
                raw_data: serde_json::Value::Null,
            },
        }
    }

    #[test]
    fn default_filters_admit_everything() {
        let filters = StreamFilters::default();
        assert!(filters.admits(&sample_event(EventKind::Entry)));
        assert!(filters.admits(&StreamFrame::Pong { timestamp: Utc::now() }));
    }

    #[test]
    fn subscribe_after_unsubscribe_restores_a_kind() {
        let mut filters = StreamFilters::default();

        filters.apply(&ClientDirective::Unsubscribe {
            event_kinds: [EventKind::Denied].into_iter().collect(),
        });
        assert!(!filters.admits(&sample_event(EventKind::Denied)));
        assert!(filters.admits(&sample_event(EventKind::Entry)));

        filters.apply(&ClientDirective::Subscribe {
            event_kinds: [EventKind::Denied].into_iter().collect(),
        });
        assert!(filters.admits(&sample_event(EventKind::Denied)));
    }

    #[test]
    fn user_filter_matches_internal_or_external_identity() {
        let mut filters = StreamFilters::default();
        filters.apply(&ClientDirective::SetFilters {
            event_kinds: None,
            device_identifier: None,
            user_identifier: Some("member_9".into()),
            minimum_severity: None,
            include_system: None,
        });
        assert!(filters.admits(&sample_event(EventKind::Entry)));

        filters.user_identifier = Some("someone_else".into());
        assert!(!filters.admits(&sample_event(EventKind::Entry)));
    }

    #[test]
    fn system_frames_respect_severity_floor() {
        let mut filters = StreamFilters::default();
        filters.minimum_severity = FaultSeverity::High;

        let low_frame = StreamFrame::System {
            timestamp: Utc::now(),
            data: serde_json::json!({"kind": "tier_change"}),
            severity: FaultSeverity::Low,
        };
        let critical_frame = StreamFrame::System {
            timestamp: Utc::now(),
            data: serde_json::json!({"kind": "auth_failure"}),
            severity: FaultSeverity::Critical,
        };

        assert!(!filters.admits(&low_frame));
        assert!(filters.admits(&critical_frame));

        filters.include_system = false;
        assert!(!filters.admits(&critical_frame));
    }
}
