// [libs/domain/models/src/tests_serialization.rs]
/*!
 * =================================================================
 * APARATO: CERTIFICADOR DE PARIDAD DE SERIALIZACIÓN
 * CLASIFICACIÓN: EVIDENCIA DE CONTRATO (ESTRATO L2)
 * RESPONSABILIDAD: GARANTIZAR QUE LOS CONTRATOS JSON SEAN ESTABLES
 * =================================================================
 */

use chrono::TimeZone;
use chrono::Utc;

use crate::events::{EventKind, StandardAccessEvent};
use crate::status::AdapterRuntimeState;
use crate::telemetry::ClientDirective;
use crate::tier::ResourceTier;

#[test]
fn event_kind_serializes_lowercase() {
    assert_eq!(serde_json::to_string(&EventKind::Entry).unwrap(), r#""entry""#);
    assert_eq!(serde_json::to_string(&EventKind::Denied).unwrap(), r#""denied""#);
    assert_eq!(EventKind::parse_label("exit"), Some(EventKind::Exit));
    assert_eq!(EventKind::parse_label("teleport"), None);
}

#[test]
fn standard_event_roundtrips_with_millisecond_timestamps() {
    let event = StandardAccessEvent {
        event_identifier: "0f1e2d3c4b5a69788796a5b4c3d2e1f0".into(),
        external_user_identifier: "fp_123".into(),
        internal_user_identifier: None,
        timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
        event_kind: EventKind::Entry,
        is_simulated: true,
        device_identifier: "dev_alpha".into(),
        clock_skew: false,
        raw_data: serde_json::json!({"finger_index": 2}),
    };

    let serialized = serde_json::to_string(&event).unwrap();
    let recovered: StandardAccessEvent = serde_json::from_str(&serialized).unwrap();

    assert_eq!(recovered.event_identifier, event.event_identifier);
    assert_eq!(recovered.timestamp, event.timestamp);
    assert_eq!(recovered.event_kind, EventKind::Entry);
    assert!(recovered.internal_user_identifier.is_none());
}

#[test]
fn adapter_state_and_tier_labels_are_wire_stable() {
    assert_eq!(serde_json::to_string(&AdapterRuntimeState::Disabled).unwrap(), r#""disabled""#);
    assert_eq!(serde_json::to_string(&ResourceTier::Full).unwrap(), r#""full""#);
    assert_eq!(AdapterRuntimeState::parse_label("error"), Some(AdapterRuntimeState::Error));
}

#[test]
fn client_directives_parse_from_dashboard_json() {
    let set_filters: ClientDirective = serde_json::from_str(
        r#"{"action":"set_filters","event_kinds":["entry","denied"],"include_system":false}"#,
    )
    .expect("SET_FILTERS_PARSE_FAULT");
    assert!(matches!(set_filters, ClientDirective::SetFilters { .. }));

    let ping: ClientDirective = serde_json::from_str(r#"{"action":"ping"}"#).unwrap();
    assert!(matches!(ping, ClientDirective::Ping));

    let subscribe: ClientDirective =
        serde_json::from_str(r#"{"action":"subscribe","event_kinds":["exit"]}"#).unwrap();
    assert!(matches!(subscribe, ClientDirective::Subscribe { .. }));
}
