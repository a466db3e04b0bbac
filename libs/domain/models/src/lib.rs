pub mod events;
pub mod fault;
pub mod health;
pub mod status;
pub mod telemetry;
pub mod tier;
pub mod wire;

pub use events::{
    ClearCriteria, EventFilter, EventKind, QueueStats, QueuedAccessEvent, RawAccessEvent, StandardAccessEvent,
};
pub use fault::{infer_category_from_message, BridgeFault, FaultCategory, FaultSeverity, RecoveryDirective, RecoveryPolicy};
pub use health::{evaluate_overall_health, AdapterHealthSummary, HealthRuleInputs, HealthSnapshot, OverallHealth};
pub use status::{AdapterRuntimeState, AdapterStatusReport, DoorState};
pub use telemetry::{ClientDirective, StreamFilters, StreamFrame};
pub use tier::{classify_host, ResourceSnapshot, ResourceTier, TierProfile, TierThresholds};
pub use wire::{CheckinEnvelope, DeviceInfo, HeartbeatEnvelope, PairRequest, PairResponse, ServerIssuedConfig};

#[cfg(test)]
mod tests_serialization;
