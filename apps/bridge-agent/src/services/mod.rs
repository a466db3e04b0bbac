// [apps/bridge-agent/src/services/mod.rs]
pub mod degradation;
pub mod event_bus;
pub mod health_monitor;
pub mod heartbeat;
pub mod pairing;
pub mod processor;
pub mod recovery;
pub mod tier_sentinel;
pub mod uplink_pump;

pub use degradation::DegradationLadder;
pub use event_bus::EventBus;
pub use health_monitor::HealthMonitor;
pub use heartbeat::HeartbeatService;
pub use processor::{EventProcessor, PipelineEventSink};
pub use recovery::RecoveryEngine;
pub use tier_sentinel::TierSentinel;
pub use uplink_pump::UplinkPump;
