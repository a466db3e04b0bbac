pub mod adapter_status;
pub mod device_config;
pub mod event_queue;
pub mod user_map;

pub use adapter_status::AdapterStatusRepository;
pub use device_config::DeviceConfigRepository;
pub use event_queue::{EnqueueOutcome, EventQueueRepository};
pub use user_map::UserMappingRepository;
