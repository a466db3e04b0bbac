pub mod client;
pub mod errors;
pub mod repositories;
pub mod schema;

pub use client::{StoreClient, SynchronousMode};
pub use errors::StoreError;
pub use repositories::adapter_status::AdapterStatusRepository;
pub use repositories::device_config::DeviceConfigRepository;
pub use repositories::event_queue::{EnqueueOutcome, EventQueueRepository};
pub use repositories::user_map::UserMappingRepository;
