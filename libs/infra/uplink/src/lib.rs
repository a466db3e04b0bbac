pub mod backoff;
pub mod client;
pub mod errors;
pub mod probe;

pub use backoff::{BackoffRegistry, ExponentialBackoff};
pub use client::{BatchVerdict, UplinkClient};
pub use errors::UplinkError;
pub use probe::NetworkProbe;
