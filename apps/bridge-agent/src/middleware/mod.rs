// [apps/bridge-agent/src/middleware/mod.rs]
pub mod auth;
pub mod network_shield;
pub mod rate_limit;
pub mod recovery_shield;
pub mod request_log;

pub use auth::authentication_guard;
pub use network_shield::{cors_guard, security_headers_guard};
pub use rate_limit::{rate_limit_guard, RateLimiterRegistry};
pub use recovery_shield::{panic_shield, recovery_guard, CircuitBreakerRegistry};
pub use request_log::request_logger;
