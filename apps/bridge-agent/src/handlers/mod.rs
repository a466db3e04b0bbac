// [apps/bridge-agent/src/handlers/mod.rs]
pub mod adapters;
pub mod config;
pub mod door;
pub mod events;
pub mod health;
pub mod metrics;
pub mod status;
pub mod stream;
pub mod ws_admin;
