// [apps/bridge-agent/src/lib.rs]
/*!
 * =================================================================
 * APARATO: BRIDGE AGENT LIBRARY ROOT
 * CLASIFICACIÓN: APPLICATION LAYER (ESTRATO L1-APP)
 * RESPONSABILIDAD: EXPOSICIÓN NOMINAL DE MÓDULOS DEL AGENTE
 * =================================================================
 */

pub mod api_error;
pub mod bootstrap;
pub mod config;
pub mod handlers;
pub mod kernel;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;

pub mod prelude {
    pub use crate::config::BridgeConfig;
    pub use crate::kernel::BridgeKernel;
    pub use crate::state::AppState;
}
