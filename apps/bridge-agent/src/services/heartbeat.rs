// [apps/bridge-agent/src/services/heartbeat.rs]
/*!
 * =================================================================
 * APARATO: HEARTBEAT SERVICE
 * CLASIFICACIÓN: BACKGROUND SERVICE (ESTRATO L4)
 * RESPONSABILIDAD: LATIDO FIRMADO HACIA LA API REMOTA
 *
 * Cadencia gobernada por el nivel (300/60/30 s) y re-leída en cada
 * vuelta: un cambio de nivel o una degradación la mueve sin reiniciar
 * el servicio. Un latido fallido se registra pero jamás voltea por sí
 * solo el estado local del puente.
 * =================================================================
 */

use tracing::{debug, info, warn};

use crate::services::health_monitor::HealthMonitor;
use crate::state::AppState;
use turngate_infra_uplink::BatchVerdict;

pub struct HeartbeatService {
    application_state: AppState,
    health_monitor: HealthMonitor,
}

impl HeartbeatService {
    pub fn new(application_state: AppState) -> Self {
        let health_monitor = HealthMonitor::new(application_state.clone());
        Self {
            application_state,
            health_monitor,
        }
    }

    pub async fn run(self) {
        info!("💓 [HEARTBEAT]: Pulse loop online.");
        let mut shutdown_watch = self.application_state.shutdown_watch.clone();

        loop {
            let pulse_interval = self.application_state.runtime_knobs.heartbeat_interval();

            tokio::select! {
                _ = tokio::time::sleep(pulse_interval) => self.pulse_once().await,
                _ = shutdown_watch.changed() => break,
            }
        }
        info!("🏁 [HEARTBEAT]: Pulse loop stopped.");
    }

    async fn pulse_once(&self) {
        let state = &self.application_state;
        state.pipeline_metrics.record_heartbeat_tick();

        if !state.network_probe.is_reachable().await {
            debug!("📵 [HEARTBEAT]: Offline; pulse skipped.");
            return;
        }

        let signer = match state.keystore.request_signer() {
            Ok(signer) => signer,
            Err(_) => {
                debug!("🔑 [HEARTBEAT]: Device not paired; pulse skipped.");
                return;
            }
        };

        let snapshot = self.health_monitor.snapshot().await;

        match state.uplink_client.push_heartbeat(&signer, &snapshot).await {
            BatchVerdict::Delivered => {
                state.pipeline_metrics.record_uplink_success();
                debug!("💓 [HEARTBEAT]: Pulse accepted ({:?}).", snapshot.overall);
            }
            BatchVerdict::AuthRejected(http_status) => {
                warn!(
                    target: "audit",
                    http_status,
                    "🔐 [HEARTBEAT]: Pulse auth rejected."
                );
                state.pipeline_metrics.record_uplink_auth_failure();
            }
            BatchVerdict::Rejected(http_status) => {
                warn!("🚫 [HEARTBEAT]: Pulse rejected (HTTP {}).", http_status);
            }
            BatchVerdict::Retryable(reason) => {
                // Fallo transitorio: se registra y el próximo pulso reintenta.
                warn!("↩️  [HEARTBEAT]: Pulse failed transiently: {}", reason);
            }
        }
    }
}
