// [apps/bridge-agent/src/services/uplink_pump.rs]
/*!
 * =================================================================
 * APARATO: UPLINK PUMP
 * CLASIFICACIÓN: BACKGROUND SERVICE (ESTRATO L4)
 * RESPONSABILIDAD: DRENAJE FIFO DE LA COLA HACIA LA API REMOTA
 *
 * Ciclo: sondeo de red -> arriendo de lote -> apertura de sellos ->
 * firma -> envío -> triaje (ack / ack+rechazo / nack+backoff /
 * pausa por autenticación). Los lotes viajan en orden de arriendo;
 * ante el apagado, el lote en vuelo sella su estado (ack o nack)
 * antes de salir y los pendientes quedan para la próxima corrida.
 * =================================================================
 */

use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::state::AppState;
use turngate_domain_models::events::{QueuedAccessEvent, StandardAccessEvent};
use turngate_infra_uplink::client::CHECKIN_PATH;
use turngate_infra_uplink::BatchVerdict;

/// Pausa entre ciclos sin trabajo pendiente.
const IDLE_CYCLE_DELAY: Duration = Duration::from_secs(1);
/// Pausa cuando el sondeo declara la red caída.
const OFFLINE_CYCLE_DELAY: Duration = Duration::from_secs(5);
/// Pausa del ciclo tras un rechazo de autenticación.
const AUTH_PAUSE_DELAY: Duration = Duration::from_secs(30);

pub struct UplinkPump {
    application_state: AppState,
}

impl UplinkPump {
    pub fn new(application_state: AppState) -> Self {
        Self { application_state }
    }

    /**
     * Bucle perpetuo de drenaje; termina solo con la señal de apagado.
     */
    pub async fn run(self) {
        info!("🛰️  [UPLINK_PUMP]: Dispatch loop online.");
        let mut shutdown_watch = self.application_state.shutdown_watch.clone();

        loop {
            let cycle_delay = self.execute_cycle().await;

            tokio::select! {
                _ = tokio::time::sleep(cycle_delay) => {}
                _ = shutdown_watch.changed() => {
                    info!("🏁 [UPLINK_PUMP]: Shutdown signal received. Loop sealed.");
                    break;
                }
            }
        }
    }

    /**
     * Un ciclo de despacho; devuelve cuánto dormir antes del próximo.
     */
    async fn execute_cycle(&self) -> Duration {
        let state = &self.application_state;

        // 0. COMPUERTA DE AUTENTICACIÓN: tras un 401/403 el enlace pausa
        // y las credenciales se releen de la bóveda en el próximo intento.
        if state.runtime_knobs.uplink_paused() {
            state.runtime_knobs.set_uplink_paused(false);
            debug!("🔐 [UPLINK_PUMP]: Resuming after auth pause; credentials will be re-read.");
            return AUTH_PAUSE_DELAY;
        }

        // 1. CORTOCIRCUITO SIN RED FÍSICA
        if !state.network_probe.is_reachable().await {
            return OFFLINE_CYCLE_DELAY;
        }

        // 2. RESPETO DEL BACKOFF POR ENDPOINT
        let pending_delay = state.backoff_registry.current_delay(CHECKIN_PATH);
        if !pending_delay.is_zero() {
            return pending_delay;
        }

        // 3. ARRIENDO DEL LOTE FIFO
        let batch_size = state.runtime_knobs.uplink_batch_size();
        let lease_timeout = state.runtime_knobs.lease_timeout_seconds();

        let leased_batch = match state.event_queue.lease_batch(batch_size, lease_timeout).await {
            Ok(batch) => batch,
            Err(storage_fault) => {
                error!("💾 [UPLINK_PUMP]: Lease failed: {}", storage_fault);
                return OFFLINE_CYCLE_DELAY;
            }
        };

        if leased_batch.is_empty() {
            return IDLE_CYCLE_DELAY;
        }

        // 4. APERTURA DE SELLOS (las filas corruptas se retiran del juego)
        let (deliverable, poisoned) = self.unseal_batch(&leased_batch);
        if !poisoned.is_empty() {
            warn!(
                target: "audit",
                count = poisoned.len(),
                "☣️  [UPLINK_PUMP]: Sealed payloads failed integrity; acked locally as rejected."
            );
            state
                .pipeline_metrics
                .events_rejected_by_server
                .fetch_add(poisoned.len() as u64, Ordering::Relaxed);
            if let Err(ack_fault) = state.event_queue.ack(&poisoned).await {
                error!("💾 [UPLINK_PUMP]: Poison ack failed: {}", ack_fault);
            }
        }
        if deliverable.is_empty() {
            return IDLE_CYCLE_DELAY;
        }

        let (row_identifiers, batch_events): (Vec<i64>, Vec<StandardAccessEvent>) = deliverable.into_iter().unzip();

        // 5. FIRMA EFÍMERA DESDE LA BÓVEDA
        let signer = match state.keystore.request_signer() {
            Ok(signer) => signer,
            Err(vault_fault) => {
                debug!("🔑 [UPLINK_PUMP]: No credentials yet ({}). Holding batch.", vault_fault);
                if let Err(nack_fault) = state.event_queue.nack(&row_identifiers, "not_paired").await {
                    error!("💾 [UPLINK_PUMP]: Hold nack failed: {}", nack_fault);
                }
                return AUTH_PAUSE_DELAY;
            }
        };

        // 6. ENVÍO Y TRIAJE
        let batch_len = batch_events.len() as u64;
        match state.uplink_client.submit_batch(&signer, batch_events).await {
            BatchVerdict::Delivered => {
                if let Err(ack_fault) = state.event_queue.ack(&row_identifiers).await {
                    error!("💾 [UPLINK_PUMP]: Ack after delivery failed: {}", ack_fault);
                    return OFFLINE_CYCLE_DELAY;
                }
                state.backoff_registry.register_success(CHECKIN_PATH);
                state.pipeline_metrics.batches_delivered.fetch_add(1, Ordering::Relaxed);
                state.pipeline_metrics.events_delivered.fetch_add(batch_len, Ordering::Relaxed);
                state.pipeline_metrics.record_uplink_success();
                debug!("✅ [UPLINK_PUMP]: Batch of {} delivered and acked.", batch_len);
                Duration::ZERO
            }
            BatchVerdict::Rejected(http_status) => {
                // El servidor decidió que no los quiere; reintentar no
                // cambia el veredicto. Ack local con rastro de auditoría:
                // por evento bajo auditoría detallada, resumen si no.
                if state.runtime_knobs.detailed_audit_enabled() {
                    for row_identifier in &row_identifiers {
                        warn!(
                            target: "audit",
                            row_id = row_identifier,
                            http_status,
                            "🚫 [UPLINK_PUMP]: Event rejected by remote API."
                        );
                    }
                } else {
                    warn!(
                        target: "audit",
                        count = row_identifiers.len(),
                        http_status,
                        "🚫 [UPLINK_PUMP]: Batch rejected by remote API."
                    );
                }
                if let Err(ack_fault) = state.event_queue.ack(&row_identifiers).await {
                    error!("💾 [UPLINK_PUMP]: Rejection ack failed: {}", ack_fault);
                }
                state
                    .pipeline_metrics
                    .events_rejected_by_server
                    .fetch_add(batch_len, Ordering::Relaxed);
                state.backoff_registry.register_success(CHECKIN_PATH);
                IDLE_CYCLE_DELAY
            }
            BatchVerdict::AuthRejected(http_status) => {
                warn!(
                    target: "audit",
                    http_status,
                    "🔐 [UPLINK_PUMP]: Authentication rejected. Pausing uplink."
                );
                state.pipeline_metrics.record_uplink_auth_failure();
                state.runtime_knobs.set_uplink_paused(true);
                if let Err(nack_fault) = state.event_queue.nack(&row_identifiers, "auth_rejected").await {
                    error!("💾 [UPLINK_PUMP]: Auth nack failed: {}", nack_fault);
                }
                AUTH_PAUSE_DELAY
            }
            BatchVerdict::Retryable(reason) => {
                if let Err(nack_fault) = state.event_queue.nack(&row_identifiers, &reason).await {
                    error!("💾 [UPLINK_PUMP]: Retry nack failed: {}", nack_fault);
                }
                state.network_probe.invalidate();
                let delay = state.backoff_registry.register_failure(CHECKIN_PATH);
                warn!("↩️  [UPLINK_PUMP]: Transient failure ({}). Backing off {:?}.", reason, delay);
                delay
            }
        }
    }

    /**
     * Abre el sello de cada registro; separa los íntegros de los
     * corruptos (estos últimos jamás podrán viajar).
     */
    fn unseal_batch(&self, leased_batch: &[QueuedAccessEvent]) -> (Vec<(i64, StandardAccessEvent)>, Vec<i64>) {
        let mut deliverable = Vec::with_capacity(leased_batch.len());
        let mut poisoned = Vec::new();

        for queued_event in leased_batch {
            match self
                .application_state
                .payload_sealer
                .unseal(&queued_event.payload_sealed)
                .ok()
                .and_then(|plaintext| serde_json::from_slice::<StandardAccessEvent>(&plaintext).ok())
            {
                Some(full_event) => deliverable.push((queued_event.row_identifier, full_event)),
                None => poisoned.push(queued_event.row_identifier),
            }
        }

        (deliverable, poisoned)
    }
}
