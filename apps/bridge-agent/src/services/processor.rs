// [apps/bridge-agent/src/services/processor.rs]
/*!
 * =================================================================
 * APARATO: EVENT PROCESSOR
 * CLASIFICACIÓN: APPLICATION SERVICE (ESTRATO L4)
 * RESPONSABILIDAD: NORMALIZACIÓN, ENRIQUECIMIENTO Y DEDUPLICACIÓN
 *
 * Consumidor único de un canal alimentado por todos los sumideros de
 * adaptador: el orden de emisión por adaptador se preserva de punta a
 * punta. Cadena por evento:
 *   validar -> resolver socio -> identidad determinista -> dedup ->
 *   sellar -> encolar.
 *
 * La identidad es un PRF con llave del dispositivo sobre la tupla
 * (device, adapter, external_user, timestamp_ms, kind): reingerir el
 * mismo evento crudo tras un reinicio produce el mismo identificador
 * y la deduplicación lo absorbe.
 * =================================================================
 */

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::state::AppState;
use turngate_core_crypto::derive_event_identity;
use turngate_domain_adapters::EventSink;
use turngate_domain_models::events::{RawAccessEvent, StandardAccessEvent};
use turngate_infra_store::EnqueueOutcome;

/// Ventana de validación hacia el pasado.
const PAST_ACCEPTANCE_HOURS: i64 = 24;
/// Ventana de validación hacia el futuro.
const FUTURE_ACCEPTANCE_MINUTES: i64 = 5;

/// Sumidero del pipeline: los adaptadores empujan aquí sin suspender.
pub struct PipelineEventSink {
    transmission_sender: mpsc::UnboundedSender<(String, RawAccessEvent)>,
}

impl EventSink for PipelineEventSink {
    fn deliver(&self, adapter_name: &str, event: RawAccessEvent) {
        if let Err(channel_fault) = self.transmission_sender.send((adapter_name.to_string(), event)) {
            error!("❌ [PROCESSOR]: Ingest channel collapsed: {}", channel_fault);
        }
    }
}

pub struct EventProcessor {
    application_state: AppState,
    reception_receiver: mpsc::UnboundedReceiver<(String, RawAccessEvent)>,
}

impl EventProcessor {
    /// Construye el procesador y el sumidero que lo alimenta.
    pub fn new(application_state: AppState) -> (Self, Arc<PipelineEventSink>) {
        let (transmission_sender, reception_receiver) = mpsc::unbounded_channel();
        (
            Self {
                application_state,
                reception_receiver,
            },
            Arc::new(PipelineEventSink { transmission_sender }),
        )
    }

    /**
     * Bucle principal: drena el canal hasta la señal de apagado y
     * procesa el remanente antes de salir.
     */
    pub async fn run(mut self) {
        info!("⚙️  [PROCESSOR]: Pipeline consumer online.");
        let mut shutdown_watch = self.application_state.shutdown_watch.clone();

        loop {
            tokio::select! {
                maybe_delivery = self.reception_receiver.recv() => {
                    match maybe_delivery {
                        Some((adapter_name, raw_event)) => {
                            self.process_one(&adapter_name, raw_event).await;
                        }
                        None => break, // todos los sumideros muertos
                    }
                }
                _ = shutdown_watch.changed() => {
                    // Apagado: dejar de aceptar y drenar lo ya entregado.
                    self.reception_receiver.close();
                    while let Ok((adapter_name, raw_event)) = self.reception_receiver.try_recv() {
                        self.process_one(&adapter_name, raw_event).await;
                    }
                    break;
                }
            }
        }

        info!("🏁 [PROCESSOR]: Pipeline consumer drained and stopped.");
    }

    /**
     * Procesa un evento crudo de punta a punta.
     */
    #[instrument(skip(self, raw_event), fields(adapter = %adapter_name))]
    pub async fn process_one(&self, adapter_name: &str, raw_event: RawAccessEvent) {
        let state = &self.application_state;

        // 1. VALIDACIÓN DE LA VENTANA TEMPORAL Y DEL SOCIO
        if raw_event.external_user_identifier.is_empty() {
            state.pipeline_metrics.validation_rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                target: "audit",
                adapter = %adapter_name,
                "🚫 [PROCESSOR]: ValidationError -> external_user_identifier empty."
            );
            return;
        }

        let now = Utc::now();
        let drift = now.signed_duration_since(raw_event.timestamp);

        if drift < -ChronoDuration::minutes(FUTURE_ACCEPTANCE_MINUTES) {
            state.pipeline_metrics.validation_rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                target: "audit",
                adapter = %adapter_name,
                event_timestamp = %raw_event.timestamp,
                "🚫 [PROCESSOR]: ValidationError -> timestamp beyond the future window."
            );
            return;
        }

        let clock_skew = drift > ChronoDuration::hours(PAST_ACCEPTANCE_HOURS);
        if clock_skew {
            warn!(
                target: "audit",
                adapter = %adapter_name,
                event_timestamp = %raw_event.timestamp,
                "🕰️  [PROCESSOR]: Stale-past event queued with clock_skew flag."
            );
        }

        let device_identifier = state.device_id();

        // 2. RESOLUCIÓN DEL SOCIO INTERNO
        let internal_user_identifier = match state
            .user_mappings
            .resolve(&device_identifier, &raw_event.external_user_identifier)
            .await
        {
            Ok(resolution) => resolution,
            Err(resolve_fault) => {
                warn!("⚠️ [PROCESSOR]: User-map lookup failed ({}). Queuing unmapped.", resolve_fault);
                None
            }
        };

        if internal_user_identifier.is_none() {
            state.pipeline_metrics.unmapped_users.fetch_add(1, Ordering::Relaxed);
            debug!(
                target: "audit",
                adapter = %adapter_name,
                external_user = %raw_event.external_user_identifier,
                "👤 [PROCESSOR]: unmapped_user -> queued with null internal identity."
            );
        }

        // 3. IDENTIDAD DETERMINISTA (PRF con llave del dispositivo)
        let timestamp_milliseconds = raw_event.timestamp.timestamp_millis();
        let kind_label = raw_event.event_kind.as_label();

        let event_identifier = state
            .keystore
            .with_device_key(|keyed_device_identifier, device_key| {
                derive_event_identity(
                    device_key,
                    keyed_device_identifier,
                    adapter_name,
                    &raw_event.external_user_identifier,
                    timestamp_milliseconds,
                    kind_label,
                )
            })
            .unwrap_or_else(|_| {
                // Puente sin emparejar: identidad derivada con llave vacía;
                // sigue siendo determinista y deduplicable localmente.
                derive_event_identity(
                    b"",
                    &device_identifier,
                    adapter_name,
                    &raw_event.external_user_identifier,
                    timestamp_milliseconds,
                    kind_label,
                )
            });

        let is_simulated = raw_event.raw_data.get("simulated").and_then(|flag| flag.as_bool()).unwrap_or(false);

        let standard_event = StandardAccessEvent {
            event_identifier,
            external_user_identifier: raw_event.external_user_identifier,
            internal_user_identifier,
            timestamp: raw_event.timestamp,
            event_kind: raw_event.event_kind,
            is_simulated,
            device_identifier,
            clock_skew,
            raw_data: raw_event.raw_data,
        };

        // 4. SELLADO DE LA CARGA CANÓNICA
        let canonical_bytes = match serde_json::to_vec(&standard_event) {
            Ok(bytes) => bytes,
            Err(encode_fault) => {
                error!("❌ [PROCESSOR]: Canonical encoding failed: {}", encode_fault);
                return;
            }
        };
        let payload_sealed = match state.payload_sealer.seal(&canonical_bytes) {
            Ok(sealed) => sealed,
            Err(seal_fault) => {
                error!("❌ [PROCESSOR]: Payload sealing failed: {}", seal_fault);
                return;
            }
        };

        // 5. ENCOLADO CON DEDUPLICACIÓN Y TOPE DE CAPACIDAD
        let capacity = state.runtime_knobs.queue_capacity();
        match state.event_queue.enqueue(&standard_event, &payload_sealed, capacity).await {
            Ok(EnqueueOutcome::Inserted { evicted }) => {
                state.pipeline_metrics.record_event_ingested();
                if evicted > 0 {
                    state.pipeline_metrics.record_eviction();
                }
                if state.runtime_knobs.websocket_broadcast_enabled() {
                    state.event_bus.publish_access_event(standard_event);
                }
            }
            Ok(EnqueueOutcome::Duplicate) => {
                state.pipeline_metrics.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
                debug!("♻️  [PROCESSOR]: Duplicate identity suppressed.");
            }
            Err(storage_fault) => {
                error!("💾 [PROCESSOR]: Enqueue failed: {}", storage_fault);
            }
        }
    }
}
