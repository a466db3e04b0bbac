// [apps/bridge-agent/src/services/health_monitor.rs]
/*!
 * =================================================================
 * APARATO: HEALTH MONITOR
 * CLASIFICACIÓN: APPLICATION SERVICE (ESTRATO L4)
 * RESPONSABILIDAD: AGREGADO DE SALUD Y VEREDICTO GLOBAL
 *
 * Observa registro de adaptadores, cola y rastro del enlace en modo
 * solo-lectura; el veredicto sale de la regla pura del dominio.
 * =================================================================
 */

use tracing::warn;

use crate::state::AppState;
use turngate_domain_models::events::QueueStats;
use turngate_domain_models::health::{
    evaluate_overall_health, AdapterHealthSummary, HealthRuleInputs, HealthSnapshot,
};
use turngate_domain_models::status::AdapterRuntimeState;

pub struct HealthMonitor {
    application_state: AppState,
}

impl HealthMonitor {
    pub fn new(application_state: AppState) -> Self {
        Self { application_state }
    }

    /**
     * Fotografía completa de salud; también es el cuerpo del latido.
     */
    pub async fn snapshot(&self) -> HealthSnapshot {
        let state = &self.application_state;

        let adapter_reports = state.adapter_registry.status_reports();
        let adapters: Vec<AdapterHealthSummary> = adapter_reports.iter().map(AdapterHealthSummary::from).collect();

        let queue_stats = match state.event_queue.stats().await {
            Ok(stats) => stats,
            Err(stats_fault) => {
                warn!("💾 [HEALTH]: Queue stats unavailable: {}", stats_fault);
                QueueStats::default()
            }
        };

        let active_adapters = adapter_reports
            .iter()
            .filter(|report| report.state == AdapterRuntimeState::Active)
            .count();
        let errored_adapters = adapter_reports
            .iter()
            .filter(|report| report.state == AdapterRuntimeState::Error)
            .count();

        let queue_capacity = state.runtime_knobs.queue_capacity();

        let rule_inputs = HealthRuleInputs {
            active_adapters,
            errored_adapters,
            total_adapters: adapter_reports.len(),
            queue_pending: queue_stats.pending,
            queue_capacity,
            eviction_occurring: state.pipeline_metrics.eviction_recent(),
            heartbeats_since_uplink_success: state.pipeline_metrics.heartbeats_since_uplink_success(),
            uplink_auth_failing: state.pipeline_metrics.uplink_auth_failing(),
        };

        HealthSnapshot {
            overall: evaluate_overall_health(&rule_inputs),
            adapters,
            queue: queue_stats,
            queue_capacity,
            resources: state.resources_snapshot(),
            tier: state.tier(),
            uptime_seconds: state.uptime_seconds(),
            last_event_at: state.pipeline_metrics.last_event_at(),
            last_uplink_success_at: state.pipeline_metrics.last_uplink_success_at(),
            uplink_auth_failing: state.pipeline_metrics.uplink_auth_failing(),
            generated_at: chrono::Utc::now(),
        }
    }
}
