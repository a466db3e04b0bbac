// [libs/domain/models/src/health.rs]
/*!
 * =================================================================
 * APARATO: HEALTH SNAPSHOT MODELS
 * CLASIFICACIÓN: DOMAIN MODELS (ESTRATO L2)
 * RESPONSABILIDAD: AGREGADO DE SALUD DEL AGENTE Y SU REGLA DE VEREDICTO
 * =================================================================
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::QueueStats;
use crate::status::{AdapterRuntimeState, AdapterStatusReport};
use crate::tier::{ResourceSnapshot, ResourceTier};

/// Veredicto global de salud; gobierna el código HTTP de `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

impl OverallHealth {
    /// 200 para healthy/degraded, 503 para unhealthy.
    pub fn http_status(&self) -> u16 {
        match self {
            OverallHealth::Healthy | OverallHealth::Degraded => 200,
            OverallHealth::Unhealthy => 503,
        }
    }
}

/// Resumen por adaptador embebido en el snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterHealthSummary {
    pub name: String,
    pub state: AdapterRuntimeState,
    pub last_event_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl From<&AdapterStatusReport> for AdapterHealthSummary {
    fn from(report: &AdapterStatusReport) -> Self {
        Self {
            name: report.name.clone(),
            state: report.state,
            last_event_at: report.last_event_at,
            error_message: report.error_message.clone(),
        }
    }
}

/// Fotografía completa de salud; también es el cuerpo del latido.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub overall: OverallHealth,
    pub adapters: Vec<AdapterHealthSummary>,
    pub queue: QueueStats,
    pub queue_capacity: u64,
    pub resources: Option<ResourceSnapshot>,
    pub tier: ResourceTier,
    pub uptime_seconds: u64,
    pub last_event_at: Option<DateTime<Utc>>,
    pub last_uplink_success_at: Option<DateTime<Utc>>,
    /// Señal de bloqueo de autenticación del enlace ascendente.
    pub uplink_auth_failing: bool,
    pub generated_at: DateTime<Utc>,
}

/// Entradas de la regla de veredicto, desacopladas del estado vivo.
#[derive(Debug, Clone, Copy)]
pub struct HealthRuleInputs {
    pub active_adapters: usize,
    pub errored_adapters: usize,
    pub total_adapters: usize,
    pub queue_pending: u64,
    pub queue_capacity: u64,
    pub eviction_occurring: bool,
    /// Latidos transcurridos desde el último éxito del enlace.
    pub heartbeats_since_uplink_success: u32,
    pub uplink_auth_failing: bool,
}

/**
 * Regla de veredicto global.
 *
 * - `healthy`: todos los adaptadores activos, cola < 80% de capacidad,
 *   enlace con éxito dentro de los últimos 5 latidos.
 * - `degraded`: algún adaptador en error con al menos uno sano, o cola
 *   en [80%, 100%) de capacidad.
 * - `unhealthy`: sin adaptador sano, o cola llena con expulsión en
 *   curso, o autenticación del enlace fallando.
 */
pub fn evaluate_overall_health(inputs: &HealthRuleInputs) -> OverallHealth {
    let queue_ratio = if inputs.queue_capacity == 0 {
        1.0
    } else {
        inputs.queue_pending as f64 / inputs.queue_capacity as f64
    };

    let no_healthy_adapter = inputs.total_adapters > 0 && inputs.active_adapters == 0;
    let queue_saturated = queue_ratio >= 1.0 && inputs.eviction_occurring;

    if no_healthy_adapter || queue_saturated || inputs.uplink_auth_failing {
        return OverallHealth::Unhealthy;
    }

    let some_adapter_errored = inputs.errored_adapters > 0 && inputs.active_adapters > 0;
    let queue_pressured = (0.8..1.0).contains(&queue_ratio);
    let uplink_stale = inputs.heartbeats_since_uplink_success > 5;

    if some_adapter_errored || queue_pressured || uplink_stale {
        return OverallHealth::Degraded;
    }

    OverallHealth::Healthy
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline() -> HealthRuleInputs {
        HealthRuleInputs {
            active_adapters: 2,
            errored_adapters: 0,
            total_adapters: 2,
            queue_pending: 10,
            queue_capacity: 10_000,
            eviction_occurring: false,
            heartbeats_since_uplink_success: 0,
            uplink_auth_failing: false,
        }
    }

    #[test]
    fn nominal_inputs_verdict_healthy() {
        assert_eq!(evaluate_overall_health(&baseline()), OverallHealth::Healthy);
    }

    #[test]
    fn errored_adapter_with_survivor_degrades() {
        let mut inputs = baseline();
        inputs.errored_adapters = 1;
        inputs.active_adapters = 1;
        assert_eq!(evaluate_overall_health(&inputs), OverallHealth::Degraded);
    }

    #[test]
    fn queue_pressure_band_degrades() {
        let mut inputs = baseline();
        inputs.queue_pending = 8_000;
        assert_eq!(evaluate_overall_health(&inputs), OverallHealth::Degraded);

        inputs.queue_pending = 7_999;
        assert_eq!(evaluate_overall_health(&inputs), OverallHealth::Healthy);
    }

    #[test]
    fn saturation_with_eviction_is_unhealthy() {
        let mut inputs = baseline();
        inputs.queue_pending = 10_000;
        inputs.eviction_occurring = true;
        assert_eq!(evaluate_overall_health(&inputs), OverallHealth::Unhealthy);
    }

    #[test]
    fn auth_failure_dominates_every_other_signal() {
        let mut inputs = baseline();
        inputs.uplink_auth_failing = true;
        assert_eq!(evaluate_overall_health(&inputs), OverallHealth::Unhealthy);
    }

    #[test]
    fn dead_registry_is_unhealthy() {
        let mut inputs = baseline();
        inputs.active_adapters = 0;
        inputs.errored_adapters = 2;
        assert_eq!(evaluate_overall_health(&inputs), OverallHealth::Unhealthy);
    }
}
