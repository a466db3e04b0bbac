// [libs/domain/models/src/tier.rs]
/*!
 * =================================================================
 * APARATO: RESOURCE TIER MODELS
 * CLASIFICACIÓN: DOMAIN MODELS (ESTRATO L2)
 * RESPONSABILIDAD: CLASIFICACIÓN DE CAPACIDAD DEL HOST Y PERFILES
 *
 * El nivel gobierna tres perillas del agente: capacidad de la cola,
 * cadencia del latido y conjunto de capacidades opcionales. La
 * clasificación es una función pura de los recursos muestreados; la
 * histéresis temporal (3 muestras para degradar, 10 para ascender)
 * vive en el centinela que consume estos modelos.
 * =================================================================
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Nivel operativo del host donde corre el agente.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceTier {
    /// Host mínimo: solo el núcleo del pipeline.
    Lite,
    /// Host estándar: núcleo + métricas.
    Normal,
    /// Host holgado: + difusión WebSocket y auditoría detallada.
    Full,
}

impl ResourceTier {
    pub fn as_label(&self) -> &'static str {
        match self {
            ResourceTier::Lite => "lite",
            ResourceTier::Normal => "normal",
            ResourceTier::Full => "full",
        }
    }
}

/// Umbrales de clasificación; configurables con estos valores por defecto.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierThresholds {
    /// Menos núcleos O menos memoria que esto => Lite.
    pub lite_max_cores: u32,
    pub lite_max_memory_gb: f64,
    /// Más núcleos Y al menos esta memoria => Full.
    pub full_min_cores: u32,
    pub full_min_memory_gb: f64,
    /// Presión de utilización que alimenta la histéresis de degradación.
    pub pressure_cpu_percent: f64,
    pub pressure_memory_percent: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            lite_max_cores: 2,
            lite_max_memory_gb: 2.0,
            full_min_cores: 4,
            full_min_memory_gb: 8.0,
            pressure_cpu_percent: 85.0,
            pressure_memory_percent: 85.0,
        }
    }
}

/// Fotografía de recursos del host en un instante de muestreo.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub cpu_cores: u32,
    pub memory_total_gb: f64,
    pub cpu_usage_percent: f64,
    pub memory_usage_percent: f64,
    pub disk_usage_percent: f64,
    pub sampled_at: DateTime<Utc>,
}

impl ResourceSnapshot {
    /// Una muestra está bajo presión si CPU o memoria superan su umbral.
    pub fn is_under_pressure(&self, thresholds: &TierThresholds) -> bool {
        self.cpu_usage_percent >= thresholds.pressure_cpu_percent
            || self.memory_usage_percent >= thresholds.pressure_memory_percent
    }
}

/// Perfil operativo derivado de un nivel.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TierProfile {
    pub tier: ResourceTier,
    pub queue_capacity: u64,
    pub heartbeat_interval_seconds: u64,
    pub metrics_enabled: bool,
    pub websocket_broadcast_enabled: bool,
    pub detailed_audit_enabled: bool,
}

impl TierProfile {
    pub fn for_tier(tier: ResourceTier) -> Self {
        match tier {
            ResourceTier::Lite => Self {
                tier,
                queue_capacity: 1_000,
                heartbeat_interval_seconds: 300,
                metrics_enabled: false,
                websocket_broadcast_enabled: false,
                detailed_audit_enabled: false,
            },
            ResourceTier::Normal => Self {
                tier,
                queue_capacity: 10_000,
                heartbeat_interval_seconds: 60,
                metrics_enabled: true,
                websocket_broadcast_enabled: false,
                detailed_audit_enabled: false,
            },
            ResourceTier::Full => Self {
                tier,
                queue_capacity: 50_000,
                heartbeat_interval_seconds: 30,
                metrics_enabled: true,
                websocket_broadcast_enabled: true,
                detailed_audit_enabled: true,
            },
        }
    }
}

/**
 * Clasifica el host según núcleos y memoria total.
 *
 * Puertas: `< lite_max_cores` O `< lite_max_memory_gb` => Lite;
 * `> full_min_cores` Y `>= full_min_memory_gb` => Full; el resto, Normal.
 */
pub fn classify_host(cpu_cores: u32, memory_total_gb: f64, thresholds: &TierThresholds) -> ResourceTier {
    if cpu_cores < thresholds.lite_max_cores || memory_total_gb < thresholds.lite_max_memory_gb {
        ResourceTier::Lite
    } else if cpu_cores > thresholds.full_min_cores && memory_total_gb >= thresholds.full_min_memory_gb {
        ResourceTier::Full
    } else {
        ResourceTier::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_gates_match_the_tier_table() {
        let thresholds = TierThresholds::default();

        assert_eq!(classify_host(1, 8.0, &thresholds), ResourceTier::Lite);
        assert_eq!(classify_host(4, 1.5, &thresholds), ResourceTier::Lite);
        assert_eq!(classify_host(2, 2.0, &thresholds), ResourceTier::Normal);
        assert_eq!(classify_host(4, 8.0, &thresholds), ResourceTier::Normal);
        assert_eq!(classify_host(8, 16.0, &thresholds), ResourceTier::Full);
        assert_eq!(classify_host(8, 4.0, &thresholds), ResourceTier::Normal);
    }

    #[test]
    fn profiles_carry_the_quoted_capacities_and_cadences() {
        let lite = TierProfile::for_tier(ResourceTier::Lite);
        assert_eq!((lite.queue_capacity, lite.heartbeat_interval_seconds), (1_000, 300));
        assert!(!lite.websocket_broadcast_enabled);

        let normal = TierProfile::for_tier(ResourceTier::Normal);
        assert_eq!((normal.queue_capacity, normal.heartbeat_interval_seconds), (10_000, 60));
        assert!(normal.metrics_enabled);

        let full = TierProfile::for_tier(ResourceTier::Full);
        assert_eq!((full.queue_capacity, full.heartbeat_interval_seconds), (50_000, 30));
        assert!(full.websocket_broadcast_enabled && full.detailed_audit_enabled);
    }
}
