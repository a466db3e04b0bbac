// [libs/domain/models/src/fault.rs]
/*!
 * =================================================================
 * APARATO: FAULT TAXONOMY & RECOVERY DIRECTIVES
 * CLASIFICACIÓN: DOMAIN MODELS (ESTRATO L2)
 * RESPONSABILIDAD: CLASIFICACIÓN SEMÁNTICA DE FALLOS DEL AGENTE
 *
 * Todo fallo cruza como máximo una frontera de recuperación. El par
 * (categoría × severidad) se asigna explícitamente en el sitio de
 * llamada; para errores de terceros sin etiqueta se aplica inferencia
 * por palabras clave sobre el mensaje.
 * =================================================================
 */

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Categoría de origen de un fallo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultCategory {
    Hardware,
    Network,
    Security,
    Storage,
    Resource,
    Service,
    Config,
    Unknown,
}

impl FaultCategory {
    pub fn as_label(&self) -> &'static str {
        match self {
            FaultCategory::Hardware => "hardware",
            FaultCategory::Network => "network",
            FaultCategory::Security => "security",
            FaultCategory::Storage => "storage",
            FaultCategory::Resource => "resource",
            FaultCategory::Service => "service",
            FaultCategory::Config => "config",
            FaultCategory::Unknown => "unknown",
        }
    }
}

/// Severidad operacional de un fallo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultSeverity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// Fallo clasificado, listo para el motor de recuperación y el rastro.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeFault {
    pub category: FaultCategory,
    pub severity: FaultSeverity,
    /// Componente que reporta (ej. `uplink`, `store`, `adapter:simulator`).
    pub component: String,
    /// Operación en curso (ej. `enqueue`, `submit_batch`).
    pub operation: String,
    pub message: String,
    pub recoverable: bool,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    pub observed_at: DateTime<Utc>,
}

impl BridgeFault {
    pub fn new(
        category: FaultCategory,
        severity: FaultSeverity,
        component: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            severity,
            component: component.into(),
            operation: operation.into(),
            message: message.into(),
            recoverable: category != FaultCategory::Security,
            retry_count: 0,
            metadata: HashMap::new(),
            observed_at: Utc::now(),
        }
    }

    /// Llave de estado del motor de recuperación.
    pub fn recovery_key(&self) -> String {
        format!("{}:{}:{}", self.category.as_label(), self.component, self.operation)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for BridgeFault {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "[{}/{:?}] {}::{} -> {}",
            self.category.as_label(),
            self.severity,
            self.component,
            self.operation,
            self.message
        )
    }
}

/**
 * Inferencia por palabras clave para errores de terceros sin etiqueta.
 *
 * El orden de los grupos importa: seguridad y almacenamiento tienen
 * vocabulario más específico que red, y se evalúan primero.
 */
pub fn infer_category_from_message(message: &str) -> FaultCategory {
    let lowered = message.to_lowercase();

    const SECURITY_MARKERS: [&str; 6] = ["unauthorized", "forbidden", "signature", "auth", "denied", "certificate"];
    const STORAGE_MARKERS: [&str; 6] = ["sqlite", "database", "disk", "sql", "constraint", "migration"];
    const HARDWARE_MARKERS: [&str; 5] = ["device", "serial", "usb", "gpio", "relay"];
    const NETWORK_MARKERS: [&str; 7] = ["connection", "timeout", "dns", "refused", "unreachable", "socket", "tls"];
    const RESOURCE_MARKERS: [&str; 4] = ["memory", "out of", "capacity", "exhausted"];
    const CONFIG_MARKERS: [&str; 4] = ["config", "yaml", "parse", "missing field"];

    let matches_any = |markers: &[&str]| markers.iter().any(|marker| lowered.contains(marker));

    if matches_any(&SECURITY_MARKERS) {
        FaultCategory::Security
    } else if matches_any(&STORAGE_MARKERS) {
        FaultCategory::Storage
    } else if matches_any(&HARDWARE_MARKERS) {
        FaultCategory::Hardware
    } else if matches_any(&NETWORK_MARKERS) {
        FaultCategory::Network
    } else if matches_any(&RESOURCE_MARKERS) {
        FaultCategory::Resource
    } else if matches_any(&CONFIG_MARKERS) {
        FaultCategory::Config
    } else {
        FaultCategory::Unknown
    }
}

/// Estrategia de recuperación asociada a una categoría.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryDirective {
    Retry,
    Restart,
    Degrade,
    Failover,
    Skip,
    None,
}

/// Política de recuperación de una categoría: directiva + presupuesto.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryPolicy {
    pub directive: RecoveryDirective,
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Techo del crecimiento exponencial del retraso.
    pub delay_cap: Duration,
    pub jitter: bool,
}

impl RecoveryPolicy {
    /// Tabla por defecto; cada categoría admite sobre-escritura por config.
    pub fn default_for(category: FaultCategory) -> Self {
        match category {
            FaultCategory::Hardware => Self {
                directive: RecoveryDirective::Retry,
                max_attempts: 3,
                base_delay: Duration::from_secs(5),
                delay_cap: Duration::from_secs(300),
                jitter: false,
            },
            FaultCategory::Network => Self {
                directive: RecoveryDirective::Retry,
                max_attempts: 5,
                base_delay: Duration::from_secs(2),
                delay_cap: Duration::from_secs(300),
                jitter: true,
            },
            FaultCategory::Security => Self {
                directive: RecoveryDirective::None,
                max_attempts: 0,
                base_delay: Duration::ZERO,
                delay_cap: Duration::ZERO,
                jitter: false,
            },
            FaultCategory::Storage => Self {
                directive: RecoveryDirective::Retry,
                max_attempts: 2,
                base_delay: Duration::from_secs(1),
                delay_cap: Duration::from_secs(60),
                jitter: false,
            },
            FaultCategory::Resource => Self {
                directive: RecoveryDirective::Degrade,
                max_attempts: 1,
                base_delay: Duration::ZERO,
                delay_cap: Duration::ZERO,
                jitter: false,
            },
            FaultCategory::Service => Self {
                directive: RecoveryDirective::Restart,
                max_attempts: 2,
                base_delay: Duration::from_secs(10),
                delay_cap: Duration::from_secs(300),
                jitter: false,
            },
            FaultCategory::Config => Self {
                directive: RecoveryDirective::Skip,
                max_attempts: 1,
                base_delay: Duration::ZERO,
                delay_cap: Duration::ZERO,
                jitter: false,
            },
            FaultCategory::Unknown => Self {
                directive: RecoveryDirective::Retry,
                max_attempts: 2,
                base_delay: Duration::from_secs(5),
                delay_cap: Duration::from_secs(300),
                jitter: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_inference_prioritizes_security_vocabulary() {
        assert_eq!(infer_category_from_message("401 Unauthorized"), FaultCategory::Security);
        assert_eq!(
            infer_category_from_message("connection refused by peer"),
            FaultCategory::Network
        );
        assert_eq!(
            infer_category_from_message("SQLITE_BUSY: database is locked"),
            FaultCategory::Storage
        );
        assert_eq!(infer_category_from_message("relay board offline"), FaultCategory::Hardware);
        assert_eq!(infer_category_from_message("what even is this"), FaultCategory::Unknown);
    }

    #[test]
    fn security_faults_are_born_unrecoverable() {
        let fault = BridgeFault::new(
            FaultCategory::Security,
            FaultSeverity::Critical,
            "control_plane",
            "hmac_verify",
            "signature mismatch",
        );
        assert!(!fault.recoverable);
        assert_eq!(fault.recovery_key(), "security:control_plane:hmac_verify");
    }

    #[test]
    fn recovery_table_matches_the_category_budgets() {
        let network = RecoveryPolicy::default_for(FaultCategory::Network);
        assert_eq!(network.directive, RecoveryDirective::Retry);
        assert_eq!(network.max_attempts, 5);
        assert_eq!(network.base_delay, Duration::from_secs(2));
        assert!(network.jitter);

        let security = RecoveryPolicy::default_for(FaultCategory::Security);
        assert_eq!(security.directive, RecoveryDirective::None);
        assert_eq!(security.max_attempts, 0);

        let resource = RecoveryPolicy::default_for(FaultCategory::Resource);
        assert_eq!(resource.directive, RecoveryDirective::Degrade);
    }
}
