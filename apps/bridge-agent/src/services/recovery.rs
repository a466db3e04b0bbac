// [apps/bridge-agent/src/services/recovery.rs]
/*!
 * =================================================================
 * APARATO: RECOVERY ENGINE
 * CLASIFICACIÓN: APPLICATION SERVICE (ESTRATO L4)
 * RESPONSABILIDAD: ESTRATEGIA DE RECUPERACIÓN POR CATEGORÍA DE FALLO
 *
 * Estado en memoria con llave `categoria:componente:operacion`. Cada
 * fallo consulta la política de su categoría (reintento exponencial,
 * reinicio, degradación, omisión o nada); agotar el presupuesto
 * produce un fallo permanente y un éxito limpia el estado. Los fallos
 * de seguridad jamás disparan recuperación automática.
 * =================================================================
 */

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

use turngate_domain_models::fault::{BridgeFault, FaultCategory, RecoveryDirective, RecoveryPolicy};

/// Decisión del motor para un fallo observado.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryVerdict {
    /// Reintentar la operación tras el retraso indicado.
    RetryAfter(Duration),
    /// Reiniciar el componente señalado (ámbito de componente).
    RestartComponent,
    /// Ceder el control al escalador de degradación.
    Degrade,
    /// Conmutar al recurso alterno si existe.
    Failover,
    /// Omitir y continuar con valores por defecto.
    SkipAndContinue,
    /// Sin recuperación automática (seguridad): intervención manual.
    ManualInterventionRequired,
    /// Presupuesto agotado: fallo permanente.
    PermanentFailure,
}

/// Estado de reintentos de una llave de recuperación.
#[derive(Debug, Clone, Serialize)]
pub struct RetryLedgerEntry {
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_attempt_at: DateTime<Utc>,
}

/// Estadísticas acumuladas por categoría.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RecoveryStats {
    pub faults_observed: HashMap<String, u64>,
    pub permanent_failures: HashMap<String, u64>,
}

pub struct RecoveryEngine {
    retry_ledger: Mutex<HashMap<String, RetryLedgerEntry>>,
    stats: Mutex<RecoveryStats>,
}

impl RecoveryEngine {
    pub fn new() -> Self {
        Self {
            retry_ledger: Mutex::new(HashMap::new()),
            stats: Mutex::new(RecoveryStats::default()),
        }
    }

    /**
     * Evalúa un fallo clasificado y dicta la próxima acción.
     */
    pub fn evaluate(&self, fault: &BridgeFault) -> RecoveryVerdict {
        let policy = RecoveryPolicy::default_for(fault.category);
        let recovery_key = fault.recovery_key();

        {
            let mut stats_guard = self.stats.lock().expect("stats lock poisoned");
            *stats_guard
                .faults_observed
                .entry(fault.category.as_label().to_string())
                .or_insert(0) += 1;
        }

        if fault.category == FaultCategory::Security {
            warn!(
                target: "audit",
                key = %recovery_key,
                "🛑 [RECOVERY]: Security fault. No automatic recovery."
            );
            return RecoveryVerdict::ManualInterventionRequired;
        }

        match policy.directive {
            RecoveryDirective::None => RecoveryVerdict::ManualInterventionRequired,
            RecoveryDirective::Degrade => RecoveryVerdict::Degrade,
            RecoveryDirective::Failover => RecoveryVerdict::Failover,
            RecoveryDirective::Skip => RecoveryVerdict::SkipAndContinue,
            RecoveryDirective::Restart | RecoveryDirective::Retry => {
                let attempts = {
                    let mut ledger_guard = self.retry_ledger.lock().expect("ledger lock poisoned");
                    let entry = ledger_guard.entry(recovery_key.clone()).or_insert(RetryLedgerEntry {
                        attempts: 0,
                        max_attempts: policy.max_attempts,
                        last_attempt_at: Utc::now(),
                    });
                    entry.attempts += 1;
                    entry.last_attempt_at = Utc::now();
                    entry.attempts
                };

                if attempts > policy.max_attempts {
                    let mut stats_guard = self.stats.lock().expect("stats lock poisoned");
                    *stats_guard
                        .permanent_failures
                        .entry(fault.category.as_label().to_string())
                        .or_insert(0) += 1;
                    warn!(
                        key = %recovery_key,
                        attempts,
                        "💀 [RECOVERY]: Budget exhausted. Permanent failure."
                    );
                    return RecoveryVerdict::PermanentFailure;
                }

                if policy.directive == RecoveryDirective::Restart {
                    return RecoveryVerdict::RestartComponent;
                }

                RecoveryVerdict::RetryAfter(Self::delay_for_attempt(&policy, attempts))
            }
        }
    }

    /// Un éxito limpia el estado de la llave.
    pub fn record_success(&self, recovery_key: &str) {
        let removed = self
            .retry_ledger
            .lock()
            .expect("ledger lock poisoned")
            .remove(recovery_key)
            .is_some();
        if removed {
            info!("✅ [RECOVERY]: Key [{}] cleared after success.", recovery_key);
        }
    }

    pub fn stats(&self) -> RecoveryStats {
        self.stats.lock().expect("stats lock poisoned").clone()
    }

    pub fn ledger_snapshot(&self) -> HashMap<String, RetryLedgerEntry> {
        self.retry_ledger.lock().expect("ledger lock poisoned").clone()
    }

    /// Retraso exponencial `base * 2^(intento-1)` con techo y jitter opcional.
    fn delay_for_attempt(policy: &RecoveryPolicy, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let raw_seconds = (policy.base_delay.as_secs_f64() * 2f64.powi(exponent as i32))
            .min(policy.delay_cap.as_secs_f64().max(policy.base_delay.as_secs_f64()));

        if policy.jitter {
            let jitter_band = raw_seconds * 0.25;
            let jittered = raw_seconds + rand::thread_rng().gen_range(-jitter_band..=jitter_band);
            Duration::from_secs_f64(jittered.max(0.0))
        } else {
            Duration::from_secs_f64(raw_seconds)
        }
    }
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turngate_domain_models::fault::FaultSeverity;

    fn hardware_fault() -> BridgeFault {
        BridgeFault::new(
            FaultCategory::Hardware,
            FaultSeverity::High,
            "adapter:relay",
            "unlock",
            "board timeout",
        )
    }

    #[test]
    fn hardware_retries_three_times_then_goes_permanent() {
        let engine = RecoveryEngine::new();
        let fault = hardware_fault();

        for attempt in 1..=3 {
            match engine.evaluate(&fault) {
                RecoveryVerdict::RetryAfter(delay) => {
                    let expected = 5.0 * 2f64.powi(attempt - 1);
                    assert!((delay.as_secs_f64() - expected).abs() < 0.01, "intento {attempt}");
                }
                other => panic!("se esperaba reintento, vino {other:?}"),
            }
        }

        assert_eq!(engine.evaluate(&fault), RecoveryVerdict::PermanentFailure);
        assert_eq!(engine.stats().permanent_failures.get("hardware"), Some(&1));
    }

    #[test]
    fn success_clears_the_ledger_key() {
        let engine = RecoveryEngine::new();
        let fault = hardware_fault();

        engine.evaluate(&fault);
        engine.evaluate(&fault);
        engine.record_success(&fault.recovery_key());

        // El presupuesto vuelve a empezar desde cero.
        assert!(matches!(engine.evaluate(&fault), RecoveryVerdict::RetryAfter(_)));
        assert_eq!(engine.ledger_snapshot().get(&fault.recovery_key()).unwrap().attempts, 1);
    }

    #[test]
    fn security_faults_never_auto_recover() {
        let engine = RecoveryEngine::new();
        let fault = BridgeFault::new(
            FaultCategory::Security,
            FaultSeverity::Critical,
            "control_plane",
            "hmac_verify",
            "signature mismatch",
        );
        assert_eq!(engine.evaluate(&fault), RecoveryVerdict::ManualInterventionRequired);
    }

    #[test]
    fn category_directives_map_to_verdicts() {
        let engine = RecoveryEngine::new();

        let resource_fault = BridgeFault::new(
            FaultCategory::Resource,
            FaultSeverity::High,
            "host",
            "memory",
            "pressure",
        );
        assert_eq!(engine.evaluate(&resource_fault), RecoveryVerdict::Degrade);

        let config_fault = BridgeFault::new(
            FaultCategory::Config,
            FaultSeverity::Medium,
            "config",
            "reload",
            "yaml parse",
        );
        assert_eq!(engine.evaluate(&config_fault), RecoveryVerdict::SkipAndContinue);

        let service_fault = BridgeFault::new(
            FaultCategory::Service,
            FaultSeverity::High,
            "processor",
            "run",
            "task died",
        );
        assert_eq!(engine.evaluate(&service_fault), RecoveryVerdict::RestartComponent);
    }
}
