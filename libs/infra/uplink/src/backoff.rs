// [libs/infra/uplink/src/backoff.rs]
/*!
 * =================================================================
 * APARATO: EXPONENTIAL BACKOFF ENGINE
 * CLASIFICACIÓN: INFRASTRUCTURE LAYER (ESTRATO L3)
 * RESPONSABILIDAD: RETRASO EXPONENCIAL CON JITTER POR ENDPOINT
 *
 * Crecimiento: base 1s, duplicación por fallo, techo 5 min, jitter
 * ±25% para desincronizar flotas de puentes tras una caída regional.
 * El estado es por endpoint: un latido fallando no castiga al checkin.
 * =================================================================
 */

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;

/// Retraso base del primer fallo.
const BASE_DELAY_SECONDS: f64 = 1.0;
/// Techo del crecimiento exponencial.
const DELAY_CAP_SECONDS: f64 = 300.0;
/// Amplitud del jitter uniforme (±25%).
const JITTER_RATIO: f64 = 0.25;

/// Estado de reintento de un único endpoint.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    consecutive_failures: u32,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self { consecutive_failures: 0 }
    }

    /// Registra un fallo y devuelve cuánto esperar antes del próximo intento.
    pub fn register_failure(&mut self) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.current_delay()
    }

    /// Un éxito limpia el estado por completo.
    pub fn register_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Retraso vigente: `min(base * 2^(fallos-1), techo)` ± jitter.
    pub fn current_delay(&self) -> Duration {
        if self.consecutive_failures == 0 {
            return Duration::ZERO;
        }

        let exponent = (self.consecutive_failures - 1).min(16);
        let raw_delay = (BASE_DELAY_SECONDS * 2f64.powi(exponent as i32)).min(DELAY_CAP_SECONDS);

        let jitter_band = raw_delay * JITTER_RATIO;
        let jittered = raw_delay + rand::thread_rng().gen_range(-jitter_band..=jitter_band);

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Registro de estados por endpoint bajo un candado fino.
pub struct BackoffRegistry {
    states: Mutex<HashMap<String, ExponentialBackoff>>,
}

impl BackoffRegistry {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_failure(&self, endpoint: &str) -> Duration {
        let mut states_guard = self.states.lock().expect("backoff lock poisoned");
        states_guard.entry(endpoint.to_string()).or_default().register_failure()
    }

    pub fn register_success(&self, endpoint: &str) {
        let mut states_guard = self.states.lock().expect("backoff lock poisoned");
        if let Some(state) = states_guard.get_mut(endpoint) {
            state.register_success();
        }
    }

    pub fn current_delay(&self, endpoint: &str) -> Duration {
        let states_guard = self.states.lock().expect("backoff lock poisoned");
        states_guard.get(endpoint).map(|state| state.current_delay()).unwrap_or(Duration::ZERO)
    }
}

impl Default for BackoffRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_exponentially_within_the_jitter_band() {
        let mut backoff = ExponentialBackoff::new();

        let first = backoff.register_failure().as_secs_f64();
        assert!((0.75..=1.25).contains(&first), "primer fallo ~1s, fue {first}");

        let second = backoff.register_failure().as_secs_f64();
        assert!((1.5..=2.5).contains(&second), "segundo fallo ~2s, fue {second}");

        let third = backoff.register_failure().as_secs_f64();
        assert!((3.0..=5.0).contains(&third), "tercer fallo ~4s, fue {third}");
    }

    #[test]
    fn delay_is_capped_at_five_minutes() {
        let mut backoff = ExponentialBackoff::new();
        for _ in 0..20 {
            backoff.register_failure();
        }
        let capped = backoff.current_delay().as_secs_f64();
        assert!(capped <= 300.0 * 1.25, "el techo con jitter es 375s, fue {capped}");
        assert!(capped >= 300.0 * 0.75);
    }

    #[test]
    fn success_resets_the_ladder() {
        let mut backoff = ExponentialBackoff::new();
        backoff.register_failure();
        backoff.register_failure();
        backoff.register_success();
        assert_eq!(backoff.consecutive_failures(), 0);
        assert_eq!(backoff.current_delay(), Duration::ZERO);
    }

    #[test]
    fn registry_isolates_endpoints() {
        let registry = BackoffRegistry::new();
        registry.register_failure("/api/v1/checkin");
        registry.register_failure("/api/v1/checkin");

        assert!(registry.current_delay("/api/v1/checkin") > Duration::ZERO);
        assert_eq!(registry.current_delay("/api/v1/devices/heartbeat"), Duration::ZERO);

        registry.register_success("/api/v1/checkin");
        assert_eq!(registry.current_delay("/api/v1/checkin"), Duration::ZERO);
    }
}
