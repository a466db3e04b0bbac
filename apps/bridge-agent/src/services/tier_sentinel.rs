// [apps/bridge-agent/src/services/tier_sentinel.rs]
/*!
 * =================================================================
 * APARATO: TIER SENTINEL
 * CLASIFICACIÓN: BACKGROUND SERVICE (ESTRATO L4)
 * RESPONSABILIDAD: TELEMETRÍA DEL HOST Y CAMBIO DE NIVEL CON HISTÉRESIS
 *
 * Muestreo cada 60s desde los pseudo-archivos de /proc (carga y
 * memoria por sustracción diferencial Total - Disponible) y del
 * inventario de discos para la ocupación. La escalera de histéresis
 * exige 3 muestras consecutivas para degradar y 10 para ascender:
 * el nivel jamás aletea con un pico aislado.
 *
 * Un cambio de nivel re-forma tres perillas: capacidad de cola (con
 * expulsión inmediata si encoge), cadencia de latido y capacidades
 * opcionales; además conmuta la durabilidad WAL del almacén.
 * =================================================================
 */

use std::fs;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::state::AppState;
use turngate_domain_models::fault::FaultSeverity;
use turngate_domain_models::tier::{classify_host, ResourceSnapshot, ResourceTier, TierProfile};
use turngate_infra_store::SynchronousMode;

/// Cadencia de muestreo del centinela.
const SAMPLE_INTERVAL: Duration = Duration::from_secs(60);
/// Muestras consecutivas exigidas para degradar.
const DOWNGRADE_CONSECUTIVE_SAMPLES: u32 = 3;
/// Muestras consecutivas exigidas para ascender.
const UPGRADE_CONSECUTIVE_SAMPLES: u32 = 10;

/// Escalera de histéresis pura: decide cuándo un candidato sostenido
/// reemplaza al nivel vigente.
pub struct HysteresisLadder {
    current_tier: ResourceTier,
    downgrade_streak: u32,
    upgrade_streak: u32,
}

impl HysteresisLadder {
    pub fn new(initial_tier: ResourceTier) -> Self {
        Self {
            current_tier: initial_tier,
            downgrade_streak: 0,
            upgrade_streak: 0,
        }
    }

    pub fn current(&self) -> ResourceTier {
        self.current_tier
    }

    /**
     * Registra una muestra clasificada; devuelve el nuevo nivel solo
     * cuando la racha correspondiente se completó.
     */
    pub fn observe(&mut self, candidate_tier: ResourceTier) -> Option<ResourceTier> {
        if candidate_tier == self.current_tier {
            self.downgrade_streak = 0;
            self.upgrade_streak = 0;
            return None;
        }

        if candidate_tier < self.current_tier {
            self.downgrade_streak += 1;
            self.upgrade_streak = 0;
            if self.downgrade_streak >= DOWNGRADE_CONSECUTIVE_SAMPLES {
                self.current_tier = candidate_tier;
                self.downgrade_streak = 0;
                return Some(candidate_tier);
            }
        } else {
            self.upgrade_streak += 1;
            self.downgrade_streak = 0;
            if self.upgrade_streak >= UPGRADE_CONSECUTIVE_SAMPLES {
                self.current_tier = candidate_tier;
                self.upgrade_streak = 0;
                return Some(candidate_tier);
            }
        }

        None
    }
}

pub struct TierSentinel {
    application_state: AppState,
    ladder: HysteresisLadder,
}

impl TierSentinel {
    pub fn new(application_state: AppState) -> Self {
        let initial_tier = application_state.tier();
        Self {
            application_state,
            ladder: HysteresisLadder::new(initial_tier),
        }
    }

    /// Clasificación inicial del host para el arranque del agente.
    pub fn classify_at_boot(config_forced: Option<ResourceTier>, thresholds: &turngate_domain_models::tier::TierThresholds) -> ResourceTier {
        if let Some(forced_tier) = config_forced {
            warn!("📌 [TIER]: Tier pinned by configuration to {:?}.", forced_tier);
            return forced_tier;
        }

        let snapshot = Self::sample_host_resources();
        classify_host(snapshot.cpu_cores, snapshot.memory_total_gb, thresholds)
    }

    pub async fn run(mut self) {
        info!("📊 [TIER_SENTINEL]: Host telemetry loop online.");
        let mut shutdown_watch = self.application_state.shutdown_watch.clone();
        let mut sample_timer = tokio::time::interval(SAMPLE_INTERVAL);
        sample_timer.tick().await; // tick inmediato consumido

        loop {
            tokio::select! {
                _ = sample_timer.tick() => self.evaluate_once().await,
                _ = shutdown_watch.changed() => break,
            }
        }
        info!("🏁 [TIER_SENTINEL]: Telemetry loop stopped.");
    }

    #[instrument(skip(self))]
    async fn evaluate_once(&mut self) {
        let state = &self.application_state;
        let snapshot = Self::sample_host_resources();
        *state.last_resources.write().expect("resources lock poisoned") = Some(snapshot);

        let (thresholds, forced_tier) = {
            let config_guard = state.config.read().expect("config lock poisoned");
            (config_guard.tier.thresholds.clone(), config_guard.tier.force_tier)
        };

        if forced_tier.is_some() {
            return; // nivel clavado por configuración
        }

        let candidate_tier = classify_host(snapshot.cpu_cores, snapshot.memory_total_gb, &thresholds);

        // La presión de utilización sostenida también degrada un escalón.
        let pressured_candidate = if snapshot.is_under_pressure(&thresholds) {
            match candidate_tier {
                ResourceTier::Full => ResourceTier::Normal,
                _ => ResourceTier::Lite,
            }
        } else {
            candidate_tier
        };

        if let Some(new_tier) = self.ladder.observe(pressured_candidate) {
            self.apply_tier_shift(new_tier).await;
        } else {
            debug!(
                "📈 [TIER_SENTINEL]: Sample {:?} (cpu {:.0}%, mem {:.0}%, disk {:.0}%).",
                pressured_candidate, snapshot.cpu_usage_percent, snapshot.memory_usage_percent, snapshot.disk_usage_percent
            );
        }
    }

    /// Aplica el perfil del nuevo nivel sobre todas las perillas.
    async fn apply_tier_shift(&self, new_tier: ResourceTier) {
        let state = &self.application_state;
        let previous_tier = state.tier();
        let profile = TierProfile::for_tier(new_tier);

        info!(
            "🔄 [TIER_SENTINEL]: Tier shift {:?} -> {:?} (queue {}, heartbeat {}s).",
            previous_tier, new_tier, profile.queue_capacity, profile.heartbeat_interval_seconds
        );

        state.set_tier(new_tier);
        state.runtime_knobs.adopt_profile(&profile);

        // Encogimiento de cola: expulsar de inmediato si desbordó.
        if let Err(shrink_fault) = state.event_queue.shrink_to_capacity(profile.queue_capacity).await {
            warn!("💾 [TIER_SENTINEL]: Post-shift shrink failed: {}", shrink_fault);
        }

        // Durabilidad WAL por nivel.
        let synchronous_mode = match new_tier {
            ResourceTier::Lite => SynchronousMode::Normal,
            _ => SynchronousMode::Full,
        };
        state.store_client.set_synchronous_mode(synchronous_mode);

        state.event_bus.publish_system(
            serde_json::json!({
                "kind": "tier_shift",
                "from": previous_tier,
                "to": new_tier,
                "queue_capacity": profile.queue_capacity,
            }),
            FaultSeverity::Low,
        );
    }

    // --- TELEMETRÍA DE SILICIO (pseudo-archivos de /proc) ---

    /**
     * Captura instantánea de recursos del host.
     *
     * Las lecturas de /proc son pseudo-archivos en memoria con impacto
     * despreciable; la ocupación de disco sale del inventario de
     * volúmenes del sistema.
     */
    pub fn sample_host_resources() -> ResourceSnapshot {
        let cpu_cores = num_cpus::get() as u32;
        let (memory_total_gb, memory_usage_percent) = Self::read_memory_profile();
        let cpu_usage_percent = Self::read_cpu_usage_percent(cpu_cores);
        let disk_usage_percent = Self::read_disk_usage_percent();

        ResourceSnapshot {
            cpu_cores,
            memory_total_gb,
            cpu_usage_percent,
            memory_usage_percent,
            disk_usage_percent,
            sampled_at: Utc::now(),
        }
    }

    /// Carga promedio de 1 minuto normalizada por núcleo.
    fn read_cpu_usage_percent(cpu_cores: u32) -> f64 {
        let load_average = fs::read_to_string("/proc/loadavg")
            .unwrap_or_default()
            .split_whitespace()
            .next()
            .and_then(|value| value.parse::<f64>().ok())
            .unwrap_or(0.0);

        ((load_average / cpu_cores.max(1) as f64) * 100.0).min(100.0)
    }

    /// Memoria total y ocupación por sustracción diferencial.
    fn read_memory_profile() -> (f64, f64) {
        let Ok(meminfo_content) = fs::read_to_string("/proc/meminfo") else {
            return (0.0, 0.0);
        };

        let mut memory_total_kb = 0u64;
        let mut memory_available_kb = 0u64;

        for line in meminfo_content.lines() {
            if line.starts_with("MemTotal:") {
                memory_total_kb = Self::parse_kilobyte_value(line);
            }
            if line.starts_with("MemAvailable:") {
                memory_available_kb = Self::parse_kilobyte_value(line);
            }
        }

        if memory_total_kb == 0 {
            return (0.0, 0.0);
        }

        // Kernels antiguos sin MemAvailable: estimación conservadora.
        if memory_available_kb == 0 {
            memory_available_kb = memory_total_kb / 2;
        }

        let total_gb = memory_total_kb as f64 / (1024.0 * 1024.0);
        let used_percent =
            ((memory_total_kb - memory_available_kb.min(memory_total_kb)) as f64 / memory_total_kb as f64) * 100.0;
        (total_gb, used_percent)
    }

    /// Ocupación del volumen más lleno del inventario.
    fn read_disk_usage_percent() -> f64 {
        let disks = sysinfo::Disks::new_with_refreshed_list();
        disks
            .iter()
            .filter(|disk| disk.total_space() > 0)
            .map(|disk| {
                let used = disk.total_space().saturating_sub(disk.available_space());
                (used as f64 / disk.total_space() as f64) * 100.0
            })
            .fold(0.0, f64::max)
    }

    fn parse_kilobyte_value(line: &str) -> u64 {
        line.split_whitespace()
            .nth(1)
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downgrade_requires_three_consecutive_samples() {
        let mut ladder = HysteresisLadder::new(ResourceTier::Normal);

        assert!(ladder.observe(ResourceTier::Lite).is_none());
        assert!(ladder.observe(ResourceTier::Lite).is_none());
        // Una muestra sana rompe la racha.
        assert!(ladder.observe(ResourceTier::Normal).is_none());
        assert!(ladder.observe(ResourceTier::Lite).is_none());
        assert!(ladder.observe(ResourceTier::Lite).is_none());
        assert_eq!(ladder.observe(ResourceTier::Lite), Some(ResourceTier::Lite));
        assert_eq!(ladder.current(), ResourceTier::Lite);
    }

    #[test]
    fn upgrade_requires_ten_consecutive_samples() {
        let mut ladder = HysteresisLadder::new(ResourceTier::Lite);

        for _ in 0..9 {
            assert!(ladder.observe(ResourceTier::Normal).is_none());
        }
        assert_eq!(ladder.observe(ResourceTier::Normal), Some(ResourceTier::Normal));
    }

    #[test]
    fn matching_sample_resets_both_streaks() {
        let mut ladder = HysteresisLadder::new(ResourceTier::Normal);

        ladder.observe(ResourceTier::Full);
        ladder.observe(ResourceTier::Full);
        ladder.observe(ResourceTier::Normal); // reinicio
        for _ in 0..9 {
            assert!(ladder.observe(ResourceTier::Full).is_none());
        }
        assert_eq!(ladder.observe(ResourceTier::Full), Some(ResourceTier::Full));
    }

    #[test]
    fn host_sampling_yields_plausible_numbers() {
        let snapshot = TierSentinel::sample_host_resources();
        assert!(snapshot.cpu_cores >= 1);
        assert!((0.0..=100.0).contains(&snapshot.cpu_usage_percent));
        assert!((0.0..=100.0).contains(&snapshot.memory_usage_percent));
        assert!((0.0..=100.0).contains(&snapshot.disk_usage_percent));
    }
}
