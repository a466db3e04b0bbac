// [apps/bridge-agent/src/services/degradation.rs]
/*!
 * =================================================================
 * APARATO: DEGRADATION LADDER
 * CLASIFICACIÓN: BACKGROUND SERVICE (ESTRATO L4)
 * RESPONSABILIDAD: ACCIONES GRADUADAS ANTE PRESIÓN DE RECURSOS
 *
 * Escalera None -> Minor -> Moderate -> Severe -> Critical regida por
 * la utilización máxima observada (>=70/80/90/95%). Subir un nivel
 * ejecuta las acciones recién cubiertas en orden de prioridad; bajar
 * ejecuta sus reversos en orden inverso. Las acciones mueven perillas
 * explícitas del estado, nunca variables globales ocultas.
 * =================================================================
 */

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::state::AppState;
use turngate_domain_models::fault::FaultSeverity;
use turngate_domain_models::tier::TierProfile;

/// Cadencia del monitor de presión.
const PRESSURE_SCAN_INTERVAL: Duration = Duration::from_secs(30);

/// Nivel de degradación vigente.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DegradationLevel {
    None,
    Minor,
    Moderate,
    Severe,
    Critical,
}

impl DegradationLevel {
    /// Nivel dictado por la utilización máxima del host.
    pub fn for_pressure(max_usage_percent: f64) -> Self {
        if max_usage_percent >= 95.0 {
            DegradationLevel::Critical
        } else if max_usage_percent >= 90.0 {
            DegradationLevel::Severe
        } else if max_usage_percent >= 80.0 {
            DegradationLevel::Moderate
        } else if max_usage_percent >= 70.0 {
            DegradationLevel::Minor
        } else {
            DegradationLevel::None
        }
    }
}

/// Acción nombrada con reverso emparejado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationAction {
    ReduceHeartbeatCadence,
    DisableDetailedMetrics,
    ShrinkQueueCapacity,
    DisableNonEssentialAdapters,
    DisableFileLogging,
    EmergencyQueueFlush,
    MinimalOperationMode,
}

/// Catálogo: (acción, nivel que la cubre, prioridad dentro del nivel).
const ACTION_CATALOG: &[(DegradationAction, DegradationLevel, u8)] = &[
    (DegradationAction::ReduceHeartbeatCadence, DegradationLevel::Minor, 1),
    (DegradationAction::DisableDetailedMetrics, DegradationLevel::Moderate, 1),
    (DegradationAction::ShrinkQueueCapacity, DegradationLevel::Severe, 1),
    (DegradationAction::DisableNonEssentialAdapters, DegradationLevel::Severe, 2),
    (DegradationAction::DisableFileLogging, DegradationLevel::Critical, 1),
    (DegradationAction::EmergencyQueueFlush, DegradationLevel::Critical, 2),
    (DegradationAction::MinimalOperationMode, DegradationLevel::Critical, 3),
];

pub struct DegradationLadder {
    application_state: AppState,
    current_level: Mutex<DegradationLevel>,
    /// Pila de acciones aplicadas, en orden de aplicación.
    applied_actions: Mutex<Vec<DegradationAction>>,
    /// Adaptadores suprimidos por ESTA escalera; el reverso solo
    /// reactiva estos, jamás los apagados por el operador.
    suppressed_adapters: Mutex<Vec<String>>,
}

impl DegradationLadder {
    pub fn new(application_state: AppState) -> Self {
        Self {
            application_state,
            current_level: Mutex::new(DegradationLevel::None),
            applied_actions: Mutex::new(Vec::new()),
            suppressed_adapters: Mutex::new(Vec::new()),
        }
    }

    pub fn current_level(&self) -> DegradationLevel {
        *self.current_level.lock().expect("level lock poisoned")
    }

    pub fn applied_actions(&self) -> Vec<DegradationAction> {
        self.applied_actions.lock().expect("actions lock poisoned").clone()
    }

    pub async fn run(self) {
        info!("🪜 [DEGRADATION]: Pressure monitor online.");
        let mut shutdown_watch = self.application_state.shutdown_watch.clone();
        let mut scan_timer = tokio::time::interval(PRESSURE_SCAN_INTERVAL);
        scan_timer.tick().await;

        loop {
            tokio::select! {
                _ = scan_timer.tick() => {
                    if let Some(snapshot) = self.application_state.resources_snapshot() {
                        let max_usage = snapshot
                            .cpu_usage_percent
                            .max(snapshot.memory_usage_percent)
                            .max(snapshot.disk_usage_percent);
                        self.transition_to(DegradationLevel::for_pressure(max_usage)).await;
                    }
                }
                _ = shutdown_watch.changed() => break,
            }
        }
        info!("🏁 [DEGRADATION]: Pressure monitor stopped.");
    }

    /**
     * Transición de nivel: aplica lo recién cubierto o revierte en
     * orden inverso lo que el nuevo nivel ya no cubre.
     */
    pub async fn transition_to(&self, target_level: DegradationLevel) {
        let previous_level = {
            let mut level_guard = self.current_level.lock().expect("level lock poisoned");
            let previous = *level_guard;
            if previous == target_level {
                return;
            }
            *level_guard = target_level;
            previous
        };

        if target_level > previous_level {
            warn!(
                "📉 [DEGRADATION]: Escalating {:?} -> {:?}.",
                previous_level, target_level
            );
            let mut newly_covered: Vec<(DegradationAction, DegradationLevel, u8)> = ACTION_CATALOG
                .iter()
                .copied()
                .filter(|(_, level, _)| *level > previous_level && *level <= target_level)
                .collect();
            newly_covered.sort_by_key(|(_, level, priority)| (*level, *priority));

            for (action, _, _) in newly_covered {
                self.apply_action(action).await;
                self.applied_actions.lock().expect("actions lock poisoned").push(action);
            }
        } else {
            info!(
                "📈 [DEGRADATION]: Recovering {:?} -> {:?}.",
                previous_level, target_level
            );
            // Reversión en orden inverso de aplicación.
            loop {
                let maybe_action = {
                    let mut actions_guard = self.applied_actions.lock().expect("actions lock poisoned");
                    let still_covered = |action: DegradationAction| {
                        ACTION_CATALOG
                            .iter()
                            .find(|(candidate, _, _)| *candidate == action)
                            .map(|(_, level, _)| *level <= target_level)
                            .unwrap_or(false)
                    };
                    match actions_guard.last().copied() {
                        Some(action) if !still_covered(action) => {
                            actions_guard.pop();
                            Some(action)
                        }
                        _ => None,
                    }
                };

                match maybe_action {
                    Some(action) => self.rollback_action(action).await,
                    None => break,
                }
            }
        }

        self.application_state.event_bus.publish_system(
            serde_json::json!({
                "kind": "degradation_shift",
                "from": previous_level,
                "to": target_level,
                "applied": self.applied_actions(),
            }),
            if target_level >= DegradationLevel::Severe {
                FaultSeverity::High
            } else {
                FaultSeverity::Medium
            },
        );
    }

    // --- EJECUCIÓN DE ACCIONES (perillas explícitas del estado) ---

    async fn apply_action(&self, action: DegradationAction) {
        let state = &self.application_state;
        warn!("🔧 [DEGRADATION]: Applying {:?}.", action);

        match action {
            DegradationAction::ReduceHeartbeatCadence => {
                let current = state.runtime_knobs.heartbeat_interval().as_secs();
                state.runtime_knobs.set_heartbeat_interval_seconds(current * 2);
            }
            DegradationAction::DisableDetailedMetrics => {
                state.runtime_knobs.set_metrics_enabled(false);
            }
            DegradationAction::ShrinkQueueCapacity => {
                let profile = TierProfile::for_tier(state.tier());
                let reduced_capacity = (profile.queue_capacity / 2).max(100);
                state.runtime_knobs.set_queue_capacity(reduced_capacity);
                if let Err(shrink_fault) = state.event_queue.shrink_to_capacity(reduced_capacity).await {
                    warn!("💾 [DEGRADATION]: Shrink failed: {}", shrink_fault);
                }
            }
            DegradationAction::DisableNonEssentialAdapters => {
                // Conserva el primer adaptador sano; suprime el resto y
                // anota exactamente cuáles para el reverso.
                let survivor = state.adapter_registry.first_healthy().map(|adapter| adapter.name().to_string());
                for adapter_name in state.adapter_registry.names() {
                    if Some(&adapter_name) != survivor.as_ref() && !state.adapter_registry.is_disabled(&adapter_name) {
                        match state.adapter_registry.disable(&adapter_name).await {
                            Ok(()) => self
                                .suppressed_adapters
                                .lock()
                                .expect("suppressed lock poisoned")
                                .push(adapter_name),
                            Err(disable_fault) => {
                                warn!("🔌 [DEGRADATION]: Disable of [{}] failed: {}", adapter_name, disable_fault)
                            }
                        }
                    }
                }
            }
            DegradationAction::DisableFileLogging => {
                turngate_shared_watchtower::set_file_sink_enabled(false);
            }
            DegradationAction::EmergencyQueueFlush => {
                let keep = state.runtime_knobs.queue_capacity() / 10;
                match state.event_queue.emergency_flush(keep).await {
                    Ok((sent_purged, pending_evicted)) => warn!(
                        target: "audit",
                        sent_purged,
                        pending_evicted,
                        "🚨 [DEGRADATION]: Emergency queue flush executed (lossy)."
                    ),
                    Err(flush_fault) => warn!("💾 [DEGRADATION]: Emergency flush failed: {}", flush_fault),
                }
            }
            DegradationAction::MinimalOperationMode => {
                state.runtime_knobs.set_websocket_broadcast_enabled(false);
            }
        }
    }

    async fn rollback_action(&self, action: DegradationAction) {
        let state = &self.application_state;
        info!("🔩 [DEGRADATION]: Rolling back {:?}.", action);
        let profile = TierProfile::for_tier(state.tier());

        match action {
            DegradationAction::ReduceHeartbeatCadence => {
                state
                    .runtime_knobs
                    .set_heartbeat_interval_seconds(profile.heartbeat_interval_seconds);
            }
            DegradationAction::DisableDetailedMetrics => {
                state.runtime_knobs.set_metrics_enabled(profile.metrics_enabled);
            }
            DegradationAction::ShrinkQueueCapacity => {
                state.runtime_knobs.set_queue_capacity(profile.queue_capacity);
            }
            DegradationAction::DisableNonEssentialAdapters => {
                let suppressed: Vec<String> =
                    self.suppressed_adapters.lock().expect("suppressed lock poisoned").drain(..).collect();
                for adapter_name in suppressed {
                    if let Err(enable_fault) = state.adapter_registry.enable(&adapter_name).await {
                        warn!("🔌 [DEGRADATION]: Re-enable of [{}] failed: {}", adapter_name, enable_fault);
                    }
                }
            }
            DegradationAction::DisableFileLogging => {
                turngate_shared_watchtower::set_file_sink_enabled(true);
            }
            DegradationAction::EmergencyQueueFlush => {
                // Acción con pérdida: no existe reverso material; el rastro
                // de auditoría quedó escrito al aplicarla.
            }
            DegradationAction::MinimalOperationMode => {
                state
                    .runtime_knobs
                    .set_websocket_broadcast_enabled(profile.websocket_broadcast_enabled);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pressure_maps_to_the_quoted_levels() {
        assert_eq!(DegradationLevel::for_pressure(10.0), DegradationLevel::None);
        assert_eq!(DegradationLevel::for_pressure(69.9), DegradationLevel::None);
        assert_eq!(DegradationLevel::for_pressure(70.0), DegradationLevel::Minor);
        assert_eq!(DegradationLevel::for_pressure(80.0), DegradationLevel::Moderate);
        assert_eq!(DegradationLevel::for_pressure(90.0), DegradationLevel::Severe);
        assert_eq!(DegradationLevel::for_pressure(95.0), DegradationLevel::Critical);
        assert_eq!(DegradationLevel::for_pressure(100.0), DegradationLevel::Critical);
    }

    #[test]
    fn catalog_levels_are_monotonic_by_declaration() {
        let mut previous = DegradationLevel::None;
        for (_, level, _) in ACTION_CATALOG {
            assert!(*level >= previous, "el catálogo debe declarar niveles no decrecientes");
            previous = *level;
        }
    }
}
