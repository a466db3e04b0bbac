// [libs/domain/adapters/src/registry.rs]
/*!
 * =================================================================
 * APARATO: ADAPTER REGISTRY
 * CLASIFICACIÓN: DOMAIN SERVICE (ESTRATO L2)
 * RESPONSABILIDAD: CONSTRUCCIÓN POR NOMBRE, CICLO DE VIDA Y CONSULTA
 *
 * Mapa de lectura dominante bajo RwLock: las escrituras ocurren solo
 * al habilitar o deshabilitar un adaptador. El constructor resuelve
 * la variante por la clave `kind` de las opciones (por defecto, el
 * propio nombre del adaptador).
 * =================================================================
 */

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::relay_board::RelayBoardAdapter;
use crate::simulator::SimulatorAdapter;
use crate::webhook::WebhookAdapter;
use crate::{AdapterError, DoorAccessAdapter, EventSink};
use turngate_domain_models::status::{AdapterRuntimeState, AdapterStatusReport};

/// Conjunto vivo de adaptadores del puente.
pub struct AdapterRegistry {
    adapters: RwLock<HashMap<String, Arc<dyn DoorAccessAdapter>>>,
    /// Nombres suprimidos por el operador o por degradación.
    disabled: RwLock<HashMap<String, bool>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
            disabled: RwLock::new(HashMap::new()),
        }
    }

    /**
     * Construye la variante concreta para un nombre habilitado.
     *
     * # Errors:
     * - `ConfigError` si la clase (`kind`) no está registrada.
     */
    pub fn build_adapter(
        adapter_name: &str,
        options: &serde_json::Value,
    ) -> Result<Arc<dyn DoorAccessAdapter>, AdapterError> {
        let adapter_kind = options
            .get("kind")
            .and_then(|value| value.as_str())
            .unwrap_or(adapter_name);

        match adapter_kind {
            "simulator" => Ok(Arc::new(SimulatorAdapter::new(adapter_name))),
            "webhook" => Ok(Arc::new(WebhookAdapter::new(adapter_name))),
            "relay_board" => Ok(Arc::new(RelayBoardAdapter::new(adapter_name))),
            unknown_kind => Err(AdapterError::ConfigError(format!(
                "UNKNOWN_ADAPTER_KIND -> {unknown_kind}"
            ))),
        }
    }

    /// Inserta un adaptador ya construido. El nombre debe ser único.
    pub fn register(&self, adapter: Arc<dyn DoorAccessAdapter>) -> Result<(), AdapterError> {
        let mut adapters_guard = self.adapters.write().expect("adapters lock poisoned");
        let adapter_name = adapter.name().to_string();

        if adapters_guard.contains_key(&adapter_name) {
            return Err(AdapterError::ConfigError(format!(
                "DUPLICATE_ADAPTER_NAME -> {adapter_name}"
            )));
        }

        info!("🔌 [REGISTRY]: Adapter [{}] registered.", adapter_name);
        adapters_guard.insert(adapter_name, adapter);
        Ok(())
    }

    pub fn get(&self, adapter_name: &str) -> Option<Arc<dyn DoorAccessAdapter>> {
        self.adapters
            .read()
            .expect("adapters lock poisoned")
            .get(adapter_name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.adapters
            .read()
            .expect("adapters lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<dyn DoorAccessAdapter>> {
        self.adapters
            .read()
            .expect("adapters lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Reportes de estado de todos los adaptadores, deshabilitados incluidos.
    pub fn status_reports(&self) -> Vec<AdapterStatusReport> {
        let disabled_guard = self.disabled.read().expect("disabled lock poisoned");
        self.all()
            .iter()
            .map(|adapter| {
                let mut report = adapter.status();
                if disabled_guard.get(adapter.name()).copied().unwrap_or(false) {
                    report.state = AdapterRuntimeState::Disabled;
                }
                report
            })
            .collect()
    }

    pub fn is_disabled(&self, adapter_name: &str) -> bool {
        self.disabled
            .read()
            .expect("disabled lock poisoned")
            .get(adapter_name)
            .copied()
            .unwrap_or(false)
    }

    /**
     * Suprime un adaptador: detiene su escucha y lo marca deshabilitado.
     */
    pub async fn disable(&self, adapter_name: &str) -> Result<(), AdapterError> {
        let adapter = self
            .get(adapter_name)
            .ok_or_else(|| AdapterError::ConfigError(format!("ADAPTER_NOT_FOUND -> {adapter_name}")))?;

        if let Err(stop_fault) = adapter.stop_listening().await {
            warn!("⚠️ [REGISTRY]: Stop during disable of [{}] reported: {}", adapter_name, stop_fault);
        }

        self.disabled
            .write()
            .expect("disabled lock poisoned")
            .insert(adapter_name.to_string(), true);

        info!("⛔ [REGISTRY]: Adapter [{}] disabled.", adapter_name);
        Ok(())
    }

    /**
     * Reactiva un adaptador deshabilitado y rearma su escucha.
     */
    pub async fn enable(&self, adapter_name: &str) -> Result<(), AdapterError> {
        let adapter = self
            .get(adapter_name)
            .ok_or_else(|| AdapterError::ConfigError(format!("ADAPTER_NOT_FOUND -> {adapter_name}")))?;

        self.disabled
            .write()
            .expect("disabled lock poisoned")
            .insert(adapter_name.to_string(), false);

        adapter.start_listening().await?;
        info!("✅ [REGISTRY]: Adapter [{}] re-enabled.", adapter_name);
        Ok(())
    }

    /// Primer adaptador sano, activo y no deshabilitado; objetivo por
    /// defecto del controlador de puerta.
    pub fn first_healthy(&self) -> Option<Arc<dyn DoorAccessAdapter>> {
        self.all()
            .into_iter()
            .find(|adapter| !self.is_disabled(adapter.name()) && adapter.is_healthy())
    }

    /// Conecta el mismo sumidero a todos los adaptadores registrados.
    pub fn bind_sink_to_all(&self, sink: Arc<dyn EventSink>) {
        for adapter in self.all() {
            adapter.bind_sink(Arc::clone(&sink));
        }
    }

    /// Conteo de adaptadores activos (sanos y habilitados).
    pub fn active_count(&self) -> usize {
        self.all()
            .iter()
            .filter(|adapter| !self.is_disabled(adapter.name()) && adapter.is_healthy())
            .count()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_resolves_known_kinds_and_rejects_unknown() {
        let simulator = AdapterRegistry::build_adapter("door_sim", &serde_json::json!({"kind": "simulator"}));
        assert!(simulator.is_ok());

        let by_name = AdapterRegistry::build_adapter("webhook", &serde_json::json!({}));
        assert!(by_name.is_ok());

        let unknown = AdapterRegistry::build_adapter("mystery", &serde_json::json!({}));
        assert!(matches!(unknown, Err(AdapterError::ConfigError(_))));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = AdapterRegistry::new();
        let first = AdapterRegistry::build_adapter("sim", &serde_json::json!({"kind": "simulator"})).unwrap();
        let second = AdapterRegistry::build_adapter("sim", &serde_json::json!({"kind": "simulator"})).unwrap();

        registry.register(first).expect("primer registro debe pasar");
        assert!(matches!(registry.register(second), Err(AdapterError::ConfigError(_))));
        assert_eq!(registry.names().len(), 1);
    }

    #[tokio::test]
    async fn disable_marks_the_report_and_enable_restores() {
        let registry = AdapterRegistry::new();
        let adapter = AdapterRegistry::build_adapter("sim", &serde_json::json!({"kind": "simulator"})).unwrap();
        adapter.initialize(&serde_json::json!({"cadence_seconds": 3600})).await.unwrap();
        registry.register(adapter).unwrap();

        registry.disable("sim").await.unwrap();
        assert!(registry.is_disabled("sim"));
        let reports = registry.status_reports();
        assert_eq!(reports[0].state, AdapterRuntimeState::Disabled);
        assert_eq!(registry.active_count(), 0);

        registry.enable("sim").await.unwrap();
        assert!(!registry.is_disabled("sim"));
    }
}
