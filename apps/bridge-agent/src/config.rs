// [apps/bridge-agent/src/config.rs]
/*!
 * =================================================================
 * APARATO: BRIDGE CONFIGURATION ENGINE
 * CLASIFICACIÓN: APPLICATION LAYER (ESTRATO L1-APP)
 * RESPONSABILIDAD: ESQUEMA YAML, SOBRECARGAS DE ENTORNO Y REDACCIÓN
 *
 * Precedencia: valores por defecto en código < archivo YAML <
 * variables de entorno con prefijo `BRIDGE_`. Los secretos (llaves
 * API, secreto JWT) jamás se imprimen: la vista del plano de control
 * sale redactada.
 * =================================================================
 */

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use turngate_domain_models::tier::{ResourceTier, TierThresholds};

/// Prefijo único de las sobrecargas de entorno.
const ENV_PREFIX: &str = "BRIDGE_";
/// Máscara de los campos sensibles en la vista redactada.
const REDACTION_MASK: &str = "•••redacted•••";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("[L1_CONFIG_FAULT]: FILE_UNREADABLE -> {0}")]
    FileUnreadable(#[from] std::io::Error),

    #[error("[L1_CONFIG_FAULT]: YAML_REJECTED -> {0}")]
    YamlRejected(#[from] serde_yaml::Error),

    #[error("[L1_CONFIG_FAULT]: VALUE_OUT_OF_RANGE -> {0}")]
    ValueOutOfRange(String),
}

// --- SECCIONES DEL ESQUEMA ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    /// Endpoint raíz de la API remota.
    pub base_url: String,
    /// Timeout por intento de red saliente.
    pub request_timeout_seconds: u64,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.turngate.example".into(),
            request_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind_address: String,
    pub port: u16,
    /// Tope global de conexiones WebSocket simultáneas.
    pub websocket_max_connections: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".into(),
            port: 8787,
            websocket_max_connections: 100,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// Llaves API aceptadas (comparación en tiempo constante).
    pub api_keys: Vec<String>,
    /// Secreto HS256 para validar JWT locales.
    pub jwt_secret: Option<String>,
    /// Habilita la verificación HMAC con la llave del dispositivo.
    pub hmac_enabled: bool,
    /// Lista blanca de IPs exactas o rangos CIDR. Vacía = sin restricción.
    pub ip_allowlist: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub window_seconds: u64,
    pub max_requests: u32,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            window_seconds: 60,
            max_requests: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsSection {
    pub enabled: bool,
    /// Orígenes exactos o `*`.
    pub allowed_origins: Vec<String>,
}

impl Default for CorsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityHeadersSection {
    pub csp_enabled: bool,
    pub csp_value: String,
}

impl Default for SecurityHeadersSection {
    fn default() -> Self {
        Self {
            csp_enabled: false,
            csp_value: "default-src 'self'".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DoorSection {
    /// Duración de desbloqueo por defecto, acotada a [1000, 30000].
    pub default_unlock_ms: u64,
}

impl Default for DoorSection {
    fn default() -> Self {
        Self { default_unlock_ms: 3_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptersSection {
    /// Nombres habilitados; cada uno busca sus opciones en `configs`.
    pub enabled: Vec<String>,
    pub configs: HashMap<String, serde_json::Value>,
}

impl Default for AdaptersSection {
    fn default() -> Self {
        let mut configs = HashMap::new();
        configs.insert("simulator".to_string(), serde_json::json!({ "kind": "simulator" }));
        Self {
            enabled: vec!["simulator".into()],
            configs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierSection {
    #[serde(flatten)]
    pub thresholds: TierThresholds,
    /// Forzado manual del nivel (diagnóstico y suites de prueba).
    pub force_tier: Option<ResourceTier>,
}

impl Default for TierSection {
    fn default() -> Self {
        Self {
            thresholds: TierThresholds::default(),
            force_tier: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    /// Ventana de arriendo de un lote antes de volver a ser visible.
    pub lease_timeout_seconds: i64,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self { lease_timeout_seconds: 60 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Directorio del archivo del almacén, la bóveda sellada y los logs.
    pub data_directory: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_directory: "./bridge-data".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub file_enabled: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self { file_enabled: true }
    }
}

/// Esquema completo de configuración del agente.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub api: ApiSection,
    pub server: ServerSection,
    pub auth: AuthSection,
    pub rate_limit: RateLimitSection,
    pub cors: CorsSection,
    pub security_headers: SecurityHeadersSection,
    pub door: DoorSection,
    pub adapters: AdaptersSection,
    pub tier: TierSection,
    pub queue: QueueSection,
    pub storage: StorageSection,
    pub logging: LoggingSection,
}

/// Resultado de una actualización parcial del plano de control.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigUpdateReceipt {
    pub changed_fields: Vec<String>,
    pub requires_restart: bool,
}

impl BridgeConfig {
    /**
     * Carga desde archivo (si existe) y aplica sobrecargas de entorno.
     */
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) if path.exists() => {
                info!("📄 [CONFIG]: Reading configuration from {}.", path.display());
                let raw_yaml = fs::read_to_string(path)?;
                serde_yaml::from_str(&raw_yaml)?
            }
            Some(path) => {
                warn!("📄 [CONFIG]: File {} not found. Using in-code defaults.", path.display());
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /**
     * Sobrecargas de entorno: un mapeo fijo por campo con el prefijo
     * único. Los secretos solo entran por aquí o por el archivo;
     * nunca por argumentos de línea de comandos.
     */
    pub fn apply_env_overrides(&mut self) {
        let read = |suffix: &str| std::env::var(format!("{ENV_PREFIX}{suffix}")).ok();

        if let Some(value) = read("API_BASE_URL") {
            self.api.base_url = value;
        }
        if let Some(value) = read("API_TIMEOUT_SECONDS").and_then(|raw| raw.parse().ok()) {
            self.api.request_timeout_seconds = value;
        }
        if let Some(value) = read("SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read("SERVER_PORT").and_then(|raw| raw.parse().ok()) {
            self.server.port = value;
        }
        if let Some(value) = read("WS_MAX_CONNECTIONS").and_then(|raw| raw.parse().ok()) {
            self.server.websocket_max_connections = value;
        }
        if let Some(value) = read("API_KEYS") {
            self.auth.api_keys = value.split(',').map(|key| key.trim().to_string()).collect();
        }
        if let Some(value) = read("JWT_SECRET") {
            self.auth.jwt_secret = Some(value);
        }
        if let Some(value) = read("HMAC_AUTH_ENABLED").and_then(|raw| raw.parse().ok()) {
            self.auth.hmac_enabled = value;
        }
        if let Some(value) = read("IP_ALLOWLIST") {
            self.auth.ip_allowlist = value.split(',').map(|entry| entry.trim().to_string()).collect();
        }
        if let Some(value) = read("RATE_LIMIT_WINDOW_SECONDS").and_then(|raw| raw.parse().ok()) {
            self.rate_limit.window_seconds = value;
        }
        if let Some(value) = read("RATE_LIMIT_MAX_REQUESTS").and_then(|raw| raw.parse().ok()) {
            self.rate_limit.max_requests = value;
        }
        if let Some(value) = read("CORS_ENABLED").and_then(|raw| raw.parse().ok()) {
            self.cors.enabled = value;
        }
        if let Some(value) = read("CORS_ALLOWED_ORIGINS") {
            self.cors.allowed_origins = value.split(',').map(|origin| origin.trim().to_string()).collect();
        }
        if let Some(value) = read("DOOR_DEFAULT_UNLOCK_MS").and_then(|raw| raw.parse().ok()) {
            self.door.default_unlock_ms = value;
        }
        if let Some(value) = read("ENABLED_ADAPTERS") {
            self.adapters.enabled = value.split(',').map(|name| name.trim().to_string()).collect();
        }
        if let Some(value) = read("DATA_DIRECTORY") {
            self.storage.data_directory = value;
        }
        if let Some(value) = read("LOG_FILE_ENABLED").and_then(|raw| raw.parse().ok()) {
            self.logging.file_enabled = value;
        }
        if let Some(value) = read("QUEUE_LEASE_TIMEOUT_SECONDS").and_then(|raw| raw.parse().ok()) {
            self.queue.lease_timeout_seconds = value;
        }
        if let Some(value) = read("FORCE_TIER") {
            self.tier.force_tier = match value.as_str() {
                "lite" => Some(ResourceTier::Lite),
                "normal" => Some(ResourceTier::Normal),
                "full" => Some(ResourceTier::Full),
                _ => None,
            };
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1_000..=30_000).contains(&self.door.default_unlock_ms) {
            return Err(ConfigError::ValueOutOfRange(format!(
                "door.default_unlock_ms debe caer en [1000, 30000], vino {}",
                self.door.default_unlock_ms
            )));
        }
        if self.rate_limit.window_seconds == 0 || self.rate_limit.max_requests == 0 {
            return Err(ConfigError::ValueOutOfRange("rate_limit no admite ceros".into()));
        }
        if self.queue.lease_timeout_seconds <= 0 {
            return Err(ConfigError::ValueOutOfRange("queue.lease_timeout_seconds debe ser positivo".into()));
        }
        Ok(())
    }

    /// Ruta del archivo del almacén dentro del directorio de datos.
    pub fn store_file_path(&self) -> PathBuf {
        PathBuf::from(&self.storage.data_directory).join("bridge-events.db")
    }

    /**
     * Vista redactada para el plano de control: los secretos se
     * enmascaran, la estructura se conserva.
     */
    pub fn redacted_view(&self) -> serde_json::Value {
        let mut view = serde_json::to_value(self).unwrap_or_default();

        if let Some(auth_section) = view.get_mut("auth") {
            if let Some(api_keys) = auth_section.get_mut("api_keys") {
                if let Some(entries) = api_keys.as_array_mut() {
                    for entry in entries {
                        *entry = serde_json::Value::String(REDACTION_MASK.into());
                    }
                }
            }
            if auth_section.get("jwt_secret").map(|secret| !secret.is_null()).unwrap_or(false) {
                auth_section["jwt_secret"] = serde_json::Value::String(REDACTION_MASK.into());
            }
        }

        // Los adaptadores pueden portar secretos compartidos de webhook.
        if let Some(adapter_configs) = view.pointer_mut("/adapters/configs") {
            if let Some(config_map) = adapter_configs.as_object_mut() {
                for (_, options) in config_map.iter_mut() {
                    if let Some(secret) = options.get_mut("shared_secret") {
                        *secret = serde_json::Value::String(REDACTION_MASK.into());
                    }
                }
            }
        }

        view
    }

    /**
     * Actualización parcial: fusiona un fragmento JSON sobre el árbol
     * vigente y reporta campos cambiados + necesidad de reinicio.
     *
     * Requieren reinicio: `server.*`, `storage.*`, `adapters.*` y
     * `api.base_url` (reconstruyen oyentes, almacén o registro).
     */
    pub fn apply_partial_update(
        &mut self,
        patch: &serde_json::Value,
    ) -> Result<ConfigUpdateReceipt, ConfigError> {
        let mut current_tree = serde_json::to_value(&*self).unwrap_or_default();
        let mut changed_fields = Vec::new();

        merge_patch(&mut current_tree, patch, String::new(), &mut changed_fields);

        let merged: BridgeConfig = serde_json::from_value(current_tree)
            .map_err(|merge_fault| ConfigError::ValueOutOfRange(merge_fault.to_string()))?;
        merged.validate()?;
        *self = merged;

        let requires_restart = changed_fields.iter().any(|field| {
            field.starts_with("server.")
                || field.starts_with("storage.")
                || field.starts_with("adapters.")
                || field == "api.base_url"
        });

        Ok(ConfigUpdateReceipt {
            changed_fields,
            requires_restart,
        })
    }

    /**
     * Relectura completa desde el archivo; devuelve los campos que
     * difieren de la configuración vigente.
     */
    pub fn reload_from_file(&mut self, config_path: &Path) -> Result<ConfigUpdateReceipt, ConfigError> {
        let fresh = Self::load(Some(config_path))?;

        let previous_tree = serde_json::to_value(&*self).unwrap_or_default();
        let fresh_tree = serde_json::to_value(&fresh).unwrap_or_default();

        let mut changed_fields = Vec::new();
        diff_trees(&previous_tree, &fresh_tree, String::new(), &mut changed_fields);

        let requires_restart = changed_fields.iter().any(|field| {
            field.starts_with("server.")
                || field.starts_with("storage.")
                || field.starts_with("adapters.")
                || field == "api.base_url"
        });

        *self = fresh;
        Ok(ConfigUpdateReceipt {
            changed_fields,
            requires_restart,
        })
    }
}

/// Fusión recursiva tipo merge-patch que anota las hojas modificadas.
fn merge_patch(
    target: &mut serde_json::Value,
    patch: &serde_json::Value,
    path: String,
    changed_fields: &mut Vec<String>,
) {
    match patch {
        serde_json::Value::Object(patch_map) => {
            if !target.is_object() {
                *target = serde_json::Value::Object(Default::default());
            }
            let target_map = target.as_object_mut().expect("target forzado a objeto");

            for (key, patch_value) in patch_map {
                let child_path = if path.is_empty() { key.clone() } else { format!("{path}.{key}") };
                let child_target = target_map.entry(key.clone()).or_insert(serde_json::Value::Null);
                merge_patch(child_target, patch_value, child_path, changed_fields);
            }
        }
        leaf_value => {
            if target != leaf_value {
                changed_fields.push(path);
                *target = leaf_value.clone();
            }
        }
    }
}

/// Diferencia estructural entre dos árboles; anota hojas divergentes.
fn diff_trees(
    previous: &serde_json::Value,
    fresh: &serde_json::Value,
    path: String,
    changed_fields: &mut Vec<String>,
) {
    match (previous, fresh) {
        (serde_json::Value::Object(previous_map), serde_json::Value::Object(fresh_map)) => {
            for (key, fresh_value) in fresh_map {
                let child_path = if path.is_empty() { key.clone() } else { format!("{path}.{key}") };
                match previous_map.get(key) {
                    Some(previous_value) => diff_trees(previous_value, fresh_value, child_path, changed_fields),
                    None => changed_fields.push(child_path),
                }
            }
        }
        (previous_leaf, fresh_leaf) => {
            if previous_leaf != fresh_leaf {
                changed_fields.push(path);
            }
        }
    }
}
