// [apps/bridge-agent/src/state/mod.rs]
/*!
 * =================================================================
 * APARATO: BRIDGE STATE HUB
 * CLASIFICACIÓN: APPLICATION STATE (ESTRATO L1-APP)
 * RESPONSABILIDAD: COMPOSICIÓN DE ESTRATOS Y PERILLAS DE EJECUCIÓN
 *
 * Placa base del agente: el Supervisor posee cada componente de larga
 * vida y los pares solo reciben manijas de lectura. Las perillas de
 * ejecución (capacidad de cola, cadencia de latido, capacidades
 * opcionales) son atómicas para que el centinela de nivel y el
 * escalador de degradación las muevan sin contención.
 * =================================================================
 */

pub mod door_control;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::watch;
use tracing::debug;

use crate::config::BridgeConfig;
use crate::services::event_bus::EventBus;
use crate::services::recovery::RecoveryEngine;
use crate::state::door_control::DoorControlManager;
use turngate_core_crypto::{seal, unseal, CryptoError};
use turngate_core_keystore::Keystore;
use turngate_domain_adapters::AdapterRegistry;
use turngate_domain_models::tier::{ResourceSnapshot, ResourceTier, TierProfile};
use turngate_infra_store::{
    AdapterStatusRepository, DeviceConfigRepository, EventQueueRepository, StoreClient, UserMappingRepository,
};
use turngate_infra_uplink::{BackoffRegistry, NetworkProbe, UplinkClient};

/// Sellador de cargas: retiene la llave dentro del límite criptográfico
/// y expone solo las operaciones de sellado.
pub struct PayloadSealer {
    seal_key: [u8; 32],
}

impl PayloadSealer {
    pub fn new(seal_key: [u8; 32]) -> Self {
        Self { seal_key }
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        seal(&self.seal_key, plaintext)
    }

    pub fn unseal(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        unseal(&self.seal_key, sealed)
    }
}

/// Perillas de ejecución mutadas por nivel y degradación.
pub struct RuntimeKnobs {
    queue_capacity: AtomicU64,
    heartbeat_interval_seconds: AtomicU64,
    uplink_batch_size: AtomicU32,
    lease_timeout_seconds: AtomicI64,
    metrics_enabled: AtomicBool,
    websocket_broadcast_enabled: AtomicBool,
    detailed_audit_enabled: AtomicBool,
    /// Compuerta del enlace tras un rechazo de autenticación.
    uplink_paused: AtomicBool,
}

impl RuntimeKnobs {
    pub fn from_profile(profile: &TierProfile, lease_timeout_seconds: i64) -> Self {
        Self {
            queue_capacity: AtomicU64::new(profile.queue_capacity),
            heartbeat_interval_seconds: AtomicU64::new(profile.heartbeat_interval_seconds),
            uplink_batch_size: AtomicU32::new(Self::batch_size_for(profile.tier)),
            lease_timeout_seconds: AtomicI64::new(lease_timeout_seconds),
            metrics_enabled: AtomicBool::new(profile.metrics_enabled),
            websocket_broadcast_enabled: AtomicBool::new(profile.websocket_broadcast_enabled),
            detailed_audit_enabled: AtomicBool::new(profile.detailed_audit_enabled),
            uplink_paused: AtomicBool::new(false),
        }
    }

    /// Tamaño de lote del enlace por nivel: 50 / 100 / 500.
    pub fn batch_size_for(tier: ResourceTier) -> u32 {
        match tier {
            ResourceTier::Lite => 50,
            ResourceTier::Normal => 100,
            ResourceTier::Full => 500,
        }
    }

    /// Aplica el perfil completo de un nivel sobre las perillas.
    pub fn adopt_profile(&self, profile: &TierProfile) {
        self.queue_capacity.store(profile.queue_capacity, Ordering::SeqCst);
        self.heartbeat_interval_seconds
            .store(profile.heartbeat_interval_seconds, Ordering::SeqCst);
        self.uplink_batch_size
            .store(Self::batch_size_for(profile.tier), Ordering::SeqCst);
        self.metrics_enabled.store(profile.metrics_enabled, Ordering::SeqCst);
        self.websocket_broadcast_enabled
            .store(profile.websocket_broadcast_enabled, Ordering::SeqCst);
        self.detailed_audit_enabled
            .store(profile.detailed_audit_enabled, Ordering::SeqCst);
    }

    pub fn queue_capacity(&self) -> u64 {
        self.queue_capacity.load(Ordering::SeqCst)
    }
    pub fn set_queue_capacity(&self, capacity: u64) {
        self.queue_capacity.store(capacity, Ordering::SeqCst);
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds.load(Ordering::SeqCst).max(1))
    }
    pub fn set_heartbeat_interval_seconds(&self, seconds: u64) {
        self.heartbeat_interval_seconds.store(seconds.max(1), Ordering::SeqCst);
    }

    pub fn uplink_batch_size(&self) -> u32 {
        self.uplink_batch_size.load(Ordering::SeqCst)
    }

    pub fn lease_timeout_seconds(&self) -> i64 {
        self.lease_timeout_seconds.load(Ordering::SeqCst)
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics_enabled.load(Ordering::SeqCst)
    }
    pub fn set_metrics_enabled(&self, enabled: bool) {
        self.metrics_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn websocket_broadcast_enabled(&self) -> bool {
        self.websocket_broadcast_enabled.load(Ordering::SeqCst)
    }
    pub fn set_websocket_broadcast_enabled(&self, enabled: bool) {
        self.websocket_broadcast_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn detailed_audit_enabled(&self) -> bool {
        self.detailed_audit_enabled.load(Ordering::SeqCst)
    }

    pub fn uplink_paused(&self) -> bool {
        self.uplink_paused.load(Ordering::SeqCst)
    }
    pub fn set_uplink_paused(&self, paused: bool) {
        self.uplink_paused.store(paused, Ordering::SeqCst);
    }
}

/// Contadores del pipeline y rastro temporal del enlace.
#[derive(Default)]
pub struct PipelineMetrics {
    pub events_processed: AtomicU64,
    pub validation_rejected: AtomicU64,
    pub unmapped_users: AtomicU64,
    pub duplicates_dropped: AtomicU64,
    pub batches_delivered: AtomicU64,
    pub events_delivered: AtomicU64,
    pub events_rejected_by_server: AtomicU64,
    pub uplink_auth_failures: AtomicU64,
    last_uplink_success_ms: AtomicI64,
    heartbeats_since_uplink_success: AtomicU32,
    uplink_auth_failing: AtomicBool,
    last_event_at_ms: AtomicI64,
    last_eviction_at_ms: AtomicI64,
}

impl PipelineMetrics {
    pub fn record_event_ingested(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
        self.last_event_at_ms.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.last_eviction_at_ms.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn record_uplink_success(&self) {
        self.last_uplink_success_ms.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        self.heartbeats_since_uplink_success.store(0, Ordering::Relaxed);
        self.uplink_auth_failing.store(false, Ordering::Relaxed);
    }

    pub fn record_uplink_auth_failure(&self) {
        self.uplink_auth_failures.fetch_add(1, Ordering::Relaxed);
        self.uplink_auth_failing.store(true, Ordering::Relaxed);
    }

    pub fn record_heartbeat_tick(&self) {
        self.heartbeats_since_uplink_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_event_at(&self) -> Option<DateTime<Utc>> {
        Self::optional_instant(self.last_event_at_ms.load(Ordering::Relaxed))
    }

    pub fn last_uplink_success_at(&self) -> Option<DateTime<Utc>> {
        Self::optional_instant(self.last_uplink_success_ms.load(Ordering::Relaxed))
    }

    pub fn heartbeats_since_uplink_success(&self) -> u32 {
        self.heartbeats_since_uplink_success.load(Ordering::Relaxed)
    }

    pub fn uplink_auth_failing(&self) -> bool {
        self.uplink_auth_failing.load(Ordering::Relaxed)
    }

    /// Expulsión "en curso" = alguna expulsión en los últimos 5 minutos.
    pub fn eviction_recent(&self) -> bool {
        match Self::optional_instant(self.last_eviction_at_ms.load(Ordering::Relaxed)) {
            Some(instant) => Utc::now().signed_duration_since(instant).num_seconds() < 300,
            None => false,
        }
    }

    fn optional_instant(milliseconds: i64) -> Option<DateTime<Utc>> {
        if milliseconds == 0 {
            None
        } else {
            Utc.timestamp_millis_opt(milliseconds).single()
        }
    }
}

/// Contenedor de estado compartido (thread-safe) del agente.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<BridgeConfig>>,
    pub config_file_path: Option<PathBuf>,

    pub store_client: StoreClient,
    pub event_queue: Arc<EventQueueRepository>,
    pub device_config: Arc<DeviceConfigRepository>,
    pub user_mappings: Arc<UserMappingRepository>,
    pub adapter_status: Arc<AdapterStatusRepository>,

    pub keystore: Arc<Keystore>,
    pub payload_sealer: Arc<PayloadSealer>,

    pub adapter_registry: Arc<AdapterRegistry>,
    pub event_bus: Arc<EventBus>,
    pub door_control: Arc<DoorControlManager>,

    pub uplink_client: Arc<UplinkClient>,
    pub network_probe: Arc<NetworkProbe>,
    pub backoff_registry: Arc<BackoffRegistry>,

    pub runtime_knobs: Arc<RuntimeKnobs>,
    pub pipeline_metrics: Arc<PipelineMetrics>,
    pub recovery_engine: Arc<RecoveryEngine>,

    pub current_tier: Arc<RwLock<ResourceTier>>,
    pub last_resources: Arc<RwLock<Option<ResourceSnapshot>>>,
    /// Identidad pública del dispositivo; cadena vacía = sin emparejar.
    pub device_identifier: Arc<RwLock<String>>,

    pub websocket_connection_count: Arc<AtomicUsize>,
    pub shutdown_watch: watch::Receiver<bool>,

    pub started_monotonic: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /**
     * Ensambla el estado maestro inyectando las dependencias ya
     * inicializadas por el bootstrap.
     */
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        config: BridgeConfig,
        config_file_path: Option<PathBuf>,
        store_client: StoreClient,
        keystore: Arc<Keystore>,
        payload_sealer: PayloadSealer,
        uplink_client: UplinkClient,
        network_probe: NetworkProbe,
        initial_tier: ResourceTier,
        shutdown_watch: watch::Receiver<bool>,
    ) -> Self {
        debug!("🧬 [APP_STATE]: Assembling sovereign state hub...");

        let initial_profile = TierProfile::for_tier(initial_tier);
        let runtime_knobs = Arc::new(RuntimeKnobs::from_profile(
            &initial_profile,
            config.queue.lease_timeout_seconds,
        ));

        let adapter_registry = Arc::new(AdapterRegistry::new());
        let door_control = Arc::new(DoorControlManager::new(Arc::clone(&adapter_registry)));

        Self {
            config: Arc::new(RwLock::new(config)),
            config_file_path,
            event_queue: Arc::new(EventQueueRepository::new(store_client.clone())),
            device_config: Arc::new(DeviceConfigRepository::new(store_client.clone())),
            user_mappings: Arc::new(UserMappingRepository::new(store_client.clone())),
            adapter_status: Arc::new(AdapterStatusRepository::new(store_client.clone())),
            store_client,
            keystore,
            payload_sealer: Arc::new(payload_sealer),
            adapter_registry,
            event_bus: Arc::new(EventBus::new()),
            door_control,
            uplink_client: Arc::new(uplink_client),
            network_probe: Arc::new(network_probe),
            backoff_registry: Arc::new(BackoffRegistry::new()),
            runtime_knobs,
            pipeline_metrics: Arc::new(PipelineMetrics::default()),
            recovery_engine: Arc::new(RecoveryEngine::new()),
            current_tier: Arc::new(RwLock::new(initial_tier)),
            last_resources: Arc::new(RwLock::new(None)),
            device_identifier: Arc::new(RwLock::new(String::new())),
            websocket_connection_count: Arc::new(AtomicUsize::new(0)),
            shutdown_watch,
            started_monotonic: Instant::now(),
            started_at: Utc::now(),
        }
    }

    pub fn tier(&self) -> ResourceTier {
        *self.current_tier.read().expect("tier lock poisoned")
    }

    pub fn set_tier(&self, tier: ResourceTier) {
        *self.current_tier.write().expect("tier lock poisoned") = tier;
    }

    pub fn device_id(&self) -> String {
        self.device_identifier.read().expect("device id lock poisoned").clone()
    }

    pub fn is_paired(&self) -> bool {
        !self.device_id().is_empty()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_monotonic.elapsed().as_secs()
    }

    /// Fotografía vigente de recursos (puede no existir aún).
    pub fn resources_snapshot(&self) -> Option<ResourceSnapshot> {
        *self.last_resources.read().expect("resources lock poisoned")
    }
}
