// [apps/bridge-agent/src/bootstrap.rs]
/*!
 * =================================================================
 * APARATO: BRIDGE BOOTSTRAP
 * CLASIFICACIÓN: COMPOSITION ROOT (ESTRATO L1-APP)
 * RESPONSABILIDAD: IGNICIÓN EN ORDEN DE DEPENDENCIA Y DIAGNÓSTICO
 *
 * Orden de ignición: bóveda -> llave de sellado -> almacén (con la
 * durabilidad del nivel inicial) -> enlace ascendente -> estado
 * maestro -> registro de adaptadores. El diagnóstico de arranque
 * fotografía el sistema recién compuesto.
 * =================================================================
 */

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::BridgeConfig;
use crate::services::tier_sentinel::TierSentinel;
use crate::state::{AppState, PayloadSealer};
use turngate_core_keystore::Keystore;
use turngate_domain_adapters::AdapterRegistry;
use turngate_domain_models::status::{AdapterRuntimeState, AdapterStatusReport};
use turngate_domain_models::tier::ResourceTier;
use turngate_infra_store::{StoreClient, SynchronousMode};
use turngate_infra_uplink::{NetworkProbe, UplinkClient};

pub struct Bootstrap;

impl Bootstrap {
    /**
     * Compone el estado maestro del agente en orden de dependencia.
     *
     * Devuelve además el emisor de la señal de apagado; el Kernel es
     * su único dueño.
     */
    pub async fn ignite(
        config: BridgeConfig,
        config_file_path: Option<PathBuf>,
    ) -> Result<(AppState, watch::Sender<bool>)> {
        let data_directory = PathBuf::from(&config.storage.data_directory);
        std::fs::create_dir_all(&data_directory)
            .with_context(|| format!("IO_FAULT: unable to claim data directory {}", data_directory.display()))?;

        // 1. BÓVEDA DE IDENTIDAD Y LLAVE DE SELLADO
        let keystore = Arc::new(Keystore::open(&data_directory));
        let seal_key = keystore
            .payload_seal_key()
            .context("VAULT_FAULT: payload seal key unavailable")?;
        let payload_sealer = PayloadSealer::new(seal_key);

        // 2. CLASIFICACIÓN INICIAL DEL HOST
        let initial_tier = TierSentinel::classify_at_boot(config.tier.force_tier, &config.tier.thresholds);
        info!("🏷️  [BOOTSTRAP]: Host classified as {:?} at ignition.", initial_tier);

        // 3. ALMACÉN EMBEBIDO CON LA DURABILIDAD DEL NIVEL
        let synchronous_mode = match initial_tier {
            ResourceTier::Lite => SynchronousMode::Normal,
            _ => SynchronousMode::Full,
        };
        let store_url = config.store_file_path().display().to_string();
        let store_client = StoreClient::connect(&store_url, synchronous_mode)
            .await
            .context("STORE_FAULT: embedded store ignition failed")?;

        // 4. ENLACE ASCENDENTE Y SONDEO DE RED
        let uplink_client = UplinkClient::new(
            config.api.base_url.clone(),
            Duration::from_secs(config.api.request_timeout_seconds),
        )
        .context("UPLINK_FAULT: client construction failed")?;
        let network_probe =
            NetworkProbe::for_endpoint(&config.api.base_url).context("UPLINK_FAULT: endpoint unparseable")?;

        // 5. ESTADO MAESTRO
        let (shutdown_sender, shutdown_receiver) = watch::channel(false);
        let application_state = AppState::assemble(
            config,
            config_file_path,
            store_client,
            keystore,
            payload_sealer,
            uplink_client,
            network_probe,
            initial_tier,
            shutdown_receiver,
        );

        // Identidad pública si el puente ya fue emparejado.
        if let Ok(Some(credentials)) = application_state.keystore.load_credentials() {
            *application_state
                .device_identifier
                .write()
                .expect("device id lock poisoned") = credentials.device_identifier.clone();
            info!("🪪 [BOOTSTRAP]: Device identity [{}] restored from vault.", credentials.device_identifier);
        } else {
            warn!("🪪 [BOOTSTRAP]: Device not paired yet. Uplink will hold until pairing.");
        }

        // Sugerencias del servidor anotadas durante el emparejamiento.
        Self::apply_server_hints(&application_state).await;

        // 6. REGISTRO DE ADAPTADORES DESDE CONFIGURACIÓN
        Self::register_configured_adapters(&application_state).await?;

        Ok((application_state, shutdown_sender))
    }

    /// Reaplica las perillas sugeridas por el servidor al emparejar.
    async fn apply_server_hints(state: &AppState) {
        if let Ok(Some(heartbeat_hint)) = state.device_config.get("server.heartbeat_interval").await {
            if let Ok(seconds) = heartbeat_hint.parse::<u64>() {
                state.runtime_knobs.set_heartbeat_interval_seconds(seconds);
                info!("📝 [BOOTSTRAP]: Server heartbeat hint applied ({}s).", seconds);
            }
        }
        if let Ok(Some(queue_hint)) = state.device_config.get("server.queue_max_size").await {
            if let Ok(capacity) = queue_hint.parse::<u64>() {
                state.runtime_knobs.set_queue_capacity(capacity);
                info!("📝 [BOOTSTRAP]: Server queue-capacity hint applied ({}).", capacity);
            }
        }
    }

    /**
     * Construye, inicializa y registra cada adaptador habilitado.
     * Una falla de inicialización no tumba el arranque: queda anotada
     * como estado de error del adaptador.
     */
    async fn register_configured_adapters(state: &AppState) -> Result<()> {
        let (enabled_names, adapter_configs) = {
            let config_guard = state.config.read().expect("config lock poisoned");
            (
                config_guard.adapters.enabled.clone(),
                config_guard.adapters.configs.clone(),
            )
        };

        for adapter_name in enabled_names {
            let options = adapter_configs
                .get(&adapter_name)
                .cloned()
                .unwrap_or_else(|| serde_json::json!({}));

            let adapter = match AdapterRegistry::build_adapter(&adapter_name, &options) {
                Ok(adapter) => adapter,
                Err(build_fault) => {
                    warn!("🔌 [BOOTSTRAP]: Adapter [{}] rejected: {}", adapter_name, build_fault);
                    let mut report = AdapterStatusReport::inactive(&adapter_name);
                    report.state = AdapterRuntimeState::Error;
                    report.error_message = Some(build_fault.to_string());
                    let _ = state.adapter_status.upsert(&report).await;
                    continue;
                }
            };

            if let Err(init_fault) = adapter.initialize(&options).await {
                warn!("🔌 [BOOTSTRAP]: Adapter [{}] init failed: {}", adapter_name, init_fault);
                let mut report = AdapterStatusReport::inactive(&adapter_name);
                report.state = AdapterRuntimeState::Error;
                report.error_message = Some(init_fault.to_string());
                let _ = state.adapter_status.upsert(&report).await;
                continue;
            }

            if let Err(register_fault) = state.adapter_registry.register(adapter) {
                warn!("🔌 [BOOTSTRAP]: Adapter [{}] not registered: {}", adapter_name, register_fault);
                continue;
            }
            let _ = state
                .adapter_status
                .upsert(&AdapterStatusReport::inactive(&adapter_name))
                .await;
        }

        Ok(())
    }

    /// Fotografía de diagnóstico tras la ignición.
    pub fn spawn_diagnostics(state: AppState) {
        tokio::spawn(async move {
            let store_file_bytes = std::fs::metadata(Path::new(
                &state.config.read().expect("config lock poisoned").store_file_path(),
            ))
            .map(|metadata| metadata.len())
            .unwrap_or(0);

            let queue_stats = state.event_queue.stats().await.unwrap_or_default();
            let mapping_count = state.user_mappings.count().await.unwrap_or(0);

            info!(
                "🩺 [DIAGNOSTICS]: store={}KiB queue_pending={} sent={} mappings={} tier={:?} paired={} adapters={:?}",
                store_file_bytes / 1024,
                queue_stats.pending,
                queue_stats.sent,
                mapping_count,
                state.tier(),
                state.is_paired(),
                state.adapter_registry.names(),
            );
        });
    }
}
