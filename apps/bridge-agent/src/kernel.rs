// [apps/bridge-agent/src/kernel.rs]
/*!
 * =================================================================
 * APARATO: BRIDGE KERNEL
 * CLASIFICACIÓN: COMPOSITION ROOT (ESTRATO L1-APP)
 * RESPONSABILIDAD: IGNICIÓN DE DAEMONS, TRANSPORTE HTTP Y APAGADO
 *
 * Escalera de apagado ordenado ante la señal del host:
 * 1. Detener adaptadores (cesa la producción de eventos crudos).
 * 2. Dejar de aceptar HTTP y drenar handlers en vuelo (<= 30s).
 * 3. La bomba de enlace sella su lote (ack o nack) y termina.
 * 4. Sesiones WebSocket cerradas con trama de despedida.
 * 5. El almacén y la bóveda se liberan al caer el proceso.
 * =================================================================
 */

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::bootstrap::Bootstrap;
use crate::routes::create_bridge_router;
use crate::services::{
    DegradationLadder, EventProcessor, HeartbeatService, TierSentinel, UplinkPump,
};
use crate::state::AppState;

/// Ventana máxima de drenaje de handlers en vuelo.
const DRAIN_WINDOW: Duration = Duration::from_secs(30);

pub struct BridgeKernel {
    pub application_state: AppState,
    shutdown_sender: watch::Sender<bool>,
}

impl BridgeKernel {
    /**
     * Reintenta la escucha de un adaptador caído bajo la política de
     * recuperación de hardware; el agotamiento del presupuesto queda
     * anotado como fallo permanente sin tumbar el pipeline.
     */
    fn spawn_adapter_listen_recovery(state: AppState, adapter_name: String) {
        use crate::services::recovery::RecoveryVerdict;
        use turngate_domain_models::fault::{BridgeFault, FaultCategory, FaultSeverity};

        tokio::spawn(async move {
            let mut shutdown_watch = state.shutdown_watch.clone();

            loop {
                let fault = BridgeFault::new(
                    FaultCategory::Hardware,
                    FaultSeverity::High,
                    format!("adapter:{adapter_name}"),
                    "start_listening",
                    "listener ignition failed",
                );

                match state.recovery_engine.evaluate(&fault) {
                    RecoveryVerdict::RetryAfter(delay) => {
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = shutdown_watch.changed() => return,
                        }
                    }
                    _ => {
                        error!("💀 [KERNEL]: Adapter [{}] recovery budget exhausted.", adapter_name);
                        return;
                    }
                }

                let Some(adapter) = state.adapter_registry.get(&adapter_name) else { return };
                match adapter.start_listening().await {
                    Ok(()) => {
                        info!("♻️  [KERNEL]: Adapter [{}] recovered and listening.", adapter_name);
                        state.recovery_engine.record_success(&fault.recovery_key());
                        let _ = state.adapter_status.upsert(&adapter.status()).await;
                        return;
                    }
                    Err(listen_fault) => {
                        warn!("🔌 [KERNEL]: Adapter [{}] retry failed: {}", adapter_name, listen_fault);
                        let _ = state.adapter_status.upsert(&adapter.status()).await;
                    }
                }
            }
        });
    }

    /// Realiza la ignición del estado maestro vía bootstrap.
    pub async fn ignite(
        config: crate::config::BridgeConfig,
        config_file_path: Option<std::path::PathBuf>,
    ) -> Result<Self> {
        let (application_state, shutdown_sender) = Bootstrap::ignite(config, config_file_path).await?;
        Ok(Self {
            application_state,
            shutdown_sender,
        })
    }

    /**
     * Lanza daemons, adaptadores y el servidor HTTP; bloquea hasta el
     * apagado ordenado.
     */
    pub async fn launch_operations(self) -> Result<()> {
        let state = self.application_state.clone();

        // --- 1. PIPELINE: PROCESADOR + SUMIDERO COMPARTIDO ---
        let (event_processor, pipeline_sink) = EventProcessor::new(state.clone());
        state.adapter_registry.bind_sink_to_all(pipeline_sink);
        tokio::spawn(event_processor.run());

        // --- 2. ESCUCHA DE ADAPTADORES (con recuperación por política) ---
        for adapter in state.adapter_registry.all() {
            let adapter_name = adapter.name().to_string();
            match adapter.start_listening().await {
                Ok(()) => {
                    info!("🔌 [KERNEL]: Adapter [{}] listening.", adapter_name);
                    state
                        .recovery_engine
                        .record_success(&format!("hardware:adapter:{adapter_name}:start_listening"));
                }
                Err(listen_fault) => {
                    warn!("🔌 [KERNEL]: Adapter [{}] failed to listen: {}", adapter_name, listen_fault);
                    Self::spawn_adapter_listen_recovery(state.clone(), adapter_name.clone());
                }
            }
            let _ = state.adapter_status.upsert(&adapter.status()).await;
        }

        // --- 3. DAEMONS DE FONDO ---
        tokio::spawn(UplinkPump::new(state.clone()).run());
        tokio::spawn(TierSentinel::new(state.clone()).run());
        tokio::spawn(HeartbeatService::new(state.clone()).run());
        tokio::spawn(DegradationLadder::new(state.clone()).run());
        Bootstrap::spawn_diagnostics(state.clone());

        // --- 4. TRANSPORTE HTTP ---
        let (bind_address_text, bind_port) = {
            let config_guard = state.config.read().expect("config lock poisoned");
            (config_guard.server.bind_address.clone(), config_guard.server.port)
        };
        let bind_address: SocketAddr = format!("{bind_address_text}:{bind_port}")
            .parse()
            .context("CONFIG_FAULT: server bind address unparseable")?;

        let bridge_router = create_bridge_router(state.clone());
        let tcp_listener = tokio::net::TcpListener::bind(bind_address)
            .await
            .with_context(|| format!("NET_FAULT: unable to bind {bind_address}"))?;

        info!("🚀 [KERNEL_ONLINE]: Control plane listening at {}.", bind_address);

        // --- 5. DISPARADOR DE APAGADO ORDENADO ---
        let shutdown_state = state.clone();
        let shutdown_sender = self.shutdown_sender;
        let mut forced_exit_watch = state.shutdown_watch.clone();

        let graceful_trigger = async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("⚠️ [KERNEL]: Termination requested by host. Sealing strata...");
            }

            // Paso 1: cesar la producción de eventos crudos.
            for adapter in shutdown_state.adapter_registry.all() {
                if let Err(stop_fault) = adapter.stop_listening().await {
                    warn!("🔌 [KERNEL]: Adapter stop reported: {}", stop_fault);
                }
            }

            // Paso 2+: el resto de daemons observa la señal compartida.
            let _ = shutdown_sender.send(true);
        };

        let serve_future = axum::serve(
            tcp_listener,
            bridge_router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(graceful_trigger);

        // Ventana de drenaje: si los handlers (o sockets) no sueltan a
        // tiempo, el proceso se fuerza tras el plazo.
        let forced_exit = async move {
            while !*forced_exit_watch.borrow() {
                if forced_exit_watch.changed().await.is_err() {
                    return;
                }
            }
            tokio::time::sleep(DRAIN_WINDOW).await;
        };

        tokio::select! {
            serve_verdict = serve_future => {
                if let Err(server_fault) = serve_verdict {
                    error!("💀 [KERNEL_COLLAPSE]: HTTP runtime failure: {}", server_fault);
                    anyhow::bail!("HTTP runtime failure: {server_fault}");
                }
                info!("🏁 [KERNEL]: HTTP transport drained cleanly.");
            }
            _ = forced_exit => {
                warn!("⏱️ [KERNEL]: Drain window expired. Forcing remaining connections.");
            }
        }

        info!("🏁 [KERNEL]: Shutdown ladder complete. Store and vault released.");
        Ok(())
    }
}
