// [apps/bridge-agent/src/main.rs]
/*!
 * =================================================================
 * APARATO: BRIDGE AGENT SHELL
 * CLASIFICACIÓN: APPLICATION LAYER (ENTRY POINT)
 * RESPONSABILIDAD: MANDO CLI, BOOTSTRAP DE ENTORNO E IGNICIÓN
 *
 * Códigos de salida: 0 éxito; 1 error de configuración; 2 fallo de
 * emparejamiento; 3 fallo de ejecución irrecuperable. Los secretos
 * jamás viajan por argumentos de línea de comandos: solo archivo de
 * configuración o variables `BRIDGE_*`.
 * =================================================================
 */

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use turngate_bridge_lib::config::BridgeConfig;
use turngate_bridge_lib::kernel::BridgeKernel;
use turngate_bridge_lib::services::pairing;
use turngate_bridge_lib::services::tier_sentinel::TierSentinel;
use turngate_core_keystore::Keystore;
use turngate_infra_store::{DeviceConfigRepository, StoreClient, SynchronousMode};

#[derive(Parser, Debug)]
#[command(
    name = "bridge-agent",
    version,
    about = "Turngate Bridge // Agente local de eventos de acceso"
)]
struct BridgeDirectives {
    /// Ruta del archivo de configuración YAML.
    #[arg(long, global = true, env = "BRIDGE_CONFIG_FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: BridgeCommand,
}

#[derive(Subcommand, Debug)]
enum BridgeCommand {
    /// Ejecuta el agente en primer plano.
    Run,
    /// Canjea un código de emparejamiento y termina.
    Pair {
        /// Código de un solo uso emitido por el sistema remoto.
        #[arg(long)]
        code: String,
    },
    /// Registra el agente como servicio del sistema (instalador externo).
    Install,
    /// Retira el registro de servicio del sistema (instalador externo).
    Uninstall,
}

fn main() -> ExitCode {
    // Hidratación del entorno antes de leer cualquier directiva.
    dotenvy::dotenv().ok();

    let directives = BridgeDirectives::parse();

    // La configuración gobierna dónde (y si) se escribe el log de archivo.
    let config = match BridgeConfig::load(directives.config.as_deref()) {
        Ok(config) => config,
        Err(config_fault) => {
            eprintln!("CONFIG_FAULT: {config_fault}");
            return ExitCode::from(1);
        }
    };

    let log_directory = config.logging.file_enabled.then(|| PathBuf::from(&config.storage.data_directory).join("logs"));
    let _watchtower_guard =
        turngate_shared_watchtower::init_tracing("bridge_agent", log_directory.as_deref());

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(runtime_fault) => {
            error!("💀 [SHELL]: Runtime construction failed: {}", runtime_fault);
            return ExitCode::from(3);
        }
    };

    match directives.command {
        BridgeCommand::Run => runtime.block_on(run_agent(config, directives.config)),
        BridgeCommand::Pair { code } => runtime.block_on(pair_agent(config, &code)),
        BridgeCommand::Install | BridgeCommand::Uninstall => {
            // El registro de servicio lo posee el paquete instalador del
            // sistema; el binario solo acusa el mando.
            info!("🧰 [SHELL]: Service registration is owned by the platform installer package.");
            ExitCode::SUCCESS
        }
    }
}

async fn run_agent(config: BridgeConfig, config_file_path: Option<PathBuf>) -> ExitCode {
    info!("💠 [SHELL]: Turngate Bridge ignition sequence starting...");

    let kernel = match BridgeKernel::ignite(config, config_file_path).await {
        Ok(kernel) => kernel,
        Err(ignition_fault) => {
            error!("💀 [SHELL]: Ignition collapsed: {:#}", ignition_fault);
            return ExitCode::from(3);
        }
    };

    info!("🚀 [SHELL]: Handing control to BridgeKernel. Transitioning to OPERATIONAL.");
    match kernel.launch_operations().await {
        Ok(()) => {
            info!("🏁 [SHELL]: Shutdown sequence concluded. Bridge offline.");
            ExitCode::SUCCESS
        }
        Err(runtime_fault) => {
            error!("💀 [SHELL]: Unrecoverable runtime fault: {:#}", runtime_fault);
            ExitCode::from(3)
        }
    }
}

async fn pair_agent(config: BridgeConfig, pair_code: &str) -> ExitCode {
    let data_directory = PathBuf::from(&config.storage.data_directory);
    if let Err(io_fault) = std::fs::create_dir_all(&data_directory) {
        eprintln!("CONFIG_FAULT: data directory unusable: {io_fault}");
        return ExitCode::from(1);
    }

    let keystore = Keystore::open(&data_directory);
    let tier = TierSentinel::classify_at_boot(config.tier.force_tier, &config.tier.thresholds);

    // El almacén se abre para anotar las sugerencias del servidor; su
    // ausencia no impide el emparejamiento en sí.
    let store_url = config.store_file_path().display().to_string();
    let device_config = match StoreClient::connect(&store_url, SynchronousMode::Full).await {
        Ok(store_client) => Some(DeviceConfigRepository::new(store_client)),
        Err(store_fault) => {
            error!("💾 [SHELL]: Store unavailable during pairing: {}", store_fault);
            None
        }
    };

    match pairing::pair_device(&config, &keystore, device_config.as_ref(), pair_code, tier).await {
        Ok(identity) => {
            info!("✅ [SHELL]: Paired as [{}]. Ready to run.", identity.device_identifier);
            ExitCode::SUCCESS
        }
        Err(pairing_fault) => {
            error!("❌ [SHELL]: Pairing failed: {}", pairing_fault);
            ExitCode::from(2)
        }
    }
}
