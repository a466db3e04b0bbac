// [tests/mirror/apps/bridge_agent/common/mod.rs]
/*!
 * =================================================================
 * APARATO: BANCO DE PRUEBAS DEL PUENTE
 * CLASIFICACIÓN: EVIDENCIA ESPEJO (ESTRATO L1-MIRROR)
 * RESPONSABILIDAD: ENSAMBLAJE DE ESTADO VOLÁTIL PARA LAS SUITES
 * =================================================================
 */

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use turngate_bridge_lib::config::BridgeConfig;
use turngate_bridge_lib::state::{AppState, PayloadSealer};
use turngate_core_keystore::{DeviceCredentials, Keystore};
use turngate_domain_models::tier::ResourceTier;
use turngate_infra_store::{StoreClient, SynchronousMode};
use turngate_infra_uplink::{NetworkProbe, UplinkClient};

/// Banco completo: estado volátil + guardianes de vida.
pub struct TestBench {
    pub state: AppState,
    pub shutdown_sender: watch::Sender<bool>,
    _data_directory: tempfile::TempDir,
}

/**
 * Ensambla un estado de agente sobre almacén en memoria y bóveda
 * sellada en un directorio temporal. El dispositivo queda emparejado
 * con credenciales sintéticas deterministas.
 */
pub async fn assemble_bench(memory_label: &str, mut config: BridgeConfig) -> TestBench {
    let data_directory = tempfile::tempdir().expect("TEMPDIR_FAULT");
    config.storage.data_directory = data_directory.path().display().to_string();
    config.tier.force_tier = Some(ResourceTier::Normal);

    let keystore = Arc::new(Keystore::sealed_file_at(
        PathBuf::from(data_directory.path()).join("bridge-vault.sealed"),
    ));
    keystore
        .store_credentials(&DeviceCredentials {
            device_identifier: "dev_mirror".into(),
            device_key: vec![0x42; 32],
        })
        .expect("VAULT_FAULT: synthetic credentials rejected");

    let seal_key = keystore.payload_seal_key().expect("VAULT_FAULT: seal key");

    let store_client = StoreClient::connect(
        &format!("file:{memory_label}?mode=memory&cache=shared"),
        SynchronousMode::Full,
    )
    .await
    .expect("CRITICAL_FAULT: memory store ignition failed");

    let uplink_client = UplinkClient::new("http://127.0.0.1:1".into(), Duration::from_millis(300))
        .expect("UPLINK_FAULT");
    let network_probe = NetworkProbe::for_endpoint("http://127.0.0.1:1").expect("PROBE_FAULT");

    let (shutdown_sender, shutdown_receiver) = watch::channel(false);

    let state = AppState::assemble(
        config,
        None,
        store_client,
        Arc::clone(&keystore),
        PayloadSealer::new(seal_key),
        uplink_client,
        network_probe,
        ResourceTier::Normal,
        shutdown_receiver,
    );
    *state.device_identifier.write().expect("device id lock poisoned") = "dev_mirror".into();

    TestBench {
        state,
        shutdown_sender,
        _data_directory: data_directory,
    }
}
