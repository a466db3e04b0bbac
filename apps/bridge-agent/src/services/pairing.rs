// [apps/bridge-agent/src/services/pairing.rs]
/*!
 * =================================================================
 * APARATO: PAIRING SERVICE
 * CLASIFICACIÓN: APPLICATION SERVICE (ESTRATO L4)
 * RESPONSABILIDAD: CANJE ÚNICO DE CÓDIGO POR IDENTIDAD DE LARGA VIDA
 *
 * El código de emparejamiento es de un solo uso y vida corta; esta es
 * la única llamada saliente sin firma. Las credenciales devueltas se
 * custodian vía bóveda y las sugerencias de configuración del
 * servidor quedan anotadas en el almacén para el próximo arranque.
 * =================================================================
 */

use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::BridgeConfig;
use turngate_core_keystore::{DeviceCredentials, Keystore, KeystoreError};
use turngate_domain_models::tier::ResourceTier;
use turngate_domain_models::wire::{DeviceInfo, ServerIssuedConfig};
use turngate_infra_store::{DeviceConfigRepository, StoreError};
use turngate_infra_uplink::{UplinkClient, UplinkError};

#[derive(Error, Debug)]
pub enum PairingError {
    #[error("[L4_PAIRING_FAULT]: UPLINK -> {0}")]
    Uplink(#[from] UplinkError),

    #[error("[L4_PAIRING_FAULT]: VAULT -> {0}")]
    Vault(#[from] KeystoreError),

    #[error("[L4_PAIRING_FAULT]: STORE -> {0}")]
    Store(#[from] StoreError),
}

/// Identidad resultante de un emparejamiento exitoso.
pub struct PairedIdentity {
    pub device_identifier: String,
    pub server_config: Option<ServerIssuedConfig>,
}

/// Describe este host para el registro remoto.
pub fn describe_device(tier: ResourceTier) -> DeviceInfo {
    let hostname = std::fs::read_to_string("/etc/hostname")
        .map(|content| content.trim().to_string())
        .ok()
        .filter(|name| !name.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "turngate-host".to_string());

    DeviceInfo {
        hostname,
        platform: std::env::consts::OS.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        tier,
    }
}

/**
 * Ejecuta el canje y persiste la identidad.
 *
 * # Errors:
 * - `Uplink(AuthRejected)` ante un código inválido, vencido o usado.
 */
pub async fn pair_device(
    config: &BridgeConfig,
    keystore: &Keystore,
    device_config: Option<&DeviceConfigRepository>,
    pair_code: &str,
    tier: ResourceTier,
) -> Result<PairedIdentity, PairingError> {
    let uplink_client = UplinkClient::new(
        config.api.base_url.clone(),
        Duration::from_secs(config.api.request_timeout_seconds),
    )?;

    let device_info = describe_device(tier);
    info!("🤝 [PAIRING]: Requesting identity for host [{}].", device_info.hostname);

    let (pair_response, device_key_material) = uplink_client.pair(pair_code, &device_info).await?;

    keystore.store_credentials(&DeviceCredentials {
        device_identifier: pair_response.device_id.clone(),
        device_key: device_key_material,
    })?;

    // Sugerencias del servidor: anotadas para el arranque siguiente.
    if let (Some(repository), Some(server_config)) = (device_config, pair_response.config.as_ref()) {
        if let Some(heartbeat_interval) = server_config.heartbeat_interval {
            repository.set("server.heartbeat_interval", &heartbeat_interval.to_string()).await?;
        }
        if let Some(queue_max_size) = server_config.queue_max_size {
            repository.set("server.queue_max_size", &queue_max_size.to_string()).await?;
        }
        if let Some(unlock_duration) = server_config.unlock_duration {
            repository.set("server.unlock_duration", &unlock_duration.to_string()).await?;
        }
        info!("📝 [PAIRING]: Server-issued config hints persisted.");
    } else if pair_response.config.is_some() {
        warn!("📝 [PAIRING]: Server hints received but no store available; hints dropped.");
    }

    info!("✅ [PAIRING]: Device [{}] paired and sealed.", pair_response.device_id);
    Ok(PairedIdentity {
        device_identifier: pair_response.device_id,
        server_config: pair_response.config,
    })
}
