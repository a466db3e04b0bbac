// [libs/core/keystore/src/lib.rs]
/*!
 * =================================================================
 * APARATO: DEVICE IDENTITY VAULT
 * CLASIFICACIÓN: CORE SECURITY (ESTRATO L1)
 * RESPONSABILIDAD: CUSTODIA DE CREDENCIALES Y LLAVE DE SELLADO
 *
 * La bóveda intenta primero el almacén de secretos del sistema
 * operativo (Secret Service); si el host no lo ofrece, degrada a un
 * archivo sellado con AES-256-GCM bajo una llave derivada de la
 * identidad de la máquina (PBKDF2-HMAC-SHA256 sobre machine-id).
 *
 * La llave de firma nunca sale de este límite como estado de larga
 * vida: los consumidores piden un `RequestSigner` efímero por
 * operación.
 * =================================================================
 */

use std::fs;
use std::path::{Path, PathBuf};

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, info, warn};

use turngate_core_crypto::{seal, unseal, RequestSigner};

/// Iteraciones PBKDF2 para la derivación de la llave de máquina.
const MACHINE_KEY_PBKDF2_ITERATIONS: u32 = 150_000;
/// Sal de dominio para la derivación de la llave de máquina.
const MACHINE_KEY_DOMAIN_SALT: &str = "turngate_bridge_vault_v1";
/// Nombre de servicio en el Secret Service del sistema operativo.
const SECRET_SERVICE_NAME: &str = "turngate-bridge";
/// Entrada única que agrupa el material de la bóveda.
const SECRET_SERVICE_ACCOUNT: &str = "device-vault";

#[derive(Error, Debug)]
pub enum KeystoreError {
    #[error("[L1_VAULT_FAULT]: SECRET_SERVICE_REJECTION -> {0}")]
    SecretService(String),

    #[error("[L1_VAULT_FAULT]: SEALED_FILE_IO -> {0}")]
    SealedFileIo(#[from] std::io::Error),

    #[error("[L1_VAULT_FAULT]: VAULT_INTEGRITY_COMPROMISED -> {0}")]
    Crypto(#[from] turngate_core_crypto::CryptoError),

    #[error("[L1_VAULT_FAULT]: VAULT_ENCODING_REJECTED -> {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("[L1_VAULT_FAULT]: DEVICE_NOT_PAIRED")]
    NotPaired,
}

/// Credenciales de identidad del dispositivo frente a la API remota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCredentials {
    /// Identificador unívoco emitido durante el emparejamiento.
    pub device_identifier: String,
    /// Secreto compartido HMAC, en crudo.
    #[serde(with = "hex_bytes")]
    pub device_key: Vec<u8>,
}

impl DeviceCredentials {
    /// Un dispositivo sin identificador se considera no emparejado.
    pub fn is_paired(&self) -> bool {
        !self.device_identifier.is_empty() && !self.device_key.is_empty()
    }
}

/// Contenido serializado de la bóveda (una sola unidad atómica).
#[derive(Debug, Default, Serialize, Deserialize)]
struct VaultPayload {
    credentials: Option<DeviceCredentials>,
    /// Llave simétrica para el sellado de cargas de eventos en reposo.
    #[serde(default, with = "opt_hex_bytes")]
    payload_seal_key: Option<Vec<u8>>,
}

enum VaultBackend {
    /// Almacén de secretos del sistema operativo.
    SecretService,
    /// Archivo sellado con la llave ligada a la máquina.
    SealedFile { file_path: PathBuf, machine_key: [u8; 32] },
}

pub struct Keystore {
    backend: VaultBackend,
}

impl Keystore {
    /**
     * Abre la bóveda sondeando primero el Secret Service del host.
     *
     * El sondeo consiste en una lectura: `NoEntry` confirma un backend
     * operativo aunque vacío; cualquier otra falla degrada al archivo
     * sellado junto al almacén de eventos.
     */
    pub fn open(fallback_directory: &Path) -> Self {
        match keyring::Entry::new(SECRET_SERVICE_NAME, SECRET_SERVICE_ACCOUNT) {
            Ok(probe_entry) => match probe_entry.get_password() {
                Ok(_) | Err(keyring::Error::NoEntry) => {
                    info!("🔐 [VAULT]: OS secret service available. Using native backend.");
                    return Self { backend: VaultBackend::SecretService };
                }
                Err(probe_fault) => {
                    warn!("⚠️ [VAULT]: Secret service probe failed ({probe_fault}). Falling back to sealed file.");
                }
            },
            Err(entry_fault) => {
                warn!("⚠️ [VAULT]: Secret service unavailable ({entry_fault}). Falling back to sealed file.");
            }
        }

        Self::sealed_file_at(fallback_directory.join("bridge-vault.sealed"))
    }

    /// Construye la bóveda directamente sobre el backend de archivo sellado.
    pub fn sealed_file_at(file_path: PathBuf) -> Self {
        let machine_key = derive_machine_bound_key();
        info!("🗄️  [VAULT]: Sealed-file backend anchored at {}.", file_path.display());
        Self {
            backend: VaultBackend::SealedFile { file_path, machine_key },
        }
    }

    // --- OPERACIONES DE CREDENCIALES ---

    /**
     * Persiste las credenciales obtenidas por el emparejamiento.
     */
    pub fn store_credentials(&self, credentials: &DeviceCredentials) -> Result<(), KeystoreError> {
        let mut payload = self.read_payload()?.unwrap_or_default();
        payload.credentials = Some(credentials.clone());
        self.write_payload(&payload)?;
        info!("🔑 [VAULT]: Device credentials sealed for [{}].", credentials.device_identifier);
        Ok(())
    }

    /// Lee las credenciales; `None` significa dispositivo sin emparejar.
    pub fn load_credentials(&self) -> Result<Option<DeviceCredentials>, KeystoreError> {
        Ok(self.read_payload()?.and_then(|payload| payload.credentials))
    }

    /**
     * Entrega un firmante efímero construido con las credenciales vivas.
     *
     * # Errors:
     * - `NotPaired` si la bóveda no contiene credenciales completas.
     */
    pub fn request_signer(&self) -> Result<RequestSigner, KeystoreError> {
        let credentials = self.load_credentials()?.ok_or(KeystoreError::NotPaired)?;
        if !credentials.is_paired() {
            return Err(KeystoreError::NotPaired);
        }
        Ok(RequestSigner::new(credentials.device_identifier, credentials.device_key))
    }

    /**
     * Presta la llave del dispositivo por la vida de un cierre.
     *
     * La llave no sobrevive a la invocación: los consumidores que
     * derivan identidades con ella no retienen el material.
     */
    pub fn with_device_key<R>(
        &self,
        consumer: impl FnOnce(&str, &[u8]) -> R,
    ) -> Result<R, KeystoreError> {
        let credentials = self.load_credentials()?.ok_or(KeystoreError::NotPaired)?;
        if !credentials.is_paired() {
            return Err(KeystoreError::NotPaired);
        }
        Ok(consumer(&credentials.device_identifier, &credentials.device_key))
    }

    // --- OPERACIONES DE LLAVE DE SELLADO ---

    /**
     * Devuelve la llave de sellado de cargas, generándola una única vez.
     *
     * La llave nace del CSPRNG del sistema y queda custodiada por el
     * mismo backend que las credenciales.
     */
    pub fn payload_seal_key(&self) -> Result<[u8; 32], KeystoreError> {
        let mut payload = self.read_payload()?.unwrap_or_default();

        if let Some(existing_key) = payload.payload_seal_key.as_deref() {
            if existing_key.len() == 32 {
                let mut key = [0u8; 32];
                key.copy_from_slice(existing_key);
                return Ok(key);
            }
            warn!("⚠️ [VAULT]: Stored seal key has invalid length. Regenerating.");
        }

        let mut fresh_key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut fresh_key);
        payload.payload_seal_key = Some(fresh_key.to_vec());
        self.write_payload(&payload)?;
        info!("🧬 [VAULT]: Fresh payload seal key generated and sealed.");
        Ok(fresh_key)
    }

    // --- MOTOR DE PERSISTENCIA INTERNO ---

    fn read_payload(&self) -> Result<Option<VaultPayload>, KeystoreError> {
        match &self.backend {
            VaultBackend::SecretService => {
                let entry = keyring::Entry::new(SECRET_SERVICE_NAME, SECRET_SERVICE_ACCOUNT)
                    .map_err(|fault| KeystoreError::SecretService(fault.to_string()))?;
                match entry.get_password() {
                    Ok(serialized) => Ok(Some(serde_json::from_str(&serialized)?)),
                    Err(keyring::Error::NoEntry) => Ok(None),
                    Err(fault) => Err(KeystoreError::SecretService(fault.to_string())),
                }
            }
            VaultBackend::SealedFile { file_path, machine_key } => {
                if !file_path.exists() {
                    return Ok(None);
                }
                let sealed_bytes = fs::read(file_path)?;
                let plaintext = unseal(machine_key, &sealed_bytes)?;
                Ok(Some(serde_json::from_slice(&plaintext)?))
            }
        }
    }

    fn write_payload(&self, payload: &VaultPayload) -> Result<(), KeystoreError> {
        match &self.backend {
            VaultBackend::SecretService => {
                let entry = keyring::Entry::new(SECRET_SERVICE_NAME, SECRET_SERVICE_ACCOUNT)
                    .map_err(|fault| KeystoreError::SecretService(fault.to_string()))?;
                entry
                    .set_password(&serde_json::to_string(payload)?)
                    .map_err(|fault| KeystoreError::SecretService(fault.to_string()))
            }
            VaultBackend::SealedFile { file_path, machine_key } => {
                if let Some(parent_directory) = file_path.parent() {
                    fs::create_dir_all(parent_directory)?;
                }
                let plaintext = serde_json::to_vec(payload)?;
                let sealed_bytes = seal(machine_key, &plaintext)?;

                // Escritura atómica: el archivo parcial nunca reemplaza al vigente.
                let staging_path = file_path.with_extension("sealed.tmp");
                fs::write(&staging_path, sealed_bytes)?;
                fs::rename(&staging_path, file_path)?;
                debug!("💾 [VAULT]: Sealed file rewritten ({} bytes plaintext).", plaintext.len());
                Ok(())
            }
        }
    }
}

/**
 * Deriva la llave ligada a la máquina: PBKDF2-HMAC-SHA256 sobre el
 * machine-id del host con sal de dominio fija.
 *
 * Fallback en cascada: machine-id de systemd, el de dbus y, como
 * último recurso, el hostname (hosts contenedorizados minimalistas).
 */
fn derive_machine_bound_key() -> [u8; 32] {
    let machine_identity = fs::read_to_string("/etc/machine-id")
        .or_else(|_| fs::read_to_string("/var/lib/dbus/machine-id"))
        .map(|content| content.trim().to_string())
        .unwrap_or_else(|_| {
            warn!("⚠️ [VAULT]: No machine-id descriptor found. Deriving from hostname.");
            std::env::var("HOSTNAME").unwrap_or_else(|_| "turngate-unbound-host".to_string())
        });

    let mut derived_key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(
        machine_identity.as_bytes(),
        MACHINE_KEY_DOMAIN_SALT.as_bytes(),
        MACHINE_KEY_PBKDF2_ITERATIONS,
        &mut derived_key,
    );
    derived_key
}

// --- CODIFICACIÓN HEX PARA MATERIAL BINARIO ---

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(encoded).map_err(serde::de::Error::custom)
    }
}

mod opt_hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(material) => serializer.serialize_some(&hex::encode(material)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|value| hex::decode(value).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealed_vault_in_tempdir() -> (tempfile::TempDir, Keystore) {
        let directory = tempfile::tempdir().expect("TEMPDIR_FAULT");
        let vault = Keystore::sealed_file_at(directory.path().join("bridge-vault.sealed"));
        (directory, vault)
    }

    #[test]
    fn unpaired_vault_reports_not_paired() {
        let (_directory, vault) = sealed_vault_in_tempdir();
        assert!(vault.load_credentials().unwrap().is_none());
        assert!(matches!(vault.request_signer(), Err(KeystoreError::NotPaired)));
    }

    #[test]
    fn credentials_roundtrip_through_sealed_file() {
        let (_directory, vault) = sealed_vault_in_tempdir();

        let credentials = DeviceCredentials {
            device_identifier: "dev_12345".into(),
            device_key: vec![0xAB; 32],
        };
        vault.store_credentials(&credentials).expect("STORE_FAULT");

        let recovered = vault.load_credentials().unwrap().expect("credenciales ausentes");
        assert_eq!(recovered.device_identifier, "dev_12345");
        assert_eq!(recovered.device_key, vec![0xAB; 32]);
        assert!(recovered.is_paired());

        let signer = vault.request_signer().expect("SIGNER_FAULT");
        assert_eq!(signer.device_identifier(), "dev_12345");
    }

    #[test]
    fn seal_key_is_generated_once_and_stable() {
        let (_directory, vault) = sealed_vault_in_tempdir();

        let first = vault.payload_seal_key().expect("KEYGEN_FAULT");
        let second = vault.payload_seal_key().expect("KEYREAD_FAULT");
        assert_eq!(first, second, "la llave de sellado debe ser estable entre lecturas");
    }

    #[test]
    fn seal_key_survives_alongside_credentials() {
        let (_directory, vault) = sealed_vault_in_tempdir();

        let seal_key_before = vault.payload_seal_key().unwrap();
        vault
            .store_credentials(&DeviceCredentials {
                device_identifier: "dev_9".into(),
                device_key: vec![1; 32],
            })
            .unwrap();

        assert_eq!(vault.payload_seal_key().unwrap(), seal_key_before);
        assert!(vault.load_credentials().unwrap().is_some());
    }

    #[test]
    fn sealed_file_is_not_plaintext_on_disk() {
        let directory = tempfile::tempdir().unwrap();
        let vault_path = directory.path().join("bridge-vault.sealed");
        let vault = Keystore::sealed_file_at(vault_path.clone());

        vault
            .store_credentials(&DeviceCredentials {
                device_identifier: "dev_secret".into(),
                device_key: vec![2; 32],
            })
            .unwrap();

        let raw_bytes = std::fs::read(vault_path).unwrap();
        let raw_text = String::from_utf8_lossy(&raw_bytes);
        assert!(!raw_text.contains("dev_secret"), "el archivo debe estar sellado");
    }
}
