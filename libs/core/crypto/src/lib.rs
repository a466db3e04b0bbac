// [libs/core/crypto/src/lib.rs]
/*!
 * =================================================================
 * APARATO: BRIDGE CRYPTOGRAPHIC ENGINE
 * CLASIFICACIÓN: CORE SECURITY (ESTRATO L1)
 * RESPONSABILIDAD: SELLADO AES-256-GCM, FIRMA HMAC Y COMPARACIÓN
 *                  EN TIEMPO CONSTANTE
 *
 * El sellado de cargas en reposo usa un nonce aleatorio de 12 bytes
 * por evento, antepuesto al texto cifrado; el layout resultante es
 * `nonce(12) || ciphertext || tag(16)`. La firma de peticiones usa
 * la cadena canónica `METHOD || PATH || TIMESTAMP || BODY` con
 * HMAC-SHA256 de la llave del dispositivo, codificada en hex.
 * =================================================================
 */

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Longitud del nonce GCM antepuesto a cada carga sellada.
pub const SEAL_NONCE_LENGTH: usize = 12;
/// Longitud del tag de autenticación GCM adosado por el motor AEAD.
pub const SEAL_TAG_LENGTH: usize = 16;
/// Longitud de la llave simétrica de sellado y firma.
pub const KEY_LENGTH_BYTES: usize = 32;

#[derive(Error, Debug)]
pub enum CryptoError {
    /// La llave entregada no mide 32 bytes.
    #[error("[L1_CRYPTO_FAULT]: KEY_LENGTH_VIOLATION -> expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// La carga sellada es más corta que nonce + tag.
    #[error("[L1_CRYPTO_FAULT]: SEALED_PAYLOAD_TRUNCATED")]
    TruncatedPayload,

    /// El tag de integridad no valida: carga corrupta o llave incorrecta.
    #[error("[L1_CRYPTO_FAULT]: SEAL_INTEGRITY_COMPROMISED")]
    IntegrityFailure,

    /// La firma recibida no es hexadecimal válido.
    #[error("[L1_CRYPTO_FAULT]: SIGNATURE_ENCODING_REJECTED")]
    MalformedSignature,

    /// La marca temporal de la petición cae fuera de la ventana tolerada.
    #[error("[L1_CRYPTO_FAULT]: TIMESTAMP_WINDOW_EXCEEDED -> drift {drift_seconds}s")]
    TimestampOutOfWindow { drift_seconds: i64 },

    /// La firma HMAC no coincide con la cadena canónica.
    #[error("[L1_CRYPTO_FAULT]: SIGNATURE_MISMATCH")]
    SignatureMismatch,
}

// --- ESTRATO DE SELLADO EN REPOSO (AES-256-GCM) ---

/**
 * Sella una carga con AES-256-GCM bajo un nonce aleatorio fresco.
 *
 * # Errors:
 * - `InvalidKeyLength` si la llave no mide 32 bytes.
 *
 * La salida mide exactamente `plaintext + 12 + 16` bytes.
 */
pub fn seal(seal_key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher_engine = build_cipher(seal_key)?;

    let mut nonce_material = [0u8; SEAL_NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce_material);
    let nonce = Nonce::from_slice(&nonce_material);

    let ciphertext = cipher_engine
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::IntegrityFailure)?;

    let mut sealed_payload = Vec::with_capacity(SEAL_NONCE_LENGTH + ciphertext.len());
    sealed_payload.extend_from_slice(&nonce_material);
    sealed_payload.extend_from_slice(&ciphertext);
    Ok(sealed_payload)
}

/**
 * Abre una carga sellada verificando el tag de integridad GCM.
 *
 * # Errors:
 * - `TruncatedPayload` si la carga no contiene nonce + tag completos.
 * - `IntegrityFailure` si el tag no valida (corrupción o llave errónea).
 */
pub fn unseal(seal_key: &[u8], sealed_payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed_payload.len() < SEAL_NONCE_LENGTH + SEAL_TAG_LENGTH {
        return Err(CryptoError::TruncatedPayload);
    }

    let cipher_engine = build_cipher(seal_key)?;
    let (nonce_material, ciphertext) = sealed_payload.split_at(SEAL_NONCE_LENGTH);

    cipher_engine
        .decrypt(Nonce::from_slice(nonce_material), ciphertext)
        .map_err(|_| CryptoError::IntegrityFailure)
}

fn build_cipher(seal_key: &[u8]) -> Result<Aes256Gcm, CryptoError> {
    if seal_key.len() != KEY_LENGTH_BYTES {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_LENGTH_BYTES,
            actual: seal_key.len(),
        });
    }
    Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(seal_key)))
}

// --- ESTRATO DE FIRMA DE PETICIONES (HMAC-SHA256) ---

/**
 * Firmante de peticiones de enlace ascendente y guardia local.
 *
 * Se construye por operación a partir del Keystore; no retiene la llave
 * más allá de su propia vida.
 */
pub struct RequestSigner {
    device_identifier: String,
    signing_key_material: Vec<u8>,
}

impl RequestSigner {
    pub fn new(device_identifier: impl Into<String>, signing_key_material: Vec<u8>) -> Self {
        Self {
            device_identifier: device_identifier.into(),
            signing_key_material,
        }
    }

    pub fn device_identifier(&self) -> &str {
        &self.device_identifier
    }

    /// Cadena canónica firmada: `METHOD || PATH || TIMESTAMP || BODY`.
    pub fn canonical_string(method: &str, path: &str, unix_timestamp: i64, body: &[u8]) -> Vec<u8> {
        let mut canonical = Vec::with_capacity(method.len() + path.len() + 24 + body.len());
        canonical.extend_from_slice(method.as_bytes());
        canonical.extend_from_slice(path.as_bytes());
        canonical.extend_from_slice(unix_timestamp.to_string().as_bytes());
        canonical.extend_from_slice(body);
        canonical
    }

    /**
     * Produce la firma hexadecimal de una petición.
     */
    pub fn sign(&self, method: &str, path: &str, unix_timestamp: i64, body: &[u8]) -> String {
        let canonical = Self::canonical_string(method, path, unix_timestamp, body);
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.signing_key_material)
            .expect("HMAC acepta llaves de cualquier longitud");
        mac.update(&canonical);
        hex::encode(mac.finalize().into_bytes())
    }

    /**
     * Verifica una firma entrante contra la cadena canónica reconstruida.
     *
     * # Errors:
     * - `TimestampOutOfWindow` si `|now - timestamp| > window`.
     * - `MalformedSignature` si la firma no decodifica como hex.
     * - `SignatureMismatch` si el HMAC no coincide (comparación en
     *   tiempo constante vía `Mac::verify_slice`).
     */
    pub fn verify(
        &self,
        method: &str,
        path: &str,
        unix_timestamp: i64,
        body: &[u8],
        presented_signature_hex: &str,
        tolerance_window_seconds: i64,
        current_unix_time: i64,
    ) -> Result<(), CryptoError> {
        let drift_seconds = (current_unix_time - unix_timestamp).abs();
        if drift_seconds > tolerance_window_seconds {
            return Err(CryptoError::TimestampOutOfWindow { drift_seconds });
        }

        let presented_signature =
            hex::decode(presented_signature_hex).map_err(|_| CryptoError::MalformedSignature)?;

        let canonical = Self::canonical_string(method, path, unix_timestamp, body);
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.signing_key_material)
            .expect("HMAC acepta llaves de cualquier longitud");
        mac.update(&canonical);

        mac.verify_slice(&presented_signature)
            .map_err(|_| CryptoError::SignatureMismatch)
    }
}

/// HMAC-SHA256 crudo; base de la verificación JWT HS256 local.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC acepta llaves de cualquier longitud");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

// --- ESTRATO DE IDENTIDAD DETERMINISTA ---

/**
 * Deriva la identidad de 128 bits de un evento a partir de su tupla
 * de origen, bajo la llave del dispositivo.
 *
 * La derivación es una función pura de la tupla: re-ingerir el mismo
 * evento crudo produce el mismo identificador, lo que habilita la
 * deduplicación ante reemisiones del adaptador tras un reinicio.
 */
pub fn derive_event_identity(
    device_key: &[u8],
    device_identifier: &str,
    adapter_name: &str,
    external_user_identifier: &str,
    timestamp_milliseconds: i64,
    event_kind_label: &str,
) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(device_key)
        .expect("HMAC acepta llaves de cualquier longitud");

    mac.update(device_identifier.as_bytes());
    mac.update(b"\x1f");
    mac.update(adapter_name.as_bytes());
    mac.update(b"\x1f");
    mac.update(external_user_identifier.as_bytes());
    mac.update(b"\x1f");
    mac.update(timestamp_milliseconds.to_string().as_bytes());
    mac.update(b"\x1f");
    mac.update(event_kind_label.as_bytes());

    // Truncamos el MAC de 256 bits a 128 bits (32 hex chars).
    hex::encode(&mac.finalize().into_bytes()[..16])
}

/**
 * Clave de idempotencia de un lote: SHA-256 de la concatenación ordenada
 * de los identificadores de evento miembros.
 */
pub fn batch_idempotency_key(member_event_identifiers: &[String]) -> String {
    let mut sorted_identifiers: Vec<&String> = member_event_identifiers.iter().collect();
    sorted_identifiers.sort();

    let mut digest_engine = Sha256::new();
    for identifier in sorted_identifiers {
        digest_engine.update(identifier.as_bytes());
    }
    hex::encode(digest_engine.finalize())
}

// --- ESTRATO DE ALEATORIEDAD Y COMPARACIÓN ---

/// Genera `byte_count` bytes del CSPRNG del sistema, codificados en hex.
/// Única fuente autorizada para request/connection ids.
pub fn random_hex(byte_count: usize) -> String {
    let mut buffer = vec![0u8; byte_count];
    rand::rngs::OsRng.fill_bytes(&mut buffer);
    hex::encode(buffer)
}

/**
 * Comparación en tiempo constante para secretos de longitud variable.
 *
 * Acumula diferencias con OR binario; el tiempo de ejecución depende
 * solo de la longitud del candidato, nunca del prefijo coincidente.
 */
pub fn constant_time_equals(expected: &[u8], candidate: &[u8]) -> bool {
    if expected.len() != candidate.len() {
        // Consumimos el candidato completo igualmente para no filtrar
        // la longitud por tiempo de retorno.
        let mut sink = 0u8;
        for byte in candidate {
            sink |= byte;
        }
        let _ = sink;
        return false;
    }

    let mut accumulated_difference = 0u8;
    for (expected_byte, candidate_byte) in expected.iter().zip(candidate.iter()) {
        accumulated_difference |= expected_byte ^ candidate_byte;
    }
    accumulated_difference == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: [u8; 32] = [7u8; 32];

    #[test]
    fn seal_roundtrip_preserves_payload_and_length() {
        let plaintext = br#"{"event":"entry","member":"fp_123"}"#;
        let sealed = seal(&TEST_KEY, plaintext).expect("SEAL_FAULT");

        assert_eq!(sealed.len(), plaintext.len() + SEAL_NONCE_LENGTH + SEAL_TAG_LENGTH);

        let recovered = unseal(&TEST_KEY, &sealed).expect("UNSEAL_FAULT");
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn seal_uses_fresh_nonce_per_invocation() {
        let plaintext = b"same payload";
        let first = seal(&TEST_KEY, plaintext).unwrap();
        let second = seal(&TEST_KEY, plaintext).unwrap();
        assert_ne!(first, second, "dos sellados no deben compartir nonce");
    }

    #[test]
    fn unseal_rejects_tampered_payload() {
        let mut sealed = seal(&TEST_KEY, b"integrity matters").unwrap();
        let last_index = sealed.len() - 1;
        sealed[last_index] ^= 0x01;
        assert!(matches!(unseal(&TEST_KEY, &sealed), Err(CryptoError::IntegrityFailure)));
    }

    #[test]
    fn unseal_rejects_truncated_payload() {
        assert!(matches!(
            unseal(&TEST_KEY, &[0u8; SEAL_NONCE_LENGTH + SEAL_TAG_LENGTH - 1]),
            Err(CryptoError::TruncatedPayload)
        ));
    }

    #[test]
    fn signature_accepts_inside_window_and_rejects_outside() {
        let signer = RequestSigner::new("dev_alpha", TEST_KEY.to_vec());
        let now = 1_700_000_000i64;
        let body = br#"{"events":[]}"#;

        let signature = signer.sign("POST", "/api/v1/checkin", now - 299, body);
        signer
            .verify("POST", "/api/v1/checkin", now - 299, body, &signature, 300, now)
            .expect("la ventana de 300s debe aceptar drift de 299s");

        let stale_signature = signer.sign("POST", "/api/v1/checkin", now - 600, body);
        let verdict = signer.verify("POST", "/api/v1/checkin", now - 600, body, &stale_signature, 300, now);
        assert!(matches!(verdict, Err(CryptoError::TimestampOutOfWindow { .. })));
    }

    #[test]
    fn signature_covers_the_body_bytes() {
        let signer = RequestSigner::new("dev_alpha", TEST_KEY.to_vec());
        let now = 1_700_000_000i64;

        let signature = signer.sign("POST", "/api/v1/checkin", now, b"body-a");
        let verdict = signer.verify("POST", "/api/v1/checkin", now, b"body-b", &signature, 300, now);
        assert!(matches!(verdict, Err(CryptoError::SignatureMismatch)));
    }

    #[test]
    fn event_identity_is_a_pure_function_of_the_tuple() {
        let first = derive_event_identity(&TEST_KEY, "dev_alpha", "simulator", "fp_123", 1_704_103_200_000, "entry");
        let second = derive_event_identity(&TEST_KEY, "dev_alpha", "simulator", "fp_123", 1_704_103_200_000, "entry");
        assert_eq!(first, second);
        assert_eq!(first.len(), 32, "128 bits -> 32 hex chars");

        let different_kind =
            derive_event_identity(&TEST_KEY, "dev_alpha", "simulator", "fp_123", 1_704_103_200_000, "exit");
        assert_ne!(first, different_kind);
    }

    #[test]
    fn idempotency_key_ignores_member_order() {
        let forward = batch_idempotency_key(&["aaa".into(), "bbb".into(), "ccc".into()]);
        let shuffled = batch_idempotency_key(&["ccc".into(), "aaa".into(), "bbb".into()]);
        assert_eq!(forward, shuffled);
        assert_eq!(forward.len(), 64);
    }

    #[test]
    fn constant_time_comparison_verdicts() {
        assert!(constant_time_equals(b"secret", b"secret"));
        assert!(!constant_time_equals(b"secret", b"secreT"));
        assert!(!constant_time_equals(b"secret", b"secre"));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // unseal(seal(x)) == x con longitud plaintext + 12 + 16,
            // para cargas arbitrarias bajo una llave fija.
            #[test]
            fn seal_roundtrip_holds_for_arbitrary_payloads(payload in proptest::collection::vec(any::<u8>(), 0..2048)) {
                let sealed = seal(&TEST_KEY, &payload).expect("SEAL_FAULT");
                prop_assert_eq!(sealed.len(), payload.len() + SEAL_NONCE_LENGTH + SEAL_TAG_LENGTH);

                let recovered = unseal(&TEST_KEY, &sealed).expect("UNSEAL_FAULT");
                prop_assert_eq!(recovered, payload);
            }

            #[test]
            fn distinct_identity_tuples_never_collide_trivially(
                user_a in "[a-z0-9_]{1,16}",
                user_b in "[a-z0-9_]{1,16}",
                timestamp in 0i64..4_102_444_800_000i64,
            ) {
                let first = derive_event_identity(&TEST_KEY, "dev", "sim", &user_a, timestamp, "entry");
                let second = derive_event_identity(&TEST_KEY, "dev", "sim", &user_b, timestamp, "entry");
                if user_a == user_b {
                    prop_assert_eq!(first, second);
                } else {
                    prop_assert_ne!(first, second);
                }
            }
        }
    }
}
