// [libs/infra/uplink/src/errors.rs]
/*!
 * =================================================================
 * APARATO: UPLINK ERROR CATALOG
 * CLASIFICACIÓN: INFRASTRUCTURE CORE (ESTRATO L3)
 * RESPONSABILIDAD: CATALOGACIÓN SEMÁNTICA DE FALLOS DEL ENLACE
 * =================================================================
 */

use thiserror::Error;

#[derive(Error, Debug)]
pub enum UplinkError {
    /// Falla física de red o timeout del intento.
    #[error("[L3_UPLINK_FAULT]: PHYSICAL_LINK_FAILURE -> {0}")]
    Transport(#[from] reqwest::Error),

    /// El servidor rechazó la petición con un estado no recuperable.
    #[error("[L3_UPLINK_FAULT]: SERVER_REJECTION -> HTTP_{0}")]
    ServerRejection(u16),

    /// Rechazo de autenticación: credenciales inválidas o reloj desviado.
    #[error("[L3_UPLINK_FAULT]: AUTH_REJECTED -> HTTP_{0}")]
    AuthRejected(u16),

    /// El cuerpo de respuesta no decodifica contra el contrato.
    #[error("[L3_UPLINK_FAULT]: CONTRACT_VIOLATION -> {0}")]
    ContractViolation(String),

    /// La URL base configurada es ininterpretable.
    #[error("[L3_UPLINK_FAULT]: ENDPOINT_MALFORMED -> {0}")]
    EndpointMalformed(String),

    /// El emparejamiento devolvió material de llave corrupto.
    #[error("[L3_UPLINK_FAULT]: KEY_MATERIAL_REJECTED -> {0}")]
    KeyMaterialRejected(String),
}
