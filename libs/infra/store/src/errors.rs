// [libs/infra/store/src/errors.rs]
/*!
 * =================================================================
 * APARATO: STORE ERROR CATALOG
 * CLASIFICACIÓN: INFRASTRUCTURE CORE (ESTRATO L3)
 * RESPONSABILIDAD: CATALOGACIÓN SEMÁNTICA DE FALLOS DE PERSISTENCIA
 * =================================================================
 */

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Error de apertura o enlace con el archivo del almacén.
    #[error("[L3_STORE_FAULT]: STORE_LINK_SEVERED -> {0}")]
    ConnectionError(String),

    /// Error de sintaxis o ejecución devuelto por el motor libSQL.
    #[error("[L3_STORE_FAULT]: SQL_QUERY_REJECTED -> {0}")]
    QueryError(#[from] libsql::Error),

    /// Fallo en la transformación de tipos entre SQLite y el dominio.
    #[error("[L3_STORE_FAULT]: DATA_MAPPING_VIOLATION -> {0}")]
    MappingError(String),

    /// Error al comprometer una secuencia multi-sentencia.
    #[error("[L3_STORE_FAULT]: TRANSACTION_COLLAPSE")]
    TransactionError,

    /// Criterios de operación contradictorios (ej. only_sent + only_failed).
    #[error("[L3_STORE_FAULT]: INCOHERENT_CRITERIA -> {0}")]
    IncoherentCriteria(String),
}
