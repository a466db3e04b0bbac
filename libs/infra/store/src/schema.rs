// [libs/infra/store/src/schema.rs]
/*!
 * =================================================================
 * APARATO: BRIDGE STORE SCHEMA
 * CLASIFICACIÓN: INFRASTRUCTURE LAYER (ESTRATO L3)
 * RESPONSABILIDAD: GOBERNANZA ESTRUCTURAL E IDEMPOTENCIA TOTAL
 *
 * Migración solo hacia adelante: la versión vigente queda anotada en
 * `device_config` y los pasos incrementales se aplican en orden. Las
 * cargas de evento viven selladas en su columna BLOB; todas las demás
 * columnas son texto plano para que consultas y estadísticas no
 * requieran abrir el sello.
 * =================================================================
 */

use libsql::Connection;
use tracing::{debug, info};

use crate::errors::StoreError;

/// Versión estructural vigente del almacén.
const CURRENT_SCHEMA_VERSION: i64 = 1;
/// Clave de la versión dentro de `device_config`.
const SCHEMA_VERSION_KEY: &str = "schema_version";

/**
 * ESTRATO 1: SOLIDIFICACIÓN (Génesis de Tablas)
 */
const BRIDGE_TABLES: &[(&str, &str)] = &[
    (
        "TABLE_QUEUED_EVENTS",
        r#"
        CREATE TABLE IF NOT EXISTS queued_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_identifier TEXT NOT NULL UNIQUE,
            external_user_identifier TEXT NOT NULL,
            internal_user_identifier TEXT,
            event_kind TEXT NOT NULL,
            event_timestamp_ms INTEGER NOT NULL,
            is_simulated INTEGER NOT NULL DEFAULT 0,
            clock_skew INTEGER NOT NULL DEFAULT 0,
            device_identifier TEXT NOT NULL,
            payload_sealed BLOB NOT NULL,
            created_at_ms INTEGER NOT NULL,
            sent_at_ms INTEGER,
            leased_until_ms INTEGER,
            retry_count INTEGER NOT NULL DEFAULT 0
        );
    "#,
    ),
    (
        "TABLE_DEVICE_CONFIG",
        r#"
        CREATE TABLE IF NOT EXISTS device_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at_ms INTEGER NOT NULL
        );
    "#,
    ),
    (
        "TABLE_ADAPTER_STATUS",
        r#"
        CREATE TABLE IF NOT EXISTS adapter_status (
            name TEXT PRIMARY KEY,
            state TEXT NOT NULL,
            last_event_at_ms INTEGER,
            error_message TEXT,
            updated_at_ms INTEGER NOT NULL
        );
    "#,
    ),
    (
        "TABLE_USER_MAPPINGS",
        r#"
        CREATE TABLE IF NOT EXISTS user_mappings (
            device_identifier TEXT NOT NULL,
            external_user_identifier TEXT NOT NULL,
            internal_user_identifier TEXT NOT NULL,
            updated_at_ms INTEGER NOT NULL,
            PRIMARY KEY (device_identifier, external_user_identifier)
        );
    "#,
    ),
    (
        "TABLE_QUEUE_META",
        r#"
        CREATE TABLE IF NOT EXISTS queue_meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            evicted_total INTEGER NOT NULL DEFAULT 0,
            duplicates_total INTEGER NOT NULL DEFAULT 0,
            last_ack_at_ms INTEGER,
            last_failure_at_ms INTEGER
        );
    "#,
    ),
];

/**
 * ESTRATO 2: ACELERACIÓN (Índices)
 * El índice parcial sobre pendientes es la ruta FIFO barata de la cola.
 */
const BRIDGE_INDICES: &[(&str, &str)] = &[
    (
        "INDEX_QUEUE_FIFO",
        "CREATE INDEX IF NOT EXISTS idx_queued_events_pending ON queued_events (id) WHERE sent_at_ms IS NULL;",
    ),
    (
        "INDEX_QUEUE_TIMESTAMP",
        "CREATE INDEX IF NOT EXISTS idx_queued_events_timestamp ON queued_events (event_timestamp_ms);",
    ),
    (
        "INDEX_QUEUE_KIND",
        "CREATE INDEX IF NOT EXISTS idx_queued_events_kind ON queued_events (event_kind);",
    ),
];

/**
 * Aplica el esquema completo de forma idempotente y ejecuta las
 * migraciones incrementales pendientes.
 */
pub async fn apply_bridge_schema(connection: &Connection) -> Result<(), StoreError> {
    for (table_label, table_ddl) in BRIDGE_TABLES {
        connection.execute(table_ddl, ()).await?;
        debug!("🏗️  [SCHEMA]: {} solidified.", table_label);
    }

    for (index_label, index_ddl) in BRIDGE_INDICES {
        connection.execute(index_ddl, ()).await?;
        debug!("⚡ [SCHEMA]: {} ready.", index_label);
    }

    // Fila única de contadores de la cola.
    connection
        .execute("INSERT OR IGNORE INTO queue_meta (id) VALUES (1)", ())
        .await?;

    migrate_forward(connection).await?;
    info!("✅ [SCHEMA]: Bridge store levelized at version {}.", CURRENT_SCHEMA_VERSION);
    Ok(())
}

/// Migración solo hacia adelante; nunca degrada una versión superior.
async fn migrate_forward(connection: &Connection) -> Result<(), StoreError> {
    let recorded_version = read_schema_version(connection).await?;

    if recorded_version > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::MappingError(format!(
            "SCHEMA_FROM_THE_FUTURE -> stored {recorded_version}, binary supports {CURRENT_SCHEMA_VERSION}"
        )));
    }

    // Los pasos intermedios se insertan aquí al crecer la versión.

    if recorded_version < CURRENT_SCHEMA_VERSION {
        connection
            .execute(
                "INSERT INTO device_config (key, value, updated_at_ms) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at_ms = excluded.updated_at_ms",
                libsql::params![
                    SCHEMA_VERSION_KEY,
                    CURRENT_SCHEMA_VERSION.to_string(),
                    chrono::Utc::now().timestamp_millis()
                ],
            )
            .await?;
    }

    Ok(())
}

async fn read_schema_version(connection: &Connection) -> Result<i64, StoreError> {
    let mut version_rows = connection
        .query(
            "SELECT value FROM device_config WHERE key = ?1",
            libsql::params![SCHEMA_VERSION_KEY],
        )
        .await?;

    match version_rows.next().await? {
        Some(row) => {
            let stored: String = row.get(0)?;
            stored
                .parse::<i64>()
                .map_err(|parse_fault| StoreError::MappingError(format!("SCHEMA_VERSION_CORRUPT -> {parse_fault}")))
        }
        None => Ok(0),
    }
}
