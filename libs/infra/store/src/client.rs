// [libs/infra/store/src/client.rs]
/*!
 * =================================================================
 * APARATO: STORE CONNECTION CLIENT
 * CLASIFICACIÓN: INFRASTRUCTURE LAYER (ESTRATO L3)
 * RESPONSABILIDAD: GESTIÓN DEL ARCHIVO EMBEBIDO Y DURABILIDAD WAL
 *
 * Un único archivo SQLite (más sus sidecars WAL) es la fuente de
 * verdad persistente del agente. El modo `synchronous` es una perilla
 * por conexión: NORMAL bajo el nivel Lite (favorece caudal), FULL
 * bajo Normal/Full (favorece durabilidad). El nivel puede cambiarla
 * en caliente; las conexiones futuras la heredan.
 *
 * En modo memoria (suites de prueba) el cliente detecta la URL y
 * ancla una conexión persistente ANTES del bootstrap del esquema,
 * para que las tablas residan en el segmento compartido.
 * =================================================================
 */

use std::sync::{Arc, RwLock};

use libsql::{Builder, Connection, Database};
use tracing::{error, info, instrument};

use crate::errors::StoreError;
use crate::schema::apply_bridge_schema;

/// Modo de durabilidad WAL por conexión.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynchronousMode {
    /// `PRAGMA synchronous = NORMAL`: caudal sobre durabilidad (Lite).
    Normal,
    /// `PRAGMA synchronous = FULL`: durabilidad plena (Normal/Full).
    Full,
}

impl SynchronousMode {
    fn pragma_statement(&self) -> &'static str {
        match self {
            SynchronousMode::Normal => "PRAGMA synchronous = NORMAL",
            SynchronousMode::Full => "PRAGMA synchronous = FULL",
        }
    }
}

#[derive(Clone)]
pub struct StoreClient {
    internal_database_driver: Arc<Database>,
    synchronous_mode: Arc<RwLock<SynchronousMode>>,
    /// Mantiene viva la base en memoria evitando que SQLite la purgue.
    _memory_persistence_anchor: Option<Arc<Connection>>,
}

impl StoreClient {
    #[instrument(skip(synchronous_mode))]
    pub async fn connect(
        store_file_url: &str,
        synchronous_mode: SynchronousMode,
    ) -> Result<Self, StoreError> {
        if store_file_url.is_empty() {
            return Err(StoreError::ConnectionError("STORE_URL_UNDEFINED".into()));
        }

        info!("🗃️  [STORE]: Opening embedded store at [{}]", store_file_url);

        let is_memory = store_file_url.contains(":memory:") || store_file_url.contains("mode=memory");

        let database_driver = Builder::new_local(store_file_url)
            .build()
            .await
            .map_err(|driver_fault| StoreError::ConnectionError(format!("DRIVER_IGNITION_FAILURE: {driver_fault}")))?;

        let shared_driver = Arc::new(database_driver);
        let mut anchor = None;

        if is_memory {
            // En modo memoria el ancla debe abrirse antes del bootstrap.
            let anchor_connection = shared_driver
                .connect()
                .map_err(|anchor_fault| StoreError::ConnectionError(format!("ANCHOR_FAULT: {anchor_fault}")))?;
            apply_bridge_schema(&anchor_connection).await?;
            anchor = Some(Arc::new(anchor_connection));
        } else {
            let bootstrap_connection = shared_driver
                .connect()
                .map_err(|link_fault| StoreError::ConnectionError(format!("BOOTSTRAP_LINK_FAULT: {link_fault}")))?;

            // WAL es persistente en el archivo; synchronous es por conexión.
            // El PRAGMA de journal devuelve una fila: se consume vía query.
            if let Ok(mut pragma_rows) = bootstrap_connection.query("PRAGMA journal_mode = WAL", ()).await {
                let _ = pragma_rows.next().await;
            }
            apply_bridge_schema(&bootstrap_connection).await?;
        }

        Ok(Self {
            internal_database_driver: shared_driver,
            synchronous_mode: Arc::new(RwLock::new(synchronous_mode)),
            _memory_persistence_anchor: anchor,
        })
    }

    /// Abre una conexión fresca con el modo de durabilidad vigente aplicado.
    pub async fn connection(&self) -> Result<Connection, StoreError> {
        let connection = self.internal_database_driver.connect().map_err(|allocation_fault| {
            error!("⚠️ [STORE]: Connection allocation failed: {}", allocation_fault);
            StoreError::ConnectionError(allocation_fault.to_string())
        })?;

        let mode = *self.synchronous_mode.read().expect("synchronous mode lock poisoned");
        if let Ok(mut pragma_rows) = connection.query(mode.pragma_statement(), ()).await {
            let _ = pragma_rows.next().await;
        }
        Ok(connection)
    }

    /// Cambia la perilla de durabilidad para las conexiones futuras.
    pub fn set_synchronous_mode(&self, mode: SynchronousMode) {
        *self.synchronous_mode.write().expect("synchronous mode lock poisoned") = mode;
        info!("⚙️  [STORE]: Synchronous mode shifted to {:?}.", mode);
    }

    pub fn synchronous_mode(&self) -> SynchronousMode {
        *self.synchronous_mode.read().expect("synchronous mode lock poisoned")
    }
}
