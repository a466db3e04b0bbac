// [libs/infra/store/src/repositories/user_map.rs]
/*!
 * =================================================================
 * APARATO: USER MAPPING REPOSITORY
 * CLASIFICACIÓN: INFRASTRUCTURE LAYER (ESTRATO L3)
 * RESPONSABILIDAD: MAPA (dispositivo, id externo) -> id interno
 *
 * La tabla se puebla desde fuera del agente. Los eventos históricos
 * retienen el id interno resuelto al momento de la ingesta: cambiar
 * un mapeo jamás reescribe filas ya encoladas.
 * =================================================================
 */

use chrono::Utc;
use libsql::params;
use tracing::instrument;

use crate::client::StoreClient;
use crate::errors::StoreError;

pub struct UserMappingRepository {
    store_client: StoreClient,
}

impl UserMappingRepository {
    pub fn new(store_client: StoreClient) -> Self {
        Self { store_client }
    }

    /// Resolución en la ruta caliente del procesador.
    #[instrument(skip(self), level = "debug")]
    pub async fn resolve(
        &self,
        device_identifier: &str,
        external_user_identifier: &str,
    ) -> Result<Option<String>, StoreError> {
        let connection = self.store_client.connection().await?;
        let mut rows = connection
            .query(
                "SELECT internal_user_identifier FROM user_mappings
                 WHERE device_identifier = ?1 AND external_user_identifier = ?2",
                params![device_identifier, external_user_identifier],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Alta o reemplazo de un mapeo (unicidad por par dispositivo/externo).
    pub async fn upsert(
        &self,
        device_identifier: &str,
        external_user_identifier: &str,
        internal_user_identifier: &str,
    ) -> Result<(), StoreError> {
        let connection = self.store_client.connection().await?;
        connection
            .execute(
                "INSERT INTO user_mappings (device_identifier, external_user_identifier, internal_user_identifier, updated_at_ms)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(device_identifier, external_user_identifier)
                 DO UPDATE SET internal_user_identifier = excluded.internal_user_identifier, updated_at_ms = excluded.updated_at_ms",
                params![
                    device_identifier,
                    external_user_identifier,
                    internal_user_identifier,
                    Utc::now().timestamp_millis()
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn remove(
        &self,
        device_identifier: &str,
        external_user_identifier: &str,
    ) -> Result<u64, StoreError> {
        let connection = self.store_client.connection().await?;
        Ok(connection
            .execute(
                "DELETE FROM user_mappings WHERE device_identifier = ?1 AND external_user_identifier = ?2",
                params![device_identifier, external_user_identifier],
            )
            .await?)
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        let connection = self.store_client.connection().await?;
        let mut rows = connection.query("SELECT COUNT(*) FROM user_mappings", ()).await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)?.max(0) as u64),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SynchronousMode;

    #[tokio::test]
    async fn mapping_resolves_and_replaces() {
        let client = StoreClient::connect("file:user_map?mode=memory&cache=shared", SynchronousMode::Full)
            .await
            .unwrap();
        let repository = UserMappingRepository::new(client);

        assert!(repository.resolve("dev_a", "fp_1").await.unwrap().is_none());

        repository.upsert("dev_a", "fp_1", "member_100").await.unwrap();
        assert_eq!(repository.resolve("dev_a", "fp_1").await.unwrap().as_deref(), Some("member_100"));

        // El par (dispositivo, externo) es único: el upsert reemplaza.
        repository.upsert("dev_a", "fp_1", "member_200").await.unwrap();
        assert_eq!(repository.resolve("dev_a", "fp_1").await.unwrap().as_deref(), Some("member_200"));
        assert_eq!(repository.count().await.unwrap(), 1);

        // Distinto dispositivo, espacio de nombres distinto.
        assert!(repository.resolve("dev_b", "fp_1").await.unwrap().is_none());

        assert_eq!(repository.remove("dev_a", "fp_1").await.unwrap(), 1);
        assert_eq!(repository.count().await.unwrap(), 0);
    }
}
