// [libs/infra/store/src/repositories/device_config.rs]
/*!
 * =================================================================
 * APARATO: DEVICE CONFIG REPOSITORY
 * CLASIFICACIÓN: INFRASTRUCTURE LAYER (ESTRATO L3)
 * RESPONSABILIDAD: PARES CLAVE/VALOR DE CONFIGURACIÓN DEL DISPOSITIVO
 * =================================================================
 */

use std::collections::HashMap;

use chrono::Utc;
use libsql::params;

use crate::client::StoreClient;
use crate::errors::StoreError;

pub struct DeviceConfigRepository {
    store_client: StoreClient,
}

impl DeviceConfigRepository {
    pub fn new(store_client: StoreClient) -> Self {
        Self { store_client }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let connection = self.store_client.connection().await?;
        let mut rows = connection
            .query("SELECT value FROM device_config WHERE key = ?1", params![key])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let connection = self.store_client.connection().await?;
        connection
            .execute(
                "INSERT INTO device_config (key, value, updated_at_ms) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at_ms = excluded.updated_at_ms",
                params![key, value, Utc::now().timestamp_millis()],
            )
            .await?;
        Ok(())
    }

    pub async fn all(&self) -> Result<HashMap<String, String>, StoreError> {
        let connection = self.store_client.connection().await?;
        let mut rows = connection.query("SELECT key, value FROM device_config", ()).await?;

        let mut entries = HashMap::new();
        while let Some(row) = rows.next().await? {
            entries.insert(row.get::<String>(0)?, row.get::<String>(1)?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SynchronousMode;

    #[tokio::test]
    async fn keys_upsert_and_read_back() {
        let client = StoreClient::connect("file:config_kv?mode=memory&cache=shared", SynchronousMode::Full)
            .await
            .unwrap();
        let repository = DeviceConfigRepository::new(client);

        assert!(repository.get("heartbeat_interval").await.unwrap().is_none());

        repository.set("heartbeat_interval", "60").await.unwrap();
        repository.set("heartbeat_interval", "30").await.unwrap();
        assert_eq!(repository.get("heartbeat_interval").await.unwrap().as_deref(), Some("30"));

        let all_entries = repository.all().await.unwrap();
        assert!(all_entries.contains_key("heartbeat_interval"));
    }
}
