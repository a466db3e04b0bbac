// [libs/infra/store/src/repositories/adapter_status.rs]
/*!
 * =================================================================
 * APARATO: ADAPTER STATUS REPOSITORY
 * CLASIFICACIÓN: INFRASTRUCTURE LAYER (ESTRATO L3)
 * RESPONSABILIDAD: RASTRO PERSISTENTE DEL ESTADO DE CADA ADAPTADOR
 * =================================================================
 */

use chrono::{TimeZone, Utc};
use libsql::params;

use crate::client::StoreClient;
use crate::errors::StoreError;
use turngate_domain_models::status::{AdapterRuntimeState, AdapterStatusReport};

pub struct AdapterStatusRepository {
    store_client: StoreClient,
}

impl AdapterStatusRepository {
    pub fn new(store_client: StoreClient) -> Self {
        Self { store_client }
    }

    pub async fn upsert(&self, report: &AdapterStatusReport) -> Result<(), StoreError> {
        let connection = self.store_client.connection().await?;
        connection
            .execute(
                "INSERT INTO adapter_status (name, state, last_event_at_ms, error_message, updated_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(name) DO UPDATE SET
                    state = excluded.state,
                    last_event_at_ms = excluded.last_event_at_ms,
                    error_message = excluded.error_message,
                    updated_at_ms = excluded.updated_at_ms",
                params![
                    report.name.clone(),
                    report.state.as_label(),
                    report.last_event_at.map(|instant| instant.timestamp_millis()),
                    report.error_message.clone(),
                    report.updated_at.timestamp_millis()
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<AdapterStatusReport>, StoreError> {
        let connection = self.store_client.connection().await?;
        let mut rows = connection
            .query(
                "SELECT name, state, last_event_at_ms, error_message, updated_at_ms FROM adapter_status ORDER BY name",
                (),
            )
            .await?;

        let mut reports = Vec::new();
        while let Some(row) = rows.next().await? {
            let state_label: String = row.get(1)?;
            let state = AdapterRuntimeState::parse_label(&state_label)
                .ok_or_else(|| StoreError::MappingError(format!("UNKNOWN_ADAPTER_STATE -> {state_label}")))?;

            let last_event_at = match row.get_value(2)? {
                libsql::Value::Integer(ms) => Utc.timestamp_millis_opt(ms).single(),
                _ => None,
            };
            let error_message = match row.get_value(3)? {
                libsql::Value::Text(text) => Some(text),
                _ => None,
            };
            let updated_at = Utc
                .timestamp_millis_opt(row.get::<i64>(4)?)
                .single()
                .ok_or_else(|| StoreError::MappingError("UPDATED_AT_CORRUPT".into()))?;

            reports.push(AdapterStatusReport {
                name: row.get(0)?,
                state,
                last_event_at,
                error_message,
                updated_at,
            });
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SynchronousMode;

    #[tokio::test]
    async fn reports_upsert_and_list_ordered() {
        let client = StoreClient::connect("file:adapter_status?mode=memory&cache=shared", SynchronousMode::Full)
            .await
            .unwrap();
        let repository = AdapterStatusRepository::new(client);

        let mut simulator_report = AdapterStatusReport::inactive("simulator");
        repository.upsert(&simulator_report).await.unwrap();

        simulator_report.state = AdapterRuntimeState::Active;
        simulator_report.last_event_at = Some(Utc::now());
        repository.upsert(&simulator_report).await.unwrap();

        let mut webhook_report = AdapterStatusReport::inactive("webhook");
        webhook_report.state = AdapterRuntimeState::Error;
        webhook_report.error_message = Some("BIND_REJECTED".into());
        repository.upsert(&webhook_report).await.unwrap();

        let reports = repository.list().await.unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].name, "simulator");
        assert_eq!(reports[0].state, AdapterRuntimeState::Active);
        assert!(reports[0].last_event_at.is_some());
        assert_eq!(reports[1].error_message.as_deref(), Some("BIND_REJECTED"));
    }
}
