// [libs/infra/store/src/repositories/event_queue.rs]
/*!
 * =================================================================
 * APARATO: EVENT QUEUE REPOSITORY
 * CLASIFICACIÓN: INFRASTRUCTURE LAYER (ESTRATO L3)
 * RESPONSABILIDAD: COLA FIFO DURABLE DE EVENTOS DE ACCESO
 *
 * Contrato de la cola:
 * - `enqueue` nunca bloquea al procesador: si la cola está al tope,
 *   expulsa los pendientes más antiguos (FIFO) dentro de la misma
 *   transacción.
 * - `lease_batch` marca `leased_until` en la transacción de selección;
 *   un llamador concurrente nunca recibe una fila con lease vigente.
 * - `ack` es idempotente; `nack` devuelve al estado pendiente y suma
 *   `retry_count` sin reordenar.
 * - Los duplicados se detectan por el índice único de
 *   `event_identifier`, enviados o no.
 *
 * La carga viaja sellada; el repositorio jamás abre el sello. El
 * `StandardAccessEvent` reconstruido desde columnas planas porta
 * `raw_data = null`; la versión íntegra vive dentro del sello.
 * =================================================================
 */

use chrono::{DateTime, TimeZone, Utc};
use libsql::params;
use tracing::{debug, info, instrument, warn};

use crate::client::StoreClient;
use crate::errors::StoreError;
use turngate_domain_models::events::{
    ClearCriteria, EventFilter, EventKind, QueueStats, QueuedAccessEvent, StandardAccessEvent,
};

/// Columnas planas leídas para reconstruir un registro de la cola.
const QUEUE_SELECT_COLUMNS: &str = "id, event_identifier, external_user_identifier, internal_user_identifier, \
     event_kind, event_timestamp_ms, is_simulated, clock_skew, device_identifier, \
     payload_sealed, created_at_ms, sent_at_ms, retry_count";

/// Veredicto de un intento de encolado.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Insertado; `evicted` pendientes antiguos fueron expulsados.
    Inserted { evicted: u64 },
    /// Identidad ya presente (enviada o no); el evento se descarta.
    Duplicate,
}

pub struct EventQueueRepository {
    store_client: StoreClient,
}

impl EventQueueRepository {
    pub fn new(store_client: StoreClient) -> Self {
        Self { store_client }
    }

    // --- ESTRATO DE INGESTA ---

    /**
     * Encola un evento sellado respetando el tope de capacidad.
     *
     * Toda la secuencia (inserción, conteo, expulsión FIFO y
     * contadores) ocurre en una única transacción.
     */
    #[instrument(skip(self, event, payload_sealed), fields(event_id = %event.event_identifier))]
    pub async fn enqueue(
        &self,
        event: &StandardAccessEvent,
        payload_sealed: &[u8],
        capacity: u64,
    ) -> Result<EnqueueOutcome, StoreError> {
        let connection = self.store_client.connection().await?;
        let transaction = connection.transaction().await.map_err(|_| StoreError::TransactionError)?;

        let inserted_rows = transaction
            .execute(
                r#"
                INSERT OR IGNORE INTO queued_events (
                    event_identifier, external_user_identifier, internal_user_identifier,
                    event_kind, event_timestamp_ms, is_simulated, clock_skew,
                    device_identifier, payload_sealed, created_at_ms, retry_count
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0)
                "#,
                params![
                    event.event_identifier.clone(),
                    event.external_user_identifier.clone(),
                    event.internal_user_identifier.clone(),
                    event.event_kind.as_label(),
                    event.timestamp.timestamp_millis(),
                    event.is_simulated as i64,
                    event.clock_skew as i64,
                    event.device_identifier.clone(),
                    payload_sealed.to_vec(),
                    Utc::now().timestamp_millis()
                ],
            )
            .await?;

        if inserted_rows == 0 {
            transaction
                .execute("UPDATE queue_meta SET duplicates_total = duplicates_total + 1 WHERE id = 1", ())
                .await?;
            transaction.commit().await.map_err(|_| StoreError::TransactionError)?;
            debug!("♻️  [QUEUE]: Duplicate identity dropped.");
            return Ok(EnqueueOutcome::Duplicate);
        }

        let evicted = Self::evict_oldest_pending(&transaction, capacity).await?;
        transaction.commit().await.map_err(|_| StoreError::TransactionError)?;

        if evicted > 0 {
            warn!("🌊 [QUEUE]: Capacity bound hit. {} oldest pending events evicted.", evicted);
        }
        Ok(EnqueueOutcome::Inserted { evicted })
    }

    /// Expulsa pendientes más antiguos hasta que `pending <= capacity`.
    async fn evict_oldest_pending(
        transaction: &libsql::Transaction,
        capacity: u64,
    ) -> Result<u64, StoreError> {
        let mut count_rows = transaction
            .query("SELECT COUNT(*) FROM queued_events WHERE sent_at_ms IS NULL", ())
            .await?;
        let pending_count: i64 = match count_rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };

        let overflow = (pending_count as u64).saturating_sub(capacity);
        if overflow == 0 {
            return Ok(0);
        }

        let evicted_rows = transaction
            .execute(
                r#"
                DELETE FROM queued_events WHERE id IN (
                    SELECT id FROM queued_events
                    WHERE sent_at_ms IS NULL
                    ORDER BY id ASC
                    LIMIT ?1
                )
                "#,
                params![overflow as i64],
            )
            .await?;

        transaction
            .execute(
                "UPDATE queue_meta SET evicted_total = evicted_total + ?1 WHERE id = 1",
                params![evicted_rows as i64],
            )
            .await?;

        Ok(evicted_rows)
    }

    // --- ESTRATO DE DESPACHO (LEASE / ACK / NACK) ---

    /**
     * Arrienda hasta `batch_limit` pendientes más antiguos en orden FIFO.
     *
     * Las filas arrendadas quedan invisibles para llamadores
     * concurrentes durante `lease_timeout_seconds`.
     */
    #[instrument(skip(self))]
    pub async fn lease_batch(
        &self,
        batch_limit: u32,
        lease_timeout_seconds: i64,
    ) -> Result<Vec<QueuedAccessEvent>, StoreError> {
        let connection = self.store_client.connection().await?;
        let transaction = connection.transaction().await.map_err(|_| StoreError::TransactionError)?;

        let now_ms = Utc::now().timestamp_millis();
        let lease_until_ms = now_ms + lease_timeout_seconds * 1_000;

        let mut candidate_rows = transaction
            .query(
                &format!(
                    r#"
                    SELECT {QUEUE_SELECT_COLUMNS} FROM queued_events
                    WHERE sent_at_ms IS NULL
                      AND (leased_until_ms IS NULL OR leased_until_ms < ?1)
                    ORDER BY id ASC
                    LIMIT ?2
                    "#
                ),
                params![now_ms, batch_limit as i64],
            )
            .await?;

        let mut leased_batch = Vec::new();
        while let Some(row) = candidate_rows.next().await? {
            leased_batch.push(Self::map_row(&row)?);
        }

        for queued_event in &leased_batch {
            transaction
                .execute(
                    "UPDATE queued_events SET leased_until_ms = ?1 WHERE id = ?2",
                    params![lease_until_ms, queued_event.row_identifier],
                )
                .await?;
        }

        transaction.commit().await.map_err(|_| StoreError::TransactionError)?;
        Ok(leased_batch)
    }

    /**
     * Marca eventos como enviados. Idempotente: un id ya enviado no
     * cambia, y los enviados jamás se retransmiten.
     */
    #[instrument(skip(self, row_identifiers))]
    pub async fn ack(&self, row_identifiers: &[i64]) -> Result<u64, StoreError> {
        if row_identifiers.is_empty() {
            return Ok(0);
        }

        let connection = self.store_client.connection().await?;
        let transaction = connection.transaction().await.map_err(|_| StoreError::TransactionError)?;
        let now_ms = Utc::now().timestamp_millis();

        let mut acked_count = 0u64;
        for row_identifier in row_identifiers {
            acked_count += transaction
                .execute(
                    "UPDATE queued_events SET sent_at_ms = ?1, leased_until_ms = NULL
                     WHERE id = ?2 AND sent_at_ms IS NULL",
                    params![now_ms, *row_identifier],
                )
                .await?;
        }

        transaction
            .execute("UPDATE queue_meta SET last_ack_at_ms = ?1 WHERE id = 1", params![now_ms])
            .await?;
        transaction.commit().await.map_err(|_| StoreError::TransactionError)?;

        debug!("📤 [QUEUE]: {} events acknowledged as sent.", acked_count);
        Ok(acked_count)
    }

    /**
     * Devuelve eventos al estado pendiente sumando un reintento.
     * No altera el orden FIFO original (el `id` manda).
     */
    #[instrument(skip(self, row_identifiers))]
    pub async fn nack(&self, row_identifiers: &[i64], reason: &str) -> Result<u64, StoreError> {
        if row_identifiers.is_empty() {
            return Ok(0);
        }

        let connection = self.store_client.connection().await?;
        let transaction = connection.transaction().await.map_err(|_| StoreError::TransactionError)?;
        let now_ms = Utc::now().timestamp_millis();

        let mut nacked_count = 0u64;
        for row_identifier in row_identifiers {
            nacked_count += transaction
                .execute(
                    "UPDATE queued_events SET leased_until_ms = NULL, retry_count = retry_count + 1
                     WHERE id = ?1 AND sent_at_ms IS NULL",
                    params![*row_identifier],
                )
                .await?;
        }

        transaction
            .execute("UPDATE queue_meta SET last_failure_at_ms = ?1 WHERE id = 1", params![now_ms])
            .await?;
        transaction.commit().await.map_err(|_| StoreError::TransactionError)?;

        warn!("↩️  [QUEUE]: {} events returned to pending. Reason: {}", nacked_count, reason);
        Ok(nacked_count)
    }

    // --- ESTRATO DE CONSULTA Y PURGA ---

    /**
     * Consulta de solo lectura para el plano de control.
     * Orden estable por `id` ascendente; paginación por limit/offset.
     */
    pub async fn query(&self, filter: &EventFilter) -> Result<Vec<QueuedAccessEvent>, StoreError> {
        let mut where_clauses: Vec<String> = Vec::new();
        let mut bound_values: Vec<libsql::Value> = Vec::new();

        if let Some(since) = filter.since {
            bound_values.push(since.timestamp_millis().into());
            where_clauses.push(format!("event_timestamp_ms >= ?{}", bound_values.len()));
        }
        if let Some(until) = filter.until {
            bound_values.push(until.timestamp_millis().into());
            where_clauses.push(format!("event_timestamp_ms <= ?{}", bound_values.len()));
        }
        if let Some(kind) = filter.event_kind {
            bound_values.push(kind.as_label().into());
            where_clauses.push(format!("event_kind = ?{}", bound_values.len()));
        }
        if let Some(user) = &filter.external_user_identifier {
            bound_values.push(user.clone().into());
            where_clauses.push(format!("external_user_identifier = ?{}", bound_values.len()));
        }
        if let Some(simulated) = filter.is_simulated {
            bound_values.push((simulated as i64).into());
            where_clauses.push(format!("is_simulated = ?{}", bound_values.len()));
        }
        if let Some(sent) = filter.sent {
            where_clauses.push(if sent { "sent_at_ms IS NOT NULL".into() } else { "sent_at_ms IS NULL".into() });
        }

        let where_fragment = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_clauses.join(" AND "))
        };

        let limit = filter.limit.unwrap_or(100).min(1_000);
        let offset = filter.offset.unwrap_or(0);

        let query_sql = format!(
            "SELECT {QUEUE_SELECT_COLUMNS} FROM queued_events {where_fragment} \
             ORDER BY id ASC LIMIT {limit} OFFSET {offset}"
        );

        let connection = self.store_client.connection().await?;
        let mut result_rows = connection.query(&query_sql, bound_values).await?;

        let mut events = Vec::new();
        while let Some(row) = result_rows.next().await? {
            events.push(Self::map_row(&row)?);
        }
        Ok(events)
    }

    /// Fotografía estadística completa de la cola.
    pub async fn stats(&self) -> Result<QueueStats, StoreError> {
        let connection = self.store_client.connection().await?;

        let mut aggregate_rows = connection
            .query(
                r#"
                SELECT
                    COUNT(*),
                    SUM(CASE WHEN sent_at_ms IS NULL THEN 1 ELSE 0 END),
                    SUM(CASE WHEN sent_at_ms IS NOT NULL THEN 1 ELSE 0 END),
                    SUM(CASE WHEN sent_at_ms IS NULL AND retry_count > 0 THEN 1 ELSE 0 END),
                    MIN(CASE WHEN sent_at_ms IS NULL THEN created_at_ms ELSE NULL END)
                FROM queued_events
                "#,
                (),
            )
            .await?;

        let mut stats = QueueStats::default();
        if let Some(row) = aggregate_rows.next().await? {
            stats.depth = Self::value_as_u64(&row, 0)?;
            stats.pending = Self::value_as_u64(&row, 1)?;
            stats.sent = Self::value_as_u64(&row, 2)?;
            stats.failed = Self::value_as_u64(&row, 3)?;
            stats.oldest_pending_created_at = Self::value_as_timestamp(&row, 4)?;
        }

        let mut meta_rows = connection
            .query(
                "SELECT evicted_total, duplicates_total, last_ack_at_ms, last_failure_at_ms FROM queue_meta WHERE id = 1",
                (),
            )
            .await?;
        if let Some(row) = meta_rows.next().await? {
            stats.evicted_total = Self::value_as_u64(&row, 0)?;
            stats.duplicates_total = Self::value_as_u64(&row, 1)?;
            stats.last_ack_at = Self::value_as_timestamp(&row, 2)?;
            stats.last_failure_at = Self::value_as_timestamp(&row, 3)?;
        }

        Ok(stats)
    }

    /**
     * Purga física por criterios.
     *
     * # Errors:
     * - `IncoherentCriteria` si `only_sent` y `only_failed` vienen juntos.
     */
    #[instrument(skip(self, criteria))]
    pub async fn clear(&self, criteria: &ClearCriteria) -> Result<u64, StoreError> {
        if !criteria.is_coherent() {
            return Err(StoreError::IncoherentCriteria(
                "only_sent y only_failed son mutuamente excluyentes".into(),
            ));
        }

        let mut where_clauses: Vec<String> = Vec::new();
        let mut bound_values: Vec<libsql::Value> = Vec::new();

        if let Some(older_than) = criteria.older_than {
            bound_values.push(older_than.timestamp_millis().into());
            where_clauses.push(format!("created_at_ms < ?{}", bound_values.len()));
        }
        if criteria.only_sent {
            where_clauses.push("sent_at_ms IS NOT NULL".into());
        }
        if criteria.only_failed {
            where_clauses.push("sent_at_ms IS NULL AND retry_count > 0".into());
        }
        if let Some(kind) = criteria.event_kind {
            bound_values.push(kind.as_label().into());
            where_clauses.push(format!("event_kind = ?{}", bound_values.len()));
        }

        let where_fragment = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_clauses.join(" AND "))
        };

        let connection = self.store_client.connection().await?;
        let deleted_rows = connection
            .execute(&format!("DELETE FROM queued_events {where_fragment}"), bound_values)
            .await?;

        info!("🧹 [QUEUE]: Clear removed {} rows.", deleted_rows);
        Ok(deleted_rows)
    }

    /**
     * Reduce la capacidad en caliente (degradación): expulsa pendientes
     * antiguos hasta que la profundidad pendiente quepa en el nuevo tope.
     */
    pub async fn shrink_to_capacity(&self, new_capacity: u64) -> Result<u64, StoreError> {
        let connection = self.store_client.connection().await?;
        let transaction = connection.transaction().await.map_err(|_| StoreError::TransactionError)?;
        let evicted = Self::evict_oldest_pending(&transaction, new_capacity).await?;
        transaction.commit().await.map_err(|_| StoreError::TransactionError)?;

        if evicted > 0 {
            warn!("📉 [QUEUE]: Capacity shrink evicted {} pending events.", evicted);
        }
        Ok(evicted)
    }

    /**
     * Vaciado de emergencia (con pérdida, siempre registrado): borra los
     * enviados y recorta los pendientes al remanente indicado.
     */
    pub async fn emergency_flush(&self, keep_latest_pending: u64) -> Result<(u64, u64), StoreError> {
        let connection = self.store_client.connection().await?;
        let transaction = connection.transaction().await.map_err(|_| StoreError::TransactionError)?;

        let sent_removed = transaction
            .execute("DELETE FROM queued_events WHERE sent_at_ms IS NOT NULL", ())
            .await?;
        let pending_evicted = Self::evict_oldest_pending(&transaction, keep_latest_pending).await?;

        transaction.commit().await.map_err(|_| StoreError::TransactionError)?;
        warn!(
            "🚨 [QUEUE]: EMERGENCY FLUSH -> {} sent purged, {} pending evicted (lossy).",
            sent_removed, pending_evicted
        );
        Ok((sent_removed, pending_evicted))
    }

    /// Existencia por identidad; usada por la deduplicación del procesador.
    pub async fn contains_identity(&self, event_identifier: &str) -> Result<bool, StoreError> {
        let connection = self.store_client.connection().await?;
        let mut rows = connection
            .query(
                "SELECT 1 FROM queued_events WHERE event_identifier = ?1 LIMIT 1",
                params![event_identifier],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    // --- MAPEO DE FILAS ---

    fn map_row(row: &libsql::Row) -> Result<QueuedAccessEvent, StoreError> {
        let kind_label: String = row.get(4)?;
        let event_kind = EventKind::parse_label(&kind_label)
            .ok_or_else(|| StoreError::MappingError(format!("UNKNOWN_EVENT_KIND -> {kind_label}")))?;

        let timestamp = Self::value_as_timestamp(row, 5)?
            .ok_or_else(|| StoreError::MappingError("EVENT_TIMESTAMP_NULL".into()))?;
        let created_at = Self::value_as_timestamp(row, 10)?
            .ok_or_else(|| StoreError::MappingError("CREATED_AT_NULL".into()))?;

        let event = StandardAccessEvent {
            event_identifier: row.get(1)?,
            external_user_identifier: row.get(2)?,
            internal_user_identifier: Self::value_as_optional_text(row, 3)?,
            timestamp,
            event_kind,
            is_simulated: row.get::<i64>(6)? != 0,
            device_identifier: row.get(8)?,
            clock_skew: row.get::<i64>(7)? != 0,
            // La bolsa íntegra vive dentro del sello; aquí solo columnas planas.
            raw_data: serde_json::Value::Null,
        };

        Ok(QueuedAccessEvent {
            row_identifier: row.get(0)?,
            event,
            payload_sealed: row.get::<Vec<u8>>(9)?,
            created_at,
            sent_at: Self::value_as_timestamp(row, 11)?,
            retry_count: row.get::<i64>(12)? as u32,
        })
    }

    fn value_as_optional_text(row: &libsql::Row, index: i32) -> Result<Option<String>, StoreError> {
        match row.get_value(index)? {
            libsql::Value::Text(text) => Ok(Some(text)),
            libsql::Value::Null => Ok(None),
            other => Err(StoreError::MappingError(format!("TEXT_EXPECTED -> {other:?}"))),
        }
    }

    fn value_as_u64(row: &libsql::Row, index: i32) -> Result<u64, StoreError> {
        match row.get_value(index)? {
            libsql::Value::Integer(value) => Ok(value.max(0) as u64),
            libsql::Value::Null => Ok(0),
            other => Err(StoreError::MappingError(format!("INTEGER_EXPECTED -> {other:?}"))),
        }
    }

    fn value_as_timestamp(row: &libsql::Row, index: i32) -> Result<Option<DateTime<Utc>>, StoreError> {
        match row.get_value(index)? {
            libsql::Value::Integer(milliseconds) => Ok(Utc.timestamp_millis_opt(milliseconds).single()),
            libsql::Value::Null => Ok(None),
            other => Err(StoreError::MappingError(format!("TIMESTAMP_EXPECTED -> {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SynchronousMode;

    async fn memory_repository(label: &str) -> EventQueueRepository {
        let url = format!("file:{label}?mode=memory&cache=shared");
        let client = StoreClient::connect(&url, SynchronousMode::Full)
            .await
            .expect("CRITICAL_FAULT: memory store ignition failed");
        EventQueueRepository::new(client)
    }

    fn sample_event(suffix: u32, kind: EventKind) -> StandardAccessEvent {
        StandardAccessEvent {
            event_identifier: format!("{:032x}", suffix),
            external_user_identifier: format!("fp_{suffix}"),
            internal_user_identifier: None,
            timestamp: Utc.timestamp_millis_opt(1_704_103_200_000 + suffix as i64 * 1_000).unwrap(),
            event_kind: kind,
            is_simulated: true,
            device_identifier: "dev_alpha".into(),
            clock_skew: false,
            raw_data: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn enqueue_lease_ack_lifecycle_is_fifo() {
        let repository = memory_repository("queue_fifo").await;

        for ordinal in 1..=5u32 {
            let outcome = repository
                .enqueue(&sample_event(ordinal, EventKind::Entry), b"sealed", 1_000)
                .await
                .unwrap();
            assert_eq!(outcome, EnqueueOutcome::Inserted { evicted: 0 });
        }

        let batch = repository.lease_batch(3, 60).await.unwrap();
        assert_eq!(batch.len(), 3);
        let leased_ids: Vec<String> = batch.iter().map(|q| q.event.event_identifier.clone()).collect();
        assert_eq!(leased_ids[0], format!("{:032x}", 1u32));
        assert_eq!(leased_ids[2], format!("{:032x}", 3u32));

        // Un segundo arrendatario concurrente no ve las filas arrendadas.
        let concurrent_batch = repository.lease_batch(10, 60).await.unwrap();
        assert_eq!(concurrent_batch.len(), 2);

        let row_ids: Vec<i64> = batch.iter().map(|q| q.row_identifier).collect();
        assert_eq!(repository.ack(&row_ids).await.unwrap(), 3);
        // Idempotencia del ack.
        assert_eq!(repository.ack(&row_ids).await.unwrap(), 0);

        let stats = repository.stats().await.unwrap();
        assert_eq!(stats.sent, 3);
        assert_eq!(stats.pending, 2);
        assert!(stats.last_ack_at.is_some());
    }

    #[tokio::test]
    async fn duplicates_are_counted_and_dropped() {
        let repository = memory_repository("queue_dedup").await;
        let event = sample_event(7, EventKind::Entry);

        assert!(matches!(
            repository.enqueue(&event, b"sealed", 1_000).await.unwrap(),
            EnqueueOutcome::Inserted { .. }
        ));
        assert_eq!(repository.enqueue(&event, b"sealed", 1_000).await.unwrap(), EnqueueOutcome::Duplicate);
        assert_eq!(repository.enqueue(&event, b"sealed", 1_000).await.unwrap(), EnqueueOutcome::Duplicate);

        let stats = repository.stats().await.unwrap();
        assert_eq!(stats.depth, 1);
        assert_eq!(stats.duplicates_total, 2);
        assert!(repository.contains_identity(&event.event_identifier).await.unwrap());
    }

    #[tokio::test]
    async fn capacity_bound_evicts_the_oldest_pending() {
        let repository = memory_repository("queue_evict").await;

        for ordinal in 1..=15u32 {
            repository
                .enqueue(&sample_event(ordinal, EventKind::Entry), b"sealed", 10)
                .await
                .unwrap();
        }

        let stats = repository.stats().await.unwrap();
        assert_eq!(stats.pending, 10);
        assert_eq!(stats.evicted_total, 5);

        // Los supervivientes son los 10 más recientes.
        let survivors = repository.query(&EventFilter::default()).await.unwrap();
        assert_eq!(survivors[0].event.event_identifier, format!("{:032x}", 6u32));
    }

    #[tokio::test]
    async fn nack_bumps_retry_count_without_reordering() {
        let repository = memory_repository("queue_nack").await;

        for ordinal in 1..=3u32 {
            repository
                .enqueue(&sample_event(ordinal, EventKind::Exit), b"sealed", 100)
                .await
                .unwrap();
        }

        let batch = repository.lease_batch(3, 60).await.unwrap();
        let row_ids: Vec<i64> = batch.iter().map(|q| q.row_identifier).collect();
        repository.nack(&row_ids, "remote 503").await.unwrap();

        let retried = repository.lease_batch(3, 60).await.unwrap();
        assert_eq!(retried.len(), 3);
        assert!(retried.iter().all(|q| q.retry_count == 1));
        assert_eq!(retried[0].event.event_identifier, format!("{:032x}", 1u32));

        let stats = repository.stats().await.unwrap();
        assert_eq!(stats.failed, 3);
        assert!(stats.last_failure_at.is_some());
    }

    #[tokio::test]
    async fn clear_rejects_incoherent_criteria_and_honors_filters() {
        let repository = memory_repository("queue_clear").await;

        for ordinal in 1..=4u32 {
            repository
                .enqueue(&sample_event(ordinal, EventKind::Entry), b"sealed", 100)
                .await
                .unwrap();
        }
        let batch = repository.lease_batch(2, 60).await.unwrap();
        let row_ids: Vec<i64> = batch.iter().map(|q| q.row_identifier).collect();
        repository.ack(&row_ids).await.unwrap();

        let incoherent = ClearCriteria {
            only_sent: true,
            only_failed: true,
            ..Default::default()
        };
        assert!(matches!(repository.clear(&incoherent).await, Err(StoreError::IncoherentCriteria(_))));

        let only_sent = ClearCriteria { only_sent: true, ..Default::default() };
        assert_eq!(repository.clear(&only_sent).await.unwrap(), 2);

        let stats = repository.stats().await.unwrap();
        assert_eq!(stats.depth, 2);
        assert_eq!(stats.sent, 0);
    }

    #[tokio::test]
    async fn shrink_to_capacity_trims_pending_depth() {
        let repository = memory_repository("queue_shrink").await;

        for ordinal in 1..=20u32 {
            repository
                .enqueue(&sample_event(ordinal, EventKind::Entry), b"sealed", 100)
                .await
                .unwrap();
        }

        let evicted = repository.shrink_to_capacity(5).await.unwrap();
        assert_eq!(evicted, 15);
        assert_eq!(repository.stats().await.unwrap().pending, 5);
    }
}
