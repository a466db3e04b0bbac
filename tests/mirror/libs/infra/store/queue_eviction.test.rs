// [tests/mirror/libs/infra/store/queue_eviction.test.rs]
/*!
 * =================================================================
 * APARATO: CERTIFICADOR DE EXPULSIÓN POR CAPACIDAD
 * CLASIFICACIÓN: EVIDENCIA ESPEJO (ESTRATO L3-MIRROR)
 * RESPONSABILIDAD: AUDITORÍA DEL TOPE FIFO DE LA COLA DURABLE
 *
 * Reproduce la saturación bajo nivel Lite: 1500 ingestas contra un
 * tope de 1000 sin red. El prefijo expulsado debe ser exactamente el
 * de los pendientes más antiguos.
 * =================================================================
 */

use chrono::{TimeZone, Utc};

use turngate_domain_models::events::{EventFilter, EventKind, StandardAccessEvent};
use turngate_infra_store::{EventQueueRepository, StoreClient, SynchronousMode, UserMappingRepository};

fn ordinal_event(ordinal: u32) -> StandardAccessEvent {
    StandardAccessEvent {
        event_identifier: format!("{:032x}", ordinal),
        external_user_identifier: format!("fp_{ordinal}"),
        internal_user_identifier: None,
        timestamp: Utc.timestamp_millis_opt(1_704_103_200_000 + ordinal as i64 * 500).unwrap(),
        event_kind: EventKind::Entry,
        is_simulated: true,
        device_identifier: "dev_lite".into(),
        clock_skew: false,
        raw_data: serde_json::Value::Null,
    }
}

#[tokio::test]
async fn certify_lite_capacity_bound_evicts_the_oldest_prefix() {
    println!("\n🗄️  [INICIO]: Auditoría de expulsión por capacidad (Lite)...");
    let mut accumulated_anomalies = 0u32;

    // 1. SETUP: almacén volátil con caché compartido.
    let store_client = StoreClient::connect("file:mirror_evict?mode=memory&cache=shared", SynchronousMode::Normal)
        .await
        .expect("CRITICAL_FAULT: memory store ignition failed");
    let repository = EventQueueRepository::new(store_client);

    // 2. SATURACIÓN: 1500 ingestas contra tope 1000, sin red.
    println!("   🧪 Fase 1: Inyectando 1500 eventos contra tope de 1000...");
    for ordinal in 1..=1_500u32 {
        repository
            .enqueue(&ordinal_event(ordinal), b"sealed", 1_000)
            .await
            .expect("ENQUEUE_FAULT");
    }

    // 3. VEREDICTO DE PROFUNDIDAD Y CONTADOR.
    let stats = repository.stats().await.expect("STATS_FAULT");
    if stats.pending == 1_000 && stats.evicted_total == 500 {
        println!("      ✅ Profundidad 1000, expulsados 500.");
    } else {
        println!(
            "      ❌ FALLO: pending={} evicted={} (esperado 1000/500).",
            stats.pending, stats.evicted_total
        );
        accumulated_anomalies += 1;
    }

    // 4. EL PREFIJO EXPULSADO ES EL MÁS ANTIGUO.
    println!("   🧪 Fase 2: Verificando el prefijo FIFO expulsado...");
    let survivors = repository
        .query(&EventFilter {
            limit: Some(1_000),
            ..Default::default()
        })
        .await
        .expect("QUERY_FAULT");

    let oldest_survivor = &survivors.first().expect("EMPTY_QUEUE").event.event_identifier;
    let newest_survivor = &survivors.last().expect("EMPTY_QUEUE").event.event_identifier;

    if oldest_survivor == &format!("{:032x}", 501u32) && newest_survivor == &format!("{:032x}", 1_500u32) {
        println!("      ✅ Sobreviven exactamente los 1000 más recientes (501..1500).");
    } else {
        println!("      ❌ FALLO: rango superviviente [{oldest_survivor}..{newest_survivor}].");
        accumulated_anomalies += 1;
    }

    println!("\n🏁 [INFORME]: Auditoría de capacidad finalizada.");
    assert_eq!(accumulated_anomalies, 0, "El tope FIFO de la cola presenta anomalías.");
}

#[tokio::test]
async fn certify_mapping_changes_never_rewrite_queued_history() {
    println!("\n🗄️  [INICIO]: Auditoría de consistencia histórica del mapa de socios...");

    let store_client = StoreClient::connect("file:mirror_mapping?mode=memory&cache=shared", SynchronousMode::Full)
        .await
        .expect("CRITICAL_FAULT: memory store ignition failed");
    let queue = EventQueueRepository::new(store_client.clone());
    let mappings = UserMappingRepository::new(store_client);

    // El evento se encola con la identidad interna resuelta AL INGERIR.
    mappings.upsert("dev_lite", "fp_9", "member_100").await.expect("MAP_FAULT");

    let mut historical_event = ordinal_event(9);
    historical_event.external_user_identifier = "fp_9".into();
    historical_event.internal_user_identifier = Some("member_100".into());
    queue.enqueue(&historical_event, b"sealed", 100).await.expect("ENQUEUE_FAULT");

    // El mapeo cambia después; la historia no se reescribe.
    mappings.upsert("dev_lite", "fp_9", "member_999").await.expect("MAP_FAULT");
    assert_eq!(
        mappings.resolve("dev_lite", "fp_9").await.unwrap().as_deref(),
        Some("member_999")
    );

    let queued = queue
        .query(&EventFilter {
            external_user_identifier: Some("fp_9".into()),
            ..Default::default()
        })
        .await
        .expect("QUERY_FAULT");

    assert_eq!(
        queued[0].event.internal_user_identifier.as_deref(),
        Some("member_100"),
        "la fila encolada retiene la identidad resuelta al momento de la ingesta"
    );

    println!("🏁 [INFORME]: Consistencia histórica certificada.");
}
