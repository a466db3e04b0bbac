// [tests/mirror/apps/bridge_agent/pipeline_flow.test.rs]
/*!
 * =================================================================
 * APARATO: CERTIFICADOR DEL FLUJO DEL PIPELINE
 * CLASIFICACIÓN: EVIDENCIA ESPEJO (ESTRATO L1-MIRROR)
 * RESPONSABILIDAD: AUDITORÍA DE NORMALIZACIÓN, IDENTIDAD Y DEDUP
 *
 * Certifica la cadena adaptador -> procesador -> cola: identidad
 * determinista bajo reemisión, supresión de duplicados, ventana de
 * validación temporal y sellado verificable de la carga.
 * =================================================================
 */

mod common;

use std::sync::atomic::Ordering;

use chrono::{Duration as ChronoDuration, Utc};

use turngate_bridge_lib::config::BridgeConfig;
use turngate_bridge_lib::services::EventProcessor;
use turngate_domain_models::events::{EventFilter, EventKind, RawAccessEvent, StandardAccessEvent};

fn raw_entry_event(external_user: &str) -> RawAccessEvent {
    RawAccessEvent {
        external_user_identifier: external_user.into(),
        timestamp: Utc::now(),
        event_kind: EventKind::Entry,
        raw_data: serde_json::json!({ "simulated": true, "finger_index": 2 }),
    }
}

#[tokio::test]
async fn certify_pipeline_normalization_and_dedup() {
    println!("\n🧪 [INICIO]: Auditoría del flujo del pipeline...");
    let mut accumulated_anomalies = 0u32;

    let bench = common::assemble_bench("pipeline_flow", BridgeConfig::default()).await;
    let (processor, _sink) = EventProcessor::new(bench.state.clone());

    // FASE 1: CAMINO FELIZ: un evento crudo se vuelve estándar y encola.
    println!("   🧪 Fase 1: Ingesta nominal...");
    let first_event = raw_entry_event("fp_123");
    processor.process_one("simulator", first_event.clone()).await;

    let stats = bench.state.event_queue.stats().await.expect("STATS_FAULT");
    if stats.pending == 1 {
        println!("      ✅ Profundidad de cola: 1.");
    } else {
        println!("      ❌ FALLO: profundidad {} (esperada 1).", stats.pending);
        accumulated_anomalies += 1;
    }

    // FASE 2: IDENTIDAD DETERMINISTA: la reemisión triple no duplica.
    println!("   🧪 Fase 2: Supresión de duplicados por identidad...");
    processor.process_one("simulator", first_event.clone()).await;
    processor.process_one("simulator", first_event.clone()).await;

    let stats = bench.state.event_queue.stats().await.expect("STATS_FAULT");
    let duplicates_dropped = bench.state.pipeline_metrics.duplicates_dropped.load(Ordering::Relaxed);
    if stats.pending == 1 && duplicates_dropped == 2 {
        println!("      ✅ Dedup: 1 registro, contador de duplicados = 2.");
    } else {
        println!(
            "      ❌ FALLO: pending={} duplicates={} (esperado 1 y 2).",
            stats.pending, duplicates_dropped
        );
        accumulated_anomalies += 1;
    }

    // FASE 3: VENTANA TEMPORAL: el futuro lejano rechaza, el pasado
    // profundo encola con la marca de desfase.
    println!("   🧪 Fase 3: Ventana de validación temporal...");
    let mut future_event = raw_entry_event("fp_future");
    future_event.timestamp = Utc::now() + ChronoDuration::minutes(10);
    processor.process_one("simulator", future_event).await;

    let rejected = bench.state.pipeline_metrics.validation_rejected.load(Ordering::Relaxed);
    if rejected == 1 {
        println!("      ✅ Evento futuro rechazado con ValidationError.");
    } else {
        println!("      ❌ FALLO: rechazos={rejected} (esperado 1).");
        accumulated_anomalies += 1;
    }

    let mut stale_event = raw_entry_event("fp_stale");
    stale_event.timestamp = Utc::now() - ChronoDuration::hours(30);
    processor.process_one("simulator", stale_event).await;

    let queued = bench
        .state
        .event_queue
        .query(&EventFilter {
            external_user_identifier: Some("fp_stale".into()),
            ..Default::default()
        })
        .await
        .expect("QUERY_FAULT");
    if queued.len() == 1 && queued[0].event.clock_skew {
        println!("      ✅ Evento pasado profundo encolado con clock_skew.");
    } else {
        println!("      ❌ FALLO: el evento pasado no portó la marca clock_skew.");
        accumulated_anomalies += 1;
    }

    // FASE 4: SELLO VERIFICABLE: la carga arrendada abre al evento íntegro.
    println!("   🧪 Fase 4: Integridad del sello en la cola...");
    let leased = bench.state.event_queue.lease_batch(10, 60).await.expect("LEASE_FAULT");
    let mut seal_verified = false;
    for queued_event in &leased {
        let plaintext = bench
            .state
            .payload_sealer
            .unseal(&queued_event.payload_sealed)
            .expect("UNSEAL_FAULT");
        let recovered: StandardAccessEvent = serde_json::from_slice(&plaintext).expect("DECODE_FAULT");
        if recovered.external_user_identifier == "fp_123" {
            seal_verified = recovered.is_simulated
                && recovered.device_identifier == "dev_mirror"
                && recovered.event_identifier == queued_event.event.event_identifier
                && recovered.raw_data["finger_index"] == serde_json::json!(2);
        }
    }
    if seal_verified {
        println!("      ✅ Sello íntegro: el evento canónico completo viaja dentro.");
    } else {
        println!("      ❌ FALLO: la carga sellada no reconstruye el evento canónico.");
        accumulated_anomalies += 1;
    }

    println!("\n🏁 [INFORME]: Auditoría del pipeline finalizada.");
    assert_eq!(accumulated_anomalies, 0, "El flujo del pipeline presenta anomalías.");
    drop(bench.shutdown_sender);
}

#[tokio::test]
async fn certify_event_identity_is_stable_across_restart() {
    println!("\n🧪 [INICIO]: Auditoría de estabilidad de identidad...");

    let bench = common::assemble_bench("pipeline_identity", BridgeConfig::default()).await;
    let (processor, _sink) = EventProcessor::new(bench.state.clone());

    let raw_event = raw_entry_event("fp_777");
    processor.process_one("front_door", raw_event.clone()).await;

    let before = bench
        .state
        .event_queue
        .query(&EventFilter::default())
        .await
        .expect("QUERY_FAULT");
    let original_identity = before[0].event.event_identifier.clone();

    // Un segundo procesador (proceso "reiniciado") reemite el mismo crudo.
    let (reborn_processor, _reborn_sink) = EventProcessor::new(bench.state.clone());
    reborn_processor.process_one("front_door", raw_event).await;

    let after = bench
        .state
        .event_queue
        .query(&EventFilter::default())
        .await
        .expect("QUERY_FAULT");

    assert_eq!(after.len(), 1, "la identidad estable debe absorber la reemisión");
    assert_eq!(after[0].event.event_identifier, original_identity);
    assert_eq!(original_identity.len(), 32, "identidad de 128 bits en hex");

    println!("🏁 [INFORME]: Identidad determinista certificada.");
    drop(bench.shutdown_sender);
}
