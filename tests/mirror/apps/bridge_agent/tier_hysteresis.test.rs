// [tests/mirror/apps/bridge_agent/tier_hysteresis.test.rs]
/*!
 * =================================================================
 * APARATO: CERTIFICADOR DE HISTÉRESIS DE NIVEL
 * CLASIFICACIÓN: EVIDENCIA ESPEJO (ESTRATO L1-MIRROR)
 * RESPONSABILIDAD: AUDITORÍA DE LA ESCALERA DE NIVELES Y PERILLAS
 *
 * Certifica la monotonía de la histéresis (3 muestras para degradar,
 * 10 para ascender) y que la adopción de un perfil re-forma cola,
 * latido y capacidades en una sola operación.
 * =================================================================
 */

use turngate_bridge_lib::services::tier_sentinel::HysteresisLadder;
use turngate_bridge_lib::state::RuntimeKnobs;
use turngate_domain_models::tier::{ResourceTier, TierProfile};

#[test]
fn certify_hysteresis_monotonicity() {
    println!("\n🧪 [INICIO]: Auditoría de histéresis de nivel...");
    let mut accumulated_anomalies = 0u32;

    // FASE 1: DEGRADACIÓN: exactamente 3 muestras sostenidas.
    println!("   🧪 Fase 1: Degradación con racha de 3...");
    let mut ladder = HysteresisLadder::new(ResourceTier::Full);
    let mut shifts = Vec::new();
    for _ in 0..3 {
        if let Some(tier) = ladder.observe(ResourceTier::Normal) {
            shifts.push(tier);
        }
    }
    if shifts == vec![ResourceTier::Normal] {
        println!("      ✅ Degradó en la tercera muestra, no antes.");
    } else {
        println!("      ❌ FALLO: rastro de cambios {shifts:?}.");
        accumulated_anomalies += 1;
    }

    // FASE 2: UN PICO AISLADO JAMÁS ASCIENDE.
    println!("   🧪 Fase 2: Inmunidad a picos de ascenso...");
    let mut bounced = false;
    for _ in 0..9 {
        if ladder.observe(ResourceTier::Full).is_some() {
            bounced = true;
        }
    }
    // La décima muestra completa la racha.
    let ascended = ladder.observe(ResourceTier::Full);
    if !bounced && ascended == Some(ResourceTier::Full) {
        println!("      ✅ Ascendió exactamente en la décima muestra.");
    } else {
        println!("      ❌ FALLO: bounced={bounced} ascended={ascended:?}.");
        accumulated_anomalies += 1;
    }

    println!("\n🏁 [INFORME]: Histéresis auditada.");
    assert_eq!(accumulated_anomalies, 0, "La escalera de histéresis presenta anomalías.");
}

#[test]
fn certify_profile_adoption_reshapes_every_knob() {
    println!("\n🧪 [INICIO]: Auditoría de adopción de perfil...");

    let knobs = RuntimeKnobs::from_profile(&TierProfile::for_tier(ResourceTier::Full), 60);
    assert_eq!(knobs.queue_capacity(), 50_000);
    assert_eq!(knobs.heartbeat_interval().as_secs(), 30);
    assert_eq!(knobs.uplink_batch_size(), 500);
    assert!(knobs.websocket_broadcast_enabled());

    knobs.adopt_profile(&TierProfile::for_tier(ResourceTier::Lite));
    assert_eq!(knobs.queue_capacity(), 1_000);
    assert_eq!(knobs.heartbeat_interval().as_secs(), 300);
    assert_eq!(knobs.uplink_batch_size(), 50);
    assert!(!knobs.metrics_enabled());
    assert!(!knobs.websocket_broadcast_enabled());
    assert!(!knobs.detailed_audit_enabled());

    knobs.adopt_profile(&TierProfile::for_tier(ResourceTier::Normal));
    assert_eq!(knobs.queue_capacity(), 10_000);
    assert_eq!(knobs.heartbeat_interval().as_secs(), 60);
    assert_eq!(knobs.uplink_batch_size(), 100);
    assert!(knobs.metrics_enabled());

    println!("🏁 [INFORME]: Perillas re-formadas correctamente por perfil.");
}
