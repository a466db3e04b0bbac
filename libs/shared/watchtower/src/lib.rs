// [libs/shared/watchtower/src/lib.rs]
/*!
 * =================================================================
 * APARATO: WATCHTOWER NEURAL OBSERVER
 * CLASIFICACIÓN: SHARED UTILITY (ESTRATO L4)
 * RESPONSABILIDAD: GESTIÓN DE TELEMETRÍA, TRAZADO Y CAPTURA DE PÁNICOS
 *
 * El rastro de auditoría de seguridad viaja por el target dedicado
 * `audit`; el registro no bloqueante garantiza que el rastro de
 * ejecución se preserve incluso ante una terminación abrupta del host.
 * =================================================================
 */

use std::panic;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{filter, fmt as formatting_layer, EnvFilter, Layer};

/// Interruptor global del estrato de archivo. El escalador de degradación
/// lo apaga bajo presión de disco sin reconstruir el suscriptor.
static FILE_SINK_ENABLED: AtomicBool = AtomicBool::new(true);

/// Guardián del escritor no bloqueante; debe vivir tanto como el proceso.
pub struct WatchtowerGuard {
    _file_writer_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Habilita o suprime la emisión hacia el archivo de log en caliente.
pub fn set_file_sink_enabled(enabled: bool) {
    FILE_SINK_ENABLED.store(enabled, Ordering::SeqCst);
    info!("🗂️  [WATCHTOWER]: File sink switched to enabled={}", enabled);
}

pub fn is_file_sink_enabled() -> bool {
    FILE_SINK_ENABLED.load(Ordering::SeqCst)
}

/// Inicializa el sistema de trazas del Bridge con blindaje de pánicos.
///
/// # Comportamiento:
/// - Desarrollo: logs compactos con resaltado para el operador local.
/// - Producción: estructura JSON plana para la ingesta del colector remoto.
/// - `log_directory`: si está presente, añade un estrato de archivo rotado
///   por día cuyo caudal obedece al interruptor de degradación.
///
/// # Errors:
/// Provoca pánico si otro suscriptor global ya fue inicializado.
pub fn init_tracing(service_nominal_identifier: &str, log_directory: Option<&Path>) -> WatchtowerGuard {
    // 1. FILTRO DINÁMICO: priorizamos el dominio propio y silenciamos
    // el ruido de infraestructura (Tower, Hyper, libSQL).
    let environmental_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "{}={level},turngate={level},tower_http=warn,hyper=warn,libsql=error",
            service_nominal_identifier.replace('-', "_"),
            level = if cfg!(debug_assertions) { "debug" } else { "info" }
        )
        .into()
    });

    let is_production_strata = !cfg!(debug_assertions);

    // 2. ESTRATO DE ARCHIVO (opcional, conmutable en caliente)
    let (file_layer, file_writer_guard) = match log_directory {
        Some(directory) => {
            let daily_appender = tracing_appender::rolling::daily(directory, "bridge-agent.log");
            let (non_blocking_writer, writer_guard) = tracing_appender::non_blocking(daily_appender);

            let layer = formatting_layer::layer()
                .json()
                .with_writer(non_blocking_writer)
                .with_filter(filter::filter_fn(|_| FILE_SINK_ENABLED.load(Ordering::Relaxed)));

            (Some(layer), Some(writer_guard))
        }
        None => (None, None),
    };

    // 3. ARQUITECTURA DE SUSCRIPCIÓN (Dual Mode)
    // Una sola cadena de estratos: los modos se expresan como capas
    // opcionales para que el tipo del registro quede único.
    let production_stdout_layer = is_production_strata
        .then(|| formatting_layer::layer().json().flatten_event(true));
    let development_stdout_layer = (!is_production_strata)
        .then(|| formatting_layer::layer().compact().with_target(false));

    tracing_subscriber::registry()
        .with(environmental_filter)
        .with(file_layer)
        .with(production_stdout_layer)
        .with(development_stdout_layer)
        .init();

    // 4. ESCUDO DE PÁNICOS GLOBAL
    // Cualquier colapso en tareas secundarias (adaptadores, bombas de red)
    // queda registrado antes de la defunción del proceso.
    let service_id_snapshot = service_nominal_identifier.to_string();

    panic::set_hook(Box::new(move |panic_metadata| {
        let panic_location = panic_metadata
            .location()
            .map(|location| format!("{}:{}:{}", location.file(), location.line(), location.column()))
            .unwrap_or_else(|| "UNKNOWN_STRATA_COORDINATES".to_string());

        let panic_payload_message = panic_metadata
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| panic_metadata.payload().downcast_ref::<String>().map(|s| s.as_str()))
            .unwrap_or("UNDEFINED_KERNEL_COLLAPSE_PAYLOAD");

        error!(
            target: "panic_monitor",
            service = %service_id_snapshot,
            estrato = %panic_location,
            "🔥 [CRITICAL_PANIC]: Thread terminated abruptly. Analysis: {}",
            panic_payload_message
        );
    }));

    info!(
        "👁️  [WATCHTOWER_ONLINE]: Observability strata levelized for [{}].",
        service_nominal_identifier
    );

    WatchtowerGuard {
        _file_writer_guard: file_writer_guard,
    }
}
