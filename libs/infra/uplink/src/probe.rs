// [libs/infra/uplink/src/probe.rs]
/*!
 * =================================================================
 * APARATO: NETWORK AVAILABILITY PROBE
 * CLASIFICACIÓN: INFRASTRUCTURE LAYER (ESTRATO L3)
 * RESPONSABILIDAD: CORTOCIRCUITO DE INTENTOS DURANTE DESCONEXIÓN
 *
 * Alcanzabilidad TCP al host de la API con veredicto cacheado 30s:
 * la bomba de despacho consulta el sondeo antes de arrendar un lote,
 * evitando quemar reintentos (y batería de backoff) sin red física.
 * =================================================================
 */

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use url::Url;

use crate::errors::UplinkError;

/// Vigencia del veredicto cacheado.
const PROBE_VERDICT_TTL: Duration = Duration::from_secs(30);
/// Tiempo máximo del intento de conexión del sondeo.
const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

pub struct NetworkProbe {
    api_host: String,
    api_port: u16,
    cached_verdict: Mutex<Option<(Instant, bool)>>,
}

impl NetworkProbe {
    /// Deriva host y puerto del endpoint base de la API remota.
    pub fn for_endpoint(api_base_url: &str) -> Result<Self, UplinkError> {
        let parsed = Url::parse(api_base_url)
            .map_err(|parse_fault| UplinkError::EndpointMalformed(parse_fault.to_string()))?;

        let api_host = parsed
            .host_str()
            .ok_or_else(|| UplinkError::EndpointMalformed("HOST_MISSING".into()))?
            .to_string();

        let api_port = parsed
            .port()
            .unwrap_or_else(|| if parsed.scheme() == "http" { 80 } else { 443 });

        Ok(Self {
            api_host,
            api_port,
            cached_verdict: Mutex::new(None),
        })
    }

    /**
     * Veredicto de alcanzabilidad, cacheado por el TTL del sondeo.
     */
    pub async fn is_reachable(&self) -> bool {
        if let Some((verdict_instant, verdict)) = *self.cached_verdict.lock().expect("probe lock poisoned") {
            if verdict_instant.elapsed() < PROBE_VERDICT_TTL {
                return verdict;
            }
        }

        let fresh_verdict = self.attempt_tcp_reach().await;
        *self.cached_verdict.lock().expect("probe lock poisoned") = Some((Instant::now(), fresh_verdict));
        fresh_verdict
    }

    async fn attempt_tcp_reach(&self) -> bool {
        let target = format!("{}:{}", self.api_host, self.api_port);

        match tokio::time::timeout(PROBE_CONNECT_TIMEOUT, tokio::net::TcpStream::connect(&target)).await {
            Ok(Ok(_stream)) => {
                debug!("🌐 [PROBE]: API host {} reachable.", target);
                true
            }
            Ok(Err(connect_fault)) => {
                warn!("📵 [PROBE]: API host {} unreachable: {}", target, connect_fault);
                false
            }
            Err(_) => {
                warn!("📵 [PROBE]: API host {} probe timed out.", target);
                false
            }
        }
    }

    /// Invalida el veredicto cacheado (usado tras un fallo de envío).
    pub fn invalidate(&self) {
        *self.cached_verdict.lock().expect("probe lock poisoned") = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_parsing_extracts_host_and_default_port() {
        let https_probe = NetworkProbe::for_endpoint("https://api.turngate.example/api/v1").unwrap();
        assert_eq!(https_probe.api_host, "api.turngate.example");
        assert_eq!(https_probe.api_port, 443);

        let explicit_probe = NetworkProbe::for_endpoint("http://10.0.0.5:8443").unwrap();
        assert_eq!(explicit_probe.api_port, 8443);

        assert!(NetworkProbe::for_endpoint("not a url").is_err());
    }

    #[tokio::test]
    async fn verdicts_are_cached_within_the_ttl() {
        // Puerto local efímero con oyente vivo => alcanzable.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_address = listener.local_addr().unwrap();

        let probe = NetworkProbe::for_endpoint(&format!("http://{local_address}")).unwrap();
        assert!(probe.is_reachable().await);

        // Cerramos el oyente: el veredicto cacheado sigue vigente.
        drop(listener);
        assert!(probe.is_reachable().await, "el TTL debe servir el veredicto previo");

        // Invalided: el sondeo fresco detecta la caída.
        probe.invalidate();
        assert!(!probe.is_reachable().await);
    }
}
