//! Latency probing through the engine
//!
//! Issues a single `GET` to a "no content" endpoint over a fresh connection
//! dialed through the engine itself, so the measured time reflects the real
//! tunnel path.

use bytes::Bytes;
use http::header::{CONNECTION, HOST, USER_AGENT};
use http::{Method, Request, StatusCode};
use http_body_util::Empty;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;
use tunpoint_engine::{Destination, EngineInstance};
use url::Url;

use crate::error::ProbeError;

/// Limit for dialing plus TLS and HTTP handshakes
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(6);
/// Limit for the whole probe
pub const OVERALL_TIMEOUT: Duration = Duration::from_secs(12);

#[derive(Debug, Clone)]
pub struct LatencyProbe {
    host: String,
    port: u16,
    tls: bool,
    /// `Host` header value
    authority: String,
    path: String,
    handshake_timeout: Duration,
    overall_timeout: Duration,
}

impl LatencyProbe {
    /// Probe `url`; only `http` and `https` are supported
    pub fn new(url: &str) -> Result<Self, ProbeError> {
        let parsed = Url::parse(url).map_err(|e| ProbeError::InvalidUrl(e.to_string()))?;

        let tls = match parsed.scheme() {
            "http" => false,
            "https" => true,
            other => {
                return Err(ProbeError::InvalidUrl(format!(
                    "unsupported scheme: {}",
                    other
                )))
            }
        };

        let host = parsed
            .host_str()
            .ok_or_else(|| ProbeError::InvalidUrl(format!("no host in {}", url)))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| ProbeError::InvalidUrl(format!("no port for {}", url)))?;
        let authority = match parsed.port() {
            Some(port) => format!("{}:{}", parsed.host_str().unwrap_or(&host), port),
            None => parsed.host_str().unwrap_or(&host).to_string(),
        };
        let path = match parsed.query() {
            Some(query) => format!("{}?{}", parsed.path(), query),
            None => parsed.path().to_string(),
        };

        Ok(Self {
            host,
            port,
            tls,
            authority,
            path,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            overall_timeout: OVERALL_TIMEOUT,
        })
    }

    pub fn with_timeouts(mut self, handshake: Duration, overall: Duration) -> Self {
        self.handshake_timeout = handshake;
        self.overall_timeout = overall;
        self
    }

    /// Destination the probe dials through the engine
    pub fn destination(&self) -> Destination {
        Destination::tcp(self.host.as_str(), self.port)
    }

    /// Round-trip time in milliseconds
    pub async fn measure(
        &self,
        instance: Option<&Arc<dyn EngineInstance>>,
    ) -> Result<i64, ProbeError> {
        let instance = instance.ok_or(ProbeError::NilInstance)?;

        let started = Instant::now();
        tokio::time::timeout(self.overall_timeout, self.round_trip(instance))
            .await
            .map_err(|_| ProbeError::Timeout(self.overall_timeout))??;

        let elapsed = started.elapsed().as_millis() as i64;
        debug!("Probe {} answered in {}ms", self.authority, elapsed);
        Ok(elapsed)
    }

    async fn round_trip(&self, instance: &Arc<dyn EngineInstance>) -> Result<(), ProbeError> {
        let mut sender = tokio::time::timeout(self.handshake_timeout, self.connect(instance))
            .await
            .map_err(|_| ProbeError::Timeout(self.handshake_timeout))??;

        let request = Request::builder()
            .method(Method::GET)
            .uri(self.path.as_str())
            .header(HOST, self.authority.as_str())
            .header(CONNECTION, "close")
            .header(USER_AGENT, concat!("tunpoint/", env!("CARGO_PKG_VERSION")))
            .body(Empty::<Bytes>::new())
            .map_err(|e| ProbeError::InvalidUrl(e.to_string()))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| ProbeError::Transport(e.to_string()))?;

        if response.status() != StatusCode::NO_CONTENT {
            return Err(ProbeError::StatusMismatch(response.status()));
        }
        Ok(())
    }

    async fn connect(
        &self,
        instance: &Arc<dyn EngineInstance>,
    ) -> Result<http1::SendRequest<Empty<Bytes>>, ProbeError> {
        let destination = self.destination();
        let stream = instance
            .dial(&destination)
            .await
            .map_err(|e| ProbeError::Transport(e.to_string()))?;

        if !self.tls {
            return handshake(stream).await;
        }

        let server_name = rustls::pki_types::ServerName::try_from(self.host.clone())
            .map_err(|e| ProbeError::InvalidUrl(e.to_string()))?;
        let tls_stream = build_tls_connector()
            .connect(server_name, stream)
            .await
            .map_err(|e| ProbeError::Transport(format!("TLS handshake failed: {}", e)))?;
        handshake(tls_stream).await
    }
}

async fn handshake<S>(io: S) -> Result<http1::SendRequest<Empty<Bytes>>, ProbeError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (sender, conn) = http1::handshake(TokioIo::new(io))
        .await
        .map_err(|e| ProbeError::Transport(format!("HTTP handshake failed: {}", e)))?;

    // Drive the connection; it ends after the single exchange
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("Probe connection closed: {}", e);
        }
    });

    Ok(sender)
}

fn build_tls_connector() -> tokio_rustls::TlsConnector {
    ensure_crypto_provider();

    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    tokio_rustls::TlsConnector::from(Arc::new(config))
}

static CRYPTO_PROVIDER_INIT: std::sync::Once = std::sync::Once::new();

fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
