//! Recording reverse proxy
//!
//! Forwards every incoming request to a single configured upstream and
//! appends one replayable JSON record per exchange to the capture file.
//! Serves TLS when both a certificate and key are configured.

use crate::error::{ReverbError, Result};
use crate::model::LogEntry;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Internal header carrying the base64-encoded request body from the
/// director to the capture step. Stripped before the upstream leg and
/// excluded from captured headers.
pub const BODY_BUFFER_HEADER: &str = "x-reverb-body-buffer";

/// Hop-by-hop headers never forwarded upstream.
const HOP_BY_HOP: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Capture proxy configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Listen address, e.g. `127.0.0.1:8080`.
    pub listen: String,
    /// Upstream base URL, e.g. `http://production.api.com`.
    pub upstream: String,
    /// Capture output file (JSON lines, appended).
    pub output: PathBuf,
    /// Also emit each record to stdout.
    pub stream: bool,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

/// One captured exchange, shaped to be re-ingested by the replayer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedEntry {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, Vec<String>>,
    /// Base64-encoded request body.
    pub body: String,
    pub status: u16,
    pub response_headers: HashMap<String, Vec<String>>,
    /// Base64-encoded response body.
    pub response_body: String,
    pub latency_ms: i64,
}

impl CapturedEntry {
    /// View as a replayable input record.
    pub fn into_log_entry(self) -> LogEntry {
        LogEntry {
            method: self.method,
            path: self.path,
            headers: self.headers,
            body: self.body,
            status: Some(self.status),
            response_headers: self.response_headers,
            response_body: self.response_body,
            timestamp: Some(self.timestamp),
            latency_ms: self.latency_ms,
        }
    }
}

/// Serialized, flushed-per-line capture file writer.
struct CaptureWriter {
    file: Mutex<BufWriter<File>>,
    stream: bool,
}

impl CaptureWriter {
    fn open(path: &Path, stream: bool) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.create(true).append(true);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let file = options.open(path).map_err(|e| {
            ReverbError::Input(format!("failed to open capture file {:?}: {}", path, e))
        })?;

        // An existing file keeps its old mode; make sure it is private.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
        }

        Ok(Self {
            file: Mutex::new(BufWriter::new(file)),
            stream,
        })
    }

    /// Append one newline-terminated record and flush before releasing the
    /// writer. A record is a complete line or absent.
    fn append(&self, entry: &CapturedEntry) -> Result<()> {
        let line = serde_json::to_string(entry)?;

        if self.stream {
            println!("{}", line);
        }

        let mut file = self.file.lock();
        writeln!(file, "{}", line)?;
        file.flush()?;

        Ok(())
    }
}

/// A bound capture proxy, ready to serve.
pub struct CaptureProxy {
    listener: TcpListener,
    upstream: reqwest::Url,
    client: reqwest::Client,
    writer: Arc<CaptureWriter>,
    tls_acceptor: Option<tokio_rustls::TlsAcceptor>,
}

impl CaptureProxy {
    /// Validate the configuration, open the capture file, and bind the
    /// listen socket.
    pub async fn bind(config: CaptureConfig) -> Result<Self> {
        let upstream = reqwest::Url::parse(config.upstream.trim())
            .map_err(|e| ReverbError::Input(format!("invalid upstream URL: {}", e)))?;

        if upstream.host_str().is_none() {
            return Err(ReverbError::Input(format!(
                "upstream URL has no host: {}",
                config.upstream
            )));
        }

        let writer = Arc::new(CaptureWriter::open(&config.output, config.stream)?);

        let tls_acceptor = match (&config.tls_cert, &config.tls_key) {
            (Some(cert), Some(key)) => Some(tls_acceptor(cert, key)?),
            _ => None,
        };

        let listener = TcpListener::bind(&config.listen).await?;

        Ok(Self {
            listener,
            upstream,
            client: reqwest::Client::new(),
            writer,
            tls_acceptor,
        })
    }

    /// Address the proxy is listening on.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and serve connections until the shutdown signal flips.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            listen = %self.local_addr()?,
            upstream = %self.upstream,
            tls = self.tls_acceptor.is_some(),
            "Capture mode ON"
        );

        loop {
            let (stream, peer) = tokio::select! {
                accepted = self.listener.accept() => accepted?,
                _ = shutdown_requested(&mut shutdown) => {
                    info!("Capture proxy shutting down");
                    return Ok(());
                }
            };

            debug!(peer = %peer, "Accepted connection");

            let upstream = self.upstream.clone();
            let client = self.client.clone();
            let writer = self.writer.clone();
            let tls_acceptor = self.tls_acceptor.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let upstream = upstream.clone();
                    let client = client.clone();
                    let writer = writer.clone();
                    async move { handle(req, upstream, client, writer).await }
                });

                match tls_acceptor {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(tls_stream) => {
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(TokioIo::new(tls_stream), service)
                                .await
                            {
                                debug!("Connection error: {}", e);
                            }
                        }
                        Err(e) => warn!("TLS handshake failed: {}", e),
                    },
                    None => {
                        if let Err(e) = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            debug!("Connection error: {}", e);
                        }
                    }
                }
            });
        }
    }
}

/// Bind and run the capture proxy until the shutdown signal flips.
pub async fn serve(config: CaptureConfig, shutdown: watch::Receiver<bool>) -> Result<()> {
    CaptureProxy::bind(config).await?.serve(shutdown).await
}

/// Resolves when shutdown is requested; pends forever if the sender is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }

        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Handle one exchange: buffer, tag, forward, capture, respond.
async fn handle(
    req: Request<Incoming>,
    upstream: reqwest::Url,
    client: reqwest::Client,
    writer: Arc<CaptureWriter>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let (mut parts, body) = req.into_parts();

    let body_bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("Failed to read request body: {}", e);
            return Ok(error_response(
                StatusCode::BAD_REQUEST,
                "failed to read request body",
            ));
        }
    };

    // Director: tag the request with the buffered body so the capture step
    // can recover it after the upstream round trip.
    if let Ok(value) = HeaderValue::from_str(&BASE64.encode(&body_bytes)) {
        parts.headers.insert(
            HeaderName::from_static(BODY_BUFFER_HEADER),
            value,
        );
    }

    let path = parts.uri.path().to_string();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.to_string())
        .unwrap_or_else(|| path.clone());

    let mut target = upstream.clone();
    target.set_path(parts.uri.path());
    target.set_query(parts.uri.query());

    let started_at = Utc::now();
    let start = Instant::now();

    let mut outbound = HeaderMap::new();
    for (name, value) in &parts.headers {
        if name.as_str() == BODY_BUFFER_HEADER || HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        outbound.append(name.clone(), value.clone());
    }

    let builder = client
        .request(parts.method.clone(), target)
        .headers(outbound)
        .body(body_bytes);

    let upstream_response = match builder.send().await {
        Ok(response) => response,
        Err(e) => {
            error!("Upstream request failed: {}", e);
            return Ok(error_response(StatusCode::BAD_GATEWAY, "upstream error"));
        }
    };

    let status = upstream_response.status();
    let response_headers = upstream_response.headers().clone();

    let response_body = match upstream_response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to read upstream response: {}", e);
            return Ok(error_response(
                StatusCode::BAD_GATEWAY,
                "failed to read upstream response",
            ));
        }
    };

    let latency_ms = start.elapsed().as_millis() as i64;

    // Capture step: recover the original body from the tagged header.
    let request_body = parts
        .headers
        .get(BODY_BUFFER_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| BASE64.decode(v).ok())
        .unwrap_or_default();

    let entry = CapturedEntry {
        timestamp: started_at,
        method: parts.method.to_string(),
        path: path_and_query,
        headers: headers_to_map(&parts.headers),
        body: BASE64.encode(&request_body),
        status: status.as_u16(),
        response_headers: headers_to_map(&response_headers),
        response_body: BASE64.encode(&response_body),
        latency_ms,
    };

    // Capture failures never abort forwarding.
    if let Err(e) = writer.append(&entry) {
        warn!("Failed to write capture record: {}", e);
    }

    let mut response = Response::builder().status(status);
    if let Some(headers) = response.headers_mut() {
        for (name, value) in &response_headers {
            if HOP_BY_HOP.contains(&name.as_str()) {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
    }

    Ok(response
        .body(Full::new(response_body))
        .unwrap_or_else(|_| error_response(StatusCode::BAD_GATEWAY, "invalid upstream response")))
}

fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(message.to_string())))
        .expect("minimal response builder should not fail")
}

/// Request headers as a replayable map, with the internal tag removed.
fn headers_to_map(headers: &HeaderMap) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();

    for (name, value) in headers {
        if name.as_str() == BODY_BUFFER_HEADER {
            continue;
        }

        if let Ok(value) = value.to_str() {
            map.entry(name.to_string())
                .or_default()
                .push(value.to_string());
        }
    }

    map
}

/// Build a TLS acceptor from PEM cert and key files. Minimum TLS 1.2.
fn tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<tokio_rustls::TlsAcceptor> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ReverbError::Tls(format!("failed to build TLS config: {}", e)))?;

    Ok(tokio_rustls::TlsAcceptor::from(Arc::new(server_config)))
}

fn load_certs(path: &Path) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| {
        ReverbError::Certificate(format!("failed to open certificate file {:?}: {}", path, e))
    })?;

    let mut reader = std::io::BufReader::new(file);
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ReverbError::Certificate(format!("failed to parse certificates: {}", e)))?;

    if certs.is_empty() {
        return Err(ReverbError::Certificate(
            "no certificates found in file".to_string(),
        ));
    }

    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|e| {
        ReverbError::Certificate(format!("failed to open key file {:?}: {}", path, e))
    })?;

    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ReverbError::Certificate(format!("failed to parse private key: {}", e)))?
        .ok_or_else(|| ReverbError::Certificate("no private key found in file".to_string()))
}
