//! Prometheus metrics for the analyzer.
//!
//! This module provides:
//! - Metrics registry with operation, payload and failure counters
//! - HTTP server to expose metrics at `/metrics` endpoint

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use mongowire_protocol::{OpCode, Operation};
use parking_lot::Mutex;
use prometheus::{Counter, CounterVec, Encoder, Opts, Registry, TextEncoder};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Distinct `collection` label values before new names share one series.
pub const MAX_COLLECTION_LABELS: usize = 256;

/// Label for collections seen after the cap is reached.
pub const OVERFLOW_COLLECTION_LABEL: &str = "other";

/// Prometheus metrics for the analyzer.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Payloads handed to the parser.
    pub payloads_total: Counter,
    /// Decoded operations by kind and collection.
    pub operations_total: CounterVec,
    /// Documents that failed to decode, by operation kind.
    pub malformed_documents_total: CounterVec,
    /// Payloads abandoned mid-parse, by reason.
    pub parse_aborted_total: CounterVec,
    /// Payloads whose opcode is not assembled, by opcode name.
    pub unhandled_opcodes_total: CounterVec,
    collection_labels: Arc<Mutex<HashSet<String>>>,
}

impl Metrics {
    /// Creates a new Metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let payloads_total = Counter::with_opts(Opts::new(
            "mongowire_payloads_total",
            "Total TCP payloads parsed",
        ))?;
        registry.register(Box::new(payloads_total.clone()))?;

        let operations_total = CounterVec::new(
            Opts::new(
                "mongowire_operations_total",
                "Decoded operations by kind and collection",
            ),
            &["kind", "collection"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let malformed_documents_total = CounterVec::new(
            Opts::new(
                "mongowire_malformed_documents_total",
                "Documents that failed to decode by operation kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(malformed_documents_total.clone()))?;

        let parse_aborted_total = CounterVec::new(
            Opts::new(
                "mongowire_parse_aborted_total",
                "Payloads abandoned before a full header or name was read",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(parse_aborted_total.clone()))?;

        let unhandled_opcodes_total = CounterVec::new(
            Opts::new(
                "mongowire_unhandled_opcodes_total",
                "Payloads with an opcode other than update, insert or query",
            ),
            &["opcode"],
        )?;
        registry.register(Box::new(unhandled_opcodes_total.clone()))?;

        Ok(Self {
            registry,
            payloads_total,
            operations_total,
            malformed_documents_total,
            parse_aborted_total,
            unhandled_opcodes_total,
            collection_labels: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Counts one decoded operation.
    pub fn observe_operation(&self, operation: &Operation) {
        let kind = operation.kind();
        let collection = self.collection_label(operation.full_collection_name());
        self.operations_total
            .with_label_values(&[kind.as_str(), &collection])
            .inc();

        let malformed = malformed_documents(operation);
        if malformed > 0 {
            self.malformed_documents_total
                .with_label_values(&[kind.as_str()])
                .inc_by(malformed as f64);
        }
    }

    /// Maps a collection name to its label, admitting new names until the
    /// cap is reached.
    fn collection_label(&self, name: &str) -> String {
        let mut labels = self.collection_labels.lock();
        if labels.contains(name) {
            return name.to_string();
        }
        if labels.len() < MAX_COLLECTION_LABELS {
            labels.insert(name.to_string());
            return name.to_string();
        }
        OVERFLOW_COLLECTION_LABEL.to_string()
    }

    pub fn observe_unhandled(&self, op_code: OpCode) {
        // Unknown codes collapse into one series
        let label = match op_code {
            OpCode::Unknown(_) => "UNKNOWN",
            known => known.name(),
        };
        self.unhandled_opcodes_total
            .with_label_values(&[label])
            .inc();
    }

    pub fn observe_aborted(&self, reason: &str) {
        self.parse_aborted_total.with_label_values(&[reason]).inc();
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
        }
        buffer
    }

    /// Returns a reference to the registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

fn malformed_documents(operation: &Operation) -> usize {
    let field = |f: &Option<mongowire_protocol::DocumentField>| {
        f.as_ref().map_or(0, |f| f.is_malformed() as usize)
    };
    match operation {
        Operation::Update(op) => field(&op.selector) + field(&op.update),
        Operation::Insert(op) => op.malformed,
        Operation::Query(op) => field(&op.query) + field(&op.return_fields_selector),
    }
}

/// Runs the HTTP metrics server.
///
/// The server listens on the given address and serves metrics at `/metrics`.
pub async fn run_metrics_server(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let metrics = metrics.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                async move { handle_request(req, metrics).await }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                tracing::debug!("Metrics connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Metrics server accept error: {}", e);
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Metrics server shutting down");
                break;
            }
        }
    }

    Ok(())
}

fn response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Handles an HTTP request to the metrics server.
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    Ok(route(req.uri().path(), &metrics))
}

fn route(path: &str, metrics: &Metrics) -> Response<Full<Bytes>> {
    match path {
        "/metrics" => response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            metrics.encode(),
        ),
        "/health" | "/healthz" => response(StatusCode::OK, "text/plain", "OK"),
        "/" => response(
            StatusCode::OK,
            "text/html",
            r#"<!DOCTYPE html>
<html>
<head><title>mongowire Metrics</title></head>
<body>
<h1>mongowire Metrics</h1>
<p><a href="/metrics">Metrics</a></p>
</body>
</html>"#,
        ),
        _ => response(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    }
}
