//! Output sinks for decoded operations.
//!
//! A [`RecordSink`] receives the full decoded operation; a [`CounterSink`]
//! receives only its metric name. Both are shared across parse workers.

use crate::error::AnalyzerError;
use chrono::{DateTime, Utc};
use mongowire_protocol::{MessageHeader, Operation, OperationKind};
use parking_lot::Mutex;
use serde::Serialize;
use std::io::Write;
use std::net::{SocketAddrV4, UdpSocket};

/// One decoded operation with where and when it was seen.
#[derive(Debug, Serialize)]
pub struct OperationEvent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<SocketAddrV4>,
    pub kind: OperationKind,
    /// Set for `<db>.$cmd` namespaces.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub command: bool,
    pub header: &'a MessageHeader,
    pub operation: &'a Operation,
}

/// Receives every decoded operation.
pub trait RecordSink: Send + Sync {
    fn record(&self, event: &OperationEvent<'_>);
}

/// Receives one increment per decoded operation.
pub trait CounterSink: Send + Sync {
    fn increment(&self, metric: &str);
}

/// Writes each operation as one JSON line.
pub struct ConsoleSink<W> {
    out: Mutex<W>,
}

impl ConsoleSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write + Send> RecordSink for ConsoleSink<W> {
    fn record(&self, event: &OperationEvent<'_>) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("failed to serialize {} operation: {}", event.kind, e);
                return;
            }
        };
        let mut out = self.out.lock();
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            tracing::warn!("console write failed: {}", e);
        }
    }
}

/// Sends `<prefix>.<metric>:1|c` datagrams to a StatsD daemon.
pub struct StatsdSink {
    socket: UdpSocket,
    prefix: String,
}

impl StatsdSink {
    /// Binds an ephemeral local port and targets `host:port`.
    pub fn connect(host: &str, port: u16, prefix: impl Into<String>) -> Result<Self, AnalyzerError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket
            .connect((host, port))
            .map_err(|e| AnalyzerError::Sink(format!("statsd {}:{}: {}", host, port, e)))?;
        socket.set_nonblocking(true)?;
        tracing::info!("Sending counters to statsd at {}:{}", host, port);
        Ok(Self {
            socket,
            prefix: prefix.into(),
        })
    }

    pub fn line(&self, metric: &str) -> String {
        if self.prefix.is_empty() {
            format!("{}:1|c", metric)
        } else {
            format!("{}.{}:1|c", self.prefix, metric)
        }
    }
}

impl CounterSink for StatsdSink {
    fn increment(&self, metric: &str) {
        // Fire and forget; a dropped datagram loses one count
        if let Err(e) = self.socket.send(self.line(metric).as_bytes()) {
            tracing::debug!("statsd send failed: {}", e);
        }
    }
}
