//! Payload analysis: parse, then fan out to sinks and metrics.
//!
//! [`Analyzer::run`] drains a [`PayloadSource`] into a fixed pool of parse
//! workers. Payloads are dealt round-robin over bounded channels; a full
//! channel blocks the capture reader. Console lines from different workers
//! may interleave out of capture order.

use crate::error::AnalyzerError;
use crate::metrics::Metrics;
use crate::sink::{CounterSink, OperationEvent, RecordSink};
use mongowire_capture::{CapturedPayload, PayloadSource, SourceStats};
use mongowire_protocol::{
    BsonDecoder, DocumentDecoder, MessageParser, ParseOutcome, ProtocolError,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::{broadcast, mpsc};

/// Payloads queued per worker before the reader waits.
const WORKER_QUEUE_DEPTH: usize = 1024;

/// Running totals for one analyzer.
#[derive(Debug, Default)]
pub struct AnalyzerStats {
    payloads: AtomicU64,
    operations: AtomicU64,
    unhandled: AtomicU64,
    aborted: AtomicU64,
}

/// Point-in-time copy of [`AnalyzerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub payloads: u64,
    pub operations: u64,
    pub unhandled: u64,
    pub aborted: u64,
}

impl AnalyzerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            payloads: self.payloads.load(Ordering::Relaxed),
            operations: self.operations.load(Ordering::Relaxed),
            unhandled: self.unhandled.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
        }
    }
}

/// Parses payloads and reports each decoded operation.
pub struct Analyzer<D = BsonDecoder> {
    parser: MessageParser<D>,
    record_sinks: Vec<Arc<dyn RecordSink>>,
    counter_sinks: Vec<Arc<dyn CounterSink>>,
    metrics: Option<Arc<Metrics>>,
    stats: AnalyzerStats,
}

impl<D: DocumentDecoder> Analyzer<D> {
    pub fn new(parser: MessageParser<D>) -> Self {
        Self {
            parser,
            record_sinks: Vec::new(),
            counter_sinks: Vec::new(),
            metrics: None,
            stats: AnalyzerStats::default(),
        }
    }

    pub fn with_record_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.record_sinks.push(sink);
        self
    }

    pub fn with_counter_sink(mut self, sink: Arc<dyn CounterSink>) -> Self {
        self.counter_sinks.push(sink);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Parses one payload and reports a decoded operation to every sink.
    ///
    /// Unhandled opcodes and aborted parses reach no sink; they are counted
    /// and the outcome is returned to the caller.
    pub fn handle_payload(&self, payload: &[u8]) -> Result<ParseOutcome, ProtocolError> {
        self.handle(payload, None)
    }

    /// Like [`Analyzer::handle_payload`], tagging records with capture
    /// time and client address.
    pub fn handle_captured(&self, captured: &CapturedPayload) -> Result<ParseOutcome, ProtocolError> {
        self.handle(&captured.payload, Some(captured))
    }

    fn handle(
        &self,
        payload: &[u8],
        origin: Option<&CapturedPayload>,
    ) -> Result<ParseOutcome, ProtocolError> {
        self.stats.payloads.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.payloads_total.inc();
        }

        let outcome = match self.parser.parse(payload) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.stats.aborted.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.observe_aborted(e.kind());
                }
                tracing::warn!("Dropping {}-byte payload: {}", payload.len(), e);
                return Err(e);
            }
        };

        match &outcome {
            ParseOutcome::Operation { header, operation } => {
                self.stats.operations.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    "{} on {} (request {})",
                    operation.kind(),
                    operation.full_collection_name(),
                    header.request_id
                );

                if !self.record_sinks.is_empty() {
                    let event = OperationEvent {
                        captured_at: origin.map(|c| c.captured_at),
                        client: origin.map(|c| c.src),
                        kind: operation.kind(),
                        command: operation.namespace().is_command(),
                        header,
                        operation,
                    };
                    for sink in &self.record_sinks {
                        sink.record(&event);
                    }
                }

                if !self.counter_sinks.is_empty() {
                    let metric = operation.metric_name();
                    for sink in &self.counter_sinks {
                        sink.increment(&metric);
                    }
                }

                if let Some(metrics) = &self.metrics {
                    metrics.observe_operation(operation);
                }
            }
            ParseOutcome::Unhandled { header } => {
                self.stats.unhandled.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.observe_unhandled(header.op_code);
                }
                tracing::debug!("Ignoring {} payload", header.op_code);
            }
        }

        Ok(outcome)
    }
}

impl<D: DocumentDecoder + 'static> Analyzer<D> {
    /// Analyzes every payload from `source` until end of stream or shutdown.
    ///
    /// Queued payloads are still parsed after shutdown is signalled; the
    /// call returns once every worker has drained.
    pub async fn run<R>(
        self: Arc<Self>,
        mut source: PayloadSource<R>,
        workers: usize,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<SourceStats, AnalyzerError>
    where
        R: AsyncRead + Unpin,
    {
        let workers = workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for id in 0..workers {
            let (tx, mut rx) = mpsc::channel::<CapturedPayload>(WORKER_QUEUE_DEPTH);
            let analyzer = self.clone();
            handles.push(tokio::spawn(async move {
                while let Some(captured) = rx.recv().await {
                    // Failures are already counted
                    let _ = analyzer.handle_captured(&captured);
                }
                tracing::debug!("Parse worker {} drained", id);
            }));
            senders.push(tx);
        }
        tracing::info!("Analyzing with {} parse worker(s)", workers);

        let mut next = 0;
        let result = loop {
            tokio::select! {
                payload = source.next_payload() => match payload {
                    Ok(Some(captured)) => {
                        if senders[next].send(captured).await.is_err() {
                            break Err(AnalyzerError::WorkerStopped(next));
                        }
                        next = (next + 1) % workers;
                    }
                    Ok(None) => {
                        tracing::info!("Capture stream ended");
                        break Ok(());
                    }
                    Err(e) => break Err(AnalyzerError::from(e)),
                },
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown requested, stopping capture");
                    break Ok(());
                }
            }
        };

        drop(senders);
        for (id, handle) in handles.into_iter().enumerate() {
            if let Err(e) = handle.await {
                tracing::error!("Parse worker {} failed: {}", id, e);
            }
        }

        result.map(|_| source.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use bytes::BufMut;
    use chrono::Utc;
    use mongowire_capture::{encode_ethernet_tcp, LinkType, PcapWriter};
    use mongowire_protocol::{
        encode_message, DocumentField, InsertOperation, MessageHeader, OpCode, Operation,
        QueryOperation, UpdateOperation,
    };
    use parking_lot::Mutex;
    use std::net::SocketAddrV4;
    use tokio::io::AsyncWriteExt;

    #[derive(Default)]
    struct Recorder {
        counters: Mutex<Vec<String>>,
        records: Mutex<Vec<String>>,
    }

    impl CounterSink for Recorder {
        fn increment(&self, metric: &str) {
            self.counters.lock().push(metric.to_string());
        }
    }

    impl RecordSink for Recorder {
        fn record(&self, event: &OperationEvent<'_>) {
            self.records
                .lock()
                .push(serde_json::to_string(event).unwrap());
        }
    }

    fn analyzer_with(recorder: &Arc<Recorder>) -> Analyzer {
        Analyzer::new(MessageParser::new())
            .with_record_sink(recorder.clone())
            .with_counter_sink(recorder.clone())
    }

    fn query_message() -> Vec<u8> {
        let mut query = Vec::new();
        doc! { "a": 1 }.to_writer(&mut query).unwrap();

        let mut body = Vec::new();
        body.put_u32_le(0);
        body.put_slice(b"test.coll\0");
        body.put_u32_le(0);
        body.put_i32_le(1);
        body.put_slice(&query);

        let mut buf = Vec::new();
        MessageHeader {
            message_length: (16 + body.len()) as i32,
            request_id: 7,
            response_to: 0,
            op_code: OpCode::Query,
        }
        .write(&mut buf);
        buf.put_slice(&body);
        buf
    }

    fn insert(name: &str, n: i32) -> Vec<u8> {
        let op = Operation::Insert(InsertOperation {
            flags: 0,
            full_collection_name: name.to_string(),
            documents: vec![doc! { "n": n }],
            malformed: 0,
        });
        encode_message(n as u32, &op).unwrap().to_vec()
    }

    #[test]
    fn test_query_reaches_every_sink() {
        let recorder = Arc::new(Recorder::default());
        let metrics = Arc::new(Metrics::new().unwrap());
        let analyzer = analyzer_with(&recorder).with_metrics(metrics.clone());

        let outcome = analyzer.handle_payload(&query_message()).unwrap();
        let op = outcome.operation().unwrap();
        assert_eq!(op.full_collection_name(), "test.coll");

        assert_eq!(*recorder.counters.lock(), vec!["query.test.coll"]);
        let records = recorder.records.lock();
        assert_eq!(records.len(), 1);
        assert!(records[0].contains("\"kind\":\"query\""));
        assert!(records[0].contains("\"number_to_return\":1"));

        assert_eq!(
            metrics
                .operations_total
                .with_label_values(&["query", "test.coll"])
                .get(),
            1.0
        );
        assert_eq!(
            analyzer.stats(),
            StatsSnapshot {
                payloads: 1,
                operations: 1,
                unhandled: 0,
                aborted: 0,
            }
        );
    }

    #[test]
    fn test_unhandled_opcode_reaches_no_sink() {
        let recorder = Arc::new(Recorder::default());
        let analyzer = analyzer_with(&recorder);

        let mut buf = query_message();
        buf[12..16].copy_from_slice(&2013u32.to_le_bytes());
        let outcome = analyzer.handle_payload(&buf).unwrap();

        assert!(matches!(outcome, ParseOutcome::Unhandled { .. }));
        assert!(recorder.counters.lock().is_empty());
        assert!(recorder.records.lock().is_empty());
        assert_eq!(analyzer.stats().unhandled, 1);
    }

    #[test]
    fn test_truncated_payload_reaches_no_sink() {
        let recorder = Arc::new(Recorder::default());
        let metrics = Arc::new(Metrics::new().unwrap());
        let analyzer = analyzer_with(&recorder).with_metrics(metrics.clone());

        assert!(analyzer.handle_payload(&[0u8; 10]).is_err());

        // Header intact, collection name cut short
        let full = query_message();
        assert!(analyzer.handle_payload(&full[..20]).is_err());

        assert!(recorder.counters.lock().is_empty());
        assert_eq!(analyzer.stats().aborted, 2);
        assert_eq!(
            metrics
                .parse_aborted_total
                .with_label_values(&["truncated"])
                .get(),
            2.0
        );
    }

    #[test]
    fn test_partial_update_is_reported() {
        let recorder = Arc::new(Recorder::default());
        let analyzer = analyzer_with(&recorder);

        let op = Operation::Update(UpdateOperation {
            full_collection_name: "shop.carts".into(),
            flags: 0,
            selector: Some(DocumentField::Decoded(doc! { "_id": 1 })),
            update: Some(DocumentField::Decoded(doc! { "$set": { "paid": true } })),
        });
        let encoded = encode_message(1, &op).unwrap();
        // Drop the update document's tail
        let cut = &encoded[..encoded.len() - 4];

        let outcome = analyzer.handle_payload(cut).unwrap();
        match outcome.into_operation().unwrap() {
            Operation::Update(update) => {
                assert!(update.selector.is_some());
                assert!(update.update.is_none());
            }
            other => panic!("unexpected operation {:?}", other),
        }
        assert_eq!(*recorder.counters.lock(), vec!["update.shop.carts"]);
    }

    #[test]
    fn test_query_without_selector_option() {
        let recorder = Arc::new(Recorder::default());
        let analyzer = Analyzer::new(MessageParser::new().with_return_fields_selector(false))
            .with_counter_sink(recorder.clone());

        let op = Operation::Query(QueryOperation {
            flags: 0,
            full_collection_name: "test.coll".into(),
            number_to_skip: 0,
            number_to_return: 0,
            query: Some(DocumentField::Decoded(doc! {})),
            return_fields_selector: Some(DocumentField::Decoded(doc! { "x": 1 })),
        });
        let encoded = encode_message(5, &op).unwrap();
        match analyzer.handle_payload(&encoded).unwrap().into_operation() {
            Some(Operation::Query(query)) => assert!(query.return_fields_selector.is_none()),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_command_namespace_is_tagged() {
        let recorder = Arc::new(Recorder::default());
        let analyzer = analyzer_with(&recorder);

        let command = Operation::Query(QueryOperation {
            flags: 0,
            full_collection_name: "admin.$cmd".into(),
            number_to_skip: 0,
            number_to_return: -1,
            query: Some(DocumentField::Decoded(doc! { "ping": 1 })),
            return_fields_selector: None,
        });
        analyzer
            .handle_payload(&encode_message(1, &command).unwrap())
            .unwrap();
        analyzer.handle_payload(&query_message()).unwrap();

        let records = recorder.records.lock();
        assert_eq!(records.len(), 2);
        assert!(records[0].contains("\"command\":true"));
        assert!(!records[1].contains("\"command\""));
        assert_eq!(
            *recorder.counters.lock(),
            vec!["query.admin.$cmd", "query.test.coll"]
        );
    }

    #[tokio::test]
    async fn test_run_over_capture() {
        let client: SocketAddrV4 = "10.0.0.2:50000".parse().unwrap();
        let server: SocketAddrV4 = "10.0.0.3:27017".parse().unwrap();
        let now = Utc::now();

        let mut writer = PcapWriter::new(LinkType::Ethernet);
        for n in 0..10 {
            let name = if n % 2 == 0 { "app.users" } else { "app.events" };
            writer.push(now, &encode_ethernet_tcp(client, server, &insert(name, n)));
        }
        writer.push(now, &encode_ethernet_tcp(client, server, &query_message()));
        // Reply direction and garbage are not counted as operations
        writer.push(now, &encode_ethernet_tcp(server, client, &insert("app.users", 99)));
        writer.push(now, &encode_ethernet_tcp(client, server, b"\x01\x02"));
        let capture = writer.finish();

        let recorder = Arc::new(Recorder::default());
        let analyzer = Arc::new(analyzer_with(&recorder));
        let source = PayloadSource::open(&capture[..], 27017).await.unwrap();
        let (_tx, rx) = broadcast::channel(1);

        let stats = analyzer.clone().run(source, 3, rx).await.unwrap();
        assert_eq!(stats.frames, 13);
        assert_eq!(stats.matched, 12);

        let mut counters = recorder.counters.lock().clone();
        counters.sort();
        let users = counters.iter().filter(|c| *c == "insert.app.users").count();
        let events = counters.iter().filter(|c| *c == "insert.app.events").count();
        assert_eq!(users, 5);
        assert_eq!(events, 5);
        assert!(counters.contains(&"query.test.coll".to_string()));
        assert_eq!(counters.len(), 11);

        let snapshot = analyzer.stats();
        assert_eq!(snapshot.payloads, 12);
        assert_eq!(snapshot.operations, 11);
        assert_eq!(snapshot.aborted, 1);

        // Records carry the client address
        assert!(recorder.records.lock()[0].contains("10.0.0.2:50000"));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (mut feed, reader) = tokio::io::duplex(4096);
        feed.write_all(&PcapWriter::new(LinkType::Raw).finish())
            .await
            .unwrap();

        let analyzer = Arc::new(Analyzer::new(MessageParser::new()));
        let source = PayloadSource::open(reader, 27017).await.unwrap();
        let (tx, rx) = broadcast::channel(1);
        tx.send(()).unwrap();

        // The feed stays open; only shutdown ends the run
        let stats = analyzer.run(source, 2, rx).await.unwrap();
        assert_eq!(stats.frames, 0);
        drop(feed);
    }
}
