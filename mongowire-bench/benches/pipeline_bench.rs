//! Capture-to-counter pipeline benchmarks.

use bson::doc;
use bytes::Bytes;
use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mongowire_analyzer::{Analyzer, CounterSink};
use mongowire_capture::{encode_ethernet_tcp, LinkType, PayloadSource, PcapWriter};
use mongowire_protocol::{encode_message, InsertOperation, MessageParser, Operation};
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::sync::broadcast;

#[derive(Default)]
struct CountingSink(AtomicU64);

impl CounterSink for CountingSink {
    fn increment(&self, _metric: &str) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

fn create_capture(messages: usize) -> Bytes {
    let client: SocketAddrV4 = "10.0.0.2:50000".parse().unwrap();
    let server: SocketAddrV4 = "10.0.0.3:27017".parse().unwrap();
    let now = Utc::now();

    let mut writer = PcapWriter::new(LinkType::Ethernet);
    for n in 0..messages {
        let op = Operation::Insert(InsertOperation {
            flags: 0,
            full_collection_name: format!("bench.c{}", n % 8),
            documents: vec![doc! { "n": n as i64, "data": "x".repeat(200) }],
            malformed: 0,
        });
        let message = encode_message(n as u32, &op).unwrap();
        writer.push(now, &encode_ethernet_tcp(client, server, &message));
    }
    writer.finish()
}

fn bench_pcap_read(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let capture = create_capture(1000);

    let mut group = c.benchmark_group("pcap_read");
    group.throughput(Throughput::Bytes(capture.len() as u64));
    group.bench_function("1000_frames", |b| {
        b.to_async(&rt).iter(|| async {
            let mut source = PayloadSource::open(&capture[..], 27017).await.unwrap();
            while let Some(payload) = source.next_payload().await.unwrap() {
                black_box(payload);
            }
        });
    });
    group.finish();
}

fn bench_pipeline_workers(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let capture = create_capture(1000);

    let mut group = c.benchmark_group("pipeline");
    group.throughput(Throughput::Elements(1000));

    for workers in [1, 2, 4] {
        group.bench_with_input(
            BenchmarkId::from_parameter(workers),
            &workers,
            |b, &workers| {
                b.to_async(&rt).iter(|| async {
                    let sink = Arc::new(CountingSink::default());
                    let analyzer =
                        Arc::new(Analyzer::new(MessageParser::new()).with_counter_sink(sink.clone()));
                    let source = PayloadSource::open(&capture[..], 27017).await.unwrap();
                    let (_tx, rx) = broadcast::channel(1);
                    analyzer.run(source, workers, rx).await.unwrap();
                    black_box(sink.0.load(Ordering::Relaxed))
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_pcap_read, bench_pipeline_workers);
criterion_main!(benches);
