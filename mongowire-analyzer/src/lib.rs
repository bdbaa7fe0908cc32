//! # mongowire-analyzer
//!
//! Turns captured MongoDB request traffic into operation records and
//! counters.
//!
//! This crate provides:
//! - Layered configuration (defaults, YAML, environment)
//! - Console and StatsD sinks for decoded operations
//! - Prometheus metrics with an HTTP endpoint
//! - A worker pool that drains a capture source through the parser

pub mod analyzer;
pub mod config;
pub mod error;
pub mod metrics;
pub mod sink;

pub use analyzer::{Analyzer, AnalyzerStats, StatsSnapshot};
pub use config::{
    CaptureConfig, Config, ConfigError, MetricsConfig, OutputConfig, ParserConfig, StatsdConfig,
};
pub use error::AnalyzerError;
pub use metrics::{run_metrics_server, Metrics};
pub use sink::{ConsoleSink, CounterSink, OperationEvent, RecordSink, StatsdSink};
