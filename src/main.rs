//! mongowire - passive MongoDB wire analyzer
//!
//! Reads a pcap stream, decodes update/insert/query requests sent to the
//! server port and reports them to the configured sinks.

use clap::Parser;
use mongowire_analyzer::{
    run_metrics_server, Analyzer, Config, ConsoleSink, Metrics, StatsdSink,
};
use mongowire_capture::PayloadSource;
use mongowire_protocol::MessageParser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mongowire")]
#[command(about = "Count MongoDB operations per collection from captured traffic")]
#[command(version)]
struct Cli {
    /// pcap file to read, or "-" for stdin (e.g. `tcpdump -w - port 27017`)
    #[arg(long, env = "MONGOWIRE_SOURCE")]
    pcap: Option<String>,

    /// MongoDB server port
    #[arg(long)]
    port: Option<u16>,

    /// Print every decoded operation as a JSON line
    #[arg(long)]
    stdout: bool,

    /// StatsD host; enables counter export
    #[arg(long)]
    statsd: Option<String>,

    /// StatsD port
    #[arg(long)]
    statsd_port: Option<u16>,

    /// Counter name prefix
    #[arg(long)]
    statsd_prefix: Option<String>,

    /// YAML configuration file
    #[arg(short, long, env = "MONGOWIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,

    /// Parse worker count
    #[arg(long)]
    workers: Option<usize>,

    /// Skip the optional field selector of queries
    #[arg(long)]
    no_return_fields_selector: bool,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if let Some(source) = self.pcap {
            config.capture.source = source;
        }
        if let Some(port) = self.port {
            config.capture.port = port;
        }
        if self.stdout {
            config.output.stdout = true;
        }
        if let Some(host) = self.statsd {
            config.statsd.enabled = true;
            config.statsd.host = host;
        }
        if let Some(port) = self.statsd_port {
            config.statsd.port = port;
        }
        if let Some(prefix) = self.statsd_prefix {
            config.statsd.prefix = prefix;
        }
        if let Some(addr) = self.metrics_addr {
            config.metrics.enabled = true;
            config.metrics.bind_addr = addr;
        }
        if let Some(workers) = self.workers {
            config.parser.workers = workers;
        }
        if self.no_return_fields_selector {
            config.parser.return_fields_selector = false;
        }
    }
}

type CaptureInput = Box<dyn AsyncRead + Unpin + Send>;

async fn open_input(config: &Config) -> std::io::Result<CaptureInput> {
    if config.capture.is_stdin() {
        tracing::info!("  Source: stdin");
        Ok(Box::new(tokio::io::stdin()))
    } else {
        tracing::info!("  Source: {}", config.capture.source);
        let file = tokio::fs::File::open(&config.capture.source).await?;
        Ok(Box::new(tokio::io::BufReader::new(file)))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout carries operation records
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match Config::load_from(cli.config.as_deref()) {
        Ok(c) => {
            if let Some(path) = &cli.config {
                tracing::info!("Loaded config from {}", path.display());
            }
            c
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };
    cli.apply(&mut config);

    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        return Err(e.into());
    }

    tracing::info!("Starting mongowire");
    tracing::info!("  Server port: {}", config.capture.port);
    tracing::info!("  Parse workers: {}", config.parser.workers);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let parser =
        MessageParser::new().with_return_fields_selector(config.parser.return_fields_selector);
    let mut analyzer = Analyzer::new(parser);

    if config.output.stdout {
        analyzer = analyzer.with_record_sink(Arc::new(ConsoleSink::stdout()));
    }
    if config.statsd.enabled {
        let sink = StatsdSink::connect(
            &config.statsd.host,
            config.statsd.port,
            config.statsd.prefix.clone(),
        )?;
        analyzer = analyzer.with_counter_sink(Arc::new(sink));
    }

    let metrics_handle = if config.metrics.enabled {
        let metrics = Arc::new(Metrics::new()?);
        analyzer = analyzer.with_metrics(metrics.clone());
        let addr = config.metrics.bind_addr;
        let shutdown = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = run_metrics_server(addr, metrics, shutdown).await {
                tracing::error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    if !config.output.stdout && !config.statsd.enabled && !config.metrics.enabled {
        tracing::warn!("No output configured; use --stdout, --statsd or --metrics-addr");
    }

    let input = open_input(&config).await?;
    let source = PayloadSource::open(input, config.capture.port).await?;
    tracing::info!("  Link type: {:?}", source.link_type());

    // Spawn shutdown signal handler
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping capture...");
        let _ = signal_tx.send(());
    });

    let analyzer = Arc::new(analyzer);
    let result = analyzer
        .clone()
        .run(source, config.parser.workers, shutdown_tx.subscribe())
        .await;

    // Stop the metrics server once the capture is done
    let _ = shutdown_tx.send(());
    if let Some(handle) = metrics_handle {
        let _ = handle.await;
    }

    let source_stats = result?;
    let stats = analyzer.stats();
    tracing::info!(
        "Frames: {} read, {} to port {}, {} malformed",
        source_stats.frames,
        source_stats.matched,
        config.capture.port,
        source_stats.malformed
    );
    tracing::info!(
        "Payloads: {} parsed, {} operations, {} other opcodes, {} aborted",
        stats.payloads,
        stats.operations,
        stats.unhandled,
        stats.aborted
    );
    Ok(())
}
