//! certsift daemon.
//!
//! Runs the whole system in one process: the CT stream consumer, message
//! processor, store writer, and the HTTPS query API, wired through bounded
//! queues and shut down in order on SIGINT/SIGTERM.
//!
//! # Usage
//!
//! ```bash
//! # Run with defaults (base directory ~/.certsift)
//! certsift
//!
//! # Custom store location and batch size
//! certsift --db-path /data/certsift.db --batch-size 500
//! ```
//!
//! # Graceful Shutdown
//!
//! On SIGINT or SIGTERM:
//! 1. The HTTPS server stops accepting and drains in-flight requests
//!    against a 5-second deadline.
//! 2. The stream consumer is cancelled, closing the raw-frame queue.
//! 3. The processor drains the queue and flushes its partial batch.
//! 4. The writer drains remaining batches and commits them.
//! 5. All components are joined; the process exits 0.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use axum::http::Request;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use certsift_core::metrics::{init_metrics, start_metrics_server};
use certsift_core::{CertRecord, Config, DEFAULT_UPSTREAM_URL};
use certsift_ingest::store::{self, StoreWriter, WriterConfig};
use certsift_ingest::{Processor, StreamConfig, StreamConsumer};
use certsift_serve::{router, serve, tls, AppState};

/// Capacity of the raw-frame and record-batch queues.
const QUEUE_CAPACITY: usize = 100;

/// Deadline for draining in-flight HTTP requests on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// certsift - CT log ingestion and query daemon.
#[derive(Parser, Debug)]
#[command(name = "certsift")]
#[command(about = "Certificate Transparency stream ingestion with an HTTPS query API")]
#[command(version)]
struct Args {
    /// Base directory for data, logs, and certificates
    #[arg(long, env = "CERTSIFT_BASE_DIR")]
    base_dir: Option<PathBuf>,

    /// SQLite database file (default: <base>/data/certsift.db)
    #[arg(long, env = "CERTSIFT_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Records accumulated before a batch is written
    #[arg(long, env = "CERTSIFT_BATCH_SIZE", default_value = "1000")]
    batch_size: usize,

    /// Requests admitted per client IP per rate window
    #[arg(long, env = "CERTSIFT_RATE_LIMIT", default_value = "100")]
    rate_limit: u32,

    /// Rate window length in seconds
    #[arg(long, env = "CERTSIFT_RATE_RESET_SECS", default_value = "60")]
    rate_reset_secs: u64,

    /// HTTPS bind address
    #[arg(long, env = "CERTSIFT_BIND_ADDR", default_value = "localhost:8080")]
    bind_addr: String,

    /// Upstream CT stream websocket URL
    #[arg(long, env = "CERTSIFT_UPSTREAM_URL", default_value = DEFAULT_UPSTREAM_URL)]
    upstream_url: String,

    /// Metrics HTTP port (0 disables the metrics server)
    #[arg(long, env = "CERTSIFT_METRICS_PORT", default_value = "0")]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider before any TLS use.
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let args = Args::parse();

    let base_dir = args.base_dir.clone().unwrap_or_else(default_base_dir);
    let data_dir = base_dir.join("data");
    let log_dir = base_dir.join("logs");
    let cert_dir = base_dir.join("cert");
    for dir in [&base_dir, &data_dir, &log_dir, &cert_dir] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory {}", dir.display()))?;
    }

    init_logging(&log_dir.join("certsift.log"))?;

    let config = Config {
        db_path: args.db_path.clone().unwrap_or_else(|| data_dir.join("certsift.db")),
        batch_size: args.batch_size,
        rate_limit: args.rate_limit,
        rate_reset: Duration::from_secs(args.rate_reset_secs),
        bind_addr: args.bind_addr.clone(),
        upstream_url: args.upstream_url.clone(),
        cert_dir,
        metrics_port: args.metrics_port,
    };
    config.validate().context("invalid configuration")?;

    tracing::info!("certsift daemon starting");
    tracing::info!("  database:  {}", config.db_path.display());
    tracing::info!("  batch:     {}", config.batch_size);
    tracing::info!("  bind:      {}", config.bind_addr);
    tracing::info!("  upstream:  {}", config.upstream_url);

    // TLS material is provisioned externally; without it there is nothing
    // to serve, so this is a hard startup error.
    if !config.cert_file().exists() || !config.key_file().exists() {
        print_cert_instructions(&config.cert_dir);
        bail!("TLS material missing in {}", config.cert_dir.display());
    }

    if config.metrics_port > 0 {
        let handle = init_metrics();
        start_metrics_server(config.metrics_port, handle)
            .await
            .context("failed to start metrics server")?;
    }

    // Two connections onto one WAL database: the writer thread owns one,
    // the API handlers share the other.
    let writer_conn = store::open(&config.db_path)
        .with_context(|| format!("failed to open store at {}", config.db_path.display()))?;
    let serve_conn = store::open(&config.db_path)
        .with_context(|| format!("failed to open store at {}", config.db_path.display()))?;

    let tls_config = tls::create_server_config(&config.key_file(), &config.cert_file())
        .context("failed to load TLS material")?;
    let tls_acceptor = TlsAcceptor::from(Arc::new(tls_config));

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    // Pipeline wiring. Each stage owns its sender; channel closure is the
    // in-band end-of-stream signal, so shutdown cascades downstream.
    let (frame_tx, frame_rx) = mpsc::channel::<String>(QUEUE_CAPACITY);
    let (batch_tx, batch_rx) = crossbeam_channel::bounded::<Vec<CertRecord>>(QUEUE_CAPACITY);

    let writer_handle = StoreWriter::new(writer_conn, WriterConfig::default()).start(batch_rx);

    let processor = Processor::new(frame_rx, batch_tx, config.batch_size);
    let processor_handle = tokio::spawn(processor.run());

    let pipeline_shutdown = CancellationToken::new();
    let consumer = StreamConsumer::new(
        StreamConfig::new(&config.upstream_url),
        frame_tx,
        pipeline_shutdown.clone(),
    );
    let consumer_handle = tokio::spawn(consumer.run());

    let state = AppState::new(serve_conn, &config);
    let app = router(state).layer(
        TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
            tracing::span!(
                Level::INFO,
                "http_request",
                method = %request.method(),
                path = %request.uri().path()
            )
        }),
    );

    let server_shutdown = CancellationToken::new();
    let server_handle = tokio::spawn(serve(
        listener,
        tls_acceptor,
        app,
        server_shutdown.clone(),
        SHUTDOWN_GRACE,
    ));

    // Wait for a shutdown signal.
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("failed to register SIGINT handler")?;
    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
    }

    // Ordered shutdown: server first, then the pipeline from the top so
    // nothing upstream of the writer is closed while records are in flight.
    server_shutdown.cancel();
    if server_handle.await.is_err() {
        tracing::warn!("HTTP server task ended abnormally");
    }

    pipeline_shutdown.cancel();
    if consumer_handle.await.is_err() {
        tracing::warn!("stream consumer task ended abnormally");
    }
    if processor_handle.await.is_err() {
        tracing::warn!("message processor task ended abnormally");
    }

    let join = tokio::task::spawn_blocking(move || writer_handle.join()).await;
    match join {
        Ok(Ok(())) => {}
        _ => tracing::warn!("store writer thread ended abnormally"),
    }

    log_summary(&config.db_path);
    tracing::info!("certsift daemon stopped");

    Ok(())
}

/// `$HOME/.certsift`, or the working directory when HOME is unset.
fn default_base_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".certsift")
}

/// Stdout plus an append-only log file, both behind the env filter.
fn init_logging(log_path: &Path) -> Result<()> {
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("failed to open log file {}", log_path.display()))?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(log_file)),
        )
        .init();

    Ok(())
}

fn print_cert_instructions(cert_dir: &Path) {
    let cert_file = cert_dir.join("cert.pem");
    let key_file = cert_dir.join("key.pem");

    eprintln!("The SSL/TLS certificates were not found.");
    eprintln!("Generate them with OpenSSL:");
    eprintln!("  mkdir -p {}", cert_dir.display());
    eprintln!(
        "  openssl req -newkey rsa:2048 -nodes -keyout {} -x509 -days 365 -out {}",
        key_file.display(),
        cert_file.display()
    );
    eprintln!("Then run certsift again.");
}

fn log_summary(db_path: &Path) {
    let count = rusqlite::Connection::open(db_path)
        .and_then(|conn| conn.query_row("SELECT COUNT(*) FROM domains", [], |row| row.get::<_, i64>(0)));

    match count {
        Ok(count) => tracing::info!(domains = count, "store summary"),
        Err(e) => tracing::warn!(error = %e, "could not read store summary"),
    }
}
