//! tls-sentry binary: CLI parsing, logging setup, task wiring
//!
//! The data plane (accept loop + per-connection handlers) and the control
//! plane (policy refresh + telemetry flush + cleanup) are built here from
//! CLI flags and run until the process is signalled.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tls_sentry::{
    ControlPlane, PolicyStore, ProxyServer, Settings, StaticBlacklist, StoreClient,
    TelemetryAggregator,
};

/// Transparent TCP proxy with TLS fingerprint policy enforcement
#[derive(Parser, Debug)]
#[command(name = "tls-sentry")]
#[command(version, about, long_about = None)]
struct Args {
    /// Local TCP port to listen on
    #[arg(long, default_value_t = 443, env = "TLS_SENTRY_LISTEN")]
    listen: u16,

    /// Upstream host:port every spliced connection is forwarded to
    #[arg(long, default_value = "127.0.0.1:8443", env = "TLS_SENTRY_TARGET")]
    target: String,

    /// Key/value store endpoint (host:port)
    #[arg(long, default_value = "127.0.0.1:6379", env = "TLS_SENTRY_REDIS_ADDR")]
    redis_addr: String,

    /// Key/value store password
    #[arg(long, default_value = "", env = "TLS_SENTRY_REDIS_PASS")]
    redis_pass: String,

    /// Key/value store logical database
    #[arg(long, default_value_t = 0, env = "TLS_SENTRY_REDIS_DB")]
    redis_db: i64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "TLS_SENTRY_LOG_LEVEL")]
    log_level: String,

    /// Optional static deny list file, one fingerprint per line
    #[arg(long, env = "TLS_SENTRY_BLACKLIST_FILE")]
    blacklist_file: Option<PathBuf>,
}

impl Args {
    fn into_settings(self) -> Settings {
        let mut settings = Settings {
            listen: SocketAddr::from(([0, 0, 0, 0], self.listen)),
            target: self.target,
            blacklist_file: self.blacklist_file,
            ..Settings::default()
        };
        settings.store.addr = self.redis_addr;
        settings.store.password = self.redis_pass;
        settings.store.db = self.redis_db;
        settings
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Invoked bare, print usage instead of silently binding port 443.
    if std::env::args().len() == 1 {
        Args::command().print_help()?;
        return Ok(());
    }

    let args = Args::parse();
    init_logging(&args.log_level);

    info!("starting tls-sentry v{}", env!("CARGO_PKG_VERSION"));
    let settings = args.into_settings();

    // Data plane state: policy snapshot, telemetry tables, static deny list.
    // All of it works without the store; the control plane fills it in.
    let policy = Arc::new(PolicyStore::new());
    let telemetry = Arc::new(TelemetryAggregator::new(policy.clone()));
    let blacklist = Arc::new(load_blacklist(&settings));

    // Control plane: store client plus the background tasks.
    let store = StoreClient::new(settings.store.clone())?;
    let control = Arc::new(ControlPlane::new(
        store,
        policy.clone(),
        telemetry.clone(),
        settings.control.clone(),
    ));
    let _control_tasks = control.spawn();
    info!("control plane started (store at {})", settings.store.addr);

    let server = ProxyServer::bind(
        settings.listen,
        settings.target.clone(),
        policy,
        telemetry,
        blacklist,
        settings.proxy.clone(),
    )
    .await?;

    tokio::select! {
        result = server.run() => result,
        _ = signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down");
            Ok(())
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal, shutting down");
            Ok(())
        }
    }
}

fn load_blacklist(settings: &Settings) -> StaticBlacklist {
    let Some(path) = settings.blacklist_file.as_deref() else {
        return StaticBlacklist::default();
    };
    match StaticBlacklist::load(path) {
        Ok(list) => list,
        Err(err) => {
            warn!("static blacklist unavailable, continuing without it: {err:#}");
            StaticBlacklist::default()
        }
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
}

/// Wait for OS shutdown signal
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    sigterm.recv().await;
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    std::future::pending::<()>().await;
}
