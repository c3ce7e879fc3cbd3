//! Runtime settings for the data plane and the control plane
//!
//! Everything tunable lives here with its production default; the CLI only
//! overrides the endpoint-shaped values (listen port, upstream target, Redis
//! address/credentials). Intervals and timeouts keep their defaults unless a
//! deployment has a reason to patch them programmatically.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level settings assembled by the binary from CLI flags
#[derive(Debug, Clone)]
pub struct Settings {
    /// Local TCP listen address
    pub listen: SocketAddr,
    /// Fixed upstream `host:port` every spliced connection is forwarded to
    pub target: String,
    /// Optional file-backed static deny list, one fingerprint per line
    pub blacklist_file: Option<PathBuf>,
    /// Key/value store endpoint and timeouts
    pub store: StoreConfig,
    /// Per-connection data plane tunables
    pub proxy: ProxyTunables,
    /// Background task cadence
    pub control: ControlTunables,
}

/// Key/value store connection settings
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Store endpoint (`host:port`)
    pub addr: String,
    /// Store password, empty for none
    pub password: String,
    /// Logical database number
    pub db: i64,
    /// Dial timeout for the initial connection
    pub connect_timeout: Duration,
    /// Timeout applied to read-shaped commands (GET, SMEMBERS, PING)
    pub read_timeout: Duration,
    /// Timeout applied to write-shaped commands (SET, pipelines, ZREM)
    pub write_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:6379".to_string(),
            password: String::new(),
            db: 0,
            connect_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(2),
        }
    }
}

/// Data plane tunables for the per-connection handler
#[derive(Debug, Clone)]
pub struct ProxyTunables {
    /// Preread buffer capacity; one full ClientHello record fits comfortably
    pub preread_capacity: usize,
    /// Deadline for the handshake preread, measured from accept
    pub preread_timeout: Duration,
    /// Upstream dial timeout
    pub connect_timeout: Duration,
    /// Splice (instead of drop) connections whose ClientHello fails
    /// structural parsing
    pub fail_open_on_parse: bool,
}

impl Default for ProxyTunables {
    fn default() -> Self {
        Self {
            preread_capacity: 8192,
            preread_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(5),
            fail_open_on_parse: true,
        }
    }
}

/// Cadence of the background control plane tasks
#[derive(Debug, Clone)]
pub struct ControlTunables {
    /// Policy refresh period (flags + lists, plus availability probing)
    pub refresh_interval: Duration,
    /// Observation table flush period
    pub observation_flush_interval: Duration,
    /// Block event table flush period
    pub block_flush_interval: Duration,
    /// Stale fingerprint cleanup period
    pub gc_interval: Duration,
    /// Observations older than this are removed by the cleanup task
    pub expire_after: Duration,
}

impl Default for ControlTunables {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(10),
            observation_flush_interval: Duration::from_secs(5),
            block_flush_interval: Duration::from_secs(5),
            gc_interval: Duration::from_secs(6 * 3600),
            expire_after: Duration::from_secs(8 * 3600),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 443)),
            target: "127.0.0.1:8443".to_string(),
            blacklist_file: None,
            store: StoreConfig::default(),
            proxy: ProxyTunables::default(),
            control: ControlTunables::default(),
        }
    }
}
