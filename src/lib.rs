//! tls-sentry - Transparent TCP proxy with TLS fingerprint policy enforcement
//!
//! A transparent proxy that:
//! - Prereads each client connection far enough to see the TLS ClientHello
//! - Computes JA3, JA3N, and JA4 fingerprints from the raw handshake bytes
//! - Consults a hot-reloaded Redis-backed policy (flags, allow/deny sets)
//! - Drops blocked connections before the upstream is ever dialed
//! - Splices everything else to a fixed upstream, byte for byte
//! - Aggregates observation and block counters in memory and flushes them
//!   to Redis in batched transactions

pub mod blacklist;
pub mod config;
pub mod control;
pub mod fingerprint;
pub mod handshake;
pub mod policy;
pub mod proxy;
pub mod store;
pub mod telemetry;

// Re-export commonly used types
pub use blacklist::StaticBlacklist;
pub use config::{ControlTunables, ProxyTunables, Settings, StoreConfig};
pub use control::ControlPlane;
pub use fingerprint::{fingerprint, FingerprintKind, FingerprintSet};
pub use handshake::{is_tls_client_hello, ClientHello, HandshakeError};
pub use policy::{FeatureFlags, PolicyLists, PolicySnapshot, PolicyStore};
pub use proxy::ProxyServer;
pub use store::StoreClient;
pub use telemetry::TelemetryAggregator;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
