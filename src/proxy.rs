//! Accept loop and per-connection handler
//!
//! Each connection walks a short state machine: preread the first bytes
//! under a deadline, classify them, fingerprint and policy-check a TLS
//! ClientHello, then either close or splice to the fixed upstream with the
//! preread bytes replayed first. The policy snapshot and telemetry tables
//! are the only shared state the handler touches, and both are lock-cheap
//! in-memory structures.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::blacklist::StaticBlacklist;
use crate::config::ProxyTunables;
use crate::fingerprint::{fingerprint, FingerprintKind};
use crate::handshake::{is_tls_client_hello, ClientHello};
use crate::policy::PolicyStore;
use crate::telemetry::TelemetryAggregator;

/// Shared handles every connection handler needs
#[derive(Clone)]
struct HandlerContext {
    target: Arc<str>,
    policy: Arc<PolicyStore>,
    telemetry: Arc<TelemetryAggregator>,
    blacklist: Arc<StaticBlacklist>,
    tunables: ProxyTunables,
}

/// The listening proxy. Bind and run are separate so callers (and tests)
/// can learn the bound address before the accept loop starts.
pub struct ProxyServer {
    listener: TcpListener,
    ctx: HandlerContext,
}

impl ProxyServer {
    pub async fn bind(
        listen: SocketAddr,
        target: impl Into<Arc<str>>,
        policy: Arc<PolicyStore>,
        telemetry: Arc<TelemetryAggregator>,
        blacklist: Arc<StaticBlacklist>,
        tunables: ProxyTunables,
    ) -> Result<Self> {
        let listener = TcpListener::bind(listen)
            .await
            .with_context(|| format!("failed to bind {listen}"))?;
        Ok(Self {
            listener,
            ctx: HandlerContext {
                target: target.into(),
                policy,
                telemetry,
                blacklist,
                tunables,
            },
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("listener address")
    }

    /// Accept loop: one spawned task per connection. Accept errors are
    /// transient (fd exhaustion, aborted handshakes) and never stop the loop.
    pub async fn run(self) -> Result<()> {
        info!(
            "listening on {}, forwarding to {}",
            self.local_addr()?,
            self.ctx.target
        );
        loop {
            let (client, peer) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    warn!("failed to accept connection: {err}");
                    continue;
                }
            };
            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                handle_connection(client, peer, ctx).await;
            });
        }
    }
}

/// Per-connection state machine. Both sockets are owned here and close on
/// every return path when they drop.
async fn handle_connection(mut client: TcpStream, peer: SocketAddr, ctx: HandlerContext) {
    // PREREAD: one read, bounded in size and time. A client that sends
    // nothing useful within the deadline never reaches the upstream.
    let mut preread = vec![0u8; ctx.tunables.preread_capacity];
    let n = match timeout(ctx.tunables.preread_timeout, client.read(&mut preread)).await {
        Ok(Ok(0)) => {
            debug!("{peer} closed before sending data");
            return;
        }
        Ok(Ok(n)) => n,
        Ok(Err(err)) => {
            debug!("{peer} preread failed: {err}");
            return;
        }
        Err(_) => {
            debug!("{peer} preread timed out");
            return;
        }
    };
    preread.truncate(n);

    // CLASSIFY + policy. Anything that is not a TLS handshake prefix passes
    // through untouched; a ClientHello that will not parse is subject to the
    // fail-open tunable.
    if is_tls_client_hello(&preread) {
        match ClientHello::parse(&preread) {
            Ok(hello) => {
                if block_decision(&ctx, peer, &hello) {
                    return;
                }
            }
            Err(err) => {
                debug!("{peer} ClientHello did not parse: {err}");
                if !ctx.tunables.fail_open_on_parse {
                    debug!("{peer} dropped (fail-open disabled)");
                    return;
                }
            }
        }
    } else {
        debug!("{peer} sent non-TLS data, splicing without inspection");
    }

    // SPLICE: dial, replay the preread bytes, then shuttle both directions.
    let upstream = match timeout(
        ctx.tunables.connect_timeout,
        TcpStream::connect(ctx.target.as_ref()),
    )
    .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            warn!("{peer} upstream dial to {} failed: {err}", ctx.target);
            return;
        }
        Err(_) => {
            warn!("{peer} upstream dial to {} timed out", ctx.target);
            return;
        }
    };

    if let Err(err) = splice(client, upstream, &preread).await {
        debug!("{peer} forwarding ended: {err}");
    } else {
        debug!("{peer} connection closed");
    }
}

/// Evaluates all three fingerprint kinds in order. Returns true when the
/// connection must be dropped.
///
/// An observation for an earlier kind is recorded even when a later kind
/// blocks; the first blocking kind short-circuits the rest.
fn block_decision(ctx: &HandlerContext, peer: SocketAddr, hello: &ClientHello) -> bool {
    let set = fingerprint(hello);
    for kind in FingerprintKind::ALL {
        let fp = set.get(kind);
        ctx.telemetry.record_observation(kind, fp);
        if ctx.policy.should_block(kind, fp) || ctx.blacklist.is_blacklisted(fp) {
            ctx.telemetry.record_block(kind, fp);
            warn!("blocking {peer}: {kind} fingerprint {fp} matched policy");
            return true;
        }
    }
    debug!(
        "{peer} fingerprints ja3={} ja3n={} ja4={}",
        set.ja3, set.ja3n, set.ja4
    );
    false
}

/// Replays the preread bytes upstream, then copies both directions until
/// either side finishes. When one direction ends the other is torn down;
/// dropping the halves closes both sockets.
async fn splice(client: TcpStream, mut upstream: TcpStream, preread: &[u8]) -> std::io::Result<()> {
    upstream.write_all(preread).await?;

    let (mut client_read, mut client_write) = client.into_split();
    let (mut upstream_read, mut upstream_write) = upstream.into_split();

    let mut client_to_upstream = tokio::spawn(async move {
        tokio::io::copy(&mut client_read, &mut upstream_write).await
    });
    let mut upstream_to_client = tokio::spawn(async move {
        tokio::io::copy(&mut upstream_read, &mut client_write).await
    });

    let result = tokio::select! {
        r = &mut client_to_upstream => {
            upstream_to_client.abort();
            r
        }
        r = &mut upstream_to_client => {
            client_to_upstream.abort();
            r
        }
    };

    match result {
        Ok(Ok(_bytes)) => Ok(()),
        Ok(Err(err)) => Err(err),
        Err(join_err) => Err(std::io::Error::other(join_err)),
    }
}
