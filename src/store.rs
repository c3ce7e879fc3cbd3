//! Narrow adapter over the Redis key/value store
//!
//! The rest of the crate never sees a Redis type; it sees six operations
//! shaped after the policy/telemetry schema:
//!
//! | key | shape |
//! |---|---|
//! | `config:{v}_*_enabled` | string "true"/"false" flags |
//! | `{v}:blacklist` / `{v}:whitelist` | sets of fingerprints |
//! | `{v}:count` | zset score=count member=fp |
//! | `{v}:last_seen` | zset score=unix-seconds member=fp |
//! | `{v}:collected` | set of distinct fingerprints |
//! | `{v}:blocked:{fp}` | hash field=second-bucket value=count |
//!
//! Every command runs under its configured timeout; a timeout is an error
//! like any other, and the caller decides what availability means.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::config::StoreConfig;
use crate::fingerprint::FingerprintKind;
use crate::telemetry::{BlockCounts, ObservationCounts};

/// Async Redis client with lazy connection establishment.
///
/// The manager reconnects by itself once it exists; the only case handled
/// here is the store being down at process start, where construction of the
/// manager is retried on the next operation.
pub struct StoreClient {
    client: redis::Client,
    conn: Mutex<Option<ConnectionManager>>,
    config: StoreConfig,
}

impl StoreClient {
    /// Builds the client without touching the network.
    pub fn new(config: StoreConfig) -> Result<Self> {
        let url = if config.password.is_empty() {
            format!("redis://{}/{}", config.addr, config.db)
        } else {
            format!("redis://:{}@{}/{}", config.password, config.addr, config.db)
        };
        let client = redis::Client::open(url).context("invalid store address")?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
            config,
        })
    }

    async fn manager(&self) -> Result<ConnectionManager> {
        let mut guard = self.conn.lock().await;
        if let Some(manager) = guard.as_ref() {
            return Ok(manager.clone());
        }
        let manager = timeout(
            self.config.connect_timeout,
            self.client.get_connection_manager(),
        )
        .await
        .context("store dial timed out")?
        .context("store dial failed")?;
        *guard = Some(manager.clone());
        Ok(manager)
    }

    async fn run<T, F>(&self, limit: Duration, what: &'static str, op: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        timeout(limit, op)
            .await
            .with_context(|| format!("{what} timed out"))?
            .with_context(|| format!("{what} failed"))
    }

    /// Availability probe.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.manager().await?;
        self.run(self.config.read_timeout, "PING", async move {
            redis::cmd("PING").query_async(&mut conn).await
        })
        .await
    }

    /// Reads one boolean flag key.
    ///
    /// A missing key is not an error: the default is written back so the
    /// store self-provisions its schema, and the default stays in effect.
    pub async fn flag(&self, key: &str, default: bool) -> Result<bool> {
        let mut conn = self.manager().await?;
        let value: Option<String> = self
            .run(self.config.read_timeout, "flag GET", async {
                conn.get(key).await
            })
            .await?;
        match value.as_deref() {
            Some(v) => Ok(v == "true"),
            None => {
                let default_str = if default { "true" } else { "false" };
                let mut conn = self.manager().await?;
                let key = key.to_string();
                self.run(self.config.write_timeout, "flag SET", async move {
                    conn.set::<_, _, ()>(key, default_str).await
                })
                .await?;
                Ok(default)
            }
        }
    }

    /// Reads a whole fingerprint set (`{v}:blacklist` / `{v}:whitelist`).
    pub async fn set_members(&self, key: &str) -> Result<HashSet<String>> {
        let mut conn = self.manager().await?;
        self.run(self.config.read_timeout, "SMEMBERS", async {
            conn.smembers(key).await
        })
        .await
    }

    /// Writes one kind's drained observation counts in a single atomic
    /// pipeline: count increment, last-seen refresh, and distinct-set add
    /// per fingerprint.
    pub async fn flush_observations(
        &self,
        kind: FingerprintKind,
        counts: &ObservationCounts,
        now_unix: i64,
    ) -> Result<()> {
        if counts.is_empty() {
            return Ok(());
        }
        let prefix = kind.key_prefix();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (fp, count) in counts {
            pipe.zincr(format!("{prefix}:count"), fp, *count as f64)
                .ignore();
            pipe.zadd(format!("{prefix}:last_seen"), fp, now_unix)
                .ignore();
            pipe.sadd(format!("{prefix}:collected"), fp).ignore();
        }
        let mut conn = self.manager().await?;
        self.run(self.config.write_timeout, "observation flush", async move {
            pipe.query_async(&mut conn).await
        })
        .await
    }

    /// Writes one kind's drained block events, one atomic pipeline per
    /// fingerprint hash (`{v}:blocked:{fp}`), buckets merged with HINCRBY so
    /// consecutive flush periods accumulate.
    pub async fn flush_blocks(&self, kind: FingerprintKind, blocks: &BlockCounts) -> Result<()> {
        let prefix = kind.key_prefix();
        for (fp, buckets) in blocks {
            let key = format!("{prefix}:blocked:{fp}");
            let mut pipe = redis::pipe();
            pipe.atomic();
            for (bucket, count) in buckets {
                pipe.hincr(&key, bucket, *count as i64).ignore();
            }
            let mut conn = self.manager().await?;
            let () = self
                .run(self.config.write_timeout, "block flush", async move {
                    pipe.query_async(&mut conn).await
                })
                .await?;
        }
        Ok(())
    }

    /// Removes `{v}:last_seen` entries older than the cutoff.
    /// Returns the number of entries removed.
    pub async fn expire_stale(&self, kind: FingerprintKind, cutoff_unix: i64) -> Result<u64> {
        let key = format!("{}:last_seen", kind.key_prefix());
        let mut conn = self.manager().await?;
        self.run(self.config.write_timeout, "last_seen cleanup", async move {
            conn.zrembyscore(key, "-inf", cutoff_unix as f64).await
        })
        .await
    }
}
