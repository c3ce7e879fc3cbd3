//! Background control plane: policy refresh, telemetry flush, cleanup
//!
//! Four process-lifetime tasks connect the in-memory state to the store:
//!
//! - refresh: probes availability and swaps in fresh policy snapshots
//! - observation flush and block flush: drain the telemetry tables and
//!   write them out in batched pipelines, one ticker each
//! - gc: expires observation entries not seen for a configured window
//!
//! The flush and gc tasks run from construction and check availability on
//! every tick themselves; only the refresh task ever flips availability.
//! The data plane never waits on any of this.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::ControlTunables;
use crate::fingerprint::FingerprintKind;
use crate::policy::{FeatureFlags, PolicyLists, PolicySnapshot, PolicyStore};
use crate::store::StoreClient;
use crate::telemetry::TelemetryAggregator;

/// Owns the store client and drives all periodic interaction with it.
pub struct ControlPlane {
    store: StoreClient,
    policy: Arc<PolicyStore>,
    telemetry: Arc<TelemetryAggregator>,
    tunables: ControlTunables,
}

impl ControlPlane {
    pub fn new(
        store: StoreClient,
        policy: Arc<PolicyStore>,
        telemetry: Arc<TelemetryAggregator>,
        tunables: ControlTunables,
    ) -> Self {
        Self {
            store,
            policy,
            telemetry,
            tunables,
        }
    }

    /// Spawns the four background tasks. They run for the process lifetime;
    /// the returned handles exist so a supervisor can observe panics.
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(self.clone().refresh_loop()),
            tokio::spawn(self.clone().observation_flush_loop()),
            tokio::spawn(self.clone().block_flush_loop()),
            tokio::spawn(self.gc_loop()),
        ]
    }

    /// Probes the store and reloads the policy snapshot on a fixed cadence.
    /// The first tick fires immediately and doubles as the startup probe.
    async fn refresh_loop(self: Arc<Self>) {
        let mut ticker = interval(self.tunables.refresh_interval);
        loop {
            ticker.tick().await;
            if self.policy.store_online() {
                if let Err(err) = self.reload_policy().await {
                    warn!("policy reload failed, keeping current snapshot: {err:#}");
                    self.policy.set_store_online(false);
                }
            } else {
                match self.store.ping().await {
                    Ok(()) => {
                        info!("store reachable, loading policy");
                        self.policy.set_store_online(true);
                        if let Err(err) = self.reload_policy().await {
                            warn!("initial policy load failed: {err:#}");
                            self.policy.set_store_online(false);
                        }
                    }
                    Err(err) => {
                        debug!("store still unreachable: {err:#}");
                    }
                }
            }
        }
    }

    /// Pulls all flags and lists, then installs them as one snapshot.
    ///
    /// Any failure aborts the whole cycle before the swap: readers never see
    /// a snapshot assembled from a partially failed reload.
    async fn reload_policy(&self) -> anyhow::Result<()> {
        let flags = self.fetch_flags().await?;
        let lists = self.fetch_lists().await?;
        self.policy.install(PolicySnapshot { flags, lists });
        Ok(())
    }

    /// Reads the twelve flag keys. The current snapshot supplies the
    /// defaults, so keys missing from the store self-provision with the
    /// values already in effect.
    async fn fetch_flags(&self) -> anyhow::Result<FeatureFlags> {
        let current = self.policy.current_flags();
        let mut flags = FeatureFlags::default();
        for kind in FingerprintKind::ALL {
            let v = kind.key_prefix();
            let i = kind.index();
            flags.check_enabled[i] = self
                .store
                .flag(&format!("config:{v}_check_enabled"), current.check_enabled[i])
                .await?;
            flags.deny_enabled[i] = self
                .store
                .flag(
                    &format!("config:{v}_blacklist_enabled"),
                    current.deny_enabled[i],
                )
                .await?;
            flags.allow_enabled[i] = self
                .store
                .flag(
                    &format!("config:{v}_whitelist_enabled"),
                    current.allow_enabled[i],
                )
                .await?;
            flags.collection_enabled[i] = self
                .store
                .flag(
                    &format!("config:{v}_collection_enabled"),
                    current.collection_enabled[i],
                )
                .await?;
        }
        Ok(flags)
    }

    async fn fetch_lists(&self) -> anyhow::Result<PolicyLists> {
        let mut lists = PolicyLists::default();
        for kind in FingerprintKind::ALL {
            let v = kind.key_prefix();
            let i = kind.index();
            lists.deny[i] = self.store.set_members(&format!("{v}:blacklist")).await?;
            lists.allow[i] = self.store.set_members(&format!("{v}:whitelist")).await?;
        }
        Ok(lists)
    }

    /// Flushes the observation tables; the three kinds run concurrently so
    /// one slow pipeline cannot stall the others.
    async fn observation_flush_loop(self: Arc<Self>) {
        let mut ticker = interval(self.tunables.observation_flush_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !self.policy.store_online() {
                continue;
            }
            tokio::join!(
                self.flush_observations(FingerprintKind::Ja3),
                self.flush_observations(FingerprintKind::Ja3n),
                self.flush_observations(FingerprintKind::Ja4),
            );
        }
    }

    async fn flush_observations(&self, kind: FingerprintKind) {
        let counts = self.telemetry.drain_observations(kind);
        if counts.is_empty() {
            return;
        }
        let entries = counts.len();
        match self
            .store
            .flush_observations(kind, &counts, Utc::now().timestamp())
            .await
        {
            Ok(()) => debug!("flushed {entries} {kind} observation entries"),
            Err(err) => {
                // at-most-once: the drained counts are gone
                warn!("{kind} observation flush failed, dropping {entries} entries: {err:#}");
            }
        }
    }

    /// Flushes the block event tables on their own cadence.
    async fn block_flush_loop(self: Arc<Self>) {
        let mut ticker = interval(self.tunables.block_flush_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !self.policy.store_online() {
                continue;
            }
            tokio::join!(
                self.flush_blocks(FingerprintKind::Ja3),
                self.flush_blocks(FingerprintKind::Ja3n),
                self.flush_blocks(FingerprintKind::Ja4),
            );
        }
    }

    async fn flush_blocks(&self, kind: FingerprintKind) {
        let blocks = self.telemetry.drain_blocks(kind);
        if blocks.is_empty() {
            return;
        }
        let entries = blocks.len();
        match self.store.flush_blocks(kind, &blocks).await {
            Ok(()) => debug!("flushed block events for {entries} {kind} fingerprints"),
            Err(err) => {
                warn!("{kind} block flush failed, dropping {entries} fingerprints: {err:#}");
            }
        }
    }

    /// Removes observation entries whose last sighting is older than the
    /// expiry window. Skipped entirely while the store is unreachable.
    async fn gc_loop(self: Arc<Self>) {
        let mut ticker = interval(self.tunables.gc_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !self.policy.store_online() {
                debug!("store offline, skipping fingerprint cleanup");
                continue;
            }
            let cutoff = Utc::now().timestamp() - self.tunables.expire_after.as_secs() as i64;
            for kind in FingerprintKind::ALL {
                match self.store.expire_stale(kind, cutoff).await {
                    Ok(removed) => info!("expired {removed} stale {kind} fingerprints"),
                    Err(err) => warn!("{kind} fingerprint cleanup failed: {err:#}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::StoreConfig;

    const KIND: FingerprintKind = FingerprintKind::Ja3;

    /// Store client pointed at a port that was just bound and released, so
    /// every operation fails fast with connection refused.
    fn unreachable_store() -> StoreClient {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        StoreClient::new(StoreConfig {
            addr: addr.to_string(),
            connect_timeout: Duration::from_millis(200),
            read_timeout: Duration::from_millis(200),
            write_timeout: Duration::from_millis(200),
            ..StoreConfig::default()
        })
        .unwrap()
    }

    fn control_plane() -> ControlPlane {
        let policy = Arc::new(PolicyStore::new());
        let mut flags = FeatureFlags::default();
        flags.collection_enabled[KIND.index()] = true;
        policy.install(PolicySnapshot {
            flags,
            lists: PolicyLists::default(),
        });
        policy.set_store_online(true);
        let telemetry = Arc::new(TelemetryAggregator::new(policy.clone()));
        ControlPlane::new(
            unreachable_store(),
            policy,
            telemetry,
            ControlTunables::default(),
        )
    }

    #[tokio::test]
    async fn failed_observation_flush_keeps_store_online() {
        let control = control_plane();
        control.telemetry.record_observation(KIND, "abc");

        control.flush_observations(KIND).await;

        // the detached counts are dropped, availability is not touched
        assert!(control.policy.store_online());
        assert!(control.telemetry.drain_observations(KIND).is_empty());
    }

    #[tokio::test]
    async fn failed_block_flush_keeps_store_online() {
        let control = control_plane();
        control.telemetry.record_block(KIND, "abc");

        control.flush_blocks(KIND).await;

        assert!(control.policy.store_online());
        assert!(control.telemetry.drain_blocks(KIND).is_empty());
    }

    #[tokio::test]
    async fn empty_tables_flush_without_store_contact() {
        // nothing recorded: flush must not even attempt the (dead) store,
        // and certainly must not change availability
        let control = control_plane();

        control.flush_observations(KIND).await;
        control.flush_blocks(KIND).await;

        assert!(control.policy.store_online());
    }
}
