//! In-memory telemetry aggregation
//!
//! Two tables per fingerprint kind, six in total:
//! - observations: fingerprint -> count since the last flush
//! - block events: fingerprint -> second-resolution bucket -> count
//!
//! Writers only touch memory; the flusher detaches a whole table by swap
//! and does its store I/O against the detached copy. A failed flush drops
//! that copy: delivery is at-most-once by design.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Local;
use parking_lot::Mutex;

use crate::fingerprint::FingerprintKind;
use crate::policy::PolicyStore;

/// Observation counts detached from one table
pub type ObservationCounts = HashMap<String, u64>;

/// Block events detached from one table: fingerprint -> time bucket -> count
pub type BlockCounts = HashMap<String, HashMap<String, u64>>;

/// Aggregates per-connection events until the control plane flushes them.
///
/// One mutex per table keeps writers for different kinds off each other's
/// locks; a single [`record_observation`] or [`record_block`] is an O(1)
/// map update and never performs I/O.
///
/// [`record_observation`]: TelemetryAggregator::record_observation
/// [`record_block`]: TelemetryAggregator::record_block
pub struct TelemetryAggregator {
    policy: Arc<PolicyStore>,
    observations: [Mutex<ObservationCounts>; 3],
    blocks: [Mutex<BlockCounts>; 3],
}

impl TelemetryAggregator {
    pub fn new(policy: Arc<PolicyStore>) -> Self {
        Self {
            policy,
            observations: Default::default(),
            blocks: Default::default(),
        }
    }

    /// Counts one sighting of a fingerprint.
    ///
    /// No-op while collection is disabled for the kind or the store is
    /// offline; counts buffered toward an unreachable store would only grow
    /// without bound.
    pub fn record_observation(&self, kind: FingerprintKind, fp: &str) {
        if !self.policy.collection_enabled(kind) || !self.policy.store_online() {
            return;
        }
        let mut table = self.observations[kind.index()].lock();
        *table.entry(fp.to_string()).or_insert(0) += 1;
    }

    /// Counts one block event, bucketed by wall-clock second.
    ///
    /// Unconditional: the block already happened, so it is recorded even
    /// while the store is offline and flushed once it returns.
    pub fn record_block(&self, kind: FingerprintKind, fp: &str) {
        let bucket = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let mut table = self.blocks[kind.index()].lock();
        *table
            .entry(fp.to_string())
            .or_default()
            .entry(bucket)
            .or_insert(0) += 1;
    }

    /// Detaches the observation table for one kind, leaving it empty.
    pub fn drain_observations(&self, kind: FingerprintKind) -> ObservationCounts {
        std::mem::take(&mut *self.observations[kind.index()].lock())
    }

    /// Detaches the block table for one kind, leaving it empty.
    pub fn drain_blocks(&self, kind: FingerprintKind) -> BlockCounts {
        std::mem::take(&mut *self.blocks[kind.index()].lock())
    }
}
