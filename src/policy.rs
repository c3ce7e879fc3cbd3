//! In-memory policy: feature flags and allow/deny sets per fingerprint kind
//!
//! The data plane reads the policy on every inspected connection, so the
//! whole state lives behind a single atomically swapped snapshot. The
//! control plane assembles a complete replacement off to the side and
//! installs it in one swap; readers see either the whole old snapshot or
//! the whole new one, never a mix.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::fingerprint::FingerprintKind;

/// The twelve policy booleans, four per fingerprint kind, indexed by
/// [`FingerprintKind::index`]. All default to off: a fresh proxy with an
/// unreachable store inspects nothing and blocks nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Evaluate policy for this kind at all
    pub check_enabled: [bool; 3],
    /// Deny-set membership blocks
    pub deny_enabled: [bool; 3],
    /// Allow-set NON-membership blocks
    pub allow_enabled: [bool; 3],
    /// Observations are counted
    pub collection_enabled: [bool; 3],
}

/// Allow and deny sets per fingerprint kind
#[derive(Debug, Clone, Default)]
pub struct PolicyLists {
    pub deny: [HashSet<String>; 3],
    pub allow: [HashSet<String>; 3],
}

/// One immutable generation of flags plus lists
#[derive(Debug, Clone, Default)]
pub struct PolicySnapshot {
    pub flags: FeatureFlags,
    pub lists: PolicyLists,
}

/// Thread-safe policy holder shared between the data plane (readers) and
/// the control plane (single writer).
///
/// Constructing one requires no store connection; the snapshot starts at
/// the defaults and the control plane replaces it when the store answers.
pub struct PolicyStore {
    snapshot: ArcSwap<PolicySnapshot>,
    store_online: AtomicBool,
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyStore {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(PolicySnapshot::default()),
            store_online: AtomicBool::new(false),
        }
    }

    /// Fast read of the check flag for one kind
    pub fn check_enabled(&self, kind: FingerprintKind) -> bool {
        self.snapshot.load().flags.check_enabled[kind.index()]
    }

    /// Fast read of the collection flag for one kind
    pub fn collection_enabled(&self, kind: FingerprintKind) -> bool {
        self.snapshot.load().flags.collection_enabled[kind.index()]
    }

    /// Decides whether a fingerprint must be blocked.
    ///
    /// The allow list has priority when enabled: membership passes
    /// unconditionally, non-membership blocks even when the deny list would
    /// not have matched. The deny list only decides for kinds whose allow
    /// list is disabled.
    pub fn should_block(&self, kind: FingerprintKind, fp: &str) -> bool {
        let snapshot = self.snapshot.load();
        let i = kind.index();
        if !snapshot.flags.check_enabled[i] {
            return false;
        }
        if snapshot.flags.allow_enabled[i] {
            return !snapshot.lists.allow[i].contains(fp);
        }
        if snapshot.flags.deny_enabled[i] && snapshot.lists.deny[i].contains(fp) {
            return true;
        }
        false
    }

    /// Replaces the entire snapshot in one swap. Control plane only.
    pub fn install(&self, snapshot: PolicySnapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }

    /// Current flags, used as the defaults for the next reload cycle so a
    /// missing store key self-provisions with the value already in effect.
    pub fn current_flags(&self) -> FeatureFlags {
        self.snapshot.load().flags
    }

    /// Whether the last store probe or operation succeeded. The data plane
    /// reads this to decide if observations are worth buffering; only the
    /// control plane writes it.
    pub fn store_online(&self) -> bool {
        self.store_online.load(Ordering::Relaxed)
    }

    pub fn set_store_online(&self, online: bool) {
        self.store_online.store(online, Ordering::Relaxed);
    }
}
