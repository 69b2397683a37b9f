//! The in-flight state every component of the synchronizer mutates: the pending/requested/
//! handling sets from §3's invariants, kept behind small mutexes so a multi-threaded Tokio
//! runtime gets the same mutual exclusion the original's single-threaded event loop got for
//! free (§5).

use std::collections::{HashMap, HashSet};

use tokio::task::AbortHandle;

use crate::types::{Scripthash, Status};

/// Per-address in-flight state (§3 invariant 1, §4.3).
#[derive(Default)]
pub(crate) struct AddrState {
    pub adding: HashSet<String>,
    pub requested: HashSet<String>,
    pub handling_statuses: HashSet<String>,
    pub requested_histories: HashSet<(String, Option<Status>)>,
    pub stale_histories: HashMap<String, AbortHandle>,
    pub scripthash_to_address: HashMap<Scripthash, String>,
    pub processed_some_notifications: bool,
}

impl AddrState {
    /// Cancels and removes any pending stale-history watchdog for `addr` (§4.3 step 3).
    pub fn cancel_stale_history(&mut self, addr: &str) {
        if let Some(handle) = self.stale_histories.remove(addr) {
            handle.abort();
        }
    }

    pub fn is_quiescent(&self) -> bool {
        self.adding.is_empty()
            && self.requested.is_empty()
            && self.handling_statuses.is_empty()
            && self.requested_histories.is_empty()
            && self.stale_histories.is_empty()
    }
}

/// Per-asset in-flight state, symmetric to [`AddrState`] (§4.4).
#[derive(Default)]
pub(crate) struct AssetState {
    pub adding: HashSet<String>,
    pub requested: HashSet<String>,
    pub handling_statuses: HashSet<String>,
    pub requested_metadata: HashSet<(String, Option<Status>)>,
    pub stale_metadata: HashMap<String, AbortHandle>,
    pub processed_some_notifications: bool,
}

impl AssetState {
    pub fn cancel_stale_metadata(&mut self, asset: &str) {
        if let Some(handle) = self.stale_metadata.remove(asset) {
            handle.abort();
        }
    }

    pub fn is_quiescent(&self) -> bool {
        self.adding.is_empty()
            && self.requested.is_empty()
            && self.handling_statuses.is_empty()
            && self.requested_metadata.is_empty()
            && self.stale_metadata.is_empty()
    }
}

/// Pending transaction fetches: `tx_hash -> height at which it was first discovered` (§3
/// invariant 3).
#[derive(Default)]
pub(crate) struct TxState {
    pub requested_tx: HashMap<String, i64>,
}

impl TxState {
    pub fn is_quiescent(&self) -> bool {
        self.requested_tx.is_empty()
    }
}
