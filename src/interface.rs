//! External collaborators the synchronizer core depends on.
//!
//! Everything in this module is a trait: the real network transport, server selection,
//! and wallet database live outside the core (§1). Production implementations, and the
//! in-memory fakes used by the test harness, both satisfy these traits.

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    error::Result,
    types::{AssetMetadata, HistoryEntry, Scripthash, Status},
};

/// A `{tx_hash, height, fee?}` entry exactly as returned by `blockchain.scripthash.get_history`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHistoryEntry {
    pub tx_hash: String,
    pub height: i64,
    pub fee: Option<u64>,
}

/// The raw `blockchain.asset.get_meta` reply, before it is coerced into [`AssetMetadata`].
///
/// The server may in principle hand back either a typed record or a loose key-value
/// mapping; this struct is the one shape both are normalized to at the RPC boundary; the
/// core only ever fingerprints the canonical [`AssetMetadata`] built from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAssetMetadata {
    pub sats_in_circulation: u64,
    pub divisions: u8,
    pub reissuable: bool,
    pub has_ipfs: bool,
    pub ipfs: Option<String>,
    pub source_tx_hash: String,
    pub source_height: i64,
    pub source_divisions_tx: Option<String>,
    pub source_ipfs_tx: Option<String>,
}

impl From<RawAssetMetadata> for AssetMetadata {
    fn from(raw: RawAssetMetadata) -> Self {
        AssetMetadata {
            sats_in_circulation: raw.sats_in_circulation,
            divisions: raw.divisions,
            reissuable: raw.reissuable,
            associated_data: if raw.has_ipfs {
                raw.ipfs.map(String::into_bytes)
            } else {
                None
            },
            provenance: crate::types::AssetProvenance {
                source_tx_hash: raw.source_tx_hash,
                source_height: raw.source_height,
                source_divisions_tx: raw.source_divisions_tx,
                source_ipfs_tx: raw.source_ipfs_tx,
            },
        }
    }
}

/// A stored transaction as the address book knows it: complete, or a placeholder awaiting
/// its full body (a "partial" transaction, in the original's terminology).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredTransaction {
    Complete(RawTransaction),
    Partial,
}

/// A parsed transaction body. Real implementations hold a chain-specific transaction type;
/// the core only ever needs the recomputed txid to check against the one it requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransaction {
    pub txid: String,
    pub bytes: Vec<u8>,
}

/// An address's recorded history, with the legacy "fully pruned" sentinel a handful of old
/// servers used to return (`['*']`) preserved so bootstrap can special-case it (§4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddrHistory {
    Entries(Vec<HistoryEntry>),
    LegacyPruned,
}

impl AddrHistory {
    pub fn entries(&self) -> &[HistoryEntry] {
        match self {
            AddrHistory::Entries(e) => e,
            AddrHistory::LegacyPruned => &[],
        }
    }
}

/// An `UnboundedSender` that also counts how many notifications are sitting in the channel,
/// not yet popped by the dispatch loop — so `Synchronizer::is_up_to_date` can see a nonempty
/// queue, not just the in-flight sets derived from items already dequeued (§3 invariant 5).
#[derive(Clone)]
pub struct StatusSender {
    inner: mpsc::UnboundedSender<(Scripthash, Option<Status>)>,
    pending: Arc<AtomicUsize>,
}

impl StatusSender {
    pub(crate) fn new(
        inner: mpsc::UnboundedSender<(Scripthash, Option<Status>)>,
        pending: Arc<AtomicUsize>,
    ) -> Self {
        Self { inner, pending }
    }

    pub fn send(
        &self,
        item: (Scripthash, Option<Status>),
    ) -> std::result::Result<(), mpsc::error::SendError<(Scripthash, Option<Status>)>> {
        self.pending.fetch_add(1, Ordering::Relaxed);
        self.inner.send(item)
    }
}

/// Symmetric to [`StatusSender`], for asset-name channels.
#[derive(Clone)]
pub struct AssetStatusSender {
    inner: mpsc::UnboundedSender<(String, Option<Status>)>,
    pending: Arc<AtomicUsize>,
}

impl AssetStatusSender {
    pub(crate) fn new(
        inner: mpsc::UnboundedSender<(String, Option<Status>)>,
        pending: Arc<AtomicUsize>,
    ) -> Self {
        Self { inner, pending }
    }

    pub fn send(
        &self,
        item: (String, Option<Status>),
    ) -> std::result::Result<(), mpsc::error::SendError<(String, Option<Status>)>> {
        self.pending.fetch_add(1, Ordering::Relaxed);
        self.inner.send(item)
    }
}

/// The server RPC surface the synchronizer drives (§6). Bit-exact with the wire protocol:
/// implementations are expected to translate these calls 1:1 onto
/// `blockchain.scripthash.subscribe`, `blockchain.asset.subscribe`,
/// `blockchain.scripthash.get_history`, `blockchain.asset.get_meta` and
/// `blockchain.transaction.get`.
#[async_trait]
pub trait ServerInterface: Send + Sync {
    /// Subscribes to status notifications for `scripthash`; future notifications are
    /// pushed onto `notifications` for as long as the subscription is alive.
    ///
    /// Must surface the "history too large" RPC error distinctly so the caller can convert
    /// it into a graceful disconnect (§4.2); other RPC errors propagate as
    /// [`crate::error::SyncError::Rpc`].
    async fn subscribe_scripthash(
        &self,
        scripthash: Scripthash,
        notifications: StatusSender,
    ) -> Result<()>;

    async fn subscribe_asset(&self, asset: String, notifications: AssetStatusSender)
        -> Result<()>;

    async fn get_history_for_scripthash(
        &self,
        scripthash: Scripthash,
    ) -> Result<Vec<RawHistoryEntry>>;

    async fn get_asset_metadata(&self, asset: &str) -> Result<RawAssetMetadata>;

    async fn get_transaction(&self, tx_hash: &str) -> Result<Vec<u8>>;
}

/// The wallet database, consumed through its address-book facade (§6). The core never
/// mutates the database directly; every write is one of these three callbacks.
#[async_trait]
pub trait AddressBook: Send + Sync {
    async fn get_addr_history(&self, addr: &str) -> AddrHistory;
    async fn get_transaction(&self, tx_hash: &str) -> Option<StoredTransaction>;
    async fn get_asset_metadata(&self, asset: &str) -> Option<AssetMetadata>;
    /// The `(tx_hash, height)` of the asset's verified base-creation source, if any.
    async fn get_verified_asset_metadata_base_source(&self, asset: &str)
        -> Option<(String, i64)>;

    async fn receive_history_callback(
        &self,
        addr: &str,
        hist: Vec<HistoryEntry>,
        fees: HashMap<String, u64>,
    );
    async fn receive_tx_callback(&self, tx_hash: &str, tx: RawTransaction, height: i64);
    async fn add_unverified_or_unconfirmed_asset_metadata(
        &self,
        asset: &str,
        metadata: AssetMetadata,
    ) -> Result<()>;

    async fn get_addresses(&self) -> Vec<String>;
    async fn get_assets(&self) -> Vec<String>;
    /// Addresses for which the database already holds (possibly partial) history, used to
    /// gap-fill missing transactions at bootstrap (§4.6).
    async fn get_history(&self) -> Vec<String>;

    /// Edge-triggered notification: called whenever [`crate::synchronizer::Synchronizer::is_up_to_date`]
    /// transitions, per §4.6. The address book itself does not compute up-to-date-ness —
    /// every input to that oracle is the core's own in-flight state (§2 component table).
    async fn up_to_date_changed(&self);
}

/// Returns `Err` with a human-readable reason if `asset` is not a valid asset name.
///
/// Names beginning with `$` are restricted assets, `#` are qualifiers, anything else is a
/// regular asset; validation beyond the leading character is delegated to the caller's
/// chain-specific rules (length, charset), represented here as a pluggable validator.
pub trait AssetNameValidator: Send + Sync {
    fn validate(&self, name: &str) -> std::result::Result<(), String>;
}

/// Returns whether `addr` is a valid address on the active network.
pub trait AddressValidator: Send + Sync {
    fn validate(&self, addr: &str) -> bool;
}
