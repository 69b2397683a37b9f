//! In-memory fakes for [`ServerInterface`] and [`AddressBook`] (§4.11), scriptable enough to
//! drive every scenario described for this engine: a fresh bootstrap, a benign status race
//! (with and without recovery), an asset metadata rollback attempt, a txid mismatch, and a
//! "history too large" disconnect.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    error::{Result, SyncError},
    interface::{
        AddrHistory, AddressBook, AssetStatusSender, RawAssetMetadata, RawHistoryEntry,
        RawTransaction, ServerInterface, StatusSender, StoredTransaction,
    },
    subscription_base::ScripthashDeriver,
    types::{AssetMetadata, HistoryEntry, Scripthash},
};

/// Derives a scripthash by hashing the address string; deterministic and injective enough
/// for tests, with no claim to match any real chain's script-hashing rules.
pub struct FakeScripthashDeriver;

impl ScripthashDeriver for FakeScripthashDeriver {
    fn derive(&self, addr: &str) -> Scripthash {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(addr.as_bytes());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Scripthash(bytes)
    }
}

pub struct AllowAllAddressValidator;
impl crate::interface::AddressValidator for AllowAllAddressValidator {
    fn validate(&self, addr: &str) -> bool {
        !addr.is_empty()
    }
}

pub struct AllowAllAssetValidator;
impl crate::interface::AssetNameValidator for AllowAllAssetValidator {
    fn validate(&self, name: &str) -> std::result::Result<(), String> {
        if name.is_empty() {
            Err("empty asset name".to_string())
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
struct FakeServerState {
    histories: HashMap<Scripthash, Vec<RawHistoryEntry>>,
    asset_metadata: HashMap<String, RawAssetMetadata>,
    transactions: HashMap<String, Vec<u8>>,
    history_too_large: std::collections::HashSet<Scripthash>,
    tamper_tx: std::collections::HashSet<String>,
    missing_tx: std::collections::HashSet<String>,
}

/// A scriptable fake indexing server. Tests mutate the shared state directly through the
/// handle returned by [`FakeServer::new`], then push notifications through the sender
/// captured at subscribe time.
pub struct FakeServer {
    state: Mutex<FakeServerState>,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeServerState::default()),
        })
    }

    pub async fn set_history(&self, scripthash: Scripthash, entries: Vec<RawHistoryEntry>) {
        self.state.lock().await.histories.insert(scripthash, entries);
    }

    pub async fn set_asset_metadata(&self, asset: &str, metadata: RawAssetMetadata) {
        self.state
            .lock()
            .await
            .asset_metadata
            .insert(asset.to_string(), metadata);
    }

    pub async fn set_transaction(&self, tx_hash: &str, bytes: Vec<u8>) {
        self.state
            .lock()
            .await
            .transactions
            .insert(tx_hash.to_string(), bytes);
    }

    pub async fn mark_history_too_large(&self, scripthash: Scripthash) {
        self.state.lock().await.history_too_large.insert(scripthash);
    }

    /// Makes `get_transaction(tx_hash)` return bytes that recompute to a different txid,
    /// simulating a server lying about a transaction body.
    pub async fn tamper_transaction(&self, tx_hash: &str) {
        self.state.lock().await.tamper_tx.insert(tx_hash.to_string());
    }

    pub async fn mark_tx_missing(&self, tx_hash: &str) {
        self.state.lock().await.missing_tx.insert(tx_hash.to_string());
    }
}

#[async_trait]
impl ServerInterface for FakeServer {
    async fn subscribe_scripthash(
        &self,
        scripthash: Scripthash,
        _notifications: StatusSender,
    ) -> Result<()> {
        if self.state.lock().await.history_too_large.contains(&scripthash) {
            return Err(SyncError::Rpc("history too large".to_string()));
        }
        Ok(())
    }

    async fn subscribe_asset(&self, _asset: String, _notifications: AssetStatusSender) -> Result<()> {
        Ok(())
    }

    async fn get_history_for_scripthash(&self, scripthash: Scripthash) -> Result<Vec<RawHistoryEntry>> {
        Ok(self
            .state
            .lock()
            .await
            .histories
            .get(&scripthash)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_asset_metadata(&self, asset: &str) -> Result<RawAssetMetadata> {
        self.state
            .lock()
            .await
            .asset_metadata
            .get(asset)
            .cloned()
            .ok_or_else(|| SyncError::Rpc(format!("no metadata for asset {asset}")))
    }

    async fn get_transaction(&self, tx_hash: &str) -> Result<Vec<u8>> {
        let state = self.state.lock().await;
        if state.missing_tx.contains(tx_hash) {
            return Err(SyncError::Rpc(format!("transaction {tx_hash} not found")));
        }
        if state.tamper_tx.contains(tx_hash) {
            return Ok(b"tampered-bytes-do-not-match-requested-txid".to_vec());
        }
        state
            .transactions
            .get(tx_hash)
            .cloned()
            .ok_or_else(|| SyncError::Rpc(format!("transaction {tx_hash} not found")))
    }
}

#[derive(Default)]
struct FakeAddressBookState {
    addresses: Vec<String>,
    assets: Vec<String>,
    history: HashMap<String, Vec<HistoryEntry>>,
    transactions: HashMap<String, StoredTransaction>,
    asset_metadata: HashMap<String, AssetMetadata>,
    verified_asset_base: HashMap<String, (String, i64)>,
    up_to_date_edges: u64,
}

/// A scriptable fake wallet database. Pre-seed addresses/assets/history with the setters,
/// then inspect commits and `up_to_date_changed` edges with the getters.
pub struct FakeAddressBook {
    state: Mutex<FakeAddressBookState>,
}

impl FakeAddressBook {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeAddressBookState::default()),
        })
    }

    pub async fn add_address(&self, addr: &str) {
        self.state.lock().await.addresses.push(addr.to_string());
    }

    pub async fn add_asset(&self, asset: &str) {
        self.state.lock().await.assets.push(asset.to_string());
    }

    pub async fn set_verified_asset_base(&self, asset: &str, tx_hash: &str, height: i64) {
        self.state
            .lock()
            .await
            .verified_asset_base
            .insert(asset.to_string(), (tx_hash.to_string(), height));
    }

    pub async fn committed_history(&self, addr: &str) -> Vec<HistoryEntry> {
        self.state
            .lock()
            .await
            .history
            .get(addr)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn committed_asset_metadata(&self, asset: &str) -> Option<AssetMetadata> {
        self.state.lock().await.asset_metadata.get(asset).cloned()
    }

    pub async fn up_to_date_edge_count(&self) -> u64 {
        self.state.lock().await.up_to_date_edges
    }
}

#[async_trait]
impl AddressBook for FakeAddressBook {
    async fn get_addr_history(&self, addr: &str) -> AddrHistory {
        AddrHistory::Entries(
            self.state
                .lock()
                .await
                .history
                .get(addr)
                .cloned()
                .unwrap_or_default(),
        )
    }

    async fn get_transaction(&self, tx_hash: &str) -> Option<StoredTransaction> {
        self.state.lock().await.transactions.get(tx_hash).cloned()
    }

    async fn get_asset_metadata(&self, asset: &str) -> Option<AssetMetadata> {
        self.state.lock().await.asset_metadata.get(asset).cloned()
    }

    async fn get_verified_asset_metadata_base_source(
        &self,
        asset: &str,
    ) -> Option<(String, i64)> {
        self.state.lock().await.verified_asset_base.get(asset).cloned()
    }

    async fn receive_history_callback(
        &self,
        addr: &str,
        hist: Vec<HistoryEntry>,
        _fees: HashMap<String, u64>,
    ) {
        self.state.lock().await.history.insert(addr.to_string(), hist);
    }

    async fn receive_tx_callback(&self, tx_hash: &str, tx: RawTransaction, _height: i64) {
        self.state
            .lock()
            .await
            .transactions
            .insert(tx_hash.to_string(), StoredTransaction::Complete(tx));
    }

    async fn add_unverified_or_unconfirmed_asset_metadata(
        &self,
        asset: &str,
        metadata: AssetMetadata,
    ) -> Result<()> {
        self.state
            .lock()
            .await
            .asset_metadata
            .insert(asset.to_string(), metadata);
        Ok(())
    }

    async fn get_addresses(&self) -> Vec<String> {
        self.state.lock().await.addresses.clone()
    }

    async fn get_assets(&self) -> Vec<String> {
        self.state.lock().await.assets.clone()
    }

    async fn get_history(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.history.keys().cloned().collect()
    }

    async fn up_to_date_changed(&self) {
        self.state.lock().await.up_to_date_edges += 1;
    }
}
