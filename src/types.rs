//! Core data model: channel keys, status fingerprints, history entries and asset metadata.

use std::fmt;

/// 32-byte digest of an address's output script, used as the server-side subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scripthash(pub [u8; 32]);

impl Scripthash {
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Scripthash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A channel the synchronizer can subscribe to: either a wallet address or an asset name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelKey {
    Address(String),
    Asset(String),
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKey::Address(a) => write!(f, "address:{a}"),
            ChannelKey::Asset(a) => write!(f, "asset:{a}"),
        }
    }
}

/// Hex-encoded SHA-256 fingerprint of a channel's current state.
///
/// Compared for equality only; never parsed or decoded by the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Status(pub String);

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An on-chain history entry for an address.
///
/// `height` is a chain height, 0 for mempool, negative for unconfirmed-with-unconfirmed-parents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoryEntry {
    pub tx_hash: String,
    pub height: i64,
}

/// Provenance of a piece of asset metadata: the transaction (and height) that introduced it,
/// and the (optional) transactions that most recently altered its divisibility or IPFS link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetProvenance {
    pub source_tx_hash: String,
    pub source_height: i64,
    pub source_divisions_tx: Option<String>,
    pub source_ipfs_tx: Option<String>,
}

/// Canonical, structured representation of an asset's metadata.
///
/// The server may reply with either a typed record or a raw key-value mapping (see
/// [`crate::interface::RawAssetMetadata`]); both are coerced into this one struct before
/// fingerprinting, so there is exactly one encoding to keep byte-exact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetMetadata {
    pub sats_in_circulation: u64,
    pub divisions: u8,
    pub reissuable: bool,
    pub associated_data: Option<Vec<u8>>,
    pub provenance: AssetProvenance,
}

impl AssetMetadata {
    pub fn has_ipfs(&self) -> bool {
        self.associated_data.is_some()
    }
}
