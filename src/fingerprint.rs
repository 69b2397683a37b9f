//! Deterministic status digests, used only for equality against server-announced status.
//!
//! Both functions are position- and format-sensitive: implementations must match the
//! original wire format byte-for-byte, since the server and every client must derive the
//! same fingerprint from the same payload.

use sha2::{Digest, Sha256};

use crate::types::{AssetMetadata, HistoryEntry, Status};

/// Fingerprint of an address's history.
///
/// Concatenates `tx_hash ":" decimal(height) ":"` for each entry in order, then SHA-256s
/// the ASCII bytes. An empty history has no fingerprint (the sentinel "none" status).
pub fn history_status(history: &[HistoryEntry]) -> Option<Status> {
    if history.is_empty() {
        return None;
    }

    let mut buf = String::new();
    for entry in history {
        buf.push_str(&entry.tx_hash);
        buf.push(':');
        buf.push_str(&entry.height.to_string());
        buf.push(':');
    }

    Some(Status(hex::encode(Sha256::digest(buf.as_bytes()))))
}

/// Fingerprint of an asset's metadata.
///
/// Composes `sats_in_circulation, divisions, reissuable, has_ipfs[, ipfs bytes]` as ASCII
/// and SHA-256s it. Metadata absence fingerprints to the sentinel "none" status.
pub fn asset_status(metadata: Option<&AssetMetadata>) -> Option<Status> {
    let metadata = metadata?;

    let mut buf = String::new();
    buf.push_str(&metadata.sats_in_circulation.to_string());
    buf.push_str(&metadata.divisions.to_string());
    buf.push_str(if metadata.reissuable { "True" } else { "False" });
    let has_ipfs = metadata.has_ipfs();
    buf.push_str(if has_ipfs { "True" } else { "False" });
    if has_ipfs {
        if let Some(data) = &metadata.associated_data {
            buf.push_str(&String::from_utf8_lossy(data));
        }
    }

    Some(Status(hex::encode(Sha256::digest(buf.as_bytes()))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AssetProvenance;

    fn entry(tx_hash: &str, height: i64) -> HistoryEntry {
        HistoryEntry { tx_hash: tx_hash.to_string(), height }
    }

    fn provenance() -> AssetProvenance {
        AssetProvenance {
            source_tx_hash: "a".repeat(64),
            source_height: 100,
            source_divisions_tx: None,
            source_ipfs_tx: None,
        }
    }

    #[test]
    fn empty_history_has_no_status() {
        assert_eq!(history_status(&[]), None);
    }

    #[test]
    fn history_status_is_deterministic() {
        let h = vec![entry("aa", 10), entry("bb", 11)];
        assert_eq!(history_status(&h), history_status(&h.clone()));
    }

    #[test]
    fn history_status_is_order_sensitive() {
        let forward = vec![entry("aa", 10), entry("bb", 11)];
        let reversed = vec![entry("bb", 11), entry("aa", 10)];
        assert_ne!(history_status(&forward), history_status(&reversed));
    }

    #[test]
    fn history_status_is_height_sensitive() {
        let a = vec![entry("aa", 10)];
        let b = vec![entry("aa", 11)];
        assert_ne!(history_status(&a), history_status(&b));
    }

    #[test]
    fn history_status_matches_known_vector() {
        // history_status([("aa", 10), ("bb", 11)]) == sha256("aa:10:bb:11:")
        let h = vec![entry("aa", 10), entry("bb", 11)];
        let expected = hex::encode(Sha256::digest(b"aa:10:bb:11:"));
        assert_eq!(history_status(&h).unwrap().0, expected);
    }

    #[test]
    fn asset_status_none_for_absent_metadata() {
        assert_eq!(asset_status(None), None);
    }

    #[test]
    fn asset_status_is_field_sensitive() {
        let base = AssetMetadata {
            sats_in_circulation: 100,
            divisions: 0,
            reissuable: true,
            associated_data: None,
            provenance: provenance(),
        };
        let mut divisions_changed = base.clone();
        divisions_changed.divisions = 1;
        assert_ne!(asset_status(Some(&base)), asset_status(Some(&divisions_changed)));

        let mut reissuable_changed = base.clone();
        reissuable_changed.reissuable = false;
        assert_ne!(asset_status(Some(&base)), asset_status(Some(&reissuable_changed)));

        let mut sats_changed = base.clone();
        sats_changed.sats_in_circulation = 101;
        assert_ne!(asset_status(Some(&base)), asset_status(Some(&sats_changed)));
    }

    #[test]
    fn asset_status_includes_ipfs_bytes_when_present() {
        let mut with_ipfs = AssetMetadata {
            sats_in_circulation: 100,
            divisions: 0,
            reissuable: true,
            associated_data: Some(b"Qm123".to_vec()),
            provenance: provenance(),
        };
        let without_ipfs = AssetMetadata {
            associated_data: None,
            ..with_ipfs.clone()
        };
        assert_ne!(asset_status(Some(&with_ipfs)), asset_status(Some(&without_ipfs)));

        with_ipfs.associated_data = Some(b"Qm456".to_vec());
        let with_other_ipfs = with_ipfs;
        assert_ne!(
            asset_status(Some(&without_ipfs)),
            asset_status(Some(&with_other_ipfs))
        );
    }

    #[test]
    fn asset_status_matches_known_vector() {
        let m = AssetMetadata {
            sats_in_circulation: 100,
            divisions: 2,
            reissuable: true,
            associated_data: None,
            provenance: provenance(),
        };
        let expected = hex::encode(Sha256::digest(b"1002TrueFalse"));
        assert_eq!(asset_status(Some(&m)).unwrap().0, expected);
    }
}
