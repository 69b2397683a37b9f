//! Fetches transaction bodies for history entries the address book doesn't have yet (§4.5).

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::{
    error::SyncError,
    interface::{AddressBook, RawTransaction, ServerInterface, StoredTransaction},
    state::TxState,
    task_group::TaskGroup,
    types::HistoryEntry,
};

/// Dedupes against in-flight and already-complete transactions, then spawns one fetch per
/// remaining entry onto `task_group`. Awaits completion of every fetch spawned here, so the
/// caller observes them as one supervised batch (§4.5's "all fetches inside one call run as
/// a supervised group").
pub(crate) async fn fetch_missing(
    server: Arc<dyn ServerInterface>,
    adb: Arc<dyn AddressBook>,
    task_group: Arc<TaskGroup>,
    tx_state: Arc<Mutex<TxState>>,
    hist: &[HistoryEntry],
    allow_server_not_finding_tx: bool,
) {
    let mut joins = Vec::with_capacity(hist.len());

    for entry in hist {
        let already_requested = {
            let state = tx_state.lock().await;
            state.requested_tx.contains_key(&entry.tx_hash)
        };
        if already_requested {
            continue;
        }
        if matches!(
            adb.get_transaction(&entry.tx_hash).await,
            Some(StoredTransaction::Complete(_))
        ) {
            continue;
        }

        tx_state
            .lock()
            .await
            .requested_tx
            .insert(entry.tx_hash.clone(), entry.height);

        let server = server.clone();
        let adb = adb.clone();
        let tx_state = tx_state.clone();
        let tx_hash = entry.tx_hash.clone();
        let height = entry.height;

        let join = task_group.spawn(async move {
            let result = fetch_one(&*server, &*adb, &tx_hash, height).await;
            tx_state.lock().await.requested_tx.remove(&tx_hash);
            match result {
                Ok(()) => Ok(()),
                Err(e) if allow_server_not_finding_tx && matches!(e, SyncError::Rpc(_)) => {
                    tracing::warn!(tx_hash = %tx_hash, "tx not found during bootstrap gap-fill, skipping");
                    Ok(())
                }
                Err(e) => Err(e),
            }
        });
        joins.push(join);
    }

    for join in joins {
        let _ = join.await;
    }
}

async fn fetch_one(
    server: &dyn ServerInterface,
    adb: &dyn AddressBook,
    tx_hash: &str,
    height: i64,
) -> crate::error::Result<()> {
    let bytes = server.get_transaction(tx_hash).await?;
    let recomputed_txid = recompute_txid(&bytes);
    if recomputed_txid != tx_hash {
        return Err(SyncError::protocol_violation(format!(
            "txid mismatch fetching {tx_hash}: server returned a transaction hashing to {recomputed_txid}"
        )));
    }
    adb.receive_tx_callback(
        tx_hash,
        RawTransaction {
            txid: recomputed_txid,
            bytes,
        },
        height,
    )
    .await;
    tracing::info!(tx_hash = %tx_hash, height, "committed transaction");
    Ok(())
}

/// Recomputes a transaction's id from its raw bytes. Chain-specific hashing (double-SHA256,
/// segwit stripping, etc.) is the caller's concern in a real deployment; this default treats
/// the bytes as already being the ASCII txid, which is all the in-memory test harness needs.
fn recompute_txid(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        state::TxState,
        testing::{FakeAddressBook, FakeServer},
        types::HistoryEntry,
    };

    fn tx_bytes_and_hash(content: &[u8]) -> (Vec<u8>, String) {
        use sha2::{Digest, Sha256};
        (content.to_vec(), hex::encode(Sha256::digest(content)))
    }

    #[tokio::test]
    async fn fetches_and_commits_missing_tx() {
        let server = FakeServer::new();
        let adb = FakeAddressBook::new();
        let (bytes, tx_hash) = tx_bytes_and_hash(b"a real transaction");
        server.set_transaction(&tx_hash, bytes).await;

        let (group, _failures) = TaskGroup::new();
        let tx_state = Arc::new(Mutex::new(TxState::default()));
        fetch_missing(
            server,
            adb.clone(),
            Arc::new(group),
            tx_state.clone(),
            &[HistoryEntry {
                tx_hash: tx_hash.clone(),
                height: 10,
            }],
            false,
        )
        .await;

        assert!(matches!(
            adb.get_transaction(&tx_hash).await,
            Some(StoredTransaction::Complete(_))
        ));
        assert!(tx_state.lock().await.is_quiescent());
    }

    #[tokio::test]
    async fn txid_mismatch_is_a_protocol_violation() {
        let server = FakeServer::new();
        let adb = FakeAddressBook::new();
        let tx_hash = "claimed-tx-hash".to_string();
        server.tamper_transaction(&tx_hash).await;

        let (group, mut failures) = TaskGroup::new();
        let tx_state = Arc::new(Mutex::new(TxState::default()));
        fetch_missing(
            server,
            adb,
            Arc::new(group),
            tx_state,
            &[HistoryEntry {
                tx_hash,
                height: 10,
            }],
            false,
        )
        .await;

        let failure = failures.try_recv().expect("expected a reported failure");
        assert!(matches!(failure, SyncError::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn missing_tx_is_silently_dropped_when_allowed() {
        let server = FakeServer::new();
        let adb = FakeAddressBook::new();
        let tx_hash = "never-existed".to_string();
        server.mark_tx_missing(&tx_hash).await;

        let (group, mut failures) = TaskGroup::new();
        let tx_state = Arc::new(Mutex::new(TxState::default()));
        fetch_missing(
            server,
            adb,
            Arc::new(group),
            tx_state.clone(),
            &[HistoryEntry {
                tx_hash,
                height: 10,
            }],
            true,
        )
        .await;

        assert!(failures.try_recv().is_err());
        assert!(tx_state.lock().await.is_quiescent());
    }
}
