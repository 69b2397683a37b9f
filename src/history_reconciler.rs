//! `_on_address_status`: reconciles a server-announced status against the database, and
//! against a freshly-fetched history when they disagree (§4.3).

use std::sync::Arc;
use std::time::Duration;

use crate::{
    error::{Result, SyncError},
    fingerprint::history_status,
    interface::{AddressBook, ServerInterface},
    state::{AddrState, TxState},
    subscription_base::ScripthashDeriver,
    task_group::TaskGroup,
    tx_fetcher,
    types::{HistoryEntry, Status},
};
use tokio::sync::Mutex;

pub(crate) struct HistoryReconciler {
    pub server: Arc<dyn ServerInterface>,
    pub adb: Arc<dyn AddressBook>,
    pub scripthash_deriver: Arc<dyn ScripthashDeriver>,
    pub addr_state: Arc<Mutex<AddrState>>,
    pub tx_state: Arc<Mutex<TxState>>,
    pub task_group: Arc<TaskGroup>,
    pub generic_network_timeout: Duration,
}

impl HistoryReconciler {
    /// Implements §4.3 steps 1–8.
    pub async fn on_address_status(&self, addr: String, announced: Option<Status>) -> Result<()> {
        let local_history = self.adb.get_addr_history(&addr).await;
        let local = history_status(local_history.entries());
        if local == announced {
            self.addr_state.lock().await.handling_statuses.remove(&addr);
            return Ok(());
        }

        let key = (addr.clone(), announced.clone());
        {
            let mut state = self.addr_state.lock().await;
            if state.requested_histories.contains(&key) {
                state.handling_statuses.remove(&addr);
                return Ok(());
            }
            state.requested_histories.insert(key.clone());
            state.cancel_stale_history(&addr);
        }
        self.addr_state.lock().await.handling_statuses.remove(&addr);

        // Mirrors the original's try/finally: the dedupe key comes out of
        // `requested_histories` no matter which branch below runs, or whether the fetch
        // itself fails — otherwise a benign race leaks it forever and `is_quiescent()` can
        // never return true again for this address.
        let result = self.reconcile_history(&addr, &announced).await;
        self.addr_state.lock().await.requested_histories.remove(&key);
        result
    }

    async fn reconcile_history(&self, addr: &str, announced: &Option<Status>) -> Result<()> {
        let scripthash = self.scripthash_deriver.derive(addr);
        let raw = self.server.get_history_for_scripthash(scripthash).await?;
        let hist: Vec<HistoryEntry> = raw
            .iter()
            .map(|r| HistoryEntry {
                tx_hash: r.tx_hash.clone(),
                height: r.height,
            })
            .collect();
        let fetched_status = history_status(&hist);

        if fetched_status != *announced {
            tracing::warn!(address = %addr, "history fingerprint mismatch; arming stale-status watchdog");
            self.arm_watchdog(addr.to_string()).await;
            return Ok(());
        }

        self.addr_state.lock().await.cancel_stale_history(addr);

        let fees = raw
            .iter()
            .filter_map(|r| r.fee.map(|fee| (r.tx_hash.clone(), fee)))
            .collect();
        self.adb.receive_history_callback(addr, hist.clone(), fees).await;
        tracing::info!(address = %addr, entries = hist.len(), "committed address history");

        tx_fetcher::fetch_missing(
            self.server.clone(),
            self.adb.clone(),
            self.task_group.clone(),
            self.tx_state.clone(),
            &hist,
            false,
        )
        .await;

        Ok(())
    }

    async fn arm_watchdog(&self, addr: String) {
        let timeout = self.generic_network_timeout;
        let addr_state = self.addr_state.clone();
        let addr_for_task = addr.clone();
        let join = self.task_group.spawn(async move {
            tokio::time::sleep(timeout).await;
            tracing::error!(address = %addr_for_task, "stale status never corrected");
            addr_state.lock().await.stale_histories.remove(&addr_for_task);
            Err(SyncError::graceful_disconnect(format!(
                "address {addr_for_task} status never reconciled within timeout"
            )))
        });
        self.addr_state
            .lock()
            .await
            .stale_histories
            .insert(addr, join.abort_handle());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        interface::RawHistoryEntry,
        task_group::TaskGroup,
        testing::{FakeAddressBook, FakeScripthashDeriver, FakeServer},
        types::Scripthash,
    };

    fn reconciler(
        server: Arc<FakeServer>,
        adb: Arc<FakeAddressBook>,
    ) -> (HistoryReconciler, tokio::sync::mpsc::UnboundedReceiver<SyncError>) {
        let (group, failures) = TaskGroup::new();
        let reconciler = HistoryReconciler {
            server,
            adb,
            scripthash_deriver: Arc::new(FakeScripthashDeriver),
            addr_state: Arc::new(Mutex::new(AddrState::default())),
            tx_state: Arc::new(Mutex::new(TxState::default())),
            task_group: Arc::new(group),
            generic_network_timeout: Duration::from_millis(50),
        };
        (reconciler, failures)
    }

    fn scripthash_for(addr: &str) -> Scripthash {
        FakeScripthashDeriver.derive(addr)
    }

    #[tokio::test]
    async fn matching_local_fingerprint_is_a_no_op() {
        let server = FakeServer::new();
        let adb = FakeAddressBook::new();
        let (reconciler, _failures) = reconciler(server, adb);

        // No history anywhere: both sides fingerprint to the empty sentinel.
        reconciler
            .on_address_status("addr1".to_string(), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn fresh_history_commits_on_matching_fingerprint() {
        let server = FakeServer::new();
        let adb = FakeAddressBook::new();
        let sh = scripthash_for("addr1");
        server
            .set_history(
                sh,
                vec![RawHistoryEntry {
                    tx_hash: "txa".to_string(),
                    height: 10,
                    fee: None,
                }],
            )
            .await;
        let announced = history_status(&[HistoryEntry {
            tx_hash: "txa".to_string(),
            height: 10,
        }]);

        let (reconciler, _failures) = reconciler(server, adb.clone());
        reconciler
            .on_address_status("addr1".to_string(), announced)
            .await
            .unwrap();

        let committed = adb.committed_history("addr1").await;
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].tx_hash, "txa");
    }

    #[tokio::test]
    async fn benign_race_does_not_leak_the_dedupe_key() {
        let server = FakeServer::new();
        let adb = FakeAddressBook::new();
        let bogus = Some(Status("not-a-real-fingerprint".to_string()));

        let (reconciler, mut failures) = reconciler(server, adb);
        reconciler
            .on_address_status("addr1".to_string(), bogus)
            .await
            .unwrap();

        // The mismatch branch arms a watchdog but must still discard the dedupe key
        // immediately, or `AddrState::is_quiescent()` can never return true again for this
        // address even once the watchdog resolves.
        assert!(
            reconciler
                .addr_state
                .lock()
                .await
                .requested_histories
                .is_empty()
        );

        let _ = tokio::time::timeout(Duration::from_secs(1), failures.recv()).await;
        assert!(reconciler.addr_state.lock().await.is_quiescent());
    }

    #[tokio::test]
    async fn fingerprint_mismatch_arms_a_watchdog_that_eventually_fails() {
        let server = FakeServer::new();
        let adb = FakeAddressBook::new();
        // Server announces a status that doesn't match anything it can actually produce.
        let bogus = Some(Status("not-a-real-fingerprint".to_string()));

        let (reconciler, mut failures) = reconciler(server, adb);
        reconciler
            .on_address_status("addr1".to_string(), bogus)
            .await
            .unwrap();

        let failure = tokio::time::timeout(Duration::from_secs(1), failures.recv())
            .await
            .expect("watchdog should fire within the timeout")
            .expect("failure channel should not close");
        assert!(matches!(failure, SyncError::GracefulDisconnect(_)));
    }

    #[tokio::test]
    async fn fresh_notification_cancels_a_pending_watchdog() {
        let server = FakeServer::new();
        let adb = FakeAddressBook::new();
        let sh = scripthash_for("addr1");
        let bogus = Some(Status("not-a-real-fingerprint".to_string()));

        let (reconciler, mut failures) = reconciler(server.clone(), adb.clone());
        reconciler
            .on_address_status("addr1".to_string(), bogus)
            .await
            .unwrap();
        assert!(reconciler.addr_state.lock().await.stale_histories.contains_key("addr1"));

        // A corrected announcement arrives before the watchdog fires.
        server
            .set_history(
                sh,
                vec![RawHistoryEntry {
                    tx_hash: "txa".to_string(),
                    height: 10,
                    fee: None,
                }],
            )
            .await;
        let corrected = history_status(&[HistoryEntry {
            tx_hash: "txa".to_string(),
            height: 10,
        }]);
        reconciler
            .on_address_status("addr1".to_string(), corrected)
            .await
            .unwrap();

        assert!(!reconciler.addr_state.lock().await.stale_histories.contains_key("addr1"));
        assert!(tokio::time::timeout(Duration::from_millis(200), failures.recv())
            .await
            .is_err());
    }
}
