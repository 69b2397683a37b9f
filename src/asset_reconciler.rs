//! `_on_asset_status`: symmetric to [`crate::history_reconciler`], plus the metadata-rollback
//! guard that rejects a server trying to replay an older, already-superseded asset record
//! (§4.4).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::{
    error::{Result, SyncError},
    fingerprint::asset_status,
    interface::{AddressBook, RawAssetMetadata, ServerInterface},
    state::AssetState,
    task_group::TaskGroup,
    types::{AssetMetadata, Status},
};

pub(crate) struct AssetReconciler {
    pub server: Arc<dyn ServerInterface>,
    pub adb: Arc<dyn AddressBook>,
    pub asset_state: Arc<Mutex<AssetState>>,
    pub task_group: Arc<TaskGroup>,
    pub generic_network_timeout: Duration,
}

impl AssetReconciler {
    pub async fn on_asset_status(&self, asset: String, announced: Option<Status>) -> Result<()> {
        let local = asset_status(self.adb.get_asset_metadata(&asset).await.as_ref());
        if local == announced {
            self.asset_state.lock().await.handling_statuses.remove(&asset);
            return Ok(());
        }

        let key = (asset.clone(), announced.clone());
        {
            let mut state = self.asset_state.lock().await;
            if state.requested_metadata.contains(&key) {
                state.handling_statuses.remove(&asset);
                return Ok(());
            }
            state.requested_metadata.insert(key.clone());
            state.cancel_stale_metadata(&asset);
        }
        self.asset_state.lock().await.handling_statuses.remove(&asset);

        // As in `HistoryReconciler`: discard the dedupe key unconditionally, matching the
        // original's `discard(...)` before raising, so a benign race or a rejected regression
        // never leaves `requested_metadata` permanently non-empty.
        let result = self.reconcile_metadata(&asset, &announced).await;
        self.asset_state.lock().await.requested_metadata.remove(&key);
        result
    }

    async fn reconcile_metadata(&self, asset: &str, announced: &Option<Status>) -> Result<()> {
        let raw: RawAssetMetadata = self.server.get_asset_metadata(asset).await?;
        let metadata: AssetMetadata = raw.clone().into();
        let fetched_status = asset_status(Some(&metadata));

        if fetched_status != *announced {
            tracing::warn!(asset = %asset, "asset metadata fingerprint mismatch; arming stale-status watchdog");
            self.arm_watchdog(asset.to_string()).await;
            return Ok(());
        }

        self.asset_state.lock().await.cancel_stale_metadata(asset);

        if let Some((_, verified_height)) =
            self.adb.get_verified_asset_metadata_base_source(asset).await
        {
            if raw.source_height < verified_height {
                return Err(SyncError::graceful_disconnect(format!(
                    "asset {asset}: server sent metadata from height {} older than the verified base source at {verified_height}",
                    raw.source_height
                )));
            }
        }

        self.adb
            .add_unverified_or_unconfirmed_asset_metadata(asset, metadata)
            .await?;
        tracing::info!(asset = %asset, "committed asset metadata");

        Ok(())
    }

    async fn arm_watchdog(&self, asset: String) {
        let timeout = self.generic_network_timeout;
        let asset_state = self.asset_state.clone();
        let asset_for_task = asset.clone();
        let join = self.task_group.spawn(async move {
            tokio::time::sleep(timeout).await;
            tracing::error!(asset = %asset_for_task, "stale asset status never corrected");
            asset_state.lock().await.stale_metadata.remove(&asset_for_task);
            Err(SyncError::graceful_disconnect(format!(
                "asset {asset_for_task} status never reconciled within timeout"
            )))
        });
        self.asset_state
            .lock()
            .await
            .stale_metadata
            .insert(asset, join.abort_handle());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        interface::RawAssetMetadata,
        task_group::TaskGroup,
        testing::{FakeAddressBook, FakeServer},
    };

    fn reconciler(
        server: Arc<FakeServer>,
        adb: Arc<FakeAddressBook>,
    ) -> (AssetReconciler, tokio::sync::mpsc::UnboundedReceiver<SyncError>) {
        let (group, failures) = TaskGroup::new();
        (
            AssetReconciler {
                server,
                adb,
                asset_state: Arc::new(Mutex::new(AssetState::default())),
                task_group: Arc::new(group),
                generic_network_timeout: Duration::from_millis(50),
            },
            failures,
        )
    }

    fn metadata(sats: u64, source_height: i64) -> RawAssetMetadata {
        RawAssetMetadata {
            sats_in_circulation: sats,
            divisions: 0,
            reissuable: false,
            has_ipfs: false,
            ipfs: None,
            source_tx_hash: "createtx".to_string(),
            source_height,
            source_divisions_tx: None,
            source_ipfs_tx: None,
        }
    }

    #[tokio::test]
    async fn commits_matching_metadata() {
        let server = FakeServer::new();
        let adb = FakeAddressBook::new();
        server.set_asset_metadata("MYASSET", metadata(1000, 5)).await;
        let announced = asset_status(Some(&metadata(1000, 5).into()));

        let (reconciler, _failures) = reconciler(server, adb.clone());
        reconciler
            .on_asset_status("MYASSET".to_string(), announced)
            .await
            .unwrap();

        let committed = adb.committed_asset_metadata("MYASSET").await.unwrap();
        assert_eq!(committed.sats_in_circulation, 1000);
    }

    #[tokio::test]
    async fn rejects_metadata_older_than_verified_base() {
        let server = FakeServer::new();
        let adb = FakeAddressBook::new();
        adb.set_verified_asset_base("MYASSET", "createtx", 100).await;
        server.set_asset_metadata("MYASSET", metadata(1000, 50)).await;
        let announced = asset_status(Some(&metadata(1000, 50).into()));

        let (reconciler, _failures) = reconciler(server, adb);
        let err = reconciler
            .on_asset_status("MYASSET".to_string(), announced)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::GracefulDisconnect(_)));

        // Rejecting a regression must still discard the dedupe key, or the asset can never
        // be reconciled again.
        assert!(
            reconciler
                .asset_state
                .lock()
                .await
                .requested_metadata
                .is_empty()
        );
    }

    #[tokio::test]
    async fn benign_race_does_not_leak_the_dedupe_key() {
        let server = FakeServer::new();
        let adb = FakeAddressBook::new();
        let bogus = Some(Status("not-a-real-fingerprint".to_string()));

        let (reconciler, mut failures) = reconciler(server, adb);
        reconciler
            .on_asset_status("MYASSET".to_string(), bogus)
            .await
            .unwrap();

        assert!(
            reconciler
                .asset_state
                .lock()
                .await
                .requested_metadata
                .is_empty()
        );

        let _ = tokio::time::timeout(Duration::from_secs(1), failures.recv()).await;
        assert!(reconciler.asset_state.lock().await.is_quiescent());
    }

    #[tokio::test]
    async fn metadata_fingerprint_mismatch_arms_a_watchdog() {
        let server = FakeServer::new();
        let adb = FakeAddressBook::new();
        let bogus = Some(Status("not-a-real-fingerprint".to_string()));

        let (reconciler, mut failures) = reconciler(server, adb);
        reconciler
            .on_asset_status("MYASSET".to_string(), bogus)
            .await
            .unwrap();

        let failure = tokio::time::timeout(Duration::from_secs(1), failures.recv())
            .await
            .expect("watchdog should fire within the timeout")
            .expect("failure channel should not close");
        assert!(matches!(failure, SyncError::GracefulDisconnect(_)));
    }
}
