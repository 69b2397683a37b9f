//! The core engine (§4.6): bootstraps subscriptions, runs the steady-state main loop, and
//! exposes the up-to-date oracle.

use std::sync::Arc;

use futures::FutureExt;
use rand::seq::SliceRandom;
use tokio::sync::Mutex;

use crate::{
    asset_reconciler::AssetReconciler,
    config::SyncConfig,
    error::Result,
    history_reconciler::HistoryReconciler,
    interface::{AddressBook, AssetNameValidator, AddressValidator, ServerInterface},
    state::TxState,
    subscription_base::{ScripthashDeriver, SubscriptionBase},
    task_group::TaskGroup,
};

pub struct Synchronizer {
    base: Arc<SubscriptionBase>,
    adb: Arc<dyn AddressBook>,
    deriver: Arc<dyn ScripthashDeriver>,
    tx_state: Arc<Mutex<TxState>>,
    init_done: Arc<std::sync::atomic::AtomicBool>,
    config: SyncConfig,
}

impl Synchronizer {
    pub fn new(
        server: Arc<dyn ServerInterface>,
        adb: Arc<dyn AddressBook>,
        address_validator: Arc<dyn AddressValidator>,
        asset_validator: Arc<dyn AssetNameValidator>,
        scripthash_deriver: Arc<dyn ScripthashDeriver>,
        config: SyncConfig,
    ) -> (Self, tokio::sync::mpsc::UnboundedReceiver<crate::error::SyncError>) {
        let (task_group, failures) = TaskGroup::new();
        let task_group = Arc::new(task_group);
        let base = Arc::new(SubscriptionBase::new(
            server,
            address_validator,
            asset_validator,
            scripthash_deriver.clone(),
            config.network_request_concurrency,
            task_group,
        ));
        (
            Self {
                base,
                adb,
                deriver: scripthash_deriver,
                tx_state: Arc::new(Mutex::new(TxState::default())),
                init_done: Arc::new(std::sync::atomic::AtomicBool::new(false)),
                config,
            },
            failures,
        )
    }

    pub async fn add(&self, addr: &str) -> Result<()> {
        self.base.add(addr).await
    }

    pub async fn add_asset(&self, name: &str) -> Result<()> {
        self.base.add_asset(name).await
    }

    /// Runs forever: bootstrap, then the steady-state tick loop and both dispatch loops,
    /// concurrently. Returns only if one of those futures returns (it never normally does;
    /// failures propagate through the supervising `TaskGroup`'s failure channel instead).
    pub async fn run(self: Arc<Self>) {
        self.bootstrap().await;

        let history_reconciler = Arc::new(HistoryReconciler {
            server: self.base.server.clone(),
            adb: self.adb.clone(),
            scripthash_deriver: self.deriver.clone(),
            addr_state: self.base.addr_state.clone(),
            tx_state: self.tx_state.clone(),
            task_group: self.base.task_group.clone(),
            generic_network_timeout: self.config.generic_network_timeout,
        });
        let asset_reconciler = Arc::new(AssetReconciler {
            server: self.base.server.clone(),
            adb: self.adb.clone(),
            asset_state: self.base.asset_state.clone(),
            task_group: self.base.task_group.clone(),
            generic_network_timeout: self.config.generic_network_timeout,
        });

        let status_dispatch = {
            let hr = history_reconciler.clone();
            self.base.clone().run_status_dispatch(Arc::new(move |addr, status| {
                let hr = hr.clone();
                async move { hr.on_address_status(addr, status).await }.boxed()
            }))
        };
        let asset_dispatch = {
            let ar = asset_reconciler.clone();
            self.base
                .clone()
                .run_asset_status_dispatch(Arc::new(move |asset, status| {
                    let ar = ar.clone();
                    async move { ar.on_asset_status(asset, status).await }.boxed()
                }))
        };
        let tick_loop = self.clone().run_tick_loop();

        tokio::join!(status_dispatch, asset_dispatch, tick_loop);
    }

    async fn bootstrap(&self) {
        tracing::info!(up_to_date = false, "bootstrap starting");
        self.adb.up_to_date_changed().await;

        for addr in self.adb.get_history().await {
            let hist = self.adb.get_addr_history(&addr).await;
            crate::tx_fetcher::fetch_missing(
                self.base.server.clone(),
                self.adb.clone(),
                self.base.task_group.clone(),
                self.tx_state.clone(),
                hist.entries(),
                true,
            )
            .await;
        }

        let mut addresses = self.adb.get_addresses().await;
        addresses.shuffle(&mut rand::thread_rng());
        for addr in addresses {
            self.base.request_subscribe_address(addr).await;
        }

        let mut assets = self.adb.get_assets().await;
        assets.shuffle(&mut rand::thread_rng());
        for asset in assets {
            self.base.request_subscribe_asset(asset).await;
        }

        self.init_done.store(true, std::sync::atomic::Ordering::Relaxed);
    }

    async fn run_tick_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.main_loop_interval);
        let mut was_up_to_date = false;
        loop {
            interval.tick().await;

            let adding: Vec<String> = {
                let state = self.base.addr_state.lock().await;
                state.adding.iter().cloned().collect()
            };
            for addr in adding {
                self.base.clone().request_subscribe_address(addr).await;
            }
            let adding_assets: Vec<String> = {
                let state = self.base.asset_state.lock().await;
                state.adding.iter().cloned().collect()
            };
            for asset in adding_assets {
                self.base.clone().request_subscribe_asset(asset).await;
            }

            let processed = {
                let mut addr_state = self.base.addr_state.lock().await;
                let mut asset_state = self.base.asset_state.lock().await;
                let processed = addr_state.processed_some_notifications
                    || asset_state.processed_some_notifications;
                addr_state.processed_some_notifications = false;
                asset_state.processed_some_notifications = false;
                processed
            };

            let up_to_date = self.is_up_to_date().await;
            if up_to_date != was_up_to_date || (up_to_date && processed) {
                was_up_to_date = up_to_date;
                tracing::info!(up_to_date, "up-to-date state changed");
                self.adb.up_to_date_changed().await;
            }
        }
    }

    /// §3 invariant 5: conjunction of init-done, every in-flight set empty, both queues empty.
    pub async fn is_up_to_date(&self) -> bool {
        if !self.init_done.load(std::sync::atomic::Ordering::Relaxed) {
            return false;
        }
        let addr_quiescent = self.base.addr_state.lock().await.is_quiescent();
        let asset_quiescent = self.base.asset_state.lock().await.is_quiescent();
        let tx_quiescent = self.tx_state.lock().await.is_quiescent();
        let queues_quiescent = self.base.notification_queues_quiescent();
        addr_quiescent && asset_quiescent && tx_quiescent && queues_quiescent
    }

    pub fn requests_sent(&self) -> u64 {
        self.base.requests_sent()
    }

    pub fn requests_answered(&self) -> u64 {
        self.base.requests_answered()
    }
}
