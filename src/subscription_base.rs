//! Subscribe over the network to a set of addresses and assets, and dispatch a callback
//! whenever the server announces a status change (§4.2).
//!
//! Both [`crate::synchronizer::Synchronizer`] and [`crate::notifier::Notifier`] compose a
//! `SubscriptionBase` rather than inheriting from it (there being no inheritance in Rust);
//! each supplies its own `_on_address_status`/`_on_asset_status` callback to
//! [`SubscriptionBase::run_status_dispatch`] / [`SubscriptionBase::run_asset_status_dispatch`].

use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use futures::future::BoxFuture;
use tokio::sync::{mpsc, Mutex, Semaphore};

use crate::{
    error::{Result, SyncError},
    interface::{AddressValidator, AssetNameValidator, AssetStatusSender, ServerInterface, StatusSender},
    state::{AddrState, AssetState},
    task_group::TaskGroup,
    types::{Scripthash, Status},
};

/// Derives the server-side subscription key for an address. Address derivation policy is
/// out of scope for the core (§1); this is the seam a wallet implementation plugs into.
pub trait ScripthashDeriver: Send + Sync {
    fn derive(&self, addr: &str) -> Scripthash;
}

pub(crate) type StatusCallback =
    Arc<dyn Fn(String, Option<Status>) -> BoxFuture<'static, Result<()>> + Send + Sync>;
pub(crate) type AssetStatusCallback =
    Arc<dyn Fn(String, Option<Status>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Clone)]
pub(crate) struct SubscriptionBase {
    pub(crate) server: Arc<dyn ServerInterface>,
    address_validator: Arc<dyn AddressValidator>,
    asset_validator: Arc<dyn AssetNameValidator>,
    scripthash_deriver: Arc<dyn ScripthashDeriver>,
    semaphore: Arc<Semaphore>,
    requests_sent: Arc<AtomicU64>,
    requests_answered: Arc<AtomicU64>,
    pub(crate) addr_state: Arc<Mutex<AddrState>>,
    pub(crate) asset_state: Arc<Mutex<AssetState>>,
    status_tx: StatusSender,
    status_rx: Arc<Mutex<mpsc::UnboundedReceiver<(Scripthash, Option<Status>)>>>,
    status_pending: Arc<AtomicUsize>,
    asset_status_tx: AssetStatusSender,
    asset_status_rx: Arc<Mutex<mpsc::UnboundedReceiver<(String, Option<Status>)>>>,
    asset_status_pending: Arc<AtomicUsize>,
    pub(crate) task_group: Arc<TaskGroup>,
}

impl SubscriptionBase {
    pub(crate) fn new(
        server: Arc<dyn ServerInterface>,
        address_validator: Arc<dyn AddressValidator>,
        asset_validator: Arc<dyn AssetNameValidator>,
        scripthash_deriver: Arc<dyn ScripthashDeriver>,
        network_request_concurrency: usize,
        task_group: Arc<TaskGroup>,
    ) -> Self {
        let (status_tx_raw, status_rx) = mpsc::unbounded_channel();
        let (asset_status_tx_raw, asset_status_rx) = mpsc::unbounded_channel();
        let status_pending = Arc::new(AtomicUsize::new(0));
        let asset_status_pending = Arc::new(AtomicUsize::new(0));
        Self {
            server,
            address_validator,
            asset_validator,
            scripthash_deriver,
            semaphore: Arc::new(Semaphore::new(network_request_concurrency)),
            requests_sent: Arc::new(AtomicU64::new(0)),
            requests_answered: Arc::new(AtomicU64::new(0)),
            addr_state: Arc::new(Mutex::new(AddrState::default())),
            asset_state: Arc::new(Mutex::new(AssetState::default())),
            status_tx: StatusSender::new(status_tx_raw, status_pending.clone()),
            status_rx: Arc::new(Mutex::new(status_rx)),
            status_pending,
            asset_status_tx: AssetStatusSender::new(asset_status_tx_raw, asset_status_pending.clone()),
            asset_status_rx: Arc::new(Mutex::new(asset_status_rx)),
            asset_status_pending,
            task_group,
        }
    }

    /// §3 invariant 5's "both notification queues empty" clause: true iff neither channel
    /// has a notification sitting unpopped by its dispatch loop.
    pub(crate) fn notification_queues_quiescent(&self) -> bool {
        self.status_pending.load(Ordering::Relaxed) == 0
            && self.asset_status_pending.load(Ordering::Relaxed) == 0
    }

    pub(crate) fn requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    pub(crate) fn requests_answered(&self) -> u64 {
        self.requests_answered.load(Ordering::Relaxed)
    }

    /// Validates `addr` and lets a later `drain_adding_addrs` pass actually subscribe it.
    /// This is non-blocking: `is_up_to_date` already sees `addr` as outstanding work.
    pub async fn add(&self, addr: &str) -> Result<()> {
        if !self.address_validator.validate(addr) {
            return Err(SyncError::invalid_input(format!("invalid address {addr}")));
        }
        self.addr_state.lock().await.adding.insert(addr.to_string());
        Ok(())
    }

    pub async fn add_asset(&self, name: &str) -> Result<()> {
        if let Err(reason) = self.asset_validator.validate(name) {
            return Err(SyncError::invalid_input(format!("invalid asset: {reason}")));
        }
        self.asset_state.lock().await.adding.insert(name.to_string());
        Ok(())
    }

    /// Subscribes `addr`, idempotent against an already-in-flight subscription (§4.2).
    ///
    /// `addr` leaves `adding` the instant it enters `requested`, not when the RPC
    /// completes — an address must never sit in both sets at once (§3 invariant 1).
    pub(crate) async fn request_subscribe_address(self: &Arc<Self>, addr: String) {
        {
            let mut state = self.addr_state.lock().await;
            if state.requested.contains(&addr) {
                state.adding.remove(&addr);
                return;
            }
            state.requested.insert(addr.clone());
            state.adding.remove(&addr);
        }
        let this = self.clone();
        let addr_for_task = addr.clone();
        this.task_group
            .clone()
            .spawn(async move { this.subscribe_address_rpc(&addr_for_task).await });
    }

    pub(crate) async fn request_subscribe_asset(self: &Arc<Self>, name: String) {
        {
            let mut state = self.asset_state.lock().await;
            if state.requested.contains(&name) {
                state.adding.remove(&name);
                return;
            }
            state.requested.insert(name.clone());
            state.adding.remove(&name);
        }
        let this = self.clone();
        let name_for_task = name.clone();
        this.task_group
            .clone()
            .spawn(async move { this.subscribe_asset_rpc(&name_for_task).await });
    }

    async fn subscribe_address_rpc(&self, addr: &str) -> Result<()> {
        let scripthash = self.scripthash_deriver.derive(addr);
        self.addr_state
            .lock()
            .await
            .scripthash_to_address
            .insert(scripthash, addr.to_string());

        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore never closed while the synchronizer is alive");
        let result = self
            .server
            .subscribe_scripthash(scripthash, self.status_tx.clone())
            .await;
        drop(permit);

        match result {
            Ok(()) => {
                self.requests_answered.fetch_add(1, Ordering::Relaxed);
                tracing::info!(address = %addr, "subscribed");
                Ok(())
            }
            Err(SyncError::Rpc(msg)) if msg.contains("history too large") => Err(
                SyncError::graceful_disconnect(format!("address {addr} history too large")),
            ),
            Err(e) => Err(e),
        }
    }

    async fn subscribe_asset_rpc(&self, name: &str) -> Result<()> {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore never closed while the synchronizer is alive");
        let result = self
            .server
            .subscribe_asset(name.to_string(), self.asset_status_tx.clone())
            .await;
        drop(permit);
        result?;
        self.requests_answered.fetch_add(1, Ordering::Relaxed);
        tracing::info!(asset = %name, "subscribed");
        Ok(())
    }

    /// Infinite dispatch loop: pops a queued `(scripthash, status)`, marks it as handling,
    /// and spawns `on_status` as a supervised task (§4.2).
    pub(crate) async fn run_status_dispatch(self: Arc<Self>, on_status: StatusCallback) {
        let mut rx = self.status_rx.lock().await;
        loop {
            let (scripthash, status) = match rx.recv().await {
                Some(item) => item,
                None => return,
            };
            self.status_pending.fetch_sub(1, Ordering::Relaxed);

            let addr = {
                let mut state = self.addr_state.lock().await;
                let addr = match state.scripthash_to_address.get(&scripthash).cloned() {
                    Some(addr) => addr,
                    None => {
                        tracing::warn!(scripthash = %scripthash, "status for unknown scripthash; ignoring");
                        continue;
                    }
                };
                state.handling_statuses.insert(addr.clone());
                state.requested.remove(&addr);
                state.processed_some_notifications = true;
                addr
            };

            let cb = on_status.clone();
            self.task_group.spawn(async move { cb(addr, status).await });
        }
    }

    pub(crate) async fn run_asset_status_dispatch(self: Arc<Self>, on_status: AssetStatusCallback) {
        let mut rx = self.asset_status_rx.lock().await;
        loop {
            let (asset, status) = match rx.recv().await {
                Some(item) => item,
                None => return,
            };
            self.asset_status_pending.fetch_sub(1, Ordering::Relaxed);

            {
                let mut state = self.asset_state.lock().await;
                state.handling_statuses.insert(asset.clone());
                state.requested.remove(&asset);
                state.processed_some_notifications = true;
            }

            let cb = on_status.clone();
            self.task_group.spawn(async move { cb(asset, status).await });
        }
    }
}
