//! Webhook-delivery variant built on [`SubscriptionBase`] (§4.7): watches a dynamic set of
//! `(address, url)` registrations and POSTs a JSON status payload on every change.
//!
//! Independent of [`crate::synchronizer::Synchronizer`] — it enforces no fingerprint/database
//! invariants of its own, only best-effort delivery.

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};

use crate::{
    error::Result,
    interface::{AddressValidator, AssetNameValidator, ServerInterface},
    subscription_base::{ScripthashDeriver, SubscriptionBase},
    task_group::TaskGroup,
    types::Status,
};

#[derive(Serialize)]
struct StatusPayload<'a> {
    address: &'a str,
    status: Option<String>,
}

pub struct Notifier {
    base: Arc<SubscriptionBase>,
    http: reqwest::Client,
    watches: Arc<Mutex<HashMap<String, Vec<String>>>>,
    watch_tx: mpsc::UnboundedSender<(String, String)>,
    watch_rx: Mutex<Option<mpsc::UnboundedReceiver<(String, String)>>>,
}

impl Notifier {
    pub fn new(
        server: Arc<dyn ServerInterface>,
        address_validator: Arc<dyn AddressValidator>,
        asset_validator: Arc<dyn AssetNameValidator>,
        scripthash_deriver: Arc<dyn ScripthashDeriver>,
        network_request_concurrency: usize,
    ) -> Self {
        let (task_group, _failures) = TaskGroup::new();
        let base = Arc::new(SubscriptionBase::new(
            server,
            address_validator,
            asset_validator,
            scripthash_deriver,
            network_request_concurrency,
            Arc::new(task_group),
        ));
        let (watch_tx, watch_rx) = mpsc::unbounded_channel();
        Self {
            base,
            http: reqwest::Client::new(),
            watches: Arc::new(Mutex::new(HashMap::new())),
            watch_tx,
            watch_rx: Mutex::new(Some(watch_rx)),
        }
    }

    /// Enqueues a webhook registration. Non-blocking: the registration is applied by
    /// [`Notifier::run`]'s drain loop, which also subscribes the address if it isn't already.
    pub fn start_watching_addr(&self, addr: &str, webhook_url: &str) {
        let _ = self.watch_tx.send((addr.to_string(), webhook_url.to_string()));
    }

    /// Runs forever: drains webhook registrations, re-subscribing every watched address on
    /// restart, and dispatches a POST for each status change on a watched address.
    pub async fn run(self: Arc<Self>) {
        let mut rx = self
            .watch_rx
            .lock()
            .await
            .take()
            .expect("Notifier::run called more than once");

        let registration_loop = {
            let this = self.clone();
            async move {
                while let Some((addr, url)) = rx.recv().await {
                    let is_new = {
                        let mut watches = this.watches.lock().await;
                        let urls = watches.entry(addr.clone()).or_default();
                        let is_new = urls.is_empty();
                        if !urls.contains(&url) {
                            urls.push(url);
                        }
                        is_new
                    };
                    if is_new {
                        this.base.clone().request_subscribe_address(addr).await;
                    }
                }
            }
        };

        let dispatch_loop = {
            let this = self.clone();
            this.base.clone().run_status_dispatch(Arc::new(move |addr, status| {
                let this = this.clone();
                async move { this.deliver(addr, status).await }.boxed()
            }))
        };

        tokio::join!(registration_loop, dispatch_loop);
    }

    async fn deliver(&self, addr: String, status: Option<Status>) -> Result<()> {
        let urls = {
            let watches = self.watches.lock().await;
            watches.get(&addr).cloned().unwrap_or_default()
        };

        let payload = StatusPayload {
            address: &addr,
            status: status.map(|s| s.0),
        };

        for url in urls {
            match self.http.post(&url).json(&payload).send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::info!(address = %addr, %url, "delivered status webhook");
                }
                Ok(resp) => {
                    tracing::warn!(address = %addr, %url, status = %resp.status(), "webhook delivery rejected");
                }
                Err(err) => {
                    tracing::warn!(address = %addr, %url, error = %err, "webhook delivery failed");
                }
            }
        }

        self.base.addr_state.lock().await.handling_statuses.remove(&addr);
        Ok(())
    }
}
