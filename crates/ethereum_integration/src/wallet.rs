//! Wallet backend over a JSON-RPC node with unlocked accounts.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use shared::domain::Address;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::warn;

use crate::{rpc::JsonRpcClient, WalletProvider};

const ACCOUNTS_POLL_INTERVAL: Duration = Duration::from_secs(5);
const ACCOUNTS_CHANNEL_CAPACITY: usize = 16;

/// Account-change notifications are synthesized by diffing `eth_accounts`
/// on an interval, since plain HTTP nodes push no events.
pub struct RpcWalletProvider {
    rpc: Arc<JsonRpcClient>,
    accounts_tx: broadcast::Sender<Vec<Address>>,
}

impl RpcWalletProvider {
    pub fn new(rpc: Arc<JsonRpcClient>) -> Self {
        let (accounts_tx, _) = broadcast::channel(ACCOUNTS_CHANNEL_CAPACITY);
        Self { rpc, accounts_tx }
    }

    async fn fetch_accounts(&self) -> Result<Vec<Address>> {
        let result = self.rpc.request("eth_accounts", json!([])).await?;
        let accounts: Vec<String> = serde_json::from_value(result)?;
        Ok(accounts.into_iter().map(Address).collect())
    }

    /// Starts the accounts poller; abort the returned handle on teardown.
    pub fn spawn_accounts_poller(self: &Arc<Self>) -> JoinHandle<()> {
        let provider = Arc::clone(self);
        tokio::spawn(async move {
            let mut last: Option<Vec<Address>> = None;
            loop {
                match provider.fetch_accounts().await {
                    Ok(accounts) => {
                        if last.as_ref() != Some(&accounts) {
                            last = Some(accounts.clone());
                            let _ = provider.accounts_tx.send(accounts);
                        }
                    }
                    Err(err) => warn!("accounts poll failed: {err}"),
                }
                tokio::time::sleep(ACCOUNTS_POLL_INTERVAL).await;
            }
        })
    }
}

#[async_trait]
impl WalletProvider for RpcWalletProvider {
    fn is_available(&self) -> bool {
        true
    }

    async fn request_accounts(&self) -> Result<Vec<Address>> {
        self.fetch_accounts().await
    }

    fn subscribe_accounts_changed(&self) -> broadcast::Receiver<Vec<Address>> {
        self.accounts_tx.subscribe()
    }
}
