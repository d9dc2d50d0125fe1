use async_trait::async_trait;
use shared::domain::{Address, TxHash};
use tokio::sync::broadcast;

pub mod abi;
pub mod contract;
pub mod rpc;
pub mod wallet;

/// Raw candidate row exactly as decoded from the contract return data, before
/// any presentation defaults are applied. `vote_count` keeps the
/// contract-native hex quantity encoding (e.g. `"0x2a"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRecord {
    pub name: String,
    pub vote_count: String,
}

/// Injected wallet capability: account enumeration, change notifications, and
/// (through the node it fronts) transaction signing.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Whether a wallet backend exists in this environment at all.
    fn is_available(&self) -> bool;
    async fn request_accounts(&self) -> anyhow::Result<Vec<Address>>;
    fn subscribe_accounts_changed(&self) -> broadcast::Receiver<Vec<Address>>;
}

/// Read/write surface of the deployed voting contract.
#[async_trait]
pub trait ElectionContract: Send + Sync {
    async fn candidate_tallies(&self) -> anyhow::Result<Vec<CandidateRecord>>;
    async fn voting_open(&self) -> anyhow::Result<bool>;
    /// Remaining voting time as the contract-native hex quantity.
    async fn remaining_time(&self) -> anyhow::Result<String>;
    async fn has_voted(&self, account: &Address) -> anyhow::Result<bool>;
    async fn submit_vote(&self, from: &Address, candidate_index: u64) -> anyhow::Result<TxHash>;
    async fn wait_for_confirmation(&self, tx: &TxHash) -> anyhow::Result<()>;
}
