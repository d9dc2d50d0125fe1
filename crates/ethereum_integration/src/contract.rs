//! JSON-RPC binding for the deployed voting contract.

use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::json;
use shared::domain::{Address, TxHash};
use tracing::debug;

use crate::{abi, rpc::JsonRpcClient, CandidateRecord, ElectionContract};

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

const VOTE_SIGNATURE: &str = "vote(uint256)";
const VOTERS_SIGNATURE: &str = "voters(address)";
const TALLIES_SIGNATURE: &str = "getAllVotesOfCandiates()";
const STATUS_SIGNATURE: &str = "getVotingStatus()";
const REMAINING_TIME_SIGNATURE: &str = "getRemainingTime()";

pub struct RpcElectionContract {
    rpc: Arc<JsonRpcClient>,
    address: Address,
}

impl RpcElectionContract {
    pub fn new(rpc: Arc<JsonRpcClient>, address: Address) -> Self {
        Self { rpc, address }
    }

    async fn eth_call(&self, data: String) -> Result<String> {
        let result = self
            .rpc
            .request(
                "eth_call",
                json!([{ "to": self.address.0, "data": data }, "latest"]),
            )
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("eth_call returned a non-string payload"))
    }
}

#[async_trait]
impl ElectionContract for RpcElectionContract {
    async fn candidate_tallies(&self) -> Result<Vec<CandidateRecord>> {
        let payload = self.eth_call(abi::call_data(TALLIES_SIGNATURE, &[])).await?;
        Ok(abi::decode_candidate_records(&payload)?)
    }

    async fn voting_open(&self) -> Result<bool> {
        let payload = self.eth_call(abi::call_data(STATUS_SIGNATURE, &[])).await?;
        Ok(abi::decode_bool(&payload)?)
    }

    async fn remaining_time(&self) -> Result<String> {
        let payload = self
            .eth_call(abi::call_data(REMAINING_TIME_SIGNATURE, &[]))
            .await?;
        Ok(abi::decode_quantity(&payload)?)
    }

    async fn has_voted(&self, account: &Address) -> Result<bool> {
        let arg = abi::encode_address(account)?;
        let payload = self
            .eth_call(abi::call_data(VOTERS_SIGNATURE, &[arg]))
            .await?;
        Ok(abi::decode_bool(&payload)?)
    }

    async fn submit_vote(&self, from: &Address, candidate_index: u64) -> Result<TxHash> {
        let data = abi::call_data(VOTE_SIGNATURE, &[abi::encode_uint(candidate_index)]);
        let result = self
            .rpc
            .request(
                "eth_sendTransaction",
                json!([{ "from": from.0, "to": self.address.0, "data": data }]),
            )
            .await?;
        let hash = result
            .as_str()
            .ok_or_else(|| anyhow!("eth_sendTransaction returned a non-string hash"))?;
        Ok(TxHash(hash.to_string()))
    }

    async fn wait_for_confirmation(&self, tx: &TxHash) -> Result<()> {
        // Polls until the node reports a receipt; cancellation is the
        // caller's concern.
        loop {
            let receipt = self
                .rpc
                .request("eth_getTransactionReceipt", json!([tx.0]))
                .await?;
            if !receipt.is_null() {
                debug!(tx = %tx, "vote transaction confirmed");
                return Ok(());
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}
