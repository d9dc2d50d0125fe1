use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethereum_integration::{
    abi::parse_quantity, CandidateRecord, ElectionContract, WalletProvider,
};
use shared::domain::{Address, Candidate, TxHash};
use thiserror::Error;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{error, info, warn};

pub mod decode;

const EVENTS_CHANNEL_CAPACITY: usize = 256;

/// Wallet fallback for environments with no injected provider: reports
/// itself unavailable and rejects every account request.
pub struct MissingWalletProvider;

#[async_trait]
impl WalletProvider for MissingWalletProvider {
    fn is_available(&self) -> bool {
        false
    }

    async fn request_accounts(&self) -> Result<Vec<Address>> {
        Err(anyhow!("no wallet provider detected"))
    }

    fn subscribe_accounts_changed(&self) -> broadcast::Receiver<Vec<Address>> {
        broadcast::channel(1).1
    }
}

pub struct MissingElectionContract;

#[async_trait]
impl ElectionContract for MissingElectionContract {
    async fn candidate_tallies(&self) -> Result<Vec<CandidateRecord>> {
        Err(anyhow!("election contract binding unavailable"))
    }

    async fn voting_open(&self) -> Result<bool> {
        Err(anyhow!("election contract binding unavailable"))
    }

    async fn remaining_time(&self) -> Result<String> {
        Err(anyhow!("election contract binding unavailable"))
    }

    async fn has_voted(&self, _account: &Address) -> Result<bool> {
        Err(anyhow!("election contract binding unavailable"))
    }

    async fn submit_vote(&self, _from: &Address, _candidate_index: u64) -> Result<TxHash> {
        Err(anyhow!("election contract binding unavailable"))
    }

    async fn wait_for_confirmation(&self, _tx: &TxHash) -> Result<()> {
        Err(anyhow!("election contract binding unavailable"))
    }
}

#[derive(Debug, Error)]
pub enum VoteError {
    #[error("no connected account to vote from")]
    NotConnected,
    #[error("vote submission failed: {0}")]
    Submit(#[source] anyhow::Error),
    #[error("vote confirmation failed: {0}")]
    Confirmation(#[source] anyhow::Error),
}

#[derive(Debug, Clone)]
pub enum ControllerEvent {
    SessionChanged {
        connected: bool,
        account: Option<Address>,
    },
    CandidatesUpdated(Vec<Candidate>),
    VotingStatusChanged(bool),
    RemainingTimeUpdated(u64),
    EligibilityChanged(bool),
    Error(String),
}

/// Which of the three presentational views a front-end should render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveView {
    Finished,
    Login,
    Connected,
}

impl ActiveView {
    /// Voting closed always wins; an open ballot then splits on whether a
    /// wallet session exists.
    pub fn select(voting_open: bool, connected: bool) -> Self {
        if !voting_open {
            ActiveView::Finished
        } else if connected {
            ActiveView::Connected
        } else {
            ActiveView::Login
        }
    }
}

/// Point-in-time copy of the controller state for rendering.
#[derive(Debug, Clone)]
pub struct ControllerSnapshot {
    pub connected: bool,
    pub account: Option<Address>,
    pub voting_open: bool,
    pub remaining_time: u64,
    pub candidates: Vec<Candidate>,
    pub selected_candidate: Option<u64>,
    pub can_vote: bool,
}

struct ControllerState {
    connected: bool,
    account: Option<Address>,
    voting_open: bool,
    remaining_time: u64,
    candidates: Vec<Candidate>,
    selected_candidate: Option<u64>,
    can_vote: bool,
    // Per-kind refresh generations: a refresh only applies its result if no
    // later refresh of the same kind was issued while it was in flight.
    candidates_refresh_seq: u64,
    status_refresh_seq: u64,
    time_refresh_seq: u64,
    eligibility_refresh_seq: u64,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            connected: false,
            account: None,
            // Optimistic defaults until the first refresh lands, so a fresh
            // mount renders the login view rather than a closed ballot.
            voting_open: true,
            remaining_time: 0,
            candidates: Vec::new(),
            selected_candidate: None,
            can_vote: true,
            candidates_refresh_seq: 0,
            status_refresh_seq: 0,
            time_refresh_seq: 0,
            eligibility_refresh_seq: 0,
        }
    }
}

/// Application controller for the voting front-end: owns the reactive state
/// and mediates between the injected wallet and contract collaborators.
pub struct VotingController {
    wallet: Arc<dyn WalletProvider>,
    contract: Arc<dyn ElectionContract>,
    inner: Mutex<ControllerState>,
    accounts_watcher: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<ControllerEvent>,
}

impl VotingController {
    pub fn new(wallet: Arc<dyn WalletProvider>, contract: Arc<dyn ElectionContract>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENTS_CHANNEL_CAPACITY);
        Arc::new(Self {
            wallet,
            contract,
            inner: Mutex::new(ControllerState::default()),
            accounts_watcher: Mutex::new(None),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    /// Mount-time initialization: initial refreshes plus the account-change
    /// watcher. With no wallet in the environment, nothing is fetched and no
    /// watcher is registered.
    pub async fn start(self: &Arc<Self>) {
        if !self.wallet.is_available() {
            error!("wallet provider not detected; skipping contract reads");
            let _ = self
                .events
                .send(ControllerEvent::Error("wallet provider not detected".to_string()));
            return;
        }

        self.refresh_candidates().await;
        if let Err(err) = self.refresh_remaining_time().await {
            warn!("remaining-time refresh failed on startup: {err:#}");
            let _ = self
                .events
                .send(ControllerEvent::Error(format!("remaining-time refresh failed: {err:#}")));
        }
        if let Err(err) = self.refresh_status().await {
            warn!("voting-status refresh failed on startup: {err:#}");
            let _ = self
                .events
                .send(ControllerEvent::Error(format!("voting-status refresh failed: {err:#}")));
        }

        self.spawn_accounts_watcher().await;
    }

    /// Teardown counterpart of [`start`](Self::start): unregisters the
    /// account-change watcher.
    pub async fn shutdown(&self) {
        if let Some(task) = self.accounts_watcher.lock().await.take() {
            task.abort();
        }
    }

    /// Requests wallet access and opens a session for the signer account.
    /// Missing-wallet and rejection failures are logged and emitted as error
    /// events; the session is left unchanged.
    pub async fn connect(self: &Arc<Self>) {
        if !self.wallet.is_available() {
            error!("wallet provider not detected in this environment");
            let _ = self
                .events
                .send(ControllerEvent::Error("wallet provider not detected".to_string()));
            return;
        }

        let account = match self.request_signer_account().await {
            Ok(account) => account,
            Err(err) => {
                warn!("wallet connect failed: {err:#}");
                let _ = self
                    .events
                    .send(ControllerEvent::Error(format!("wallet connect failed: {err:#}")));
                return;
            }
        };

        {
            let mut guard = self.inner.lock().await;
            guard.connected = true;
            guard.account = Some(account.clone());
        }
        info!(account = %account, "wallet connected");
        self.emit_session().await;

        if let Err(err) = self.refresh_eligibility().await {
            warn!("eligibility refresh after connect failed: {err:#}");
            let _ = self
                .events
                .send(ControllerEvent::Error(format!("eligibility refresh failed: {err:#}")));
        }
    }

    async fn request_signer_account(&self) -> Result<Address> {
        let accounts = self
            .wallet
            .request_accounts()
            .await
            .context("wallet rejected the account request")?;
        accounts
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("wallet returned no accounts"))
    }

    /// Replaces the candidate board wholesale. Fail-soft: any fetch or decode
    /// failure leaves an empty board rather than surfacing an error.
    pub async fn refresh_candidates(&self) {
        let seq = {
            let mut guard = self.inner.lock().await;
            guard.candidates_refresh_seq += 1;
            guard.candidates_refresh_seq
        };

        let candidates = match self.fetch_candidates().await {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!("candidate refresh failed, falling back to an empty board: {err:#}");
                Vec::new()
            }
        };

        {
            let mut guard = self.inner.lock().await;
            if guard.candidates_refresh_seq != seq {
                // Superseded while in flight; a later refresh owns the board.
                return;
            }
            guard.candidates = candidates.clone();
        }
        let _ = self
            .events
            .send(ControllerEvent::CandidatesUpdated(candidates));
    }

    async fn fetch_candidates(&self) -> Result<Vec<Candidate>> {
        let records = self.contract.candidate_tallies().await?;
        Ok(decode::candidates_from_records(records)?)
    }

    pub async fn refresh_status(&self) -> Result<()> {
        let seq = {
            let mut guard = self.inner.lock().await;
            guard.status_refresh_seq += 1;
            guard.status_refresh_seq
        };

        let open = self
            .contract
            .voting_open()
            .await
            .context("failed to fetch voting status")?;

        {
            let mut guard = self.inner.lock().await;
            if guard.status_refresh_seq != seq {
                return Ok(());
            }
            guard.voting_open = open;
        }
        let _ = self.events.send(ControllerEvent::VotingStatusChanged(open));
        Ok(())
    }

    pub async fn refresh_remaining_time(&self) -> Result<()> {
        let seq = {
            let mut guard = self.inner.lock().await;
            guard.time_refresh_seq += 1;
            guard.time_refresh_seq
        };

        let raw = self
            .contract
            .remaining_time()
            .await
            .context("failed to fetch remaining time")?;
        let seconds = parse_quantity(&raw)
            .with_context(|| format!("contract returned an invalid remaining-time quantity {raw:?}"))?;

        {
            let mut guard = self.inner.lock().await;
            if guard.time_refresh_seq != seq {
                return Ok(());
            }
            guard.remaining_time = seconds;
        }
        let _ = self
            .events
            .send(ControllerEvent::RemainingTimeUpdated(seconds));
        Ok(())
    }

    /// Re-reads the voters mapping for the session account. Requires an
    /// active session.
    pub async fn refresh_eligibility(&self) -> Result<()> {
        let (account, seq) = {
            let mut guard = self.inner.lock().await;
            let account = guard
                .account
                .clone()
                .ok_or_else(|| anyhow!("no connected account"))?;
            guard.eligibility_refresh_seq += 1;
            (account, guard.eligibility_refresh_seq)
        };

        let has_voted = self
            .contract
            .has_voted(&account)
            .await
            .context("failed to fetch voter record")?;
        let can_vote = !has_voted;

        {
            let mut guard = self.inner.lock().await;
            if guard.eligibility_refresh_seq != seq {
                return Ok(());
            }
            guard.can_vote = can_vote;
        }
        let _ = self
            .events
            .send(ControllerEvent::EligibilityChanged(can_vote));
        Ok(())
    }

    /// Submits a vote for the candidate at `candidate_index`, waits for the
    /// transaction to confirm on-chain, then refreshes eligibility. Index
    /// validation is the contract's concern; submission and confirmation
    /// failures propagate to the caller.
    pub async fn cast_vote(&self, candidate_index: u64) -> Result<()> {
        let account = {
            let guard = self.inner.lock().await;
            guard.account.clone().ok_or(VoteError::NotConnected)?
        };

        let tx = self
            .contract
            .submit_vote(&account, candidate_index)
            .await
            .map_err(VoteError::Submit)?;
        info!(tx = %tx, candidate_index, "vote submitted; awaiting confirmation");

        self.contract
            .wait_for_confirmation(&tx)
            .await
            .map_err(VoteError::Confirmation)?;
        info!(tx = %tx, "vote confirmed");

        if let Err(err) = self.refresh_eligibility().await {
            warn!("eligibility refresh after vote failed: {err:#}");
            let _ = self
                .events
                .send(ControllerEvent::Error(format!("eligibility refresh failed: {err:#}")));
        }
        Ok(())
    }

    /// Records the ballot selection; no validation beyond what the contract
    /// enforces at submission time.
    pub async fn select_candidate(&self, candidate_index: Option<u64>) {
        let mut guard = self.inner.lock().await;
        guard.selected_candidate = candidate_index;
    }

    pub async fn snapshot(&self) -> ControllerSnapshot {
        let guard = self.inner.lock().await;
        ControllerSnapshot {
            connected: guard.connected,
            account: guard.account.clone(),
            voting_open: guard.voting_open,
            remaining_time: guard.remaining_time,
            candidates: guard.candidates.clone(),
            selected_candidate: guard.selected_candidate,
            can_vote: guard.can_vote,
        }
    }

    pub async fn active_view(&self) -> ActiveView {
        let guard = self.inner.lock().await;
        ActiveView::select(guard.voting_open, guard.connected)
    }

    async fn emit_session(&self) {
        let (connected, account) = {
            let guard = self.inner.lock().await;
            (guard.connected, guard.account.clone())
        };
        let _ = self
            .events
            .send(ControllerEvent::SessionChanged { connected, account });
    }

    async fn spawn_accounts_watcher(self: &Arc<Self>) {
        let mut rx = self.wallet.subscribe_accounts_changed();
        let controller = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(accounts) => controller.handle_accounts_changed(accounts).await,
                    // A lagged receiver drops the skipped lists; the next
                    // received list carries the current accounts anyway.
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "accounts watcher lagged; catching up");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        if let Some(previous) = self.accounts_watcher.lock().await.replace(task) {
            previous.abort();
        }
    }

    async fn handle_accounts_changed(self: &Arc<Self>, accounts: Vec<Address>) {
        match accounts.first() {
            Some(next) => {
                let changed = {
                    let mut guard = self.inner.lock().await;
                    if guard.account.as_ref() == Some(next) {
                        false
                    } else {
                        guard.account = Some(next.clone());
                        true
                    }
                };
                if !changed {
                    return;
                }
                info!(account = %next, "wallet account changed");
                self.emit_session().await;
                if let Err(err) = self.refresh_eligibility().await {
                    warn!("eligibility refresh after account change failed: {err:#}");
                    let _ = self
                        .events
                        .send(ControllerEvent::Error(format!("eligibility refresh failed: {err:#}")));
                }
            }
            None => {
                {
                    let mut guard = self.inner.lock().await;
                    guard.connected = false;
                    guard.account = None;
                }
                info!("wallet reported no accounts; session reset");
                self.emit_session().await;
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
