use std::time::Duration;

use tokio::{sync::Notify, time::timeout};

use super::*;

fn addr(tag: &str) -> Address {
    Address(format!("0x{tag}"))
}

fn record(name: &str, vote_count: &str) -> CandidateRecord {
    CandidateRecord {
        name: name.to_string(),
        vote_count: vote_count.to_string(),
    }
}

struct FakeWallet {
    available: bool,
    accounts: Vec<Address>,
    fail_with: Option<String>,
    accounts_tx: broadcast::Sender<Vec<Address>>,
    request_calls: Arc<Mutex<u32>>,
}

impl FakeWallet {
    fn with_accounts(accounts: Vec<Address>) -> Self {
        Self {
            available: true,
            accounts,
            fail_with: None,
            accounts_tx: broadcast::channel(16).0,
            request_calls: Arc::new(Mutex::new(0)),
        }
    }

    fn unavailable() -> Self {
        let mut wallet = Self::with_accounts(Vec::new());
        wallet.available = false;
        wallet
    }

    fn failing(err: impl Into<String>) -> Self {
        let mut wallet = Self::with_accounts(Vec::new());
        wallet.fail_with = Some(err.into());
        wallet
    }

    /// Shrinks the accounts channel so a slow subscriber observes `Lagged`.
    fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.accounts_tx = broadcast::channel(capacity).0;
        self
    }
}

#[async_trait]
impl WalletProvider for FakeWallet {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn request_accounts(&self) -> Result<Vec<Address>> {
        *self.request_calls.lock().await += 1;
        if let Some(err) = &self.fail_with {
            return Err(anyhow!(err.clone()));
        }
        Ok(self.accounts.clone())
    }

    fn subscribe_accounts_changed(&self) -> broadcast::Receiver<Vec<Address>> {
        self.accounts_tx.subscribe()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ContractCall {
    Tallies,
    Status,
    RemainingTime,
    HasVoted(Address),
    Submit(u64),
    Confirm,
}

struct FakeContract {
    calls: Arc<Mutex<Vec<ContractCall>>>,
    tallies: Vec<Result<Vec<CandidateRecord>, String>>,
    voting_open: bool,
    remaining_time: String,
    has_voted: bool,
    submit_error: Option<String>,
    tallies_gate: Option<Arc<Notify>>,
}

impl FakeContract {
    fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            tallies: Vec::new(),
            voting_open: true,
            remaining_time: "0x3c".to_string(),
            has_voted: false,
            submit_error: None,
            tallies_gate: None,
        }
    }

    fn with_tallies(mut self, tallies: Vec<Result<Vec<CandidateRecord>, String>>) -> Self {
        self.tallies = tallies;
        self
    }

    fn with_voting_open(mut self, voting_open: bool) -> Self {
        self.voting_open = voting_open;
        self
    }

    fn with_has_voted(mut self, has_voted: bool) -> Self {
        self.has_voted = has_voted;
        self
    }

    fn with_submit_error(mut self, err: impl Into<String>) -> Self {
        self.submit_error = Some(err.into());
        self
    }

    /// Blocks the first tallies call until the gate is notified, to simulate
    /// a slow in-flight refresh overlapping a fresh one.
    fn with_tallies_gate(mut self, gate: Arc<Notify>) -> Self {
        self.tallies_gate = Some(gate);
        self
    }
}

#[async_trait]
impl ElectionContract for FakeContract {
    async fn candidate_tallies(&self) -> Result<Vec<CandidateRecord>> {
        let call_index = {
            let mut calls = self.calls.lock().await;
            calls.push(ContractCall::Tallies);
            calls
                .iter()
                .filter(|call| **call == ContractCall::Tallies)
                .count()
        };
        if let Some(gate) = &self.tallies_gate {
            if call_index == 1 {
                gate.notified().await;
            }
        }
        match self.tallies.get(call_index - 1) {
            Some(Ok(records)) => Ok(records.clone()),
            Some(Err(err)) => Err(anyhow!(err.clone())),
            None => Ok(Vec::new()),
        }
    }

    async fn voting_open(&self) -> Result<bool> {
        self.calls.lock().await.push(ContractCall::Status);
        Ok(self.voting_open)
    }

    async fn remaining_time(&self) -> Result<String> {
        self.calls.lock().await.push(ContractCall::RemainingTime);
        Ok(self.remaining_time.clone())
    }

    async fn has_voted(&self, account: &Address) -> Result<bool> {
        self.calls
            .lock()
            .await
            .push(ContractCall::HasVoted(account.clone()));
        Ok(self.has_voted)
    }

    async fn submit_vote(&self, _from: &Address, candidate_index: u64) -> Result<TxHash> {
        self.calls
            .lock()
            .await
            .push(ContractCall::Submit(candidate_index));
        if let Some(err) = &self.submit_error {
            return Err(anyhow!(err.clone()));
        }
        Ok(TxHash("0xfeed".to_string()))
    }

    async fn wait_for_confirmation(&self, _tx: &TxHash) -> Result<()> {
        self.calls.lock().await.push(ContractCall::Confirm);
        Ok(())
    }
}

#[tokio::test]
async fn start_without_wallet_performs_no_contract_calls() {
    let contract = Arc::new(FakeContract::new());
    let controller = VotingController::new(Arc::new(FakeWallet::unavailable()), contract.clone());

    controller.start().await;

    assert!(contract.calls.lock().await.is_empty());
    let snapshot = controller.snapshot().await;
    assert!(!snapshot.connected);
    assert!(snapshot.account.is_none());
    assert!(controller.accounts_watcher.lock().await.is_none());
}

#[tokio::test]
async fn start_refreshes_board_time_and_status() {
    let contract = Arc::new(
        FakeContract::new().with_tallies(vec![Ok(vec![record("Alice", "0x03")])]),
    );
    let wallet = Arc::new(FakeWallet::with_accounts(vec![addr("aa")]));
    let controller = VotingController::new(wallet, contract.clone());

    controller.start().await;

    let calls = contract.calls.lock().await.clone();
    assert_eq!(
        &calls[..3],
        &[
            ContractCall::Tallies,
            ContractCall::RemainingTime,
            ContractCall::Status,
        ]
    );
    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.candidates.len(), 1);
    assert_eq!(snapshot.remaining_time, 60);
    assert!(snapshot.voting_open);
}

#[tokio::test]
async fn connect_opens_session_and_refreshes_eligibility() {
    let contract = Arc::new(FakeContract::new().with_has_voted(true));
    let wallet = Arc::new(FakeWallet::with_accounts(vec![addr("aa")]));
    let controller = VotingController::new(wallet.clone(), contract.clone());

    controller.connect().await;

    let snapshot = controller.snapshot().await;
    assert!(snapshot.connected);
    assert_eq!(snapshot.account, Some(addr("aa")));
    assert!(!snapshot.can_vote);
    assert_eq!(*wallet.request_calls.lock().await, 1);
    let calls = contract.calls.lock().await.clone();
    assert_eq!(calls, vec![ContractCall::HasVoted(addr("aa"))]);
}

#[tokio::test]
async fn connect_rejection_leaves_session_unchanged() {
    let contract = Arc::new(FakeContract::new());
    let controller =
        VotingController::new(Arc::new(FakeWallet::failing("user rejected")), contract.clone());
    let mut rx = controller.subscribe_events();

    controller.connect().await;

    let snapshot = controller.snapshot().await;
    assert!(!snapshot.connected);
    assert!(snapshot.account.is_none());
    assert!(contract.calls.lock().await.is_empty());
    match rx.recv().await.expect("event") {
        ControllerEvent::Error(message) => assert!(message.contains("wallet connect failed")),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn empty_candidate_list_is_not_an_error() {
    let contract = Arc::new(FakeContract::new().with_tallies(vec![Ok(Vec::new())]));
    let controller =
        VotingController::new(Arc::new(FakeWallet::with_accounts(Vec::new())), contract);
    let mut rx = controller.subscribe_events();

    controller.refresh_candidates().await;

    assert!(controller.snapshot().await.candidates.is_empty());
    match rx.recv().await.expect("event") {
        ControllerEvent::CandidatesUpdated(candidates) => assert!(candidates.is_empty()),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn failing_candidate_fetch_falls_back_to_empty_board() {
    let contract = Arc::new(FakeContract::new().with_tallies(vec![Err("node down".to_string())]));
    let controller =
        VotingController::new(Arc::new(FakeWallet::with_accounts(Vec::new())), contract);
    {
        let mut inner = controller.inner.lock().await;
        inner.candidates = vec![Candidate {
            index: 0,
            name: "Old".to_string(),
            vote_count: 9,
        }];
    }

    controller.refresh_candidates().await;

    assert!(controller.snapshot().await.candidates.is_empty());
}

#[tokio::test]
async fn candidate_decode_applies_placeholder_and_strict_counts() {
    let contract = Arc::new(FakeContract::new().with_tallies(vec![Ok(vec![
        record("Alice", "0x03"),
        record("", "0x2a"),
    ])]));
    let controller =
        VotingController::new(Arc::new(FakeWallet::with_accounts(Vec::new())), contract);

    controller.refresh_candidates().await;

    let candidates = controller.snapshot().await.candidates;
    assert_eq!(
        candidates,
        vec![
            Candidate {
                index: 0,
                name: "Alice".to_string(),
                vote_count: 3,
            },
            Candidate {
                index: 1,
                name: decode::UNKNOWN_CANDIDATE_NAME.to_string(),
                vote_count: 42,
            },
        ]
    );
}

#[tokio::test]
async fn undecodable_vote_count_empties_the_board() {
    let contract =
        Arc::new(FakeContract::new().with_tallies(vec![Ok(vec![record("Mallory", "0xzz")])]));
    let controller =
        VotingController::new(Arc::new(FakeWallet::with_accounts(Vec::new())), contract);

    controller.refresh_candidates().await;

    assert!(controller.snapshot().await.candidates.is_empty());
}

#[tokio::test]
async fn stale_candidates_refresh_cannot_overwrite_newer_result() {
    let gate = Arc::new(Notify::new());
    let contract = Arc::new(
        FakeContract::new()
            .with_tallies(vec![
                Ok(vec![record("Stale", "0x01")]),
                Ok(vec![record("Fresh", "0x02")]),
            ])
            .with_tallies_gate(gate.clone()),
    );
    let controller =
        VotingController::new(Arc::new(FakeWallet::with_accounts(Vec::new())), contract);

    let slow = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.refresh_candidates().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    controller.refresh_candidates().await;
    gate.notify_one();
    slow.await.expect("slow refresh");

    let candidates = controller.snapshot().await.candidates;
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].name, "Fresh");
}

#[tokio::test]
async fn empty_account_report_resets_session() {
    let wallet = Arc::new(FakeWallet::with_accounts(vec![addr("aa")]));
    let controller = VotingController::new(wallet.clone(), Arc::new(FakeContract::new()));

    controller.start().await;
    controller.connect().await;
    assert!(controller.snapshot().await.connected);

    let mut rx = controller.subscribe_events();
    wallet.accounts_tx.send(Vec::new()).expect("watcher alive");

    timeout(Duration::from_secs(1), async {
        loop {
            if let ControllerEvent::SessionChanged {
                connected: false, ..
            } = rx.recv().await.expect("event")
            {
                break;
            }
        }
    })
    .await
    .expect("session reset event");

    let snapshot = controller.snapshot().await;
    assert!(!snapshot.connected);
    assert!(snapshot.account.is_none());
}

#[tokio::test]
async fn account_switch_updates_session_and_refetches_eligibility() {
    let wallet = Arc::new(FakeWallet::with_accounts(vec![addr("aa")]));
    let contract = Arc::new(FakeContract::new());
    let controller = VotingController::new(wallet.clone(), contract.clone());

    controller.start().await;
    controller.connect().await;

    let mut rx = controller.subscribe_events();
    wallet.accounts_tx.send(vec![addr("bb")]).expect("watcher alive");

    timeout(Duration::from_secs(1), async {
        loop {
            if let ControllerEvent::EligibilityChanged(_) = rx.recv().await.expect("event") {
                break;
            }
        }
    })
    .await
    .expect("eligibility refetch after switch");

    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.account, Some(addr("bb")));
    let calls = contract.calls.lock().await.clone();
    assert!(calls.contains(&ContractCall::HasVoted(addr("bb"))));

    // A repeat of the current account is a no-op.
    wallet.accounts_tx.send(vec![addr("bb")]).expect("watcher alive");
    tokio::time::sleep(Duration::from_millis(100)).await;
    let calls = contract.calls.lock().await.clone();
    let refetches = calls
        .iter()
        .filter(|call| **call == ContractCall::HasVoted(addr("bb")))
        .count();
    assert_eq!(refetches, 1);
}

#[tokio::test]
async fn cast_vote_refreshes_eligibility_once_after_confirmation() {
    let contract = Arc::new(FakeContract::new());
    let controller = VotingController::new(
        Arc::new(FakeWallet::with_accounts(vec![addr("aa")])),
        contract.clone(),
    );
    {
        let mut inner = controller.inner.lock().await;
        inner.connected = true;
        inner.account = Some(addr("aa"));
    }

    controller.cast_vote(2).await.expect("vote");

    let calls = contract.calls.lock().await.clone();
    assert_eq!(
        calls,
        vec![
            ContractCall::Submit(2),
            ContractCall::Confirm,
            ContractCall::HasVoted(addr("aa")),
        ]
    );
}

#[tokio::test]
async fn rejected_submission_propagates_and_leaves_eligibility_unchanged() {
    let contract = Arc::new(FakeContract::new().with_submit_error("insufficient funds"));
    let controller = VotingController::new(
        Arc::new(FakeWallet::with_accounts(vec![addr("aa")])),
        contract.clone(),
    );
    {
        let mut inner = controller.inner.lock().await;
        inner.connected = true;
        inner.account = Some(addr("aa"));
    }

    let err = controller.cast_vote(1).await.expect_err("must fail");
    assert!(err.to_string().contains("vote submission failed"));

    let snapshot = controller.snapshot().await;
    assert!(snapshot.can_vote);
    let calls = contract.calls.lock().await.clone();
    assert_eq!(calls, vec![ContractCall::Submit(1)]);
}

#[tokio::test]
async fn cast_vote_requires_a_connected_account() {
    let contract = Arc::new(FakeContract::new());
    let controller = VotingController::new(
        Arc::new(FakeWallet::with_accounts(Vec::new())),
        contract.clone(),
    );

    let err = controller.cast_vote(0).await.expect_err("must fail");
    assert!(err.to_string().contains("no connected account"));
    assert!(contract.calls.lock().await.is_empty());
}

#[tokio::test]
async fn remaining_time_parses_hex_quantity() {
    let controller = VotingController::new(
        Arc::new(FakeWallet::with_accounts(Vec::new())),
        Arc::new(FakeContract::new()),
    );

    controller.refresh_remaining_time().await.expect("refresh");
    assert_eq!(controller.snapshot().await.remaining_time, 60);
}

#[tokio::test]
async fn closed_ballot_selects_finished_view() {
    let controller = VotingController::new(
        Arc::new(FakeWallet::with_accounts(Vec::new())),
        Arc::new(FakeContract::new().with_voting_open(false)),
    );

    controller.refresh_status().await.expect("refresh");
    assert_eq!(controller.active_view().await, ActiveView::Finished);
}

#[test]
fn view_selection_matrix() {
    assert_eq!(ActiveView::select(false, false), ActiveView::Finished);
    assert_eq!(ActiveView::select(false, true), ActiveView::Finished);
    assert_eq!(ActiveView::select(true, false), ActiveView::Login);
    assert_eq!(ActiveView::select(true, true), ActiveView::Connected);
}

#[tokio::test]
async fn lagged_accounts_watcher_keeps_running() {
    let wallet = Arc::new(FakeWallet::with_accounts(vec![addr("aa")]).with_channel_capacity(1));
    let controller = VotingController::new(wallet.clone(), Arc::new(FakeContract::new()));

    controller.start().await;
    controller.connect().await;

    // Stall the watcher inside its handler so further sends overflow the
    // one-slot channel and force a Lagged receive.
    let guard = controller.inner.lock().await;
    wallet.accounts_tx.send(vec![addr("bb")]).expect("watcher alive");
    tokio::time::sleep(Duration::from_millis(50)).await;
    wallet.accounts_tx.send(vec![addr("cc")]).expect("watcher alive");
    wallet.accounts_tx.send(vec![addr("dd")]).expect("watcher alive");

    let mut rx = controller.subscribe_events();
    drop(guard);

    timeout(Duration::from_secs(1), async {
        loop {
            if let ControllerEvent::SessionChanged {
                account: Some(account),
                ..
            } = rx.recv().await.expect("event")
            {
                if account == addr("dd") {
                    break;
                }
            }
        }
    })
    .await
    .expect("watcher caught up after lagging");

    assert_eq!(controller.snapshot().await.account, Some(addr("dd")));
}

#[tokio::test]
async fn shutdown_unregisters_the_accounts_watcher() {
    let wallet = Arc::new(FakeWallet::with_accounts(vec![addr("aa")]));
    let controller = VotingController::new(wallet.clone(), Arc::new(FakeContract::new()));

    controller.start().await;
    assert!(controller.accounts_watcher.lock().await.is_some());

    controller.shutdown().await;
    assert!(controller.accounts_watcher.lock().await.is_none());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(wallet.accounts_tx.send(Vec::new()).is_err());
}
