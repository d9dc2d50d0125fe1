use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use client_core::{ActiveView, VotingController};
use ethereum_integration::{
    contract::RpcElectionContract, rpc::JsonRpcClient, wallet::RpcWalletProvider,
};
use shared::domain::Address;
use tracing::info;

mod settings;

#[derive(Parser, Debug)]
#[command(about = "Command-line front-end for the election contract")]
struct Args {
    #[arg(long)]
    rpc_url: Option<String>,
    #[arg(long)]
    contract_address: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print voting status, remaining time, and the candidate board.
    Board,
    /// Connect an account and report whether it may still vote.
    Eligibility,
    /// Cast a vote for the candidate at the given board index.
    Vote { candidate_index: u64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let mut settings = settings::load_settings();
    if let Some(rpc_url) = args.rpc_url {
        settings.rpc_url = rpc_url;
    }
    if let Some(contract_address) = args.contract_address {
        settings.contract_address = contract_address;
    }
    info!(
        rpc_url = %settings.rpc_url,
        contract_address = %settings.contract_address,
        "starting voting client"
    );

    let rpc = Arc::new(JsonRpcClient::new(&settings.rpc_url)?);
    let wallet = Arc::new(RpcWalletProvider::new(Arc::clone(&rpc)));
    let contract = Arc::new(RpcElectionContract::new(
        rpc,
        Address(settings.contract_address),
    ));
    let accounts_poller = wallet.spawn_accounts_poller();

    let controller = VotingController::new(wallet, contract);
    controller.start().await;

    let outcome = run_command(&controller, args.command).await;

    controller.shutdown().await;
    accounts_poller.abort();
    outcome
}

async fn run_command(controller: &Arc<VotingController>, command: Command) -> Result<()> {
    match command {
        Command::Board => {
            let snapshot = controller.snapshot().await;
            match controller.active_view().await {
                ActiveView::Finished => println!("Voting is finished."),
                ActiveView::Login | ActiveView::Connected => println!(
                    "Voting is open, {} seconds remaining.",
                    snapshot.remaining_time
                ),
            }
            if snapshot.candidates.is_empty() {
                println!("No candidates available.");
            }
            for candidate in &snapshot.candidates {
                println!(
                    "{:>3}  {:<24} {}",
                    candidate.index, candidate.name, candidate.vote_count
                );
            }
            Ok(())
        }
        Command::Eligibility => {
            let account = connect(controller).await?;
            let snapshot = controller.snapshot().await;
            if snapshot.can_vote {
                println!("{account} has not voted yet.");
            } else {
                println!("{account} has already voted.");
            }
            Ok(())
        }
        Command::Vote { candidate_index } => {
            if controller.active_view().await == ActiveView::Finished {
                bail!("voting has finished");
            }
            let account = connect(controller).await?;
            controller.select_candidate(Some(candidate_index)).await;
            controller.cast_vote(candidate_index).await?;
            println!("Vote for candidate {candidate_index} confirmed from {account}.");
            Ok(())
        }
    }
}

async fn connect(controller: &Arc<VotingController>) -> Result<Address> {
    controller.connect().await;
    let snapshot = controller.snapshot().await;
    match snapshot.account {
        Some(account) if snapshot.connected => Ok(account),
        _ => bail!("wallet connection failed; see log output for the cause"),
    }
}
