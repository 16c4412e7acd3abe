use anyhow::{Context as _, Result};
use clap::{Parser as _, Subcommand, ValueEnum};
use onchain_ln_swap::proto::v1::swap_service_client::SwapServiceClient;
use onchain_ln_swap::proto::v1::{
    CreateSwapRequest, GetSwapRequest, ListSwapsRequest, Swap, SwapState,
};
use serde_json::json;

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:50051")]
    grpc_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StateArg {
    AwaitingFunds,
    FundsDetected,
    Settling,
    Settled,
    SettlementFailed,
}

impl From<StateArg> for SwapState {
    fn from(state: StateArg) -> Self {
        match state {
            StateArg::AwaitingFunds => SwapState::AwaitingFunds,
            StateArg::FundsDetected => SwapState::FundsDetected,
            StateArg::Settling => SwapState::Settling,
            StateArg::Settled => SwapState::Settled,
            StateArg::SettlementFailed => SwapState::SettlementFailed,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    CreateSwap {
        #[arg(long)]
        bolt11_invoice: String,

        #[arg(long)]
        requested_amount_sat: u64,
    },
    GetSwap {
        #[arg(long)]
        swap_id: u64,
    },
    ListSwaps {
        #[arg(long, value_enum)]
        state: Option<StateArg>,

        /// Only swaps flagged for manual reconciliation.
        #[arg(long)]
        reconciliation_required: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    onchain_ln_swap::logging::init().ok();
    let args = Args::parse();

    let mut client = SwapServiceClient::connect(args.grpc_url)
        .await
        .context("connect gRPC")?;

    let out = match args.command {
        Command::CreateSwap {
            bolt11_invoice,
            requested_amount_sat,
        } => {
            let swap = client
                .create_swap(CreateSwapRequest {
                    bolt11_invoice,
                    requested_amount_sat,
                })
                .await
                .context("CreateSwap")?
                .into_inner()
                .swap
                .context("CreateSwap returned no swap")?;

            swap_json(swap)
        }
        Command::GetSwap { swap_id } => {
            let swap = client
                .get_swap(GetSwapRequest { swap_id })
                .await
                .context("GetSwap")?
                .into_inner();

            swap_json(swap)
        }
        Command::ListSwaps {
            state,
            reconciliation_required,
        } => {
            let swaps = client
                .list_swaps(ListSwapsRequest {
                    state: state.map_or(SwapState::Unspecified, SwapState::from) as i32,
                    reconciliation_required_only: reconciliation_required,
                })
                .await
                .context("ListSwaps")?
                .into_inner()
                .swaps;

            json!({
              "swaps": swaps.into_iter().map(swap_json).collect::<Vec<_>>(),
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn swap_json(swap: Swap) -> serde_json::Value {
    let state_str = SwapState::try_from(swap.state)
        .ok()
        .map(|s| s.as_str_name().to_ascii_lowercase())
        .map(|s| s.trim_start_matches("swap_state_").to_string())
        .unwrap_or_else(|| format!("unknown({})", swap.state));

    json!({
      "swap_id": swap.swap_id,
      "state": state_str,
      "bolt11_invoice": swap.bolt11_invoice,
      "payment_hash": swap.payment_hash,
      "deposit_address": swap.deposit_address,
      "requested_amount_sat": swap.requested_amount_sat,
      "fee_sat": swap.fee_sat,
      "payout_amount_sat": swap.payout_amount_sat,
      "receipt_txid": swap.receipt_txid,
      "received_amount_sat": swap.received_amount_sat,
      "payment_ref": swap.payment_ref,
      "failure_reason": swap.failure_reason,
      "reconciliation_required": swap.reconciliation_required,
      "reconciliation_note": swap.reconciliation_note,
      "created_at": swap.created_at,
      "updated_at": swap.updated_at,
    })
}
