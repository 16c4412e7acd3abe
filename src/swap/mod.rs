pub mod error;
pub mod fee;
pub mod gateway;
pub mod monitor;
pub mod service;
pub mod store;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use error::SwapError;

/// Ledger-assigned, monotonically increasing swap identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SwapId(pub u64);

impl fmt::Display for SwapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SwapId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapState {
    AwaitingFunds,
    FundsDetected,
    Settling,
    Settled,
    SettlementFailed,
}

impl SwapState {
    pub const ALL: [SwapState; 5] = [
        SwapState::AwaitingFunds,
        SwapState::FundsDetected,
        SwapState::Settling,
        SwapState::Settled,
        SwapState::SettlementFailed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SwapState::AwaitingFunds => "awaiting_funds",
            SwapState::FundsDetected => "funds_detected",
            SwapState::Settling => "settling",
            SwapState::Settled => "settled",
            SwapState::SettlementFailed => "settlement_failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SwapState::Settled | SwapState::SettlementFailed)
    }

    /// Edges of the lifecycle. Anything else is rejected by the ledger.
    pub fn can_transition_to(self, next: SwapState) -> bool {
        matches!(
            (self, next),
            (SwapState::AwaitingFunds, SwapState::FundsDetected)
                | (SwapState::FundsDetected, SwapState::Settling)
                | (SwapState::Settling, SwapState::Settled)
                | (SwapState::Settling, SwapState::SettlementFailed)
        )
    }
}

impl fmt::Display for SwapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SwapState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SwapState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown swap state: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRecord {
    pub swap_id: SwapId,
    pub bolt11_invoice: String,
    /// Hex payment hash of the invoice; the correlation key for payment lookups.
    pub payment_hash: String,
    pub deposit_address: String,

    pub requested_amount_sat: u64,
    pub fee_sat: u64,
    pub payout_amount_sat: u64,

    pub state: SwapState,
    pub receipt_txid: Option<String>,
    pub received_amount_sat: Option<u64>,
    pub payment_ref: Option<String>,
    pub failure_reason: Option<String>,

    pub reconciliation_required: bool,
    pub reconciliation_note: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SwapRecord {
    pub fn payout_amount_msat(&self) -> u64 {
        self.payout_amount_sat.saturating_mul(1000)
    }
}

/// Everything the gateway knows about a swap before the ledger assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSwap {
    pub bolt11_invoice: String,
    pub payment_hash: String,
    pub deposit_address: String,
    pub requested_amount_sat: u64,
    pub fee_sat: u64,
}

/// Fields written alongside a state change. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionFields {
    pub receipt_txid: Option<String>,
    pub received_amount_sat: Option<u64>,
    pub payment_ref: Option<String>,
    pub failure_reason: Option<String>,
}
