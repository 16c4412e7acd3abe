use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::SwapError;

pub const BPS_DENOMINATOR: u64 = 10_000;

/// Fee charged on every swap, in basis points of the requested amount.
///
/// The fee is `floor(requested * fee_rate_bps / 10_000)`, computed in `u128`
/// so no amount can overflow. Rounding always favours the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePolicy {
    fee_rate_bps: u32,
    minimum_amount_sat: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub fee_sat: u64,
    pub payout_sat: u64,
}

impl FeePolicy {
    pub fn new(fee_rate_bps: u32, minimum_amount_sat: u64) -> Result<Self> {
        anyhow::ensure!(
            u64::from(fee_rate_bps) < BPS_DENOMINATOR,
            "fee_rate_bps must be < {BPS_DENOMINATOR}, got {fee_rate_bps}"
        );
        anyhow::ensure!(minimum_amount_sat >= 1, "minimum_amount_sat must be >= 1");
        Ok(Self {
            fee_rate_bps,
            minimum_amount_sat,
        })
    }

    pub fn fee_rate_bps(&self) -> u32 {
        self.fee_rate_bps
    }

    pub fn minimum_amount_sat(&self) -> u64 {
        self.minimum_amount_sat
    }

    pub fn compute_payout(&self, requested_sat: u64) -> Result<Payout, SwapError> {
        if requested_sat < self.minimum_amount_sat {
            return Err(SwapError::RejectedTooSmall {
                requested_sat,
                minimum_sat: self.minimum_amount_sat,
            });
        }

        let fee = u128::from(requested_sat) * u128::from(self.fee_rate_bps)
            / u128::from(BPS_DENOMINATOR);
        // fee_rate_bps < 10_000 keeps fee strictly below requested_sat.
        let fee_sat = u64::try_from(fee).map_err(|_| anyhow::anyhow!("fee overflow"))?;

        Ok(Payout {
            fee_sat,
            payout_sat: requested_sat - fee_sat,
        })
    }
}
