use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};

use super::{MAX_CONFIRMATIONS, OnchainBackend, Utxo};

/// How deep a deposit must be buried before it counts, by deposit size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationPolicy {
    pub min_confirmations: u32,
    pub large_amount_threshold_sat: u64,
    pub large_amount_confirmations: u32,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            min_confirmations: 2,
            large_amount_threshold_sat: 1_000_000,
            large_amount_confirmations: 6,
        }
    }
}

impl ConfirmationPolicy {
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.min_confirmations >= 1,
            "min_confirmations must be >= 1"
        );
        anyhow::ensure!(
            self.large_amount_confirmations >= self.min_confirmations,
            "large_amount_confirmations ({}) must be >= min_confirmations ({})",
            self.large_amount_confirmations,
            self.min_confirmations
        );
        Ok(())
    }

    pub fn required_confirmations(&self, amount_sat: u64) -> u32 {
        if amount_sat >= self.large_amount_threshold_sat {
            self.large_amount_confirmations
        } else {
            self.min_confirmations
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FundingStatus {
    Funded {
        receipt_txid: String,
        amount_sat: u64,
        confirmations: u32,
    },
    NotYetFunded {
        confirmed_sat: u64,
        pending_sat: u64,
    },
}

#[derive(Clone)]
pub struct FundingDetector {
    backend: Arc<dyn OnchainBackend>,
    policy: ConfirmationPolicy,
    timeout: Duration,
}

impl FundingDetector {
    pub fn new(
        backend: Arc<dyn OnchainBackend>,
        policy: ConfirmationPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            policy,
            timeout,
        }
    }

    /// Errors mean the backend could not be asked; they never mean "no funds".
    pub async fn scan(&self, address: &str, required_sat: u64) -> Result<FundingStatus> {
        let utxos = tokio::time::timeout(
            self.timeout,
            self.backend.list_unspent(0, MAX_CONFIRMATIONS, address),
        )
        .await
        .with_context(|| format!("listunspent timed out after {:?}", self.timeout))?
        .with_context(|| format!("list unspent outputs for {address}"))?;

        Ok(classify(
            utxos,
            required_sat,
            self.policy.required_confirmations(required_sat),
        ))
    }
}

fn classify(mut utxos: Vec<Utxo>, required_sat: u64, required_confs: u32) -> FundingStatus {
    // Deepest first so the receipt reference is stable across identical scans.
    utxos.sort_by(|a, b| {
        b.confirmations
            .cmp(&a.confirmations)
            .then_with(|| a.txid.cmp(&b.txid))
            .then_with(|| a.vout.cmp(&b.vout))
    });

    let (confirmed, pending): (Vec<Utxo>, Vec<Utxo>) = utxos
        .into_iter()
        .partition(|u| u.confirmations >= required_confs);

    let confirmed_sat = confirmed
        .iter()
        .fold(0u64, |acc, u| acc.saturating_add(u.amount_sat));
    let pending_sat = pending
        .iter()
        .fold(0u64, |acc, u| acc.saturating_add(u.amount_sat));

    match confirmed.first() {
        Some(deepest) if confirmed_sat >= required_sat => FundingStatus::Funded {
            receipt_txid: deepest.txid.clone(),
            amount_sat: confirmed_sat,
            confirmations: confirmed
                .last()
                .map_or(deepest.confirmations, |u| u.confirmations),
        },
        _ => FundingStatus::NotYetFunded {
            confirmed_sat,
            pending_sat,
        },
    }
}
