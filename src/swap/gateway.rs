use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::lightning::invoice::invoice_details;
use crate::onchain::OnchainBackend;
use crate::swap::fee::FeePolicy;
use crate::swap::store::SqliteSwapStore;
use crate::swap::{NewSwap, SwapError, SwapId, SwapRecord, SwapState};

/// Entry point for swap creation and status reads. Never mutates an existing swap.
#[derive(Clone)]
pub struct SwapGateway {
    fee: FeePolicy,
    onchain: Arc<dyn OnchainBackend>,
    store: Arc<Mutex<SqliteSwapStore>>,
    backend_timeout: Duration,
}

impl SwapGateway {
    pub fn new(
        fee: FeePolicy,
        onchain: Arc<dyn OnchainBackend>,
        store: Arc<Mutex<SqliteSwapStore>>,
        backend_timeout: Duration,
    ) -> Self {
        Self {
            fee,
            onchain,
            store,
            backend_timeout,
        }
    }

    pub async fn create_swap(
        &self,
        bolt11_invoice: &str,
        requested_amount_sat: u64,
    ) -> Result<SwapRecord, SwapError> {
        let payout = self.fee.compute_payout(requested_amount_sat)?;

        let bolt11_invoice = bolt11_invoice.trim();
        let invoice = invoice_details(bolt11_invoice)
            .map_err(|e| SwapError::InvalidInvoice(format!("{e:#}")))?;
        if invoice.is_expired {
            return Err(SwapError::InvalidInvoice("invoice expired".to_string()));
        }
        let payout_msat = payout.payout_sat.saturating_mul(1000);
        if let Some(amount_msat) = invoice.amount_msat
            && amount_msat != payout_msat
        {
            return Err(SwapError::InvalidInvoice(format!(
                "invoice amount {amount_msat} msat does not match payout {payout_msat} msat"
            )));
        }

        let deposit_address =
            tokio::time::timeout(self.backend_timeout, self.onchain.create_receive_address())
                .await
                .map_err(|_| {
                    SwapError::BackendUnavailable(anyhow::anyhow!(
                        "create receive address timed out after {:?}",
                        self.backend_timeout
                    ))
                })?
                .map_err(SwapError::BackendUnavailable)?;

        let record = self
            .store
            .lock()
            .expect("store mutex poisoned")
            .create_swap(&NewSwap {
                bolt11_invoice: bolt11_invoice.to_string(),
                payment_hash: invoice.payment_hash_hex,
                deposit_address,
                requested_amount_sat,
                fee_sat: payout.fee_sat,
            })?;

        tracing::info!(
            swap_id = %record.swap_id,
            deposit_address = %record.deposit_address,
            requested_amount_sat = record.requested_amount_sat,
            fee_sat = record.fee_sat,
            payout_amount_sat = record.payout_amount_sat,
            "swap created"
        );
        Ok(record)
    }

    pub fn get_swap(&self, swap_id: SwapId) -> Result<SwapRecord, SwapError> {
        self.store
            .lock()
            .expect("store mutex poisoned")
            .get_swap(swap_id)?
            .ok_or(SwapError::NotFound(swap_id))
    }

    pub fn list_swaps(
        &self,
        state: Option<SwapState>,
        reconciliation_required_only: bool,
    ) -> Result<Vec<SwapRecord>, SwapError> {
        let store = self.store.lock().expect("store mutex poisoned");
        let swaps = if reconciliation_required_only {
            store.list_reconciliation_required()?
        } else {
            match state {
                Some(state) => store.list_swaps_by_state(state)?,
                None => store.list_swaps()?,
            }
        };
        Ok(swaps
            .into_iter()
            .filter(|s| state.is_none_or(|state| s.state == state))
            .collect())
    }
}
