pub mod invoice;
pub mod ldk;
pub mod payout;

use anyhow::Result;

/// What the Lightning node knows about an outbound payment, keyed by payment hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentLookup {
    Succeeded { payment_ref: String },
    Pending,
    Failed { reason: String },
    /// The node has no record of a payment for this hash.
    NotFound,
}

#[derive(Debug, thiserror::Error)]
pub enum PayError {
    /// The node (or local validation) authoritatively refused the payment.
    #[error("payment rejected: {0}")]
    Rejected(String),

    /// The request may or may not have reached the node.
    #[error("payment outcome unknown: {0:#}")]
    Indeterminate(anyhow::Error),
}

#[async_trait::async_trait]
pub trait LightningBackend: Send + Sync {
    /// Starts a payment and returns the node's payment id. `amount_msat` is
    /// only used for invoices that carry no amount.
    async fn pay_invoice(&self, invoice: &str, amount_msat: u64) -> Result<String, PayError>;

    async fn lookup_payment(&self, payment_hash: &str) -> Result<PaymentLookup>;
}
