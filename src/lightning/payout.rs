use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use tokio::time::Instant;

use super::{LightningBackend, PayError, PaymentLookup};

/// Result of one payout attempt.
///
/// `Unknown` covers every case where the payment may still succeed (timeouts,
/// transport errors, payments still in flight). Callers must resolve it via
/// [`PayoutExecutor::lookup`] before paying again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutOutcome {
    Sent { payment_ref: String },
    FailedDefinitive { reason: String },
    Unknown { reason: String },
}

#[derive(Clone)]
pub struct PayoutExecutor {
    backend: Arc<dyn LightningBackend>,
    call_timeout: Duration,
    settle_timeout: Duration,
    poll_interval: Duration,
}

impl PayoutExecutor {
    pub fn new(
        backend: Arc<dyn LightningBackend>,
        call_timeout: Duration,
        settle_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            call_timeout,
            settle_timeout,
            poll_interval: Duration::from_millis(200),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Asks the node about a prior payment without issuing a new one.
    pub async fn lookup(&self, payment_hash: &str) -> Result<PaymentLookup> {
        tokio::time::timeout(self.call_timeout, self.backend.lookup_payment(payment_hash))
            .await
            .with_context(|| format!("lookup_payment timed out after {:?}", self.call_timeout))?
            .with_context(|| format!("lookup payment {payment_hash}"))
    }

    pub async fn pay(&self, invoice: &str, payment_hash: &str, amount_msat: u64) -> PayoutOutcome {
        let sent = tokio::time::timeout(
            self.call_timeout,
            self.backend.pay_invoice(invoice, amount_msat),
        )
        .await;

        let payment_id = match sent {
            Err(_) => {
                return PayoutOutcome::Unknown {
                    reason: format!("pay_invoice timed out after {:?}", self.call_timeout),
                };
            }
            Ok(Err(PayError::Rejected(reason))) => {
                return PayoutOutcome::FailedDefinitive { reason };
            }
            Ok(Err(PayError::Indeterminate(err))) => {
                return PayoutOutcome::Unknown {
                    reason: format!("{err:#}"),
                };
            }
            Ok(Ok(payment_id)) => payment_id,
        };

        let deadline = Instant::now() + self.settle_timeout;
        loop {
            match self.lookup(payment_hash).await {
                Ok(PaymentLookup::Succeeded { payment_ref }) => {
                    return PayoutOutcome::Sent { payment_ref };
                }
                Ok(PaymentLookup::Failed { reason }) => {
                    return PayoutOutcome::FailedDefinitive { reason };
                }
                Ok(PaymentLookup::Pending | PaymentLookup::NotFound) => {}
                Err(err) => {
                    let error = format!("{err:#}");
                    tracing::debug!(%payment_id, %error, "payment lookup failed");
                }
            }

            if Instant::now() >= deadline {
                return PayoutOutcome::Unknown {
                    reason: format!(
                        "payment {payment_id} still in flight after {:?}",
                        self.settle_timeout
                    ),
                };
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
