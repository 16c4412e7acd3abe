use anyhow::{Context as _, Result};
use ldk_server_client::client::LdkServerClient;
use ldk_server_client::error::{LdkServerError, LdkServerErrorCode};
use ldk_server_protos::api::{Bolt11SendRequest, GetPaymentDetailsRequest};
use ldk_server_protos::types::{Payment, PaymentDirection, PaymentStatus, payment_kind};

use super::invoice::invoice_details;
use super::{LightningBackend, PayError, PaymentLookup};

#[derive(Clone)]
pub struct LdkLightningClient {
    client: LdkServerClient,
}

impl LdkLightningClient {
    pub fn new(rest_service_address: String) -> Self {
        Self {
            client: LdkServerClient::new(rest_service_address),
        }
    }
}

/// Whether a `Bolt11Send` error code is the node refusing the payment, as
/// opposed to a transport or server failure that may have happened after
/// the payment was handed to the node.
pub fn is_send_rejection(code: &LdkServerErrorCode) -> bool {
    matches!(
        code,
        LdkServerErrorCode::InvalidRequestError | LdkServerErrorCode::LightningError
    )
}

#[async_trait::async_trait]
impl LightningBackend for LdkLightningClient {
    async fn pay_invoice(&self, invoice: &str, amount_msat: u64) -> Result<String, PayError> {
        let details = invoice_details(invoice).map_err(|e| PayError::Rejected(format!("{e:#}")))?;
        if details.is_expired {
            return Err(PayError::Rejected("invoice expired".to_string()));
        }

        let sent = self
            .client
            .bolt11_send(Bolt11SendRequest {
                invoice: invoice.to_string(),
                amount_msat: details.amount_msat.is_none().then_some(amount_msat),
                route_parameters: None,
            })
            .await;

        match sent {
            Ok(resp) => Ok(resp.payment_id),
            Err(err) if is_send_rejection(&err.error_code) => {
                self.rejection(&details.payment_hash_hex, err).await
            }
            Err(err) => Err(PayError::Indeterminate(
                anyhow::Error::new(err).context("Bolt11Send"),
            )),
        }
    }

    async fn lookup_payment(&self, payment_hash: &str) -> Result<PaymentLookup> {
        // ldk-node keys outbound BOLT11 payments by their payment hash.
        let resp = self
            .client
            .get_payment_details(GetPaymentDetailsRequest {
                payment_id: payment_hash.to_string(),
            })
            .await
            .with_context(|| format!("GetPaymentDetails {payment_hash}"))?;

        Ok(match resp.payment {
            Some(p) if is_outbound_bolt11(&p) => lookup_from_payment(&p),
            _ => PaymentLookup::NotFound,
        })
    }
}

impl LdkLightningClient {
    /// A refusal only counts as definitive when the node holds no payment for
    /// the hash; otherwise (e.g. a duplicate of an earlier attempt) the
    /// outcome is left to the lookup.
    async fn rejection(&self, payment_hash: &str, err: LdkServerError) -> Result<String, PayError> {
        let reason = format!("Bolt11Send rejected: {err}");
        match self.lookup_payment(payment_hash).await {
            Ok(PaymentLookup::NotFound) => Err(PayError::Rejected(reason)),
            Ok(_) => Err(PayError::Indeterminate(anyhow::anyhow!(
                "{reason}; node already tracks payment {payment_hash}"
            ))),
            Err(lookup_err) => Err(PayError::Indeterminate(
                lookup_err.context(reason),
            )),
        }
    }
}

fn is_outbound_bolt11(p: &Payment) -> bool {
    p.direction == PaymentDirection::Outbound as i32
        && matches!(
            p.kind.as_ref().and_then(|k| k.kind.as_ref()),
            Some(payment_kind::Kind::Bolt11(_))
        )
}

fn lookup_from_payment(p: &Payment) -> PaymentLookup {
    if p.status == PaymentStatus::Succeeded as i32 {
        PaymentLookup::Succeeded {
            payment_ref: p.id.clone(),
        }
    } else if p.status == PaymentStatus::Failed as i32 {
        PaymentLookup::Failed {
            reason: "payment failed at lightning node".to_string(),
        }
    } else {
        PaymentLookup::Pending
    }
}
