use std::str::FromStr as _;

use anyhow::Result;
use bitcoin::hashes::Hash as _;
use lightning_invoice::Bolt11Invoice;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceDetails {
    pub payment_hash_hex: String,
    pub amount_msat: Option<u64>,
    pub is_expired: bool,
}

pub fn parse_bolt11(invoice: &str) -> Result<Bolt11Invoice> {
    Bolt11Invoice::from_str(invoice.trim())
        .map_err(|e| anyhow::anyhow!("parse BOLT11 invoice: {e:?}"))
}

pub fn invoice_details(invoice: &str) -> Result<InvoiceDetails> {
    let invoice = parse_bolt11(invoice)?;
    Ok(InvoiceDetails {
        payment_hash_hex: hex::encode(invoice.payment_hash().to_byte_array()),
        amount_msat: invoice.amount_milli_satoshis(),
        is_expired: invoice.is_expired(),
    })
}
