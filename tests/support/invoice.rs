use std::time::{Duration, SystemTime};

use bitcoin::hashes::{Hash as _, sha256};
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use lightning_invoice::{Currency, InvoiceBuilder, PaymentSecret};

/// A signed regtest BOLT11 invoice for `payment_hash`.
pub fn signed_invoice(payment_hash: [u8; 32], amount_msat: Option<u64>) -> String {
    build(payment_hash, amount_msat, SystemTime::now())
}

/// Same as [`signed_invoice`], issued two hours ago with the default one-hour expiry.
pub fn expired_invoice(payment_hash: [u8; 32], amount_msat: Option<u64>) -> String {
    build(
        payment_hash,
        amount_msat,
        SystemTime::now() - Duration::from_secs(2 * 3600),
    )
}

fn build(payment_hash: [u8; 32], amount_msat: Option<u64>, issued_at: SystemTime) -> String {
    let key = SecretKey::from_slice(&[42; 32]).unwrap();
    let builder = InvoiceBuilder::new(Currency::Regtest)
        .description("onchain-ln-swap test".to_string())
        .payment_hash(sha256::Hash::from_byte_array(payment_hash))
        .payment_secret(PaymentSecret([7; 32]))
        .timestamp(issued_at)
        .min_final_cltv_expiry_delta(144);
    let builder = match amount_msat {
        Some(amount_msat) => builder.amount_milli_satoshis(amount_msat),
        None => builder,
    };
    builder
        .build_signed(|msg| Secp256k1::new().sign_ecdsa_recoverable(msg, &key))
        .unwrap()
        .to_string()
}
