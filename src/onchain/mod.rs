pub mod bitcoind;
pub mod detector;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Upper bound passed to `listunspent`; effectively "any depth".
pub const MAX_CONFIRMATIONS: u32 = 9_999_999;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    pub amount_sat: u64,
    pub confirmations: u32,
}

/// Narrow view of the on-chain node used by the gateway and the funding detector.
#[async_trait::async_trait]
pub trait OnchainBackend: Send + Sync {
    /// Returns a fresh address that has never been handed out before.
    async fn create_receive_address(&self) -> Result<String>;

    async fn list_unspent(
        &self,
        min_confirmations: u32,
        max_confirmations: u32,
        address: &str,
    ) -> Result<Vec<Utxo>>;
}
