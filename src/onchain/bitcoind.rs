use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use bitcoincore_rpc::bitcoin::address::NetworkUnchecked;
use bitcoincore_rpc::bitcoin::{Address, Network};
use bitcoincore_rpc::json::AddressType;
use bitcoincore_rpc::{Auth, Client, RpcApi as _};

use super::{OnchainBackend, Utxo};

#[derive(Debug, Clone)]
pub enum BitcoindAuth {
    UserPass { user: String, password: String },
    CookieFile(PathBuf),
}

/// Bitcoin Core wallet RPC. Calls are blocking and run on the blocking pool.
#[derive(Clone)]
pub struct BitcoindClient {
    client: Arc<Client>,
    network: Network,
}

impl BitcoindClient {
    pub fn new(rpc_url: &str, auth: BitcoindAuth, network: Network) -> Result<Self> {
        let auth = match auth {
            BitcoindAuth::UserPass { user, password } => Auth::UserPass(user, password),
            BitcoindAuth::CookieFile(path) => Auth::CookieFile(path),
        };
        let client = Client::new(rpc_url, auth)
            .with_context(|| format!("create bitcoind rpc client {rpc_url}"))?;
        Ok(Self {
            client: Arc::new(client),
            network,
        })
    }

    fn parse_address(&self, address: &str) -> Result<Address> {
        let unchecked: Address<NetworkUnchecked> = address
            .parse()
            .with_context(|| format!("parse address {address}"))?;
        unchecked
            .require_network(self.network)
            .with_context(|| format!("address {address} is not for {}", self.network))
    }
}

#[async_trait::async_trait]
impl OnchainBackend for BitcoindClient {
    async fn create_receive_address(&self) -> Result<String> {
        let client = self.client.clone();
        let network = self.network;
        tokio::task::spawn_blocking(move || -> Result<String> {
            let address = client
                .get_new_address(None, Some(AddressType::Bech32))
                .context("getnewaddress")?
                .require_network(network)
                .context("check new address network")?;
            Ok(address.to_string())
        })
        .await
        .context("join getnewaddress")?
    }

    async fn list_unspent(
        &self,
        min_confirmations: u32,
        max_confirmations: u32,
        address: &str,
    ) -> Result<Vec<Utxo>> {
        let address = self.parse_address(address)?;
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<Utxo>> {
            let entries = client
                .list_unspent(
                    Some(min_confirmations as usize),
                    Some(max_confirmations as usize),
                    Some(&[&address]),
                    Some(true),
                    None,
                )
                .with_context(|| format!("listunspent {address}"))?;

            Ok(entries
                .into_iter()
                .map(|entry| Utxo {
                    txid: entry.txid.to_string(),
                    vout: entry.vout,
                    amount_sat: entry.amount.to_sat(),
                    confirmations: entry.confirmations,
                })
                .collect())
        })
        .await
        .context("join listunspent")?
    }
}
