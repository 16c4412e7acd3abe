use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use onchain_ln_swap::lightning::{LightningBackend, PayError, PaymentLookup};
use onchain_ln_swap::onchain::{OnchainBackend, Utxo};
use tokio::time::Instant;

/// Payment hash the fake Lightning node assigns to `invoice`.
pub fn payment_hash_for(invoice: &str) -> String {
    format!("{invoice}-hash")
}

#[derive(Default)]
pub struct FakeOnchain {
    state: Mutex<OnchainState>,
}

#[derive(Default)]
struct OnchainState {
    next_address: u32,
    utxos: HashMap<String, Vec<Utxo>>,
    unavailable: HashSet<String>,
    hanging: HashSet<String>,
    address_unavailable: bool,
}

impl FakeOnchain {
    pub fn deposit(&self, address: &str, txid: &str, amount_sat: u64, confirmations: u32) {
        let mut state = self.state.lock().unwrap();
        let utxos = state.utxos.entry(address.to_string()).or_default();
        let vout = utxos.len() as u32;
        utxos.push(Utxo {
            txid: txid.to_string(),
            vout,
            amount_sat,
            confirmations,
        });
    }

    /// Sets the depth of every output at `address`.
    pub fn confirm(&self, address: &str, confirmations: u32) {
        let mut state = self.state.lock().unwrap();
        for utxo in state.utxos.entry(address.to_string()).or_default() {
            utxo.confirmations = confirmations;
        }
    }

    pub fn set_unavailable(&self, address: &str, unavailable: bool) {
        let mut state = self.state.lock().unwrap();
        if unavailable {
            state.unavailable.insert(address.to_string());
        } else {
            state.unavailable.remove(address);
        }
    }

    pub fn set_hanging(&self, address: &str) {
        self.state
            .lock()
            .unwrap()
            .hanging
            .insert(address.to_string());
    }

    pub fn set_address_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().address_unavailable = unavailable;
    }

    pub fn addresses_issued(&self) -> u32 {
        self.state.lock().unwrap().next_address
    }
}

#[async_trait::async_trait]
impl OnchainBackend for FakeOnchain {
    async fn create_receive_address(&self) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        anyhow::ensure!(!state.address_unavailable, "connection refused");
        state.next_address += 1;
        Ok(format!("bcrt1qfakedeposit{:04}", state.next_address))
    }

    async fn list_unspent(
        &self,
        min_confirmations: u32,
        max_confirmations: u32,
        address: &str,
    ) -> Result<Vec<Utxo>> {
        let (hang, utxos) = {
            let state = self.state.lock().unwrap();
            anyhow::ensure!(!state.unavailable.contains(address), "connection refused");
            (
                state.hanging.contains(address),
                state.utxos.get(address).cloned().unwrap_or_default(),
            )
        };
        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(utxos
            .into_iter()
            .filter(|u| u.confirmations >= min_confirmations && u.confirmations <= max_confirmations)
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayBehavior {
    /// The node pays and reports success.
    Succeed,
    /// The node pays but the response never arrives.
    SucceedButLoseResponse,
    /// The node accepts the payment and keeps it in flight.
    Pending,
    /// The request never reaches the node.
    Unreachable,
    /// The node refuses the payment outright.
    Reject(String),
    /// The node accepts the payment, which then fails.
    FailAfterSend(String),
    /// The call never returns; the node shows the payment as succeeded
    /// only `visible_after` the call started.
    AcceptSlowly { visible_after: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LightningCall {
    Pay { invoice: String, amount_msat: u64 },
    Lookup { payment_hash: String },
}

pub struct FakeLightning {
    state: Mutex<LightningState>,
}

struct LightningState {
    behavior: PayBehavior,
    lookup_unavailable: bool,
    payments: HashMap<String, PaymentLookup>,
    delayed: HashMap<String, (Instant, PaymentLookup)>,
    calls: Vec<LightningCall>,
}

impl Default for FakeLightning {
    fn default() -> Self {
        Self::new(PayBehavior::Succeed)
    }
}

impl FakeLightning {
    pub fn new(behavior: PayBehavior) -> Self {
        Self {
            state: Mutex::new(LightningState {
                behavior,
                lookup_unavailable: false,
                payments: HashMap::new(),
                delayed: HashMap::new(),
                calls: Vec::new(),
            }),
        }
    }

    pub fn set_behavior(&self, behavior: PayBehavior) {
        self.state.lock().unwrap().behavior = behavior;
    }

    pub fn set_lookup_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().lookup_unavailable = unavailable;
    }

    /// Seeds what the node reports for `payment_hash`.
    pub fn set_payment(&self, payment_hash: &str, status: PaymentLookup) {
        self.state
            .lock()
            .unwrap()
            .payments
            .insert(payment_hash.to_string(), status);
    }

    pub fn calls(&self) -> Vec<LightningCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn pay_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, LightningCall::Pay { .. }))
            .count()
    }
}

#[async_trait::async_trait]
impl LightningBackend for FakeLightning {
    async fn pay_invoice(&self, invoice: &str, amount_msat: u64) -> Result<String, PayError> {
        let (result, hang) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(LightningCall::Pay {
                invoice: invoice.to_string(),
                amount_msat,
            });

            let hash = payment_hash_for(invoice);
            let succeeded = PaymentLookup::Succeeded {
                payment_ref: format!("payment:{hash}"),
            };
            match state.behavior.clone() {
                PayBehavior::Succeed => {
                    state.payments.insert(hash.clone(), succeeded);
                    (Ok(hash), false)
                }
                PayBehavior::SucceedButLoseResponse => {
                    state.payments.insert(hash, succeeded);
                    (
                        Err(PayError::Indeterminate(anyhow::anyhow!(
                            "connection reset by peer"
                        ))),
                        false,
                    )
                }
                PayBehavior::Pending => {
                    state.payments.insert(hash.clone(), PaymentLookup::Pending);
                    (Ok(hash), false)
                }
                PayBehavior::Unreachable => (
                    Err(PayError::Indeterminate(anyhow::anyhow!(
                        "connection refused"
                    ))),
                    false,
                ),
                PayBehavior::Reject(reason) => (Err(PayError::Rejected(reason)), false),
                PayBehavior::FailAfterSend(reason) => {
                    state
                        .payments
                        .insert(hash.clone(), PaymentLookup::Failed { reason });
                    (Ok(hash), false)
                }
                PayBehavior::AcceptSlowly { visible_after } => {
                    state
                        .delayed
                        .insert(hash.clone(), (Instant::now() + visible_after, succeeded));
                    (Ok(hash), true)
                }
            }
        };

        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        result
    }

    async fn lookup_payment(&self, payment_hash: &str) -> Result<PaymentLookup> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(LightningCall::Lookup {
            payment_hash: payment_hash.to_string(),
        });
        anyhow::ensure!(!state.lookup_unavailable, "connection refused");
        if let Some((visible_at, status)) = state.delayed.get(payment_hash)
            && Instant::now() >= *visible_at
        {
            return Ok(status.clone());
        }
        Ok(state
            .payments
            .get(payment_hash)
            .cloned()
            .unwrap_or(PaymentLookup::NotFound))
    }
}
