use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context as _, Result};
use onchain_ln_swap::lightning::payout::PayoutExecutor;
use onchain_ln_swap::onchain::detector::{ConfirmationPolicy, FundingDetector};
use onchain_ln_swap::swap::monitor::{MonitorConfig, SettlementMonitor};
use onchain_ln_swap::swap::store::{SqliteSwapStore, Transition};
use onchain_ln_swap::swap::{NewSwap, SwapId, SwapRecord, SwapState, TransitionFields};
use tempfile::TempDir;

use super::fakes::{FakeLightning, FakeOnchain, payment_hash_for};

pub fn test_monitor_config() -> MonitorConfig {
    MonitorConfig {
        poll_interval: Duration::from_millis(20),
        settling_stale_after: Duration::from_secs(3600),
        payment_attempt_grace: Duration::from_secs(60),
        max_concurrent_swaps: 4,
    }
}

/// A ledger file plus fake backends, with monitors built on demand.
pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<Mutex<SqliteSwapStore>>,
    pub onchain: Arc<FakeOnchain>,
    pub lightning: Arc<FakeLightning>,
    pub detector_timeout: Duration,
    pub pay_call_timeout: Duration,
}

impl Harness {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create tempdir")?;
        let store = SqliteSwapStore::open(dir.path().join("swaps.sqlite3"))
            .context("open sqlite store")?;
        Ok(Self {
            dir,
            store: Arc::new(Mutex::new(store)),
            onchain: Arc::new(FakeOnchain::default()),
            lightning: Arc::new(FakeLightning::default()),
            detector_timeout: Duration::from_secs(5),
            pay_call_timeout: Duration::from_secs(5),
        })
    }

    pub fn store_path(&self) -> PathBuf {
        self.dir.path().join("swaps.sqlite3")
    }

    /// Opens a second connection to the same ledger, as a restarted or
    /// concurrently running process would.
    pub fn reopen_store(&self) -> Result<Arc<Mutex<SqliteSwapStore>>> {
        let store = SqliteSwapStore::open(self.store_path()).context("reopen sqlite store")?;
        Ok(Arc::new(Mutex::new(store)))
    }

    pub fn monitor(&self, cfg: MonitorConfig) -> SettlementMonitor {
        self.monitor_on(self.store.clone(), cfg)
    }

    pub fn monitor_on(
        &self,
        store: Arc<Mutex<SqliteSwapStore>>,
        cfg: MonitorConfig,
    ) -> SettlementMonitor {
        let detector = FundingDetector::new(
            self.onchain.clone(),
            ConfirmationPolicy::default(),
            self.detector_timeout,
        );
        let executor = PayoutExecutor::new(
            self.lightning.clone(),
            self.pay_call_timeout,
            Duration::from_millis(100),
        )
        .with_poll_interval(Duration::from_millis(10));
        SettlementMonitor::new(cfg, store, detector, executor)
    }

    pub fn create_swap(&self, n: u32, requested_amount_sat: u64, fee_sat: u64) -> Result<SwapRecord> {
        let invoice = format!("lnbcrt-invoice-{n}");
        self.store
            .lock()
            .unwrap()
            .create_swap(&NewSwap {
                payment_hash: payment_hash_for(&invoice),
                bolt11_invoice: invoice,
                deposit_address: format!("bcrt1qdeposit{n:04}"),
                requested_amount_sat,
                fee_sat,
            })
    }

    /// A swap already funded and moved to `settling`, as a monitor would leave it.
    pub fn settling_swap(&self, n: u32) -> Result<SwapRecord> {
        let swap = self.create_swap(n, 100_000, 1_000)?;
        let mut store = self.store.lock().unwrap();
        let funded = TransitionFields {
            receipt_txid: Some(format!("txid:{n}")),
            received_amount_sat: Some(100_000),
            ..Default::default()
        };
        store.transition(
            swap.swap_id,
            SwapState::AwaitingFunds,
            SwapState::FundsDetected,
            &funded,
        )?;
        match store.transition(
            swap.swap_id,
            SwapState::FundsDetected,
            SwapState::Settling,
            &TransitionFields::default(),
        )? {
            Transition::Applied(record) => Ok(record),
            Transition::Conflict { actual } => anyhow::bail!("swap {n} unexpectedly {actual}"),
        }
    }

    pub fn swap(&self, swap_id: SwapId) -> Result<SwapRecord> {
        self.store
            .lock()
            .unwrap()
            .get_swap(swap_id)?
            .with_context(|| format!("swap {swap_id} missing"))
    }
}
