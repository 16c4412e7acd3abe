use std::ops::AddAssign;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::lightning::PaymentLookup;
use crate::lightning::payout::{PayoutExecutor, PayoutOutcome};
use crate::onchain::detector::{FundingDetector, FundingStatus};
use crate::swap::store::{AttemptOutcome, SqliteSwapStore, Transition};
use crate::swap::{SwapRecord, SwapState, TransitionFields};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    /// A swap that has been `settling` this long without a definitive outcome
    /// is flagged for manual reconciliation and never paid again automatically.
    pub settling_stale_after: Duration,
    /// An open or unknown attempt younger than this may still reach the node,
    /// so a `NotFound` lookup for it is not taken as "never sent".
    pub payment_attempt_grace: Duration,
    pub max_concurrent_swaps: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            settling_stale_after: Duration::from_secs(3600),
            payment_attempt_grace: Duration::from_secs(120),
            max_concurrent_swaps: 8,
        }
    }
}

/// Counts of what one pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub funded: usize,
    pub settled: usize,
    pub failed: usize,
    pub unresolved: usize,
    pub flagged: usize,
    pub conflicts: usize,
    pub errors: usize,
}

impl PassReport {
    pub fn is_empty(&self) -> bool {
        *self == PassReport::default()
    }

    fn record(&mut self, outcome: SwapOutcome) {
        match outcome {
            SwapOutcome::Idle => {}
            SwapOutcome::Funded => self.funded += 1,
            SwapOutcome::Settled => self.settled += 1,
            SwapOutcome::Failed => self.failed += 1,
            SwapOutcome::Unresolved => self.unresolved += 1,
            SwapOutcome::Flagged => self.flagged += 1,
            SwapOutcome::Conflict => self.conflicts += 1,
        }
    }
}

impl AddAssign for PassReport {
    fn add_assign(&mut self, rhs: Self) {
        self.funded += rhs.funded;
        self.settled += rhs.settled;
        self.failed += rhs.failed;
        self.unresolved += rhs.unresolved;
        self.flagged += rhs.flagged;
        self.conflicts += rhs.conflicts;
        self.errors += rhs.errors;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SwapOutcome {
    Idle,
    Funded,
    Settled,
    Failed,
    Unresolved,
    Flagged,
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    AwaitFunds,
    Arm,
    Settle,
}

impl Stage {
    fn as_str(self) -> &'static str {
        match self {
            Stage::AwaitFunds => "await_funds",
            Stage::Arm => "arm",
            Stage::Settle => "settle",
        }
    }
}

/// Walks the ledger each pass: scans `awaiting_funds` deposits, moves
/// `funds_detected` swaps on to `settling`, and settles `settling` swaps by
/// looking up earlier attempts before ever paying. Every state change is a
/// compare-and-set, and attempts are claimed in the ledger before the node
/// is contacted, so overlapping or restarted monitors pay at most once.
#[derive(Clone)]
pub struct SettlementMonitor {
    cfg: MonitorConfig,
    store: Arc<Mutex<SqliteSwapStore>>,
    detector: FundingDetector,
    executor: PayoutExecutor,
}

impl SettlementMonitor {
    pub fn new(
        cfg: MonitorConfig,
        store: Arc<Mutex<SqliteSwapStore>>,
        detector: FundingDetector,
        executor: PayoutExecutor,
    ) -> Self {
        Self {
            cfg,
            store,
            detector,
            executor,
        }
    }

    /// Runs passes every `poll_interval` until `shutdown` flips to `true` or
    /// its sender is dropped. A pass in progress is allowed to finish.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.cfg.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            poll_interval = ?self.cfg.poll_interval,
            max_concurrent_swaps = self.cfg.max_concurrent_swaps,
            "settlement monitor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            match self.run_once().await {
                Ok(report) if report.is_empty() => tracing::debug!("settlement pass idle"),
                Ok(report) => tracing::info!(?report, "settlement pass finished"),
                Err(err) => {
                    let error = format!("{err:#}");
                    tracing::warn!(%error, "settlement pass failed");
                }
            }
        }

        tracing::info!("settlement monitor stopped");
    }

    pub async fn run_once(&self) -> Result<PassReport> {
        let mut report = PassReport::default();

        let awaiting = self.list(SwapState::AwaitingFunds)?;
        report += self.fan_out(Stage::AwaitFunds, awaiting).await;

        let detected = self.list(SwapState::FundsDetected)?;
        report += self.fan_out(Stage::Arm, detected).await;

        let settling = self.list(SwapState::Settling)?;
        report += self.fan_out(Stage::Settle, settling).await;

        Ok(report)
    }

    async fn fan_out(&self, stage: Stage, swaps: Vec<SwapRecord>) -> PassReport {
        let semaphore = Arc::new(Semaphore::new(self.cfg.max_concurrent_swaps.max(1)));
        let mut tasks = JoinSet::new();

        for swap in swaps {
            let this = self.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let swap_id = swap.swap_id;
                let result = match stage {
                    Stage::AwaitFunds => this.await_funds(swap).await,
                    Stage::Arm => this.arm(&swap),
                    Stage::Settle => this.settle(swap).await,
                };
                (swap_id, result)
            });
        }

        let mut report = PassReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => report.record(outcome),
                Ok((swap_id, Err(err))) => {
                    report.errors += 1;
                    let error = format!("{err:#}");
                    tracing::warn!(%swap_id, stage = stage.as_str(), %error, "swap processing failed");
                }
                Err(err) => {
                    report.errors += 1;
                    tracing::warn!(stage = stage.as_str(), error = %err, "swap task join error");
                }
            }
        }
        report
    }

    async fn await_funds(&self, swap: SwapRecord) -> Result<SwapOutcome> {
        let status = self
            .detector
            .scan(&swap.deposit_address, swap.requested_amount_sat)
            .await
            .context("backend unavailable: funding scan")?;

        let (receipt_txid, amount_sat, confirmations) = match status {
            FundingStatus::NotYetFunded {
                confirmed_sat,
                pending_sat,
            } => {
                if confirmed_sat > 0 || pending_sat > 0 {
                    tracing::debug!(
                        swap_id = %swap.swap_id,
                        confirmed_sat,
                        pending_sat,
                        required_sat = swap.requested_amount_sat,
                        "deposit seen but not yet sufficient"
                    );
                }
                return Ok(SwapOutcome::Idle);
            }
            FundingStatus::Funded {
                receipt_txid,
                amount_sat,
                confirmations,
            } => (receipt_txid, amount_sat, confirmations),
        };

        let fields = TransitionFields {
            receipt_txid: Some(receipt_txid.clone()),
            received_amount_sat: Some(amount_sat),
            ..Default::default()
        };
        let transition = self.store().transition(
            swap.swap_id,
            SwapState::AwaitingFunds,
            SwapState::FundsDetected,
            &fields,
        )?;
        let record = match transition {
            Transition::Applied(record) => record,
            Transition::Conflict { actual } => return Ok(conflict(&swap, actual)),
        };

        tracing::info!(
            swap_id = %record.swap_id,
            %receipt_txid,
            amount_sat,
            confirmations,
            "funds detected"
        );

        self.arm(&record)
    }

    fn arm(&self, swap: &SwapRecord) -> Result<SwapOutcome> {
        let transition = self.store().transition(
            swap.swap_id,
            SwapState::FundsDetected,
            SwapState::Settling,
            &TransitionFields::default(),
        )?;
        match transition {
            Transition::Applied(record) => {
                tracing::info!(
                    swap_id = %record.swap_id,
                    payout_amount_sat = record.payout_amount_sat,
                    "swap settling"
                );
                Ok(SwapOutcome::Funded)
            }
            Transition::Conflict { actual } => Ok(conflict(swap, actual)),
        }
    }

    async fn settle(&self, swap: SwapRecord) -> Result<SwapOutcome> {
        let attempts = self.store().list_payment_attempts(swap.swap_id)?;

        if let Some(last) = attempts.last() {
            let lookup = self
                .executor
                .lookup(&swap.payment_hash)
                .await
                .context("backend unavailable: payment lookup")?;

            match lookup {
                PaymentLookup::Succeeded { payment_ref } => {
                    return self.mark_settled(&swap, payment_ref);
                }
                PaymentLookup::Failed { reason } => {
                    return self.mark_failed(&swap, reason);
                }
                PaymentLookup::Pending => {
                    tracing::info!(swap_id = %swap.swap_id, "payment still in flight");
                    return self.unresolved(&swap, "payment still pending at lightning node");
                }
                PaymentLookup::NotFound => {
                    if matches!(last.outcome, None | Some(AttemptOutcome::Unknown))
                        && elapsed_since(last.started_at) < self.cfg.payment_attempt_grace
                    {
                        tracing::debug!(
                            swap_id = %swap.swap_id,
                            attempt_id = last.attempt_id,
                            "recent payment attempt may still reach the node"
                        );
                        return Ok(SwapOutcome::Unresolved);
                    }
                    if swap.reconciliation_required || self.is_stale(&swap) {
                        return self.unresolved(
                            &swap,
                            "lightning node has no record of earlier payment attempts",
                        );
                    }
                    tracing::info!(
                        swap_id = %swap.swap_id,
                        prior_attempts = attempts.len(),
                        "lightning node has no record of payment, retrying"
                    );
                }
            }
        } else if swap.reconciliation_required {
            return Ok(SwapOutcome::Unresolved);
        }

        let claimed = self.store().claim_payment_attempt(
            swap.swap_id,
            &swap.payment_hash,
            attempts.len(),
        )?;
        let Some(attempt_id) = claimed else {
            tracing::debug!(swap_id = %swap.swap_id, "payment attempt claimed concurrently");
            return Ok(SwapOutcome::Conflict);
        };

        tracing::info!(
            swap_id = %swap.swap_id,
            attempt_id,
            amount_msat = swap.payout_amount_msat(),
            "paying invoice"
        );
        let outcome = self
            .executor
            .pay(
                &swap.bolt11_invoice,
                &swap.payment_hash,
                swap.payout_amount_msat(),
            )
            .await;

        match outcome {
            PayoutOutcome::Sent { payment_ref } => self.mark_settled(&swap, payment_ref),
            PayoutOutcome::FailedDefinitive { reason } => self.mark_failed(&swap, reason),
            PayoutOutcome::Unknown { reason } => {
                self.store().finish_payment_attempts(
                    swap.swap_id,
                    AttemptOutcome::Unknown,
                    &reason,
                )?;
                tracing::warn!(
                    swap_id = %swap.swap_id,
                    attempt_id,
                    %reason,
                    "payment outcome unknown, will look it up next pass"
                );
                self.unresolved(&swap, &reason)
            }
        }
    }

    fn mark_settled(&self, swap: &SwapRecord, payment_ref: String) -> Result<SwapOutcome> {
        let mut store = self.store();
        store.finish_payment_attempts(swap.swap_id, AttemptOutcome::Sent, &payment_ref)?;
        let transition = store.transition(
            swap.swap_id,
            SwapState::Settling,
            SwapState::Settled,
            &TransitionFields {
                payment_ref: Some(payment_ref.clone()),
                ..Default::default()
            },
        )?;
        drop(store);

        match transition {
            Transition::Applied(record) => {
                tracing::info!(swap_id = %record.swap_id, %payment_ref, "swap settled");
                Ok(SwapOutcome::Settled)
            }
            Transition::Conflict { actual } => Ok(conflict(swap, actual)),
        }
    }

    fn mark_failed(&self, swap: &SwapRecord, reason: String) -> Result<SwapOutcome> {
        let mut store = self.store();
        store.finish_payment_attempts(swap.swap_id, AttemptOutcome::Failed, &reason)?;
        let transition = store.transition(
            swap.swap_id,
            SwapState::Settling,
            SwapState::SettlementFailed,
            &TransitionFields {
                failure_reason: Some(reason.clone()),
                ..Default::default()
            },
        )?;
        drop(store);

        match transition {
            Transition::Applied(record) => {
                tracing::error!(
                    swap_id = %record.swap_id,
                    receipt_txid = record.receipt_txid.as_deref().unwrap_or_default(),
                    %reason,
                    "settlement failed, deposit needs manual refund"
                );
                Ok(SwapOutcome::Failed)
            }
            Transition::Conflict { actual } => Ok(conflict(swap, actual)),
        }
    }

    /// Leaves the swap in `settling`, flagging it once it has been there too long.
    fn unresolved(&self, swap: &SwapRecord, note: &str) -> Result<SwapOutcome> {
        if !self.is_stale(swap) {
            return Ok(SwapOutcome::Unresolved);
        }

        let flagged = self.store().flag_for_reconciliation(swap.swap_id, note)?;
        if flagged {
            tracing::warn!(
                swap_id = %swap.swap_id,
                settling_since = %swap.updated_at,
                %note,
                "swap requires manual reconciliation"
            );
            Ok(SwapOutcome::Flagged)
        } else {
            Ok(SwapOutcome::Unresolved)
        }
    }

    fn is_stale(&self, swap: &SwapRecord) -> bool {
        elapsed_since(swap.updated_at) >= self.cfg.settling_stale_after
    }

    fn list(&self, state: SwapState) -> Result<Vec<SwapRecord>> {
        self.store().list_swaps_by_state(state)
    }

    fn store(&self) -> MutexGuard<'_, SqliteSwapStore> {
        self.store.lock().expect("store mutex poisoned")
    }
}

fn conflict(swap: &SwapRecord, actual: SwapState) -> SwapOutcome {
    tracing::debug!(
        swap_id = %swap.swap_id,
        seen = %swap.state,
        %actual,
        "swap advanced concurrently, skipping"
    );
    SwapOutcome::Conflict
}

fn elapsed_since(at: DateTime<Utc>) -> Duration {
    (Utc::now() - at).to_std().unwrap_or(Duration::ZERO)
}
