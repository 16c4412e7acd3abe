use std::time::Duration;

use anyhow::Result;

use crate::onchain::detector::ConfirmationPolicy;
use crate::swap::fee::FeePolicy;
use crate::swap::monitor::MonitorConfig;

/// Settlement tunables shared by the server binary and tests.
#[derive(Debug, Clone, clap::Args)]
pub struct SettlementArgs {
    /// Fee in basis points of the requested amount (100 = 1%).
    #[arg(long, default_value_t = 100)]
    pub fee_rate_bps: u32,

    #[arg(long, default_value_t = 10_000)]
    pub minimum_amount_sat: u64,

    #[arg(long, default_value_t = 2)]
    pub min_confirmations: u32,

    #[arg(long, default_value_t = 1_000_000)]
    pub large_amount_threshold_sat: u64,

    #[arg(long, default_value_t = 6)]
    pub large_amount_confirmations: u32,

    #[arg(long, default_value_t = 10)]
    pub poll_interval_secs: u64,

    /// Bound on every individual on-chain or Lightning RPC.
    #[arg(long, default_value_t = 30)]
    pub backend_timeout_secs: u64,

    /// How long a payout waits for the node to report success or failure.
    #[arg(long, default_value_t = 60)]
    pub payment_timeout_secs: u64,

    #[arg(long, default_value_t = 3600)]
    pub settling_stale_after_secs: u64,

    #[arg(long, default_value_t = 8)]
    pub max_concurrent_swaps: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceConfig {
    pub fee: FeePolicy,
    pub confirmations: ConfirmationPolicy,
    pub monitor: MonitorConfig,
    pub backend_timeout: Duration,
    pub payment_timeout: Duration,
}

impl SettlementArgs {
    pub fn into_config(self) -> Result<ServiceConfig> {
        let fee = FeePolicy::new(self.fee_rate_bps, self.minimum_amount_sat)?;

        let confirmations = ConfirmationPolicy {
            min_confirmations: self.min_confirmations,
            large_amount_threshold_sat: self.large_amount_threshold_sat,
            large_amount_confirmations: self.large_amount_confirmations,
        };
        confirmations.validate()?;

        anyhow::ensure!(self.poll_interval_secs > 0, "poll_interval_secs must be > 0");
        anyhow::ensure!(
            self.backend_timeout_secs > 0,
            "backend_timeout_secs must be > 0"
        );
        anyhow::ensure!(
            self.payment_timeout_secs > 0,
            "payment_timeout_secs must be > 0"
        );
        anyhow::ensure!(
            self.max_concurrent_swaps >= 1,
            "max_concurrent_swaps must be >= 1"
        );

        let poll_interval = Duration::from_secs(self.poll_interval_secs);
        let backend_timeout = Duration::from_secs(self.backend_timeout_secs);
        let payment_timeout = Duration::from_secs(self.payment_timeout_secs);
        let settling_stale_after = Duration::from_secs(self.settling_stale_after_secs);

        // Covers a full pay call plus the wait for its result in another monitor.
        let payment_attempt_grace = backend_timeout + payment_timeout + poll_interval;
        anyhow::ensure!(
            settling_stale_after >= payment_attempt_grace,
            "settling_stale_after_secs must be >= {}s (backend timeout + payment timeout + poll interval)",
            payment_attempt_grace.as_secs()
        );

        Ok(ServiceConfig {
            fee,
            confirmations,
            monitor: MonitorConfig {
                poll_interval,
                settling_stale_after,
                payment_attempt_grace,
                max_concurrent_swaps: self.max_concurrent_swaps,
            },
            backend_timeout,
            payment_timeout,
        })
    }
}
