mod support;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use onchain_ln_swap::onchain::detector::{ConfirmationPolicy, FundingDetector, FundingStatus};
use support::fakes::FakeOnchain;

const ADDR: &str = "bcrt1qdeposit0001";

fn detector(onchain: &Arc<FakeOnchain>) -> FundingDetector {
    FundingDetector::new(
        onchain.clone(),
        ConfirmationPolicy::default(),
        Duration::from_millis(200),
    )
}

#[test]
fn confirmation_policy_tiers_by_amount() {
    let policy = ConfirmationPolicy::default();
    assert_eq!(policy.required_confirmations(10_000), 2);
    assert_eq!(policy.required_confirmations(999_999), 2);
    assert_eq!(policy.required_confirmations(1_000_000), 6);
    assert!(policy.validate().is_ok());

    let bad = ConfirmationPolicy {
        min_confirmations: 0,
        ..ConfirmationPolicy::default()
    };
    assert!(bad.validate().is_err());
}

#[tokio::test]
async fn empty_address_is_not_yet_funded() -> Result<()> {
    let onchain = Arc::new(FakeOnchain::default());
    let status = detector(&onchain).scan(ADDR, 100_000).await?;
    assert_eq!(
        status,
        FundingStatus::NotYetFunded {
            confirmed_sat: 0,
            pending_sat: 0
        }
    );
    Ok(())
}

#[tokio::test]
async fn shallow_deposit_is_pending_until_confirmed() -> Result<()> {
    let onchain = Arc::new(FakeOnchain::default());
    let detector = detector(&onchain);
    onchain.deposit(ADDR, "txid:a", 100_000, 1);

    assert_eq!(
        detector.scan(ADDR, 100_000).await?,
        FundingStatus::NotYetFunded {
            confirmed_sat: 0,
            pending_sat: 100_000
        }
    );

    onchain.confirm(ADDR, 2);
    assert_eq!(
        detector.scan(ADDR, 100_000).await?,
        FundingStatus::Funded {
            receipt_txid: "txid:a".to_string(),
            amount_sat: 100_000,
            confirmations: 2
        }
    );
    Ok(())
}

#[tokio::test]
async fn large_deposits_need_more_confirmations() -> Result<()> {
    let onchain = Arc::new(FakeOnchain::default());
    let detector = detector(&onchain);
    onchain.deposit(ADDR, "txid:big", 2_000_000, 5);

    assert!(matches!(
        detector.scan(ADDR, 2_000_000).await?,
        FundingStatus::NotYetFunded { .. }
    ));
    onchain.confirm(ADDR, 6);
    assert!(matches!(
        detector.scan(ADDR, 2_000_000).await?,
        FundingStatus::Funded { .. }
    ));
    Ok(())
}

#[tokio::test]
async fn confirmed_outputs_are_aggregated() -> Result<()> {
    let onchain = Arc::new(FakeOnchain::default());
    let detector = detector(&onchain);
    onchain.deposit(ADDR, "txid:b", 40_000, 3);
    onchain.deposit(ADDR, "txid:a", 30_000, 7);

    assert_eq!(
        detector.scan(ADDR, 100_000).await?,
        FundingStatus::NotYetFunded {
            confirmed_sat: 70_000,
            pending_sat: 0
        }
    );

    onchain.deposit(ADDR, "txid:c", 30_000, 0);
    assert_eq!(
        detector.scan(ADDR, 100_000).await?,
        FundingStatus::NotYetFunded {
            confirmed_sat: 70_000,
            pending_sat: 30_000
        }
    );

    onchain.deposit(ADDR, "txid:d", 35_000, 2);
    // Receipt is the deepest output; the reported depth is the shallowest counted.
    let expected = FundingStatus::Funded {
        receipt_txid: "txid:a".to_string(),
        amount_sat: 105_000,
        confirmations: 2,
    };
    assert_eq!(detector.scan(ADDR, 100_000).await?, expected);
    assert_eq!(detector.scan(ADDR, 100_000).await?, expected);
    Ok(())
}

#[tokio::test]
async fn overpayment_still_funds() -> Result<()> {
    let onchain = Arc::new(FakeOnchain::default());
    onchain.deposit(ADDR, "txid:a", 150_000, 3);
    assert!(matches!(
        detector(&onchain).scan(ADDR, 100_000).await?,
        FundingStatus::Funded {
            amount_sat: 150_000,
            ..
        }
    ));
    Ok(())
}

#[tokio::test]
async fn backend_errors_are_not_reported_as_unfunded() -> Result<()> {
    let onchain = Arc::new(FakeOnchain::default());
    onchain.deposit(ADDR, "txid:a", 100_000, 3);
    onchain.set_unavailable(ADDR, true);

    let err = detector(&onchain).scan(ADDR, 100_000).await.unwrap_err();
    assert!(format!("{err:#}").contains("connection refused"), "{err:#}");
    Ok(())
}

#[tokio::test]
async fn hanging_backend_times_out() -> Result<()> {
    let onchain = Arc::new(FakeOnchain::default());
    onchain.set_hanging(ADDR);

    let err = detector(&onchain).scan(ADDR, 100_000).await.unwrap_err();
    assert!(format!("{err:#}").contains("timed out"), "{err:#}");
    Ok(())
}
