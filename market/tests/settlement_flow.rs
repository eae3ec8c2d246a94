//! End-to-end flow: a marketplace sale feeds the fee ledger, a distribution
//! cycle splits the pot, and validators claim their rewards.

use fees::{
    CascadeRouting, DistributionEngine, DistributionRatio, EngineConfig, ManualClock, RewardMode,
};
use market::{
    AssetCustody, AssetRef, ListingKind, Marketplace, PaymentKind, PaymentRail, SettleEnv,
    TransferError,
};
use std::sync::Mutex;

#[derive(Default)]
struct Vault {
    released: Mutex<Vec<(String, String)>>,
}

impl AssetCustody for Vault {
    fn escrow_in(&self, _asset: &AssetRef, _from: &str) -> Result<(), TransferError> {
        Ok(())
    }

    fn release_to(&self, asset: &AssetRef, to: &str) -> Result<(), TransferError> {
        self.released
            .lock()
            .unwrap()
            .push((asset.contract.clone(), to.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct Bank {
    paid: Mutex<Vec<(String, u64)>>,
}

impl Bank {
    fn paid_to(&self, who: &str) -> u64 {
        self.paid
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| to == who)
            .map(|(_, amount)| amount)
            .sum()
    }
}

impl PaymentRail for Bank {
    fn escrow_from(&self, _from: &str, _amount: u64) -> Result<(), TransferError> {
        Ok(())
    }

    fn payout_to(&self, to: &str, amount: u64) -> Result<(), TransferError> {
        self.paid.lock().unwrap().push((to.to_string(), amount));
        Ok(())
    }

    fn refund_to(&self, to: &str, amount: u64) -> Result<(), TransferError> {
        self.paid.lock().unwrap().push((to.to_string(), amount));
        Ok(())
    }
}

#[test]
fn sale_fees_flow_through_distribution_to_claims() {
    let mut engine = DistributionEngine::new(
        EngineConfig {
            distribution_interval: 3_600,
            minimum_distribution_amount: 100,
        },
        DistributionRatio::default(),
        Box::new(ManualClock::new(1_000)),
    );
    engine.accounts_mut().register("val1".to_string()).unwrap();
    engine.accounts_mut().register("val2".to_string()).unwrap();

    let mut market = Marketplace::default();
    let vault = Vault::default();
    let bank = Bank::default();
    let listing = market
        .create_listing(
            "seller",
            AssetRef {
                contract: "nft".to_string(),
                token_id: 7,
            },
            100_000,
            ListingKind::FixedPrice,
            None,
            PaymentKind::Public,
            &vault,
            None,
            1_000,
        )
        .unwrap();

    let routing = CascadeRouting {
        referrer: Some("ref".to_string()),
        parent_referrer: Some("parent".to_string()),
        listing_node: Some("lnode".to_string()),
        selling_node: Some("snode".to_string()),
    };
    let receipt = {
        let mut env = SettleEnv {
            custody: &vault,
            payments: &bank,
            mpc: None,
            fees: engine.fee_ledger_mut(),
        };
        market
            .buy_now(listing, "buyer", &routing, &mut env, 1_100)
            .unwrap()
    };

    // 250 bps of 100_000.
    assert_eq!(receipt.fee, 2_500);
    assert_eq!(
        vault.released.lock().unwrap().as_slice(),
        &[("nft".to_string(), "buyer".to_string())]
    );
    assert_eq!(bank.paid_to("seller"), 97_500);
    assert_eq!(bank.paid_to("ref"), 437);
    // Pool leaves landed in the fee ledger: the full transaction tier plus
    // the unresolved tenths of the referral and listing tiers.
    assert_eq!(engine.fee_ledger().collected("credit"), 1_376);

    let distribution = engine
        .distribute("credit", &[("val1".to_string(), 60), ("val2".to_string(), 40)], None)
        .unwrap();
    let record = engine.distribution(distribution).unwrap();
    assert_eq!(record.total_amount, 1_376);
    assert_eq!(record.validator_share, 963);

    let v1 = engine.claim("val1", "credit", RewardMode::Public, None).unwrap();
    let v2 = engine.claim("val2", "credit", RewardMode::Public, None).unwrap();
    assert_eq!(v1, 577);
    assert_eq!(v2, 385);
    // Every unit of the pot is accounted for across claims and accumulators.
    assert_eq!(
        v1 + v2 + engine.pending_company_fees() + engine.pending_development_fees(),
        1_376
    );
    assert_eq!(engine.fee_ledger().collected("credit"), 0);
}
