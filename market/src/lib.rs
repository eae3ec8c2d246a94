#![forbid(unsafe_code)]

//! Marketplace settlement flows over dual payment rails.
//!
//! Listings (fixed price, auction, offer-only, bundle) hold their asset in
//! escrow from creation until a terminal state. Every sale computes a
//! marketplace fee, splits it through the referral cascade, pays the resolved
//! recipients directly and credits the remaining pools to the fee ledger for
//! the next distribution sweep. Payment-rail and asset-custody collaborators
//! are injected per call; each transfer either succeeds or aborts the whole
//! operation.

pub mod auction;
pub mod offer;

pub use auction::{Auction, AuctionEngine, BidOutcome};
pub use offer::{Offer, OfferEngine};

use fees::{split_fee, CascadeBreakdown, CascadeRouting, FeeLedger, FeeSource};
use metrics::{gauge, increment_counter};
use mpc::{Ciphertext, MpcError, MpcRuntime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub type AccountId = String;
pub type Balance = u64;
pub type ListingId = u64;
pub type OfferId = u64;
pub type UnixTimestamp = u64;

/// Fee surcharge applied when settling on the private rail, reflecting the
/// cost of the MPC operations involved.
pub const PRIVACY_FEE_MULTIPLIER: u64 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("transfer failed: {reason}")]
pub struct TransferError {
    pub reason: String,
}

impl TransferError {
    pub fn new<T: Into<String>>(reason: T) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MarketError {
    #[error("unknown listing {0}")]
    UnknownListing(ListingId),
    #[error("unknown offer {0}")]
    UnknownOffer(OfferId),
    #[error("listing {0} is not active")]
    ListingNotActive(ListingId),
    #[error("listing {0} has expired")]
    ListingExpired(ListingId),
    #[error("auction for listing {listing_id} ended at {ended_at}")]
    AuctionEnded {
        listing_id: ListingId,
        ended_at: UnixTimestamp,
    },
    #[error("auction still running until {ends_at}")]
    AuctionStillRunning { ends_at: UnixTimestamp },
    #[error("sellers cannot bid on their own auction")]
    CannotBidOwnAuction,
    #[error("bid {bid} below reserve price {reserve}")]
    BelowReserve { bid: Balance, reserve: Balance },
    #[error("bid {bid} below required minimum {required}")]
    BidTooLow { bid: Balance, required: Balance },
    #[error("listing {0} has bids and cannot be cancelled")]
    CannotCancelWithBids(ListingId),
    #[error("caller is not the seller")]
    NotSeller,
    #[error("caller is not the buyer")]
    NotBuyer,
    #[error("buyers and sellers must be distinct")]
    SelfTrade,
    #[error("operation not valid for this listing kind")]
    WrongListingKind(ListingId),
    #[error("listing kind {0:?} is not created through this flow")]
    UnsupportedCreationKind(ListingKind),
    #[error("settlement aborted and escrow could not be fully restored: {detail}")]
    EscrowInconsistent { detail: String },
    #[error("offer {0} already accepted or cancelled")]
    OfferClosed(OfferId),
    #[error("offer {0} has expired")]
    OfferExpired(OfferId),
    #[error("offer has not expired yet (expiry {expiry})")]
    OfferNotExpired { expiry: UnixTimestamp },
    #[error("amount must be non-zero")]
    ZeroAmount,
    #[error("expiry {expiry} not in the future (now {now})")]
    ExpiryNotFuture {
        expiry: UnixTimestamp,
        now: UnixTimestamp,
    },
    #[error("auction listing requires an end time")]
    MissingEndTime,
    #[error("private flow requires an mpc runtime")]
    MpcUnavailable,
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Fee(#[from] fees::FeeError),
    #[error(transparent)]
    Mpc(#[from] MpcError),
}

pub type Result<T> = std::result::Result<T, MarketError>;

/// NFT/token custody collaborator. Assets move into escrow when a listing is
/// created and are released on settlement or cancellation. A transfer either
/// succeeds or the surrounding operation fails.
pub trait AssetCustody: Send + Sync {
    fn escrow_in(&self, asset: &AssetRef, from: &str) -> std::result::Result<(), TransferError>;
    fn release_to(&self, asset: &AssetRef, to: &str) -> std::result::Result<(), TransferError>;
}

/// Fungible payment collaborator covering both rails. Same contract: a
/// failed transfer aborts the calling operation.
pub trait PaymentRail: Send + Sync {
    fn escrow_from(&self, from: &str, amount: Balance) -> std::result::Result<(), TransferError>;
    fn payout_to(&self, to: &str, amount: Balance) -> std::result::Result<(), TransferError>;
    fn refund_to(&self, to: &str, amount: Balance) -> std::result::Result<(), TransferError>;
}

/// External collaborators threaded through a settlement call.
pub struct SettleEnv<'a> {
    pub custody: &'a dyn AssetCustody,
    pub payments: &'a dyn PaymentRail,
    pub mpc: Option<&'a dyn MpcRuntime>,
    pub fees: &'a mut FeeLedger,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    pub contract: String,
    pub token_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingKind {
    FixedPrice,
    Auction,
    OfferOnly,
    Bundle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingStatus {
    Active,
    Sold,
    Cancelled,
    Expired,
}

/// Payment rail, chosen explicitly by the lister; never inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentKind {
    Public,
    Private,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub seller: AccountId,
    pub assets: Vec<AssetRef>,
    /// Plain price; zero when the listing is private or offer-only.
    pub price: Balance,
    pub kind: ListingKind,
    pub status: ListingStatus,
    pub payment: PaymentKind,
    pub start_time: UnixTimestamp,
    pub end_time: Option<UnixTimestamp>,
    pub encrypted_price: Option<Ciphertext>,
}

impl Listing {
    pub fn is_private(&self) -> bool {
        self.payment == PaymentKind::Private
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleReceipt {
    pub listing_id: ListingId,
    pub buyer: AccountId,
    pub seller: AccountId,
    pub price: Balance,
    pub fee: Balance,
    pub breakdown: CascadeBreakdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Token all marketplace fees are denominated in.
    pub payment_token: String,
    /// Marketplace fee in basis points of the sale price.
    pub fee_bps: u64,
    /// Anti-snipe window in seconds; a bid this close to the deadline
    /// extends the auction once by the same amount.
    pub snipe_window_secs: u64,
    /// Identity recorded as collector on fee ledger entries.
    pub collector: AccountId,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            payment_token: "credit".to_string(),
            fee_bps: 250,
            snipe_window_secs: 600,
            collector: "marketplace".to_string(),
        }
    }
}

/// Composes the fixed-price, auction, offer and bundle flows. Owns all
/// listing/auction/offer state; callers serialize access per listing.
#[derive(Default)]
pub struct Marketplace {
    config: MarketConfig,
    listings: BTreeMap<ListingId, Listing>,
    auctions: AuctionEngine,
    offers: OfferEngine,
    next_listing_id: u64,
    total_listings: u64,
    total_sales: u64,
    total_volume: u128,
}

impl Marketplace {
    pub fn new(config: MarketConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    pub fn listing(&self, id: ListingId) -> Option<&Listing> {
        self.listings.get(&id)
    }

    pub fn auction(&self, listing_id: ListingId) -> Option<&Auction> {
        self.auctions.auction(listing_id)
    }

    pub fn offer(&self, id: OfferId) -> Option<&Offer> {
        self.offers.offer(id)
    }

    pub fn total_listings(&self) -> u64 {
        self.total_listings
    }

    pub fn total_sales(&self) -> u64 {
        self.total_sales
    }

    pub fn total_volume(&self) -> u128 {
        self.total_volume
    }

    /// Lists a single asset at a fixed price (or offer-only). The asset moves
    /// into escrow before the listing exists; a failed escrow creates nothing.
    #[allow(clippy::too_many_arguments)]
    pub fn create_listing(
        &mut self,
        seller: &str,
        asset: AssetRef,
        price: Balance,
        kind: ListingKind,
        end_time: Option<UnixTimestamp>,
        payment: PaymentKind,
        custody: &dyn AssetCustody,
        mpc: Option<&dyn MpcRuntime>,
        now: UnixTimestamp,
    ) -> Result<ListingId> {
        if kind == ListingKind::Auction {
            return Err(MarketError::UnsupportedCreationKind(kind));
        }
        self.insert_listing(seller, vec![asset], price, kind, end_time, payment, custody, mpc, now)
    }

    /// Lists several assets sold together at one price.
    #[allow(clippy::too_many_arguments)]
    pub fn create_bundle(
        &mut self,
        seller: &str,
        assets: Vec<AssetRef>,
        price: Balance,
        end_time: Option<UnixTimestamp>,
        payment: PaymentKind,
        custody: &dyn AssetCustody,
        mpc: Option<&dyn MpcRuntime>,
        now: UnixTimestamp,
    ) -> Result<ListingId> {
        if assets.is_empty() {
            return Err(MarketError::ZeroAmount);
        }
        self.insert_listing(
            seller,
            assets,
            price,
            ListingKind::Bundle,
            end_time,
            payment,
            custody,
            mpc,
            now,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_auction(
        &mut self,
        seller: &str,
        asset: AssetRef,
        reserve_price: Balance,
        bid_increment: Balance,
        end_time: UnixTimestamp,
        payment: PaymentKind,
        custody: &dyn AssetCustody,
        mpc: Option<&dyn MpcRuntime>,
        now: UnixTimestamp,
    ) -> Result<ListingId> {
        if reserve_price == 0 {
            return Err(MarketError::ZeroAmount);
        }
        if end_time <= now {
            return Err(MarketError::ExpiryNotFuture {
                expiry: end_time,
                now,
            });
        }
        let encrypted_reserve = match (payment, mpc) {
            (PaymentKind::Private, Some(runtime)) => Some(runtime.encrypt(reserve_price)),
            (PaymentKind::Private, None) => return Err(MarketError::MpcUnavailable),
            (PaymentKind::Public, _) => None,
        };
        let id = self.insert_listing(
            seller,
            vec![asset],
            0,
            ListingKind::Auction,
            Some(end_time),
            payment,
            custody,
            mpc,
            now,
        )?;
        self.auctions
            .open(id, reserve_price, bid_increment, encrypted_reserve);
        Ok(id)
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_listing(
        &mut self,
        seller: &str,
        assets: Vec<AssetRef>,
        price: Balance,
        kind: ListingKind,
        end_time: Option<UnixTimestamp>,
        payment: PaymentKind,
        custody: &dyn AssetCustody,
        mpc: Option<&dyn MpcRuntime>,
        now: UnixTimestamp,
    ) -> Result<ListingId> {
        if price == 0 && matches!(kind, ListingKind::FixedPrice | ListingKind::Bundle) {
            return Err(MarketError::ZeroAmount);
        }
        let encrypted_price = match (payment, mpc) {
            (PaymentKind::Private, Some(runtime)) if price > 0 => Some(runtime.encrypt(price)),
            (PaymentKind::Private, None) => return Err(MarketError::MpcUnavailable),
            _ => None,
        };
        for asset in &assets {
            custody.escrow_in(asset, seller)?;
        }
        let id = self.next_listing_id;
        self.next_listing_id += 1;
        self.listings.insert(
            id,
            Listing {
                id,
                seller: seller.to_string(),
                assets,
                price: if encrypted_price.is_some() { 0 } else { price },
                kind,
                status: ListingStatus::Active,
                payment,
                start_time: now,
                end_time,
                encrypted_price,
            },
        );
        self.total_listings += 1;
        increment_counter!("market_listings_total");
        Ok(id)
    }

    /// Direct purchase of a fixed-price or bundle listing.
    pub fn buy_now(
        &mut self,
        listing_id: ListingId,
        buyer: &str,
        routing: &CascadeRouting,
        env: &mut SettleEnv<'_>,
        now: UnixTimestamp,
    ) -> Result<SaleReceipt> {
        let price = {
            let listing = self
                .listings
                .get(&listing_id)
                .ok_or(MarketError::UnknownListing(listing_id))?;
            if listing.status != ListingStatus::Active {
                return Err(MarketError::ListingNotActive(listing_id));
            }
            if let Some(end) = listing.end_time {
                if now > end {
                    return Err(MarketError::ListingExpired(listing_id));
                }
            }
            if !matches!(listing.kind, ListingKind::FixedPrice | ListingKind::Bundle) {
                return Err(MarketError::WrongListingKind(listing_id));
            }
            if buyer == listing.seller {
                return Err(MarketError::SelfTrade);
            }
            self.resolve_price(listing, env.mpc)?
        };
        env.payments.escrow_from(buyer, price)?;
        match self.settle_sale(listing_id, buyer, price, routing, env, now) {
            Ok(receipt) => Ok(receipt),
            Err(err @ MarketError::EscrowInconsistent { .. }) => {
                // The escrow no longer holds the full price; refunding it
                // would mint money. Surface the inconsistency instead.
                Err(err)
            }
            Err(err) => {
                // Settlement rolled itself back, so the escrow holds exactly
                // the buyer's price again.
                match env.payments.refund_to(buyer, price) {
                    Ok(()) => Err(err),
                    Err(refund_err) => Err(MarketError::EscrowInconsistent {
                        detail: format!(
                            "{err}; buyer refund of {price} failed: {}",
                            refund_err.reason
                        ),
                    }),
                }
            }
        }
    }

    pub fn place_bid(
        &mut self,
        listing_id: ListingId,
        bidder: &str,
        amount: Balance,
        env: &mut SettleEnv<'_>,
        now: UnixTimestamp,
    ) -> Result<BidOutcome> {
        let listing = self
            .listings
            .get_mut(&listing_id)
            .ok_or(MarketError::UnknownListing(listing_id))?;
        if listing.kind != ListingKind::Auction {
            return Err(MarketError::WrongListingKind(listing_id));
        }
        self.auctions.place_bid(
            listing,
            bidder,
            amount,
            env.payments,
            env.mpc,
            self.config.snipe_window_secs,
            now,
        )
    }

    /// Settles an ended auction. Callable by anyone. Returns the receipt for
    /// a won auction, or `None` when the auction expired without bids and the
    /// assets went back to the seller.
    pub fn finalize_auction(
        &mut self,
        listing_id: ListingId,
        routing: &CascadeRouting,
        env: &mut SettleEnv<'_>,
        now: UnixTimestamp,
    ) -> Result<Option<SaleReceipt>> {
        let (seller, assets) = {
            let listing = self
                .listings
                .get(&listing_id)
                .ok_or(MarketError::UnknownListing(listing_id))?;
            if listing.kind != ListingKind::Auction {
                return Err(MarketError::WrongListingKind(listing_id));
            }
            if listing.status != ListingStatus::Active {
                return Err(MarketError::ListingNotActive(listing_id));
            }
            let end = listing.end_time.ok_or(MarketError::MissingEndTime)?;
            if now <= end {
                return Err(MarketError::AuctionStillRunning { ends_at: end });
            }
            (listing.seller.clone(), listing.assets.clone())
        };
        match self.auctions.winner(listing_id) {
            Some((winner, amount)) => {
                // The winning bid is already escrowed from the bid placement.
                let receipt = self.settle_sale(listing_id, &winner, amount, routing, env, now)?;
                Ok(Some(receipt))
            }
            None => {
                for asset in &assets {
                    env.custody.release_to(asset, &seller)?;
                }
                if let Some(listing) = self.listings.get_mut(&listing_id) {
                    listing.status = ListingStatus::Expired;
                }
                Ok(None)
            }
        }
    }

    /// Seller-initiated cancellation; auctions only before the first bid.
    pub fn cancel_listing(
        &mut self,
        listing_id: ListingId,
        caller: &str,
        custody: &dyn AssetCustody,
    ) -> Result<()> {
        let listing = self
            .listings
            .get(&listing_id)
            .ok_or(MarketError::UnknownListing(listing_id))?;
        if listing.status != ListingStatus::Active {
            return Err(MarketError::ListingNotActive(listing_id));
        }
        if listing.seller != caller {
            return Err(MarketError::NotSeller);
        }
        if listing.kind == ListingKind::Auction && self.auctions.has_bids(listing_id) {
            return Err(MarketError::CannotCancelWithBids(listing_id));
        }
        for asset in &listing.assets {
            custody.release_to(asset, caller)?;
        }
        if let Some(listing) = self.listings.get_mut(&listing_id) {
            listing.status = ListingStatus::Cancelled;
        }
        Ok(())
    }

    pub fn make_offer(
        &mut self,
        listing_id: ListingId,
        buyer: &str,
        amount: Balance,
        expiry: UnixTimestamp,
        env: &mut SettleEnv<'_>,
        now: UnixTimestamp,
    ) -> Result<OfferId> {
        let listing = self
            .listings
            .get(&listing_id)
            .ok_or(MarketError::UnknownListing(listing_id))?;
        self.offers
            .make(listing, buyer, amount, expiry, env.payments, env.mpc, now)
    }

    /// Seller accepts a standing offer; settles exactly like a direct sale
    /// using the already-escrowed offer amount.
    pub fn accept_offer(
        &mut self,
        offer_id: OfferId,
        caller: &str,
        routing: &CascadeRouting,
        env: &mut SettleEnv<'_>,
        now: UnixTimestamp,
    ) -> Result<SaleReceipt> {
        let (listing_id, buyer, amount) = {
            let offer = self.offers.acceptable(offer_id, now)?;
            (offer.listing_id, offer.buyer.clone(), offer.amount)
        };
        {
            let listing = self
                .listings
                .get(&listing_id)
                .ok_or(MarketError::UnknownListing(listing_id))?;
            if listing.status != ListingStatus::Active {
                return Err(MarketError::ListingNotActive(listing_id));
            }
            if listing.seller != caller {
                return Err(MarketError::NotSeller);
            }
        }
        let receipt = self.settle_sale(listing_id, &buyer, amount, routing, env, now)?;
        self.offers.mark_accepted(offer_id)?;
        Ok(receipt)
    }

    /// Seller declines an open offer and the buyer's escrow is refunded.
    pub fn reject_offer(
        &mut self,
        offer_id: OfferId,
        caller: &str,
        payments: &dyn PaymentRail,
    ) -> Result<()> {
        let listing_id = self
            .offers
            .offer(offer_id)
            .ok_or(MarketError::UnknownOffer(offer_id))?
            .listing_id;
        let listing = self
            .listings
            .get(&listing_id)
            .ok_or(MarketError::UnknownListing(listing_id))?;
        if listing.seller != caller {
            return Err(MarketError::NotSeller);
        }
        self.offers.reject(offer_id, payments)
    }

    pub fn reclaim_expired_offer(
        &mut self,
        offer_id: OfferId,
        caller: &str,
        payments: &dyn PaymentRail,
        now: UnixTimestamp,
    ) -> Result<Balance> {
        self.offers.reclaim_expired(offer_id, caller, payments, now)
    }

    fn resolve_price(
        &self,
        listing: &Listing,
        mpc: Option<&dyn MpcRuntime>,
    ) -> Result<Balance> {
        match (&listing.encrypted_price, listing.is_private()) {
            (Some(handle), _) => {
                let runtime = mpc.ok_or(MarketError::MpcUnavailable)?;
                Ok(runtime.decrypt(handle)?)
            }
            (None, true) => Err(MarketError::MpcUnavailable),
            (None, false) => Ok(listing.price),
        }
    }

    fn marketplace_fee(&self, price: Balance, payment: PaymentKind) -> Balance {
        let base =
            ((u128::from(price) * u128::from(self.config.fee_bps)) / 10_000u128) as Balance;
        let fee = match payment {
            PaymentKind::Public => base,
            PaymentKind::Private => base.saturating_mul(PRIVACY_FEE_MULTIPLIER),
        };
        fee.min(price)
    }

    /// Common sale settlement: the buyer's funds are already escrowed. Pays
    /// the seller, routes the fee cascade, credits the fee ledger and
    /// releases the assets.
    ///
    /// The transfers run as a staged plan: if any one fails, every transfer
    /// already made is pulled back into escrow before the error is returned,
    /// so the escrow is whole again and the caller may retry. If a pull-back
    /// itself fails the error is `EscrowInconsistent` and names every
    /// transfer left unreconciled. Listing state changes only after the whole
    /// plan has succeeded.
    fn settle_sale(
        &mut self,
        listing_id: ListingId,
        buyer: &str,
        price: Balance,
        routing: &CascadeRouting,
        env: &mut SettleEnv<'_>,
        now: UnixTimestamp,
    ) -> Result<SaleReceipt> {
        let (seller, assets, payment) = {
            let listing = self
                .listings
                .get(&listing_id)
                .ok_or(MarketError::UnknownListing(listing_id))?;
            (
                listing.seller.clone(),
                listing.assets.clone(),
                listing.payment,
            )
        };
        let fee = self.marketplace_fee(price, payment);
        let seller_take = price.saturating_sub(fee);
        let breakdown = split_fee(fee, routing);

        let mut plan: Vec<(AccountId, Balance)> = Vec::new();
        if seller_take > 0 {
            plan.push((seller.clone(), seller_take));
        }
        for (recipient, amount) in [
            (routing.referrer.as_deref(), breakdown.referrer),
            (
                routing.parent_referrer.as_deref(),
                breakdown.parent_referrer,
            ),
            (routing.listing_node.as_deref(), breakdown.listing_node),
            (routing.selling_node.as_deref(), breakdown.selling_node),
        ] {
            if let Some(recipient) = recipient {
                if amount > 0 {
                    plan.push((recipient.to_string(), amount));
                }
            }
        }
        execute_transfers(env, &plan, &assets, buyer)?;

        // Pool-type leaves accumulate in the fee ledger for the next
        // distribution sweep; person-type leaves were paid out above.
        let top_residue = fee
            .saturating_sub(breakdown.transaction_fee)
            .saturating_sub(breakdown.referral_fee)
            .saturating_sub(breakdown.listing_fee);
        let tiers = [
            (
                FeeSource::Transaction,
                breakdown.transaction_fee.saturating_add(top_residue),
            ),
            (
                FeeSource::Referral,
                breakdown
                    .referral_fee
                    .saturating_sub(breakdown.referrer)
                    .saturating_sub(breakdown.parent_referrer),
            ),
            (
                FeeSource::Listing,
                breakdown
                    .listing_fee
                    .saturating_sub(breakdown.listing_node)
                    .saturating_sub(breakdown.selling_node),
            ),
        ];
        for (source, amount) in tiers {
            if amount > 0 {
                env.fees.record(
                    self.config.payment_token.clone(),
                    source,
                    amount,
                    self.config.collector.clone(),
                    now,
                )?;
            }
        }

        if let Some(listing) = self.listings.get_mut(&listing_id) {
            listing.status = ListingStatus::Sold;
        }
        self.total_sales += 1;
        self.total_volume = self.total_volume.saturating_add(u128::from(price));
        increment_counter!("market_sales_total");
        gauge!("market_volume_total", self.total_volume as f64);

        Ok(SaleReceipt {
            listing_id,
            buyer: buyer.to_string(),
            seller,
            price,
            fee,
            breakdown,
        })
    }
}

/// Runs the payout plan and asset releases. On the first failure the
/// completed transfers are pulled back into escrow in reverse order; only
/// when every pull-back succeeds is the escrow whole again.
fn execute_transfers(
    env: &SettleEnv<'_>,
    plan: &[(AccountId, Balance)],
    assets: &[AssetRef],
    buyer: &str,
) -> Result<()> {
    let mut paid: usize = 0;
    let mut released: usize = 0;
    let mut failure = None;
    for (to, amount) in plan {
        if let Err(err) = env.payments.payout_to(to, *amount) {
            failure = Some(err);
            break;
        }
        paid += 1;
    }
    if failure.is_none() {
        for asset in assets {
            if let Err(err) = env.custody.release_to(asset, buyer) {
                failure = Some(err);
                break;
            }
            released += 1;
        }
    }
    let failure = match failure {
        Some(err) => err,
        None => return Ok(()),
    };

    let mut unreconciled = Vec::new();
    for asset in assets[..released].iter().rev() {
        if let Err(err) = env.custody.escrow_in(asset, buyer) {
            unreconciled.push(format!(
                "asset {}/{}: {}",
                asset.contract, asset.token_id, err.reason
            ));
        }
    }
    for (to, amount) in plan[..paid].iter().rev() {
        if let Err(err) = env.payments.escrow_from(to, *amount) {
            unreconciled.push(format!("{to} holds {amount}: {}", err.reason));
        }
    }
    if unreconciled.is_empty() {
        Err(failure.into())
    } else {
        Err(MarketError::EscrowInconsistent {
            detail: format!("{}; unreconciled: {}", failure.reason, unreconciled.join(", ")),
        })
    }
}
