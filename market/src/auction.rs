use crate::{
    AccountId, Balance, Listing, ListingId, ListingStatus, MarketError, PaymentRail, Result,
    UnixTimestamp,
};
use mpc::{Ciphertext, MpcRuntime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Book state for one auction-type listing. Retained for audit after the
/// listing reaches a terminal state, never reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auction {
    pub listing_id: ListingId,
    pub reserve_price: Balance,
    pub bid_increment: Balance,
    pub highest_bid: Balance,
    pub highest_bidder: Option<AccountId>,
    pub extended: bool,
    pub encrypted_highest: Option<Ciphertext>,
    pub encrypted_reserve: Option<Ciphertext>,
    bids: BTreeMap<AccountId, Balance>,
    bidders: Vec<AccountId>,
}

impl Auction {
    pub fn bid_of(&self, bidder: &str) -> Option<Balance> {
        self.bids.get(bidder).copied()
    }

    pub fn bidders(&self) -> &[AccountId] {
        &self.bidders
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BidOutcome {
    pub highest_bid: Balance,
    pub extended: bool,
}

/// Per-listing bid state machine: reserve and increment gates, refund of the
/// outbid party, and a one-shot anti-snipe extension.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuctionEngine {
    auctions: BTreeMap<ListingId, Auction>,
}

impl AuctionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(
        &mut self,
        listing_id: ListingId,
        reserve_price: Balance,
        bid_increment: Balance,
        encrypted_reserve: Option<Ciphertext>,
    ) {
        self.auctions.insert(
            listing_id,
            Auction {
                listing_id,
                reserve_price,
                bid_increment,
                highest_bid: 0,
                highest_bidder: None,
                extended: false,
                encrypted_highest: None,
                encrypted_reserve,
                bids: BTreeMap::new(),
                bidders: Vec::new(),
            },
        );
    }

    pub fn auction(&self, listing_id: ListingId) -> Option<&Auction> {
        self.auctions.get(&listing_id)
    }

    pub fn has_bids(&self, listing_id: ListingId) -> bool {
        self.auctions
            .get(&listing_id)
            .map(|a| a.highest_bidder.is_some())
            .unwrap_or(false)
    }

    pub fn winner(&self, listing_id: ListingId) -> Option<(AccountId, Balance)> {
        let auction = self.auctions.get(&listing_id)?;
        let bidder = auction.highest_bidder.clone()?;
        Some((bidder, auction.highest_bid))
    }

    /// Places a bid. The new amount is escrowed and the previous highest
    /// bidder is refunded in full before the book changes; if the refund
    /// fails, the new escrow is returned and the whole placement fails.
    ///
    /// For private listings the reserve and increment gates are evaluated on
    /// ciphertexts, revealing only the boolean outcome to third parties; the
    /// book itself records the plain amount.
    pub fn place_bid(
        &mut self,
        listing: &mut Listing,
        bidder: &str,
        amount: Balance,
        payments: &dyn PaymentRail,
        mpc: Option<&dyn MpcRuntime>,
        snipe_window: u64,
        now: UnixTimestamp,
    ) -> Result<BidOutcome> {
        if listing.status != ListingStatus::Active {
            return Err(MarketError::ListingNotActive(listing.id));
        }
        let end_time = listing.end_time.ok_or(MarketError::MissingEndTime)?;
        if now > end_time {
            return Err(MarketError::AuctionEnded {
                listing_id: listing.id,
                ended_at: end_time,
            });
        }
        if bidder == listing.seller {
            return Err(MarketError::CannotBidOwnAuction);
        }
        let auction = self
            .auctions
            .get(&listing.id)
            .ok_or(MarketError::UnknownListing(listing.id))?;

        let encrypted_bid = match (listing.is_private(), mpc) {
            (true, Some(runtime)) => {
                let bid = runtime.encrypt(amount);
                if let Some(reserve) = &auction.encrypted_reserve {
                    if !runtime.compare_ge(&bid, reserve)? {
                        return Err(MarketError::BelowReserve {
                            bid: amount,
                            reserve: auction.reserve_price,
                        });
                    }
                }
                if let Some(highest) = &auction.encrypted_highest {
                    let floor = runtime.add_plain(highest, auction.bid_increment)?;
                    if !runtime.compare_ge(&bid, &floor)? {
                        return Err(MarketError::BidTooLow {
                            bid: amount,
                            required: auction.highest_bid.saturating_add(auction.bid_increment),
                        });
                    }
                }
                Some(bid)
            }
            (true, None) => return Err(MarketError::MpcUnavailable),
            (false, _) => {
                if amount < auction.reserve_price {
                    return Err(MarketError::BelowReserve {
                        bid: amount,
                        reserve: auction.reserve_price,
                    });
                }
                if auction.highest_bidder.is_some() {
                    let required = auction.highest_bid.saturating_add(auction.bid_increment);
                    if amount < required {
                        return Err(MarketError::BidTooLow {
                            bid: amount,
                            required,
                        });
                    }
                }
                None
            }
        };

        payments.escrow_from(bidder, amount)?;
        if let Some(previous) = auction.highest_bidder.clone() {
            if let Err(err) = payments.refund_to(&previous, auction.highest_bid) {
                // The outbid party must never lose their refund; undo the new
                // escrow and fail the placement. If the undo fails too, the
                // new bid is stranded in escrow and the caller must know.
                if let Err(undo) = payments.refund_to(bidder, amount) {
                    return Err(MarketError::EscrowInconsistent {
                        detail: format!(
                            "outbid refund to {previous} failed: {}; \
                             escrow of {amount} from {bidder} stranded: {}",
                            err.reason, undo.reason
                        ),
                    });
                }
                return Err(err.into());
            }
        }

        let auction = self
            .auctions
            .get_mut(&listing.id)
            .ok_or(MarketError::UnknownListing(listing.id))?;
        if !auction.bids.contains_key(bidder) {
            auction.bidders.push(bidder.to_string());
        }
        auction.bids.insert(bidder.to_string(), amount);
        auction.highest_bid = amount;
        auction.highest_bidder = Some(bidder.to_string());
        if let Some(bid) = encrypted_bid {
            auction.encrypted_highest = Some(bid);
        }

        let mut extended = false;
        if !auction.extended && end_time.saturating_sub(now) < snipe_window {
            listing.end_time = Some(end_time.saturating_add(snipe_window));
            auction.extended = true;
            extended = true;
        }

        Ok(BidOutcome {
            highest_bid: amount,
            extended,
        })
    }
}
