use crate::{
    AccountId, Balance, Listing, ListingStatus, MarketError, OfferId, PaymentRail, Result,
    UnixTimestamp,
};
use mpc::{Ciphertext, MpcRuntime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A standing offer with the full amount escrowed at creation. Terminal once
/// accepted or cancelled; an expired offer stays on the books until the buyer
/// reclaims the escrow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub listing_id: u64,
    pub buyer: AccountId,
    pub amount: Balance,
    pub expiry: UnixTimestamp,
    pub accepted: bool,
    pub cancelled: bool,
    pub encrypted_amount: Option<Ciphertext>,
}

impl Offer {
    pub fn is_open(&self) -> bool {
        !self.accepted && !self.cancelled
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OfferEngine {
    offers: BTreeMap<OfferId, Offer>,
    next_offer_id: u64,
}

impl OfferEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer(&self, id: OfferId) -> Option<&Offer> {
        self.offers.get(&id)
    }

    pub fn offers_for(&self, listing_id: u64) -> impl Iterator<Item = &Offer> {
        self.offers
            .values()
            .filter(move |offer| offer.listing_id == listing_id)
    }

    /// Escrows `amount` from the buyer and opens the offer. The escrow is
    /// pessimistic: the buyer cannot unilaterally withdraw before expiry.
    pub fn make(
        &mut self,
        listing: &Listing,
        buyer: &str,
        amount: Balance,
        expiry: UnixTimestamp,
        payments: &dyn PaymentRail,
        mpc: Option<&dyn MpcRuntime>,
        now: UnixTimestamp,
    ) -> Result<OfferId> {
        if amount == 0 {
            return Err(MarketError::ZeroAmount);
        }
        if expiry <= now {
            return Err(MarketError::ExpiryNotFuture { expiry, now });
        }
        if buyer == listing.seller {
            return Err(MarketError::SelfTrade);
        }
        if listing.status != ListingStatus::Active {
            return Err(MarketError::ListingNotActive(listing.id));
        }
        let encrypted_amount = match (listing.is_private(), mpc) {
            (true, Some(runtime)) => Some(runtime.encrypt(amount)),
            (true, None) => return Err(MarketError::MpcUnavailable),
            (false, _) => None,
        };
        payments.escrow_from(buyer, amount)?;
        let id = self.next_offer_id;
        self.next_offer_id += 1;
        self.offers.insert(
            id,
            Offer {
                id,
                listing_id: listing.id,
                buyer: buyer.to_string(),
                amount,
                expiry,
                accepted: false,
                cancelled: false,
                encrypted_amount,
            },
        );
        Ok(id)
    }

    /// Validates that the offer can still settle and returns it. The caller
    /// marks acceptance via [`OfferEngine::mark_accepted`] once the sale is
    /// fully applied.
    pub fn acceptable(&self, id: OfferId, now: UnixTimestamp) -> Result<&Offer> {
        let offer = self.offers.get(&id).ok_or(MarketError::UnknownOffer(id))?;
        if !offer.is_open() {
            return Err(MarketError::OfferClosed(id));
        }
        if now > offer.expiry {
            return Err(MarketError::OfferExpired(id));
        }
        Ok(offer)
    }

    pub fn mark_accepted(&mut self, id: OfferId) -> Result<()> {
        let offer = self.offers.get_mut(&id).ok_or(MarketError::UnknownOffer(id))?;
        offer.accepted = true;
        Ok(())
    }

    /// Seller-side rejection of an open offer: refunds the buyer's escrow and
    /// closes the offer.
    pub fn reject(&mut self, id: OfferId, payments: &dyn PaymentRail) -> Result<()> {
        let offer = self.offers.get(&id).ok_or(MarketError::UnknownOffer(id))?;
        if !offer.is_open() {
            return Err(MarketError::OfferClosed(id));
        }
        payments.refund_to(&offer.buyer, offer.amount)?;
        if let Some(offer) = self.offers.get_mut(&id) {
            offer.cancelled = true;
        }
        Ok(())
    }

    /// Buyer-side escape hatch: once the offer has expired unaccepted, the
    /// buyer may reclaim the escrowed amount.
    pub fn reclaim_expired(
        &mut self,
        id: OfferId,
        caller: &str,
        payments: &dyn PaymentRail,
        now: UnixTimestamp,
    ) -> Result<Balance> {
        let offer = self.offers.get(&id).ok_or(MarketError::UnknownOffer(id))?;
        if offer.buyer != caller {
            return Err(MarketError::NotBuyer);
        }
        if !offer.is_open() {
            return Err(MarketError::OfferClosed(id));
        }
        if now <= offer.expiry {
            return Err(MarketError::OfferNotExpired {
                expiry: offer.expiry,
            });
        }
        let amount = offer.amount;
        payments.refund_to(caller, amount)?;
        if let Some(offer) = self.offers.get_mut(&id) {
            offer.cancelled = true;
        }
        Ok(amount)
    }
}
