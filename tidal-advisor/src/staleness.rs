//! Decides whether a cached inside quote must be refreshed for a
//! change set.

use tidal_core::{MarketQuote, OrderBookChanges, Price, PriceLevel, Size};

/// True when `changes` could have moved the inside away from the cached
/// quote, or when no quote has been cached yet.
#[must_use]
pub fn quote_is_stale(previous: Option<&MarketQuote>, changes: &OrderBookChanges) -> bool {
    let Some(previous) = previous else {
        return true;
    };
    bids_stale(&previous.bid, &changes.bids) || asks_stale(&previous.ask, &changes.asks)
}

fn bids_stale(inside: &PriceLevel, bids: &[(Price, Size)]) -> bool {
    bids.iter().any(|(price, size)| {
        // The equality arm also catches size-only changes at the inside
        // price.
        *price >= inside.price || (*price == inside.price && *size != inside.size)
    })
}

fn asks_stale(inside: &PriceLevel, asks: &[(Price, Size)]) -> bool {
    asks.iter().any(|(price, size)| {
        *price <= inside.price || (*price == inside.price && *size != inside.size)
    })
}
