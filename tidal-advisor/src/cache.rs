//! Per-advisor cache of the latest inside quote per product.

use std::collections::HashMap;

use tidal_core::{MarketQuote, ProductSymbol, VenueId};

/// Maps `(venue, symbol)` to the most recently observed inside quote.
///
/// Owned privately by one advisor actor; never shared across advisors.
#[derive(Clone, Debug, Default)]
pub struct MarketQuoteCache {
    quotes: HashMap<(VenueId, ProductSymbol), MarketQuote>,
}

impl MarketQuoteCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached quote for a product, if any.
    #[must_use]
    pub fn quote_for(&self, venue_id: &str, symbol: &str) -> Option<&MarketQuote> {
        self.quotes
            .get(&(venue_id.to_string(), symbol.to_string()))
    }

    /// Store a quote, returning the value it replaced.
    pub fn put(&mut self, quote: MarketQuote) -> Option<MarketQuote> {
        self.quotes.insert(
            (quote.venue_id.clone(), quote.product_symbol.clone()),
            quote,
        )
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tidal_core::PriceLevel;

    fn quote(venue: &str, symbol: &str, bid: rust_decimal::Decimal) -> MarketQuote {
        MarketQuote::new(
            venue,
            symbol,
            PriceLevel::new(bid, dec!(1)),
            PriceLevel::new(bid + dec!(1), dec!(1)),
        )
    }

    #[test]
    fn put_then_get_round_trips() {
        let mut cache = MarketQuoteCache::new();
        assert!(cache.quote_for("exchange_a", "btc_usd").is_none());

        cache.put(quote("exchange_a", "btc_usd", dec!(100)));
        let cached = cache.quote_for("exchange_a", "btc_usd").unwrap();
        assert_eq!(cached.bid.price, dec!(100));
    }

    #[test]
    fn put_replaces_and_returns_the_previous_quote() {
        let mut cache = MarketQuoteCache::new();
        assert!(cache.put(quote("exchange_a", "btc_usd", dec!(100))).is_none());
        let previous = cache.put(quote("exchange_a", "btc_usd", dec!(101))).unwrap();
        assert_eq!(previous.bid.price, dec!(100));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn products_are_cached_independently() {
        let mut cache = MarketQuoteCache::new();
        cache.put(quote("exchange_a", "btc_usd", dec!(100)));
        cache.put(quote("exchange_b", "btc_usd", dec!(99)));
        assert_eq!(cache.len(), 2);
        assert_eq!(
            cache.quote_for("exchange_b", "btc_usd").unwrap().bid.price,
            dec!(99)
        );
    }
}
