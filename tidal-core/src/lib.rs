//! Fundamental data types shared across the entire workspace.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

mod orders;

pub use orders::{
    AmendAttrs, Order, OrderStatus, OrderType, OrderUpdateSink, Side, TimeInForce, UpdateCallback,
};

/// Alias for price precision.
pub type Price = Decimal;
/// Alias for quantity precision.
pub type Size = Decimal;
/// Identifier of an exchange or broker venue (e.g., `exchange_a`).
pub type VenueId = String;
/// Identifier of an account held at a venue.
pub type AccountId = String;
/// Human-readable market symbol local to a venue (e.g., `btc_usd`).
pub type ProductSymbol = String;
/// Locally generated opaque order identifier (36-character UUID).
pub type ClientId = String;

/// A tradable market addressed as `venue.symbol`.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Product {
    pub venue_id: VenueId,
    pub symbol: ProductSymbol,
}

impl Product {
    pub fn new(venue_id: impl Into<VenueId>, symbol: impl Into<ProductSymbol>) -> Self {
        Self {
            venue_id: venue_id.into(),
            symbol: symbol.into(),
        }
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.venue_id, self.symbol)
    }
}

impl FromStr for Product {
    type Err = ProductParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (venue, symbol) = value
            .split_once('.')
            .ok_or_else(|| ProductParseError(value.to_string()))?;
        if venue.is_empty() || symbol.is_empty() {
            return Err(ProductParseError(value.to_string()));
        }
        Ok(Self::new(venue, symbol))
    }
}

/// Raised when a `venue.symbol` pair cannot be parsed.
#[derive(Debug, thiserror::Error)]
#[error("invalid product '{0}', expected 'venue.symbol'")]
pub struct ProductParseError(pub String);

/// A single price level on one side of the book.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PriceLevel {
    pub price: Price,
    pub size: Size,
}

impl PriceLevel {
    #[must_use]
    pub fn new(price: Price, size: Size) -> Self {
        Self { price, size }
    }
}

/// Best bid/ask pair for a product. Immutable once constructed.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MarketQuote {
    pub venue_id: VenueId,
    pub product_symbol: ProductSymbol,
    pub bid: PriceLevel,
    pub ask: PriceLevel,
    pub timestamp: DateTime<Utc>,
}

impl MarketQuote {
    pub fn new(
        venue_id: impl Into<VenueId>,
        product_symbol: impl Into<ProductSymbol>,
        bid: PriceLevel,
        ask: PriceLevel,
    ) -> Self {
        Self {
            venue_id: venue_id.into(),
            product_symbol: product_symbol.into(),
            bid,
            ask,
            timestamp: Utc::now(),
        }
    }

    /// Mid price between the inside bid and ask.
    #[must_use]
    pub fn mid(&self) -> Price {
        (self.bid.price + self.ask.price) / Decimal::TWO
    }

    /// Absolute spread between the inside ask and bid.
    #[must_use]
    pub fn spread(&self) -> Price {
        self.ask.price - self.bid.price
    }
}

/// Batched price level deltas for both sides of a book.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct OrderBookChanges {
    pub bids: Vec<(Price, Size)>,
    pub asks: Vec<(Price, Size)>,
}

impl OrderBookChanges {
    #[must_use]
    pub fn new(bids: Vec<(Price, Size)>, asks: Vec<(Price, Size)>) -> Self {
        Self { bids, asks }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

/// Full-depth view of a book published on the snapshot topic.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct OrderBookSnapshot {
    pub bids: Vec<(Price, Size)>,
    pub asks: Vec<(Price, Size)>,
    pub timestamp: DateTime<Utc>,
}

impl OrderBookSnapshot {
    #[must_use]
    pub fn new(bids: Vec<(Price, Size)>, asks: Vec<(Price, Size)>) -> Self {
        Self {
            bids,
            asks,
            timestamp: Utc::now(),
        }
    }

    /// View the snapshot levels as a change set covering the whole book.
    #[must_use]
    pub fn as_changes(&self) -> OrderBookChanges {
        OrderBookChanges::new(self.bids.clone(), self.asks.clone())
    }
}
