//! In-process pub/sub bus carrying market data to subscribers.
//!
//! Topics follow the `{kind, venue, symbol}` grammar. Each topic is
//! backed by its own broadcast channel, so subscribers observe events
//! for a given topic in publication order.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tidal_core::{MarketQuote, OrderBookChanges, OrderBookSnapshot, Product};
use tokio::sync::broadcast;

/// Default per-topic channel capacity before slow subscribers lag.
pub const DEFAULT_TOPIC_CAPACITY: usize = 512;

/// Kind discriminant of a bus topic.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicKind {
    OrderBookSnapshot,
    OrderBookChanges,
    MarketQuote,
}

/// A fully qualified subscription target: `{kind, venue, symbol}`.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Topic {
    pub kind: TopicKind,
    pub product: Product,
}

impl Topic {
    pub fn order_book_snapshot(product: Product) -> Self {
        Self {
            kind: TopicKind::OrderBookSnapshot,
            product,
        }
    }

    pub fn order_book_changes(product: Product) -> Self {
        Self {
            kind: TopicKind::OrderBookChanges,
            product,
        }
    }

    pub fn market_quote(product: Product) -> Self {
        Self {
            kind: TopicKind::MarketQuote,
            product,
        }
    }
}

/// Payload delivered to subscribers.
#[derive(Clone, Debug)]
pub enum MarketEvent {
    Snapshot {
        product: Product,
        snapshot: OrderBookSnapshot,
    },
    Changes {
        product: Product,
        changes: OrderBookChanges,
    },
    Quote(MarketQuote),
}

impl MarketEvent {
    /// The topic this event is published under.
    #[must_use]
    pub fn topic(&self) -> Topic {
        match self {
            Self::Snapshot { product, .. } => Topic::order_book_snapshot(product.clone()),
            Self::Changes { product, .. } => Topic::order_book_changes(product.clone()),
            Self::Quote(quote) => Topic::market_quote(Product::new(
                quote.venue_id.clone(),
                quote.product_symbol.clone(),
            )),
        }
    }
}

/// Publish/subscribe fan-out of [`MarketEvent`]s keyed by topic.
///
/// Channels are created lazily on first use and kept for the life of
/// the bus. Publishing to a topic nobody subscribed to is a no-op.
pub struct EventBus {
    channels: RwLock<HashMap<Topic, broadcast::Sender<MarketEvent>>>,
    capacity: usize,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, topic: &Topic) -> broadcast::Sender<MarketEvent> {
        if let Some(sender) = self.channels.read().get(topic) {
            return sender.clone();
        }
        let mut channels = self.channels.write();
        channels
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Register a subscriber for a single topic.
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<MarketEvent> {
        self.sender(&topic).subscribe()
    }

    /// Publish an event to its topic, returning the subscriber count it
    /// reached.
    pub fn publish(&self, event: MarketEvent) -> usize {
        let topic = event.topic();
        let sender = self.sender(&topic);
        match sender.send(event) {
            Ok(received) => received,
            // All receivers dropped; the event is discarded.
            Err(_) => 0,
        }
    }

    /// Number of topics that currently have a channel allocated.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.channels.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
