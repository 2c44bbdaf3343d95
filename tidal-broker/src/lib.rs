//! Venue-agnostic traits used by the rest of the framework.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tidal_core::{AmendAttrs, MarketQuote, Order, ProductSymbol, VenueId};

/// Convenience alias for adapter results.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Common error type returned by venue adapter implementations.
#[derive(Clone, Debug, Error)]
pub enum AdapterError {
    /// Represents transport-level failures (network, disconnects, etc.).
    #[error("transport error: {0}")]
    Transport(String),
    /// Returned when authentication fails or credentials are missing.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// Returned when the request parameters are invalid for the target venue.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Venue responded with a business rejection (e.g., insufficient balance).
    #[error("venue rejected: {0}")]
    Rejected(String),
    /// The adapter gave up waiting for the venue.
    #[error("timed out: {0}")]
    Timeout(String),
    /// A catch-all branch for other issues.
    #[error("unexpected error: {0}")]
    Other(String),
}

impl AdapterError {
    /// The short reason string recorded on errored orders.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Transport(msg)
            | Self::Authentication(msg)
            | Self::InvalidRequest(msg)
            | Self::Rejected(msg)
            | Self::Timeout(msg)
            | Self::Other(msg) => msg.clone(),
        }
    }
}

/// Metadata describing an adapter, used for logging and `info` output.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AdapterInfo {
    pub venue_id: VenueId,
    pub driver: String,
}

/// Acknowledgement of an accepted order submission.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct OrderAck {
    pub server_id: String,
}

/// Acknowledgement of a successful in-place amendment.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AmendAck {
    pub server_id: String,
    pub attrs: AmendAttrs,
}

/// Acknowledgement of a completed cancel.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CancelAck {
    pub server_id: String,
}

/// Trait describing the execution surface of a remote venue account.
///
/// Implementations are called from dedicated tasks spawned by the
/// order pipeline; they may block on network I/O but never run on an
/// advisor's task.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    /// Return metadata about the adapter for telemetry.
    fn info(&self) -> AdapterInfo;

    /// Submit a new order, returning the venue-assigned identifier.
    async fn create_order(&self, order: &Order) -> AdapterResult<OrderAck>;

    /// Amend a live order in place.
    async fn amend_order(&self, server_id: &str, attrs: AmendAttrs) -> AdapterResult<AmendAck>;

    /// Cancel a live order by its venue identifier.
    async fn cancel_order(&self, server_id: &str) -> AdapterResult<CancelAck>;

    /// Amend a batch of orders, yielding one outcome per entry in input
    /// order. The default issues the amendments sequentially.
    async fn amend_orders_bulk(
        &self,
        amendments: Vec<(String, AmendAttrs)>,
    ) -> Vec<AdapterResult<AmendAck>> {
        let mut outcomes = Vec::with_capacity(amendments.len());
        for (server_id, attrs) in amendments {
            outcomes.push(self.amend_order(&server_id, attrs).await);
        }
        outcomes
    }
}

/// Query surface of the external order book store.
#[async_trait]
pub trait InsideQuotes: Send + Sync {
    /// Best bid/ask for the product at the moment of the call.
    async fn inside_quote(
        &self,
        venue_id: &VenueId,
        symbol: &ProductSymbol,
    ) -> AdapterResult<MarketQuote>;
}

/// Routes pipeline calls to venue-specific adapters by venue id.
pub struct VenueRouter {
    routes: HashMap<VenueId, Arc<dyn VenueAdapter>>,
}

impl VenueRouter {
    #[must_use]
    pub fn new(routes: HashMap<VenueId, Arc<dyn VenueAdapter>>) -> Self {
        Self { routes }
    }

    /// Look up the adapter registered for a venue.
    pub fn adapter_for(&self, venue_id: &str) -> AdapterResult<Arc<dyn VenueAdapter>> {
        self.routes.get(venue_id).cloned().ok_or_else(|| {
            AdapterError::InvalidRequest(format!("no adapter registered for venue '{venue_id}'"))
        })
    }

    /// Venues with a registered adapter, unordered.
    pub fn venues(&self) -> impl Iterator<Item = &VenueId> {
        self.routes.keys()
    }
}
