//! Simple simulated venue used by tests and the `sim` driver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tidal_broker::{
    AdapterError, AdapterInfo, AdapterResult, AmendAck, CancelAck, InsideQuotes, OrderAck,
    VenueAdapter,
};
use tidal_core::{AmendAttrs, MarketQuote, Order, ProductSymbol, VenueId};
use tracing::info;

/// Requests observed by a [`SimVenueAdapter`], recorded for assertions.
#[derive(Clone, Debug)]
pub enum SimRequest {
    Create { client_id: String },
    Amend { server_id: String, attrs: AmendAttrs },
    Cancel { server_id: String },
}

/// Scriptable failure behavior of the simulated venue.
#[derive(Clone, Debug, Default)]
pub struct SimBehavior {
    pub reject_create: Option<String>,
    pub reject_amend: Option<String>,
    pub reject_cancel: Option<String>,
    /// Artificial latency applied to every call.
    pub latency: Option<Duration>,
}

/// In-memory execution venue that acknowledges orders immediately.
///
/// Rejections are injected through [`SimBehavior`]; server ids are
/// sequential and deterministic within one adapter instance.
pub struct SimVenueAdapter {
    venue_id: VenueId,
    next_id: AtomicU64,
    behavior: Mutex<SimBehavior>,
    received: Mutex<Vec<SimRequest>>,
}

impl SimVenueAdapter {
    #[must_use]
    pub fn new(venue_id: impl Into<VenueId>) -> Self {
        Self {
            venue_id: venue_id.into(),
            next_id: AtomicU64::new(1),
            behavior: Mutex::new(SimBehavior::default()),
            received: Mutex::new(Vec::new()),
        }
    }

    /// Replace the scripted behavior for subsequent calls.
    pub fn set_behavior(&self, behavior: SimBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Reject every subsequent submission with the given reason.
    pub fn reject_creates(&self, reason: impl Into<String>) {
        self.behavior.lock().reject_create = Some(reason.into());
    }

    /// Reject every subsequent cancel with the given reason.
    pub fn reject_cancels(&self, reason: impl Into<String>) {
        self.behavior.lock().reject_cancel = Some(reason.into());
    }

    /// Snapshot of every request this adapter has received.
    #[must_use]
    pub fn requests(&self) -> Vec<SimRequest> {
        self.received.lock().clone()
    }

    fn record(&self, request: SimRequest) {
        self.received.lock().push(request);
    }

    async fn apply_latency(&self) {
        let latency = self.behavior.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn next_server_id(&self) -> String {
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.venue_id, seq)
    }
}

#[async_trait]
impl VenueAdapter for SimVenueAdapter {
    fn info(&self) -> AdapterInfo {
        AdapterInfo {
            venue_id: self.venue_id.clone(),
            driver: "sim".into(),
        }
    }

    async fn create_order(&self, order: &Order) -> AdapterResult<OrderAck> {
        self.apply_latency().await;
        self.record(SimRequest::Create {
            client_id: order.client_id.clone(),
        });
        if let Some(reason) = self.behavior.lock().reject_create.clone() {
            return Err(AdapterError::Rejected(reason));
        }
        let server_id = self.next_server_id();
        info!(
            venue = %self.venue_id,
            symbol = %order.product_symbol,
            %server_id,
            "sim venue accepted order"
        );
        Ok(OrderAck { server_id })
    }

    async fn amend_order(&self, server_id: &str, attrs: AmendAttrs) -> AdapterResult<AmendAck> {
        self.apply_latency().await;
        self.record(SimRequest::Amend {
            server_id: server_id.to_string(),
            attrs,
        });
        if let Some(reason) = self.behavior.lock().reject_amend.clone() {
            return Err(AdapterError::Rejected(reason));
        }
        Ok(AmendAck {
            server_id: server_id.to_string(),
            attrs,
        })
    }

    async fn cancel_order(&self, server_id: &str) -> AdapterResult<CancelAck> {
        self.apply_latency().await;
        self.record(SimRequest::Cancel {
            server_id: server_id.to_string(),
        });
        if let Some(reason) = self.behavior.lock().reject_cancel.clone() {
            return Err(AdapterError::Rejected(reason));
        }
        Ok(CancelAck {
            server_id: server_id.to_string(),
        })
    }
}

/// In-memory order book store answering `inside_quote` queries.
#[derive(Default)]
pub struct SimOrderBooks {
    quotes: Mutex<HashMap<(VenueId, ProductSymbol), MarketQuote>>,
}

impl SimOrderBooks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the inside quote for a product.
    pub fn set_quote(&self, quote: MarketQuote) {
        self.quotes.lock().insert(
            (quote.venue_id.clone(), quote.product_symbol.clone()),
            quote,
        );
    }
}

#[async_trait]
impl InsideQuotes for SimOrderBooks {
    async fn inside_quote(
        &self,
        venue_id: &VenueId,
        symbol: &ProductSymbol,
    ) -> AdapterResult<MarketQuote> {
        self.quotes
            .lock()
            .get(&(venue_id.clone(), symbol.clone()))
            .cloned()
            .ok_or_else(|| {
                AdapterError::InvalidRequest(format!("no order book for {venue_id}.{symbol}"))
            })
    }
}
