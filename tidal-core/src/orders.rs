//! Order representation and the status state machine it moves through.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AccountId, ClientId, Price, ProductSymbol, Size, VenueId};

/// The side of an order.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }

    /// Returns the opposite side (buy <-> sell).
    #[must_use]
    pub fn inverse(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

/// Order execution style. The pipeline currently drives limit orders only.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Limit,
}

impl OrderType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Limit => "limit",
        }
    }
}

/// Time-in-force constraint attached to every order.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    FillOrKill,
    GoodTilCanceled,
    ImmediateOrCancel,
}

impl TimeInForce {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FillOrKill => "fok",
            Self::GoodTilCanceled => "gtc",
            Self::ImmediateOrCancel => "ioc",
        }
    }
}

/// Lifecycle status maintained by the order pipeline.
///
/// `Pending` is the steady state of a live order; `Canceled` and
/// `Error` are terminal.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Enqueued,
    Pending,
    Amending,
    Canceling,
    Canceled,
    Error,
}

impl OrderStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enqueued => "enqueued",
            Self::Pending => "pending",
            Self::Amending => "amending",
            Self::Canceling => "canceling",
            Self::Canceled => "canceled",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Canceled | Self::Error)
    }

    /// Whether `next` is reachable from this status along a single edge.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Enqueued, Self::Pending)
                | (Self::Enqueued, Self::Error)
                | (Self::Pending, Self::Canceling)
                | (Self::Pending, Self::Amending)
                | (Self::Canceling, Self::Canceled)
                | (Self::Amending, Self::Pending)
                | (Self::Amending, Self::Error)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives order update notifications on behalf of the order's owner.
///
/// Implementations must not run user code inline; an advisor-owned sink
/// enqueues a message into the owning actor's mailbox.
pub trait OrderUpdateSink: Send + Sync {
    fn order_updated(&self, old: Option<&Order>, new: &Order, opts: Option<&serde_json::Value>);
}

/// User-supplied callback fired on each status transition of an order.
///
/// Holds the delivery sink plus optional per-order context that is
/// passed back verbatim on every invocation.
#[derive(Clone)]
pub struct UpdateCallback {
    sink: Arc<dyn OrderUpdateSink>,
    opts: Option<serde_json::Value>,
}

impl UpdateCallback {
    pub fn new(sink: Arc<dyn OrderUpdateSink>) -> Self {
        Self { sink, opts: None }
    }

    pub fn with_opts(sink: Arc<dyn OrderUpdateSink>, opts: serde_json::Value) -> Self {
        Self {
            sink,
            opts: Some(opts),
        }
    }

    /// Deliver one `(old, new)` pair to the owner.
    pub fn fire(&self, old: Option<&Order>, new: &Order) {
        self.sink.order_updated(old, new, self.opts.as_ref());
    }

    #[must_use]
    pub fn opts(&self) -> Option<&serde_json::Value> {
        self.opts.as_ref()
    }
}

impl fmt::Debug for UpdateCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateCallback")
            .field("opts", &self.opts)
            .finish_non_exhaustive()
    }
}

impl PartialEq for UpdateCallback {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.sink, &other.sink) && self.opts == other.opts
    }
}

/// Fields a live order may be amended with.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct AmendAttrs {
    pub price: Option<Price>,
    pub size: Option<Size>,
}

impl AmendAttrs {
    #[must_use]
    pub fn price(price: Price) -> Self {
        Self {
            price: Some(price),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn size(size: Size) -> Self {
        Self {
            size: Some(size),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.price.is_none() && self.size.is_none()
    }
}

/// An order tracked by the pipeline from enqueue to a terminal status.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Order {
    pub client_id: ClientId,
    pub venue_id: VenueId,
    pub account_id: AccountId,
    pub product_symbol: ProductSymbol,
    pub side: Side,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub price: Price,
    pub size: Size,
    pub status: OrderStatus,
    /// Venue-assigned identifier, known after acceptance.
    pub server_id: Option<String>,
    /// Populated only when `status == Error`.
    pub error_reason: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub update_callback: Option<UpdateCallback>,
}

impl Order {
    /// Construct a freshly enqueued limit order with a generated client id.
    pub fn enqueue(
        venue_id: impl Into<VenueId>,
        account_id: impl Into<AccountId>,
        product_symbol: impl Into<ProductSymbol>,
        side: Side,
        time_in_force: TimeInForce,
        price: Price,
        size: Size,
    ) -> Self {
        let now = Utc::now();
        Self {
            client_id: Uuid::new_v4().to_string(),
            venue_id: venue_id.into(),
            account_id: account_id.into(),
            product_symbol: product_symbol.into(),
            side,
            order_type: OrderType::Limit,
            time_in_force,
            price,
            size,
            status: OrderStatus::Enqueued,
            server_id: None,
            error_reason: None,
            enqueued_at: now,
            updated_at: now,
            update_callback: None,
        }
    }

    #[must_use]
    pub fn with_callback(mut self, callback: UpdateCallback) -> Self {
        self.update_callback = Some(callback);
        self
    }

    /// The canonical single-line log form of this order.
    ///
    /// `error_reason` is appended only for orders in the error status.
    #[must_use]
    pub fn log_line(&self) -> String {
        let mut line = format!(
            "[order:{},{},{},{},{},{},{},{},{},{}",
            self.client_id,
            self.status,
            self.venue_id,
            self.account_id,
            self.product_symbol,
            self.side.as_str(),
            self.order_type.as_str(),
            self.time_in_force.as_str(),
            self.price,
            self.size,
        );
        if self.status == OrderStatus::Error {
            if let Some(reason) = &self.error_reason {
                line.push(',');
                line.push_str(reason);
            }
        }
        line.push(']');
        line
    }
}
