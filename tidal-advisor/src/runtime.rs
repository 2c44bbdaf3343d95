//! The per-advisor actor: subscriptions, dispatch loop, fault isolation.

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{self, SelectAll, Stream};
use futures::StreamExt;
use tidal_broker::InsideQuotes;
use tidal_core::{
    MarketQuote, Order, OrderBookChanges, OrderUpdateSink, Product, UpdateCallback,
};
use tidal_events::{EventBus, MarketEvent, Topic};
use tidal_orders::OrderPipeline;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::staleness;
use crate::{Advisor, AdvisorSpec, AdvisorState, MarketQuoteCache};

const WARNING_CHANNEL_CAPACITY: usize = 256;

/// Telemetry event emitted when a user callback misbehaves.
///
/// `*Error` variants are panics demoted by the runtime and carry a
/// captured backtrace; `*InvalidReturn` variants are callbacks that
/// returned an error instead of a new store.
#[derive(Clone, Debug)]
pub enum AdvisorWarning {
    HandleInsideQuoteError {
        address: String,
        quote: MarketQuote,
        changes: OrderBookChanges,
        reason: String,
        backtrace: String,
    },
    HandleInsideQuoteInvalidReturn {
        address: String,
        quote: MarketQuote,
        reason: String,
    },
    HandleEventError {
        address: String,
        quote: MarketQuote,
        reason: String,
        backtrace: String,
    },
    HandleEventInvalidReturn {
        address: String,
        quote: MarketQuote,
        reason: String,
    },
    OrderUpdatedError {
        address: String,
        client_id: String,
        reason: String,
        backtrace: Option<String>,
    },
}

impl AdvisorWarning {
    /// Address of the advisor the fault occurred in.
    #[must_use]
    pub fn address(&self) -> &str {
        match self {
            Self::HandleInsideQuoteError { address, .. }
            | Self::HandleInsideQuoteInvalidReturn { address, .. }
            | Self::HandleEventError { address, .. }
            | Self::HandleEventInvalidReturn { address, .. }
            | Self::OrderUpdatedError { address, .. } => address,
        }
    }
}

/// Shared collaborators handed to every advisor actor.
#[derive(Clone)]
pub struct AdvisorDeps {
    pub bus: Arc<EventBus>,
    pub books: Arc<dyn InsideQuotes>,
    pub orders: OrderPipeline,
    warnings: broadcast::Sender<AdvisorWarning>,
}

impl AdvisorDeps {
    pub fn new(bus: Arc<EventBus>, books: Arc<dyn InsideQuotes>, orders: OrderPipeline) -> Self {
        Self {
            bus,
            books,
            orders,
            warnings: broadcast::channel(WARNING_CHANNEL_CAPACITY).0,
        }
    }

    /// Observe callback faults across every advisor using these deps.
    pub fn subscribe_warnings(&self) -> broadcast::Receiver<AdvisorWarning> {
        self.warnings.subscribe()
    }

    fn warn(&self, warning: AdvisorWarning) {
        warn!(
            target: "tidal::advisor",
            advisor = warning.address(),
            ?warning,
            "advisor callback fault"
        );
        let _ = self.warnings.send(warning);
    }
}

enum AdvisorCommand {
    OrderUpdated {
        old: Option<Order>,
        new: Order,
        opts: Option<serde_json::Value>,
    },
    Stop,
}

/// Posts order updates into the owning advisor's mailbox.
struct MailboxSink {
    tx: mpsc::UnboundedSender<AdvisorCommand>,
}

impl OrderUpdateSink for MailboxSink {
    fn order_updated(&self, old: Option<&Order>, new: &Order, opts: Option<&serde_json::Value>) {
        let _ = self.tx.send(AdvisorCommand::OrderUpdated {
            old: old.cloned(),
            new: new.clone(),
            opts: opts.cloned(),
        });
    }
}

/// Control handle of a running advisor actor.
pub struct AdvisorHandle {
    address: String,
    tx: mpsc::UnboundedSender<AdvisorCommand>,
    join: JoinHandle<()>,
}

impl AdvisorHandle {
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Sink delivering order updates into this advisor's mailbox.
    #[must_use]
    pub fn order_sink(&self) -> Arc<dyn OrderUpdateSink> {
        Arc::new(MailboxSink {
            tx: self.tx.clone(),
        })
    }

    /// Convenience wrapper building an order update callback owned by
    /// this advisor.
    #[must_use]
    pub fn update_callback(&self) -> UpdateCallback {
        UpdateCallback::new(self.order_sink())
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Ask the actor to stop and wait for it to drain.
    pub async fn stop(self) {
        let _ = self.tx.send(AdvisorCommand::Stop);
        let _ = self.join.await;
    }

    /// Hard-kill the actor task.
    pub fn abort(&self) {
        self.join.abort();
    }
}

type EventStream =
    Pin<Box<dyn Stream<Item = Result<MarketEvent, BroadcastStreamRecvError>> + Send>>;

/// Start an advisor actor for `spec`.
///
/// Topic subscriptions are registered before the task is spawned, so
/// events published after this returns are never missed.
pub fn spawn_advisor<A: Advisor>(
    advisor: A,
    store: A::Store,
    spec: AdvisorSpec,
    deps: AdvisorDeps,
) -> AdvisorHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let address = spec.address();

    let mut streams: SelectAll<EventStream> = SelectAll::new();
    for product in &spec.products {
        for topic in [
            Topic::order_book_snapshot(product.clone()),
            Topic::order_book_changes(product.clone()),
            Topic::market_quote(product.clone()),
        ] {
            streams.push(Box::pin(BroadcastStream::new(deps.bus.subscribe(topic))));
        }
    }
    // Keeps the select arm pending instead of terminating when every
    // broadcast stream ends.
    streams.push(Box::pin(stream::pending()));

    let join = tokio::spawn(run_advisor(
        advisor,
        store,
        spec,
        deps,
        tx.clone(),
        rx,
        streams,
    ));
    AdvisorHandle { address, tx, join }
}

async fn run_advisor<A: Advisor>(
    advisor: A,
    store: A::Store,
    spec: AdvisorSpec,
    deps: AdvisorDeps,
    mailbox_tx: mpsc::UnboundedSender<AdvisorCommand>,
    mut mailbox: mpsc::UnboundedReceiver<AdvisorCommand>,
    mut streams: SelectAll<EventStream>,
) {
    let address = spec.address();
    let mut state = AdvisorState {
        group_id: spec.group_id,
        advisor_id: spec.advisor_id,
        products: spec.products,
        market_quotes: MarketQuoteCache::new(),
        config: spec.config,
        store,
        trades: spec.trades,
        orders: deps.orders.clone(),
        order_sink: Arc::new(MailboxSink { tx: mailbox_tx }),
    };

    info!(
        target: "tidal::advisor",
        %address,
        products = state.products.len(),
        "advisor started"
    );

    match run_callback(&advisor, &state, |a, s| a.after_start(s)) {
        CallbackOutcome::Store(new_store) => state.store = new_store,
        CallbackOutcome::Invalid(reason) => {
            warn!(%address, %reason, "after_start failed; keeping initial store");
        }
        CallbackOutcome::Panicked { reason, .. } => {
            warn!(%address, %reason, "after_start panicked; keeping initial store");
        }
    }

    loop {
        tokio::select! {
            command = mailbox.recv() => match command {
                Some(AdvisorCommand::OrderUpdated { old, new, opts }) => {
                    handle_order_updated(&advisor, &mut state, &deps, &address, old, new, opts);
                }
                Some(AdvisorCommand::Stop) | None => break,
            },
            Some(event) = streams.next() => match event {
                Ok(event) => {
                    handle_market_event(&advisor, &mut state, &deps, &address, event).await;
                }
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    warn!(%address, missed, "subscriber lagged behind the bus; events dropped");
                }
            },
        }
    }

    info!(target: "tidal::advisor", %address, "advisor stopped");
}

async fn handle_market_event<A: Advisor>(
    advisor: &A,
    state: &mut AdvisorState<A::Store>,
    deps: &AdvisorDeps,
    address: &str,
    event: MarketEvent,
) {
    match event {
        // Snapshots refresh unconditionally.
        MarketEvent::Snapshot { product, snapshot } => {
            let Some(quote) = refresh_inside(deps, address, &product).await else {
                return;
            };
            state.market_quotes.put(quote.clone());
            invoke_inside_quote(advisor, state, deps, address, quote, snapshot.as_changes());
        }
        MarketEvent::Changes { product, changes } => {
            let previous = state
                .market_quotes
                .quote_for(&product.venue_id, &product.symbol)
                .cloned();
            if !staleness::quote_is_stale(previous.as_ref(), &changes) {
                return;
            }
            let Some(quote) = refresh_inside(deps, address, &product).await else {
                return;
            };
            let inside_moved = previous
                .as_ref()
                .map_or(true, |prev| prev.bid != quote.bid || prev.ask != quote.ask);
            state.market_quotes.put(quote.clone());
            if inside_moved {
                invoke_inside_quote(advisor, state, deps, address, quote, changes);
            }
        }
        MarketEvent::Quote(quote) => {
            state.market_quotes.put(quote.clone());
            match run_callback(advisor, state, |a, s| a.handle_event(&quote, s)) {
                CallbackOutcome::Store(new_store) => state.store = new_store,
                CallbackOutcome::Invalid(reason) => deps.warn(AdvisorWarning::HandleEventInvalidReturn {
                    address: address.to_string(),
                    quote,
                    reason,
                }),
                CallbackOutcome::Panicked { reason, backtrace } => {
                    deps.warn(AdvisorWarning::HandleEventError {
                        address: address.to_string(),
                        quote,
                        reason,
                        backtrace,
                    });
                }
            }
        }
    }
}

fn invoke_inside_quote<A: Advisor>(
    advisor: &A,
    state: &mut AdvisorState<A::Store>,
    deps: &AdvisorDeps,
    address: &str,
    quote: MarketQuote,
    changes: OrderBookChanges,
) {
    match run_callback(advisor, state, |a, s| {
        a.handle_inside_quote(&quote, &changes, s)
    }) {
        CallbackOutcome::Store(new_store) => state.store = new_store,
        CallbackOutcome::Invalid(reason) => {
            deps.warn(AdvisorWarning::HandleInsideQuoteInvalidReturn {
                address: address.to_string(),
                quote,
                reason,
            });
        }
        CallbackOutcome::Panicked { reason, backtrace } => {
            deps.warn(AdvisorWarning::HandleInsideQuoteError {
                address: address.to_string(),
                quote,
                changes,
                reason,
                backtrace,
            });
        }
    }
}

fn handle_order_updated<A: Advisor>(
    advisor: &A,
    state: &mut AdvisorState<A::Store>,
    deps: &AdvisorDeps,
    address: &str,
    old: Option<Order>,
    new: Order,
    opts: Option<serde_json::Value>,
) {
    match run_callback(advisor, state, |a, s| {
        a.handle_order_updated(old.as_ref(), &new, opts.as_ref(), s)
    }) {
        CallbackOutcome::Store(new_store) => state.store = new_store,
        CallbackOutcome::Invalid(reason) => deps.warn(AdvisorWarning::OrderUpdatedError {
            address: address.to_string(),
            client_id: new.client_id.clone(),
            reason,
            backtrace: None,
        }),
        CallbackOutcome::Panicked { reason, backtrace } => {
            deps.warn(AdvisorWarning::OrderUpdatedError {
                address: address.to_string(),
                client_id: new.client_id.clone(),
                reason,
                backtrace: Some(backtrace),
            });
        }
    }
}

async fn refresh_inside(
    deps: &AdvisorDeps,
    address: &str,
    product: &Product,
) -> Option<MarketQuote> {
    match deps
        .books
        .inside_quote(&product.venue_id, &product.symbol)
        .await
    {
        Ok(quote) => Some(quote),
        Err(err) => {
            warn!(%address, product = %product, error = %err, "inside quote refresh failed");
            None
        }
    }
}

enum CallbackOutcome<S> {
    Store(S),
    Invalid(String),
    Panicked { reason: String, backtrace: String },
}

/// Run one user callback with the store-or-rollback contract applied.
fn run_callback<A, F>(advisor: &A, state: &AdvisorState<A::Store>, f: F) -> CallbackOutcome<A::Store>
where
    A: Advisor,
    F: FnOnce(&A, &AdvisorState<A::Store>) -> crate::AdvisorResult<A::Store>,
{
    match catch_unwind(AssertUnwindSafe(|| f(advisor, state))) {
        Ok(Ok(store)) => CallbackOutcome::Store(store),
        Ok(Err(err)) => CallbackOutcome::Invalid(err.to_string()),
        Err(payload) => CallbackOutcome::Panicked {
            reason: panic_reason(payload.as_ref()),
            backtrace: Backtrace::force_capture().to_string(),
        },
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic payload of unknown type".to_string()
    }
}
