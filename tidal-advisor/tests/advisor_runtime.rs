use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rust_decimal_macros::dec;
use serde_json::json;
use tidal_advisor::{
    spawn_advisor, Advisor, AdvisorDeps, AdvisorResult, AdvisorSpec, AdvisorState, AdvisorWarning,
};
use tidal_broker::{InsideQuotes, VenueAdapter, VenueRouter};
use tidal_core::{
    MarketQuote, Order, OrderBookChanges, OrderBookSnapshot, OrderStatus, Price, PriceLevel,
    Product, TimeInForce, UpdateCallback, VenueId,
};
use tidal_events::{EventBus, MarketEvent};
use tidal_orders::{OrderPipeline, OrderStore, OrderSubmission};
use tidal_sim::{SimOrderBooks, SimVenueAdapter};

#[derive(Clone, Debug, PartialEq)]
enum Callback {
    AfterStart,
    InsideQuote {
        bid: Price,
        bid_size: Price,
        store_before: u64,
    },
    Event {
        bid: Price,
    },
    OrderUpdated {
        old: Option<OrderStatus>,
        new: OrderStatus,
        tagged: bool,
    },
}

#[derive(Clone, Default)]
struct Recorder {
    log: Arc<Mutex<Vec<Callback>>>,
    panic_on_inside: Arc<AtomicBool>,
    fail_on_event: Arc<AtomicBool>,
}

impl Recorder {
    fn calls(&self) -> Vec<Callback> {
        self.log.lock().clone()
    }

    fn inside_quote_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Callback::InsideQuote { .. }))
            .count()
    }
}

impl Advisor for Recorder {
    type Store = u64;

    fn after_start(&self, state: &AdvisorState<Self::Store>) -> AdvisorResult<Self::Store> {
        self.log.lock().push(Callback::AfterStart);
        Ok(state.store + 1)
    }

    fn handle_inside_quote(
        &self,
        quote: &MarketQuote,
        _changes: &OrderBookChanges,
        state: &AdvisorState<Self::Store>,
    ) -> AdvisorResult<Self::Store> {
        if self.panic_on_inside.load(Ordering::SeqCst) {
            panic!("boom");
        }
        self.log.lock().push(Callback::InsideQuote {
            bid: quote.bid.price,
            bid_size: quote.bid.size,
            store_before: state.store,
        });
        Ok(state.store + 1)
    }

    fn handle_event(
        &self,
        quote: &MarketQuote,
        state: &AdvisorState<Self::Store>,
    ) -> AdvisorResult<Self::Store> {
        if self.fail_on_event.load(Ordering::SeqCst) {
            return Err(tidal_advisor::AdvisorError::Internal(
                "event rejected".into(),
            ));
        }
        self.log.lock().push(Callback::Event {
            bid: quote.bid.price,
        });
        Ok(state.store + 1)
    }

    fn handle_order_updated(
        &self,
        old: Option<&Order>,
        updated: &Order,
        opts: Option<&serde_json::Value>,
        state: &AdvisorState<Self::Store>,
    ) -> AdvisorResult<Self::Store> {
        self.log.lock().push(Callback::OrderUpdated {
            old: old.map(|order| order.status),
            new: updated.status,
            tagged: opts.is_some(),
        });
        Ok(state.store + 1)
    }
}

struct Fixture {
    bus: Arc<EventBus>,
    books: Arc<SimOrderBooks>,
    deps: AdvisorDeps,
    pipeline: OrderPipeline,
}

fn fixture() -> Fixture {
    let bus = Arc::new(EventBus::new());
    let books = Arc::new(SimOrderBooks::new());
    let venue = Arc::new(SimVenueAdapter::new("exchange_a"));
    let mut routes: HashMap<VenueId, Arc<dyn VenueAdapter>> = HashMap::new();
    routes.insert(venue.info().venue_id, venue);
    let pipeline = OrderPipeline::new(
        Arc::new(OrderStore::new()),
        Arc::new(VenueRouter::new(routes)),
    );
    let deps = AdvisorDeps::new(
        bus.clone(),
        books.clone() as Arc<dyn InsideQuotes>,
        pipeline.clone(),
    );
    Fixture {
        bus,
        books,
        deps,
        pipeline,
    }
}

fn btc() -> Product {
    Product::new("exchange_a", "btc_usd")
}

fn spec() -> AdvisorSpec {
    AdvisorSpec::new("recorder", "group_a", "btc_usd", vec![btc()])
}

fn install_quote(books: &SimOrderBooks, bid: Price, bid_size: Price, ask: Price, ask_size: Price) {
    books.set_quote(MarketQuote::new(
        "exchange_a",
        "btc_usd",
        PriceLevel::new(bid, bid_size),
        PriceLevel::new(ask, ask_size),
    ));
}

async fn wait_until(mut condition: impl FnMut() -> bool, what: &str) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn snapshot_refreshes_the_cache_and_invokes_the_callback() {
    let fx = fixture();
    install_quote(&fx.books, dec!(100), dec!(5), dec!(102), dec!(7));
    let recorder = Recorder::default();
    let handle = spawn_advisor(recorder.clone(), 0, spec(), fx.deps.clone());

    fx.bus.publish(MarketEvent::Snapshot {
        product: btc(),
        snapshot: OrderBookSnapshot::new(vec![(dec!(100), dec!(5))], vec![(dec!(102), dec!(7))]),
    });

    wait_until(|| recorder.inside_quote_count() == 1, "inside quote callback").await;
    let calls = recorder.calls();
    assert_eq!(calls[0], Callback::AfterStart);
    assert_eq!(
        calls[1],
        Callback::InsideQuote {
            bid: dec!(100),
            bid_size: dec!(5),
            // after_start bumped the store to 1 before any market event.
            store_before: 1,
        }
    );

    handle.stop().await;
}

#[tokio::test]
async fn passive_deltas_are_skipped_and_inside_deltas_dispatch_once() {
    let fx = fixture();
    install_quote(&fx.books, dec!(100), dec!(5), dec!(102), dec!(7));
    let recorder = Recorder::default();
    let handle = spawn_advisor(recorder.clone(), 0, spec(), fx.deps.clone());

    // Warm the cache with a snapshot.
    fx.bus.publish(MarketEvent::Snapshot {
        product: btc(),
        snapshot: OrderBookSnapshot::new(vec![(dec!(100), dec!(5))], vec![(dec!(102), dec!(7))]),
    });
    wait_until(|| recorder.inside_quote_count() == 1, "cache warmup").await;

    // Every delta strictly outside the inside on the passive side.
    fx.bus.publish(MarketEvent::Changes {
        product: btc(),
        changes: OrderBookChanges::new(
            vec![(dec!(99), dec!(1)), (dec!(98.5), dec!(4))],
            vec![(dec!(103), dec!(2))],
        ),
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(recorder.inside_quote_count(), 1);

    // A delta at the inside bid price with a different size is stale.
    install_quote(&fx.books, dec!(100), dec!(6), dec!(102), dec!(7));
    fx.bus.publish(MarketEvent::Changes {
        product: btc(),
        changes: OrderBookChanges::new(vec![(dec!(100), dec!(6))], vec![]),
    });
    wait_until(|| recorder.inside_quote_count() == 2, "stale delta dispatch").await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(recorder.inside_quote_count(), 2);

    handle.stop().await;
}

#[tokio::test]
async fn stale_delta_with_unchanged_refresh_skips_the_callback() {
    let fx = fixture();
    install_quote(&fx.books, dec!(100), dec!(5), dec!(102), dec!(7));
    let recorder = Recorder::default();
    let handle = spawn_advisor(recorder.clone(), 0, spec(), fx.deps.clone());

    fx.bus.publish(MarketEvent::Snapshot {
        product: btc(),
        snapshot: OrderBookSnapshot::new(vec![(dec!(100), dec!(5))], vec![(dec!(102), dec!(7))]),
    });
    wait_until(|| recorder.inside_quote_count() == 1, "cache warmup").await;

    // At the inside price with the same size: stale by the price arm,
    // but the refreshed quote matches the cached one.
    fx.bus.publish(MarketEvent::Changes {
        product: btc(),
        changes: OrderBookChanges::new(vec![(dec!(100), dec!(5))], vec![]),
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(recorder.inside_quote_count(), 1);

    handle.stop().await;
}

#[tokio::test]
async fn market_quote_events_reach_handle_event() {
    let fx = fixture();
    let recorder = Recorder::default();
    let handle = spawn_advisor(recorder.clone(), 0, spec(), fx.deps.clone());

    fx.bus.publish(MarketEvent::Quote(MarketQuote::new(
        "exchange_a",
        "btc_usd",
        PriceLevel::new(dec!(101), dec!(1)),
        PriceLevel::new(dec!(103), dec!(1)),
    )));

    wait_until(
        || {
            recorder
                .calls()
                .contains(&Callback::Event { bid: dec!(101) })
        },
        "handle_event callback",
    )
    .await;

    handle.stop().await;
}

#[tokio::test]
async fn panicking_callback_is_demoted_and_the_advisor_survives() {
    let fx = fixture();
    install_quote(&fx.books, dec!(100), dec!(5), dec!(102), dec!(7));
    let recorder = Recorder::default();
    recorder.panic_on_inside.store(true, Ordering::SeqCst);
    let mut warnings = fx.deps.subscribe_warnings();
    let handle = spawn_advisor(recorder.clone(), 0, spec(), fx.deps.clone());

    fx.bus.publish(MarketEvent::Snapshot {
        product: btc(),
        snapshot: OrderBookSnapshot::new(vec![(dec!(100), dec!(5))], vec![(dec!(102), dec!(7))]),
    });

    let warning = tokio::time::timeout(Duration::from_secs(2), warnings.recv())
        .await
        .expect("warning emitted")
        .unwrap();
    match warning {
        AdvisorWarning::HandleInsideQuoteError {
            address,
            reason,
            backtrace,
            ..
        } => {
            assert_eq!(address, "advisor_group_a_btc_usd");
            assert_eq!(reason, "boom");
            assert!(!backtrace.is_empty());
        }
        other => panic!("unexpected warning {other:?}"),
    }
    assert!(!handle.is_finished());

    // The advisor keeps dispatching with its pre-panic store.
    recorder.panic_on_inside.store(false, Ordering::SeqCst);
    install_quote(&fx.books, dec!(100.5), dec!(5), dec!(102), dec!(7));
    fx.bus.publish(MarketEvent::Snapshot {
        product: btc(),
        snapshot: OrderBookSnapshot::new(vec![(dec!(100.5), dec!(5))], vec![(dec!(102), dec!(7))]),
    });
    wait_until(|| recorder.inside_quote_count() == 1, "post-panic dispatch").await;
    assert!(recorder
        .calls()
        .contains(&Callback::InsideQuote {
            bid: dec!(100.5),
            bid_size: dec!(5),
            store_before: 1,
        }));

    handle.stop().await;
}

#[tokio::test]
async fn error_returns_surface_as_invalid_return_warnings() {
    let fx = fixture();
    let recorder = Recorder::default();
    recorder.fail_on_event.store(true, Ordering::SeqCst);
    let mut warnings = fx.deps.subscribe_warnings();
    let handle = spawn_advisor(recorder.clone(), 0, spec(), fx.deps.clone());

    fx.bus.publish(MarketEvent::Quote(MarketQuote::new(
        "exchange_a",
        "btc_usd",
        PriceLevel::new(dec!(101), dec!(1)),
        PriceLevel::new(dec!(103), dec!(1)),
    )));

    let warning = tokio::time::timeout(Duration::from_secs(2), warnings.recv())
        .await
        .expect("warning emitted")
        .unwrap();
    assert!(matches!(
        warning,
        AdvisorWarning::HandleEventInvalidReturn { .. }
    ));
    assert!(!handle.is_finished());

    handle.stop().await;
}

/// Places one buy at the inside bid on the first refresh and records
/// the updates that flow back.
#[derive(Clone, Default)]
struct QuoteTaker {
    updates: Arc<Mutex<Vec<(Option<OrderStatus>, OrderStatus)>>>,
    placed: Arc<AtomicBool>,
}

impl Advisor for QuoteTaker {
    type Store = ();

    fn handle_inside_quote(
        &self,
        quote: &MarketQuote,
        _changes: &OrderBookChanges,
        state: &AdvisorState<Self::Store>,
    ) -> AdvisorResult<Self::Store> {
        if !self.placed.swap(true, Ordering::SeqCst) {
            let submission = OrderSubmission::new(
                quote.venue_id.clone(),
                "main",
                quote.product_symbol.clone(),
                quote.bid.price,
                dec!(1),
                TimeInForce::GoodTilCanceled,
            )
            .with_callback(state.update_callback());
            state.orders().buy_limit(submission);
        }
        Ok(())
    }

    fn handle_order_updated(
        &self,
        old: Option<&Order>,
        updated: &Order,
        _opts: Option<&serde_json::Value>,
        _state: &AdvisorState<Self::Store>,
    ) -> AdvisorResult<Self::Store> {
        self.updates
            .lock()
            .push((old.map(|order| order.status), updated.status));
        Ok(())
    }
}

#[tokio::test]
async fn advisors_can_trade_from_their_own_callbacks() {
    let fx = fixture();
    install_quote(&fx.books, dec!(100), dec!(5), dec!(102), dec!(7));
    let taker = QuoteTaker::default();
    let handle = spawn_advisor(taker.clone(), (), spec(), fx.deps.clone());

    fx.bus.publish(MarketEvent::Snapshot {
        product: btc(),
        snapshot: OrderBookSnapshot::new(vec![(dec!(100), dec!(5))], vec![(dec!(102), dec!(7))]),
    });

    wait_until(
        || {
            *taker.updates.lock()
                == vec![
                    (None, OrderStatus::Enqueued),
                    (Some(OrderStatus::Enqueued), OrderStatus::Pending),
                ]
        },
        "order updates from the advisor's own order",
    )
    .await;

    handle.stop().await;
}

#[tokio::test]
async fn order_updates_are_delivered_into_the_owning_mailbox() {
    let fx = fixture();
    let recorder = Recorder::default();
    let handle = spawn_advisor(recorder.clone(), 0, spec(), fx.deps.clone());

    let submission = OrderSubmission::new(
        "exchange_a",
        "main",
        "btc_usd",
        dec!(100),
        dec!(1),
        TimeInForce::GoodTilCanceled,
    )
    .with_callback(UpdateCallback::with_opts(
        handle.order_sink(),
        json!({"intent": "entry"}),
    ));
    fx.pipeline.buy_limit(submission);

    wait_until(
        || {
            recorder.calls()
                == vec![
                    Callback::AfterStart,
                    Callback::OrderUpdated {
                        old: None,
                        new: OrderStatus::Enqueued,
                        tagged: true,
                    },
                    Callback::OrderUpdated {
                        old: Some(OrderStatus::Enqueued),
                        new: OrderStatus::Pending,
                        tagged: true,
                    },
                ]
        },
        "order update callbacks",
    )
    .await;

    handle.stop().await;
}
