//! Buy/sell/amend/cancel operations driving the order status machine.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tidal_broker::{AdapterError, VenueRouter};
use tidal_core::{
    AccountId, AmendAttrs, ClientId, Order, OrderStatus, Price, ProductSymbol, Side, Size,
    TimeInForce, UpdateCallback, VenueId,
};
use tracing::{info, warn};

use crate::store::{OrderQuery, OrderStore, OrderUpdates, StoreError};

/// Failure variants surfaced by pipeline operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The client id does not name any tracked order.
    #[error("order '{client_id}' not found")]
    NotFound { client_id: ClientId },
    /// The order exists but is not in the pending steady state.
    #[error("order '{client_id}' status must be pending, was {actual}")]
    StatusMustBePending {
        client_id: ClientId,
        actual: OrderStatus,
    },
    /// The venue adapter refused the operation.
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// Parameters of a limit order submission.
#[derive(Clone, Debug)]
pub struct OrderSubmission {
    pub venue_id: VenueId,
    pub account_id: AccountId,
    pub product_symbol: ProductSymbol,
    pub price: Price,
    pub size: Size,
    pub time_in_force: TimeInForce,
    pub update_callback: Option<UpdateCallback>,
}

impl OrderSubmission {
    pub fn new(
        venue_id: impl Into<VenueId>,
        account_id: impl Into<AccountId>,
        product_symbol: impl Into<ProductSymbol>,
        price: Price,
        size: Size,
        time_in_force: TimeInForce,
    ) -> Self {
        Self {
            venue_id: venue_id.into(),
            account_id: account_id.into(),
            product_symbol: product_symbol.into(),
            price,
            size,
            time_in_force,
            update_callback: None,
        }
    }

    #[must_use]
    pub fn with_callback(mut self, callback: UpdateCallback) -> Self {
        self.update_callback = Some(callback);
        self
    }
}

/// Order lifecycle engine.
///
/// Enqueues orders into the store, dispatches venue calls on spawned
/// tasks, and fires the stored update callback exactly once per status
/// transition it drives. Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct OrderPipeline {
    store: Arc<OrderStore>,
    router: Arc<VenueRouter>,
}

impl OrderPipeline {
    pub fn new(store: Arc<OrderStore>, router: Arc<VenueRouter>) -> Self {
        Self { store, router }
    }

    #[must_use]
    pub fn store(&self) -> Arc<OrderStore> {
        Arc::clone(&self.store)
    }

    /// Enqueue a buy limit order and dispatch it to the venue.
    pub fn buy_limit(&self, submission: OrderSubmission) -> Order {
        self.enqueue(Side::Buy, submission)
    }

    /// Enqueue a sell limit order and dispatch it to the venue.
    pub fn sell_limit(&self, submission: OrderSubmission) -> Order {
        self.enqueue(Side::Sell, submission)
    }

    fn enqueue(&self, side: Side, submission: OrderSubmission) -> Order {
        let mut order = Order::enqueue(
            submission.venue_id,
            submission.account_id,
            submission.product_symbol,
            side,
            submission.time_in_force,
            submission.price,
            submission.size,
        );
        order.update_callback = submission.update_callback;
        let order = self.store.add(order);
        log_order(&order);
        notify(None, &order);

        let pipeline = self.clone();
        let snapshot = order.clone();
        tokio::spawn(async move { pipeline.drive_submit(snapshot).await });
        order
    }

    async fn drive_submit(&self, order: Order) {
        let outcome = match self.router.adapter_for(&order.venue_id) {
            Ok(adapter) => adapter.create_order(&order).await,
            Err(err) => Err(err),
        };
        match outcome {
            Ok(ack) => {
                self.apply_transition(
                    &order.client_id,
                    OrderStatus::Enqueued,
                    OrderUpdates::status(OrderStatus::Pending).with_server_id(ack.server_id),
                );
            }
            Err(err) => {
                self.apply_transition(
                    &order.client_id,
                    OrderStatus::Enqueued,
                    OrderUpdates::status(OrderStatus::Error).with_error_reason(err.reason()),
                );
            }
        }
    }

    /// Request cancellation of a pending order.
    ///
    /// Returns the `Canceling` snapshot; the venue call completes on a
    /// spawned task. Orders in any other status are left untouched.
    pub fn cancel(&self, client_id: &str) -> Result<Order, OrderError> {
        let gated = self.store.find_by_and_update(
            &OrderQuery::client_id(client_id).with_status(OrderStatus::Pending),
            &OrderUpdates::status(OrderStatus::Canceling),
        );
        let (old, new) = match gated {
            Ok(pair) => pair,
            Err(StoreError::NotFound) => return Err(self.non_pending_error(client_id)),
        };
        log_order(&new);
        notify(Some(&old), &new);

        let pipeline = self.clone();
        let snapshot = new.clone();
        tokio::spawn(async move { pipeline.drive_cancel(snapshot).await });
        Ok(new)
    }

    async fn drive_cancel(&self, order: Order) {
        let Some(server_id) = order.server_id.clone() else {
            warn!(client_id = %order.client_id, "canceling order has no server id");
            return;
        };
        let outcome = match self.router.adapter_for(&order.venue_id) {
            Ok(adapter) => adapter.cancel_order(&server_id).await,
            Err(err) => Err(err),
        };
        match outcome {
            Ok(_) => {
                self.apply_transition(
                    &order.client_id,
                    OrderStatus::Canceling,
                    OrderUpdates::status(OrderStatus::Canceled),
                );
            }
            // Not retried here; the order stays canceling and the owning
            // strategy decides what to do next.
            Err(err) => warn!(
                client_id = %order.client_id,
                error = %err,
                "venue cancel failed; order left canceling"
            ),
        }
    }

    /// Request an in-place amendment of a pending order.
    pub fn amend(&self, client_id: &str, attrs: AmendAttrs) -> Result<Order, OrderError> {
        let (old, new) = self.gate_amending(client_id)?;
        log_order(&new);
        notify(Some(&old), &new);

        let pipeline = self.clone();
        let snapshot = new.clone();
        tokio::spawn(async move { pipeline.drive_amend(snapshot, attrs).await });
        Ok(new)
    }

    /// Amend a batch of pending orders through the venue bulk call,
    /// returning one outcome per entry in input order.
    pub async fn amend_bulk(
        &self,
        batch: Vec<(ClientId, AmendAttrs)>,
    ) -> Vec<Result<Order, OrderError>> {
        let mut outcomes: Vec<Option<Result<Order, OrderError>>> =
            std::iter::repeat_with(|| None).take(batch.len()).collect();
        let mut by_venue: HashMap<VenueId, Vec<(usize, Order, AmendAttrs)>> = HashMap::new();

        for (index, (client_id, attrs)) in batch.into_iter().enumerate() {
            match self.gate_amending(&client_id) {
                Ok((old, new)) => {
                    log_order(&new);
                    notify(Some(&old), &new);
                    by_venue
                        .entry(new.venue_id.clone())
                        .or_default()
                        .push((index, new, attrs));
                }
                Err(err) => outcomes[index] = Some(Err(err)),
            }
        }

        for (venue_id, entries) in by_venue {
            let adapter = match self.router.adapter_for(&venue_id) {
                Ok(adapter) => adapter,
                Err(err) => {
                    for (index, order, _) in entries {
                        outcomes[index] = Some(self.fail_amend(&order, err.clone()));
                    }
                    continue;
                }
            };
            let amendments = entries
                .iter()
                .map(|(_, order, attrs)| {
                    // Amending orders always carry a server id; they were
                    // pending when gated.
                    (order.server_id.clone().unwrap_or_default(), *attrs)
                })
                .collect();
            let acks = adapter.amend_orders_bulk(amendments).await;
            for ((index, order, _attrs), ack) in entries.into_iter().zip(acks) {
                outcomes[index] = Some(match ack {
                    Ok(ack) => self.finish_amend(&order, ack.attrs),
                    Err(err) => self.fail_amend(&order, err),
                });
            }
        }

        outcomes
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(OrderError::Adapter(AdapterError::Other(
                        "bulk amend produced no outcome".into(),
                    )))
                })
            })
            .collect()
    }

    async fn drive_amend(&self, order: Order, attrs: AmendAttrs) {
        let Some(server_id) = order.server_id.clone() else {
            warn!(client_id = %order.client_id, "amending order has no server id");
            return;
        };
        let outcome = match self.router.adapter_for(&order.venue_id) {
            Ok(adapter) => adapter.amend_order(&server_id, attrs).await,
            Err(err) => Err(err),
        };
        match outcome {
            Ok(ack) => {
                let _ = self.finish_amend(&order, ack.attrs);
            }
            Err(err) => {
                let _ = self.fail_amend(&order, err);
            }
        }
    }

    fn gate_amending(&self, client_id: &str) -> Result<(Order, Order), OrderError> {
        self.store
            .find_by_and_update(
                &OrderQuery::client_id(client_id).with_status(OrderStatus::Pending),
                &OrderUpdates::status(OrderStatus::Amending),
            )
            .map_err(|_| self.non_pending_error(client_id))
    }

    fn finish_amend(&self, order: &Order, attrs: AmendAttrs) -> Result<Order, OrderError> {
        let mut updates = OrderUpdates::status(OrderStatus::Pending);
        if let Some(price) = attrs.price {
            updates = updates.with_price(price);
        }
        if let Some(size) = attrs.size {
            updates = updates.with_size(size);
        }
        self.apply_transition(&order.client_id, OrderStatus::Amending, updates)
            .ok_or_else(|| OrderError::NotFound {
                client_id: order.client_id.clone(),
            })
    }

    fn fail_amend(&self, order: &Order, err: AdapterError) -> Result<Order, OrderError> {
        self.apply_transition(
            &order.client_id,
            OrderStatus::Amending,
            OrderUpdates::status(OrderStatus::Error).with_error_reason(err.reason()),
        );
        Err(OrderError::Adapter(err))
    }

    /// Apply a status-gated update, logging the new snapshot and firing
    /// the update callback once.
    fn apply_transition(
        &self,
        client_id: &str,
        expected: OrderStatus,
        updates: OrderUpdates,
    ) -> Option<Order> {
        match self
            .store
            .find_by_and_update(&OrderQuery::client_id(client_id).with_status(expected), &updates)
        {
            Ok((old, new)) => {
                log_order(&new);
                notify(Some(&old), &new);
                Some(new)
            }
            Err(StoreError::NotFound) => {
                warn!(%client_id, expected = %expected, "transition no longer applicable");
                None
            }
        }
    }

    fn non_pending_error(&self, client_id: &str) -> OrderError {
        match self.store.find(client_id) {
            Ok(order) => {
                log_order(&order);
                OrderError::StatusMustBePending {
                    client_id: client_id.to_string(),
                    actual: order.status,
                }
            }
            Err(StoreError::NotFound) => OrderError::NotFound {
                client_id: client_id.to_string(),
            },
        }
    }
}

fn log_order(order: &Order) {
    info!(target: "tidal::orders", "{}", order.log_line());
}

fn notify(old: Option<&Order>, new: &Order) {
    if let Some(callback) = new.update_callback.as_ref() {
        callback.fire(old, new);
    }
}
