//! Sharded in-memory registry of orders keyed by client id.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;
use tidal_core::{ClientId, Order, OrderStatus, Price, Size};
use uuid::Uuid;

const DEFAULT_SHARDS: usize = 16;

/// Failure variants surfaced by the store.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum StoreError {
    /// No order matched the given client id and predicate.
    #[error("no order matched the query")]
    NotFound,
}

/// Predicate applied by [`OrderStore::find_by_and_update`].
///
/// Every populated field must match for the update to be applied;
/// status transitions are expressed as status-gated queries.
#[derive(Clone, Debug)]
pub struct OrderQuery {
    pub client_id: ClientId,
    pub status: Option<OrderStatus>,
}

impl OrderQuery {
    #[must_use]
    pub fn client_id(client_id: impl Into<ClientId>) -> Self {
        Self {
            client_id: client_id.into(),
            status: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    fn matches(&self, order: &Order) -> bool {
        match self.status {
            Some(status) => order.status == status,
            None => true,
        }
    }
}

/// Field updates applied atomically alongside a matched predicate.
#[derive(Clone, Debug, Default)]
pub struct OrderUpdates {
    pub status: Option<OrderStatus>,
    pub server_id: Option<String>,
    pub price: Option<Price>,
    pub size: Option<Size>,
    pub error_reason: Option<String>,
}

impl OrderUpdates {
    #[must_use]
    pub fn status(status: OrderStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_server_id(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = Some(server_id.into());
        self
    }

    #[must_use]
    pub fn with_price(mut self, price: Price) -> Self {
        self.price = Some(price);
        self
    }

    #[must_use]
    pub fn with_size(mut self, size: Size) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub fn with_error_reason(mut self, reason: impl Into<String>) -> Self {
        self.error_reason = Some(reason.into());
        self
    }

    fn apply(&self, order: &mut Order) {
        if let Some(status) = self.status {
            order.status = status;
        }
        if let Some(server_id) = &self.server_id {
            order.server_id = Some(server_id.clone());
        }
        if let Some(price) = self.price {
            order.price = price;
        }
        if let Some(size) = self.size {
            order.size = size;
        }
        if let Some(reason) = &self.error_reason {
            order.error_reason = Some(reason.clone());
        }
        order.updated_at = Utc::now();
    }
}

/// Mapping of client id to order, sharded to keep contention local.
///
/// The shard mutex serializes concurrent `find_by_and_update` calls on
/// the same client id, so exactly one caller wins when predicates
/// overlap.
pub struct OrderStore {
    shards: Vec<Mutex<HashMap<ClientId, Order>>>,
}

impl OrderStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    #[must_use]
    pub fn with_shards(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, client_id: &str) -> &Mutex<HashMap<ClientId, Order>> {
        let mut hasher = DefaultHasher::new();
        client_id.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        &self.shards[index]
    }

    /// Insert a freshly constructed order, returning the stored snapshot.
    ///
    /// A missing client id is generated here so every stored order can be
    /// addressed.
    pub fn add(&self, mut order: Order) -> Order {
        if order.client_id.is_empty() {
            order.client_id = Uuid::new_v4().to_string();
        }
        let mut shard = self.shard(&order.client_id).lock();
        shard.insert(order.client_id.clone(), order.clone());
        order
    }

    /// Look up an order by client id.
    pub fn find(&self, client_id: &str) -> Result<Order, StoreError> {
        self.shard(client_id)
            .lock()
            .get(client_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    /// Atomically locate the single order matching `query`, apply
    /// `updates`, and return the prior and updated snapshots.
    pub fn find_by_and_update(
        &self,
        query: &OrderQuery,
        updates: &OrderUpdates,
    ) -> Result<(Order, Order), StoreError> {
        let mut shard = self.shard(&query.client_id).lock();
        let order = shard.get_mut(&query.client_id).ok_or(StoreError::NotFound)?;
        if !query.matches(order) {
            return Err(StoreError::NotFound);
        }
        let old = order.clone();
        updates.apply(order);
        Ok((old, order.clone()))
    }

    /// Remove all orders. Test hook.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }

    /// Number of orders currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for OrderStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use tidal_core::{Side, TimeInForce};

    fn pending_order() -> Order {
        let mut order = Order::enqueue(
            "exchange_a",
            "main",
            "btc_usd",
            Side::Buy,
            TimeInForce::GoodTilCanceled,
            dec!(100),
            dec!(1),
        );
        order.status = OrderStatus::Pending;
        order.server_id = Some("srv-1".into());
        order
    }

    #[test]
    fn add_then_find_round_trips() {
        let store = OrderStore::new();
        let order = store.add(pending_order());
        let found = store.find(&order.client_id).unwrap();
        assert_eq!(found.client_id, order.client_id);
        assert_eq!(found.status, OrderStatus::Pending);
    }

    #[test]
    fn find_missing_returns_not_found() {
        let store = OrderStore::new();
        assert_eq!(store.find("nope"), Err(StoreError::NotFound));
    }

    #[test]
    fn update_is_gated_on_the_predicate() {
        let store = OrderStore::new();
        let order = store.add(pending_order());

        let miss = store.find_by_and_update(
            &OrderQuery::client_id(&order.client_id).with_status(OrderStatus::Enqueued),
            &OrderUpdates::status(OrderStatus::Error),
        );
        assert_eq!(miss, Err(StoreError::NotFound));
        assert_eq!(
            store.find(&order.client_id).unwrap().status,
            OrderStatus::Pending
        );

        let (old, new) = store
            .find_by_and_update(
                &OrderQuery::client_id(&order.client_id).with_status(OrderStatus::Pending),
                &OrderUpdates::status(OrderStatus::Canceling),
            )
            .unwrap();
        assert_eq!(old.status, OrderStatus::Pending);
        assert_eq!(new.status, OrderStatus::Canceling);
    }

    #[test]
    fn updates_only_touch_populated_fields() {
        let store = OrderStore::new();
        let order = store.add(pending_order());
        let (_, new) = store
            .find_by_and_update(
                &OrderQuery::client_id(&order.client_id),
                &OrderUpdates::default().with_price(dec!(105)),
            )
            .unwrap();
        assert_eq!(new.price, dec!(105));
        assert_eq!(new.size, dec!(1));
        assert_eq!(new.status, OrderStatus::Pending);
        assert_eq!(new.server_id.as_deref(), Some("srv-1"));
    }

    #[test]
    fn generates_a_client_id_when_absent() {
        let store = OrderStore::new();
        let mut order = pending_order();
        order.client_id = String::new();
        let stored = store.add(order);
        assert_eq!(stored.client_id.len(), 36);
    }

    #[test]
    fn contended_status_transition_has_exactly_one_winner() {
        let store = Arc::new(OrderStore::new());
        let order = store.add(pending_order());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let client_id = order.client_id.clone();
            handles.push(std::thread::spawn(move || {
                store
                    .find_by_and_update(
                        &OrderQuery::client_id(client_id).with_status(OrderStatus::Pending),
                        &OrderUpdates::status(OrderStatus::Canceling),
                    )
                    .is_ok()
            }));
        }

        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(
            store.find(&order.client_id).unwrap().status,
            OrderStatus::Canceling
        );
    }

    #[test]
    fn clear_removes_everything() {
        let store = OrderStore::new();
        store.add(pending_order());
        store.add(pending_order());
        assert_eq!(store.len(), 2);
        store.clear();
        assert!(store.is_empty());
    }
}
