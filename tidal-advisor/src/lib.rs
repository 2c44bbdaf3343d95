//! Advisor trait definitions, the per-strategy actor runtime, and a
//! reference advisor.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use thiserror::Error;
use tidal_core::{
    MarketQuote, Order, OrderBookChanges, OrderUpdateSink, Product, ProductSymbol, UpdateCallback,
    VenueId,
};
use tidal_orders::OrderPipeline;

mod cache;
mod runtime;
mod spread_logger;
pub mod staleness;

pub use cache::MarketQuoteCache;
pub use runtime::{spawn_advisor, AdvisorDeps, AdvisorHandle, AdvisorWarning};
pub use spread_logger::{SpreadLogger, SpreadLoggerModule, SpreadLoggerStore};

/// Result alias used within advisor implementations.
pub type AdvisorResult<T> = Result<T, AdvisorError>;

/// Failure variants surfaced by advisor callbacks.
#[derive(Debug, Error)]
pub enum AdvisorError {
    /// Raised when an advisor's configuration cannot be parsed or is invalid.
    #[error("configuration is invalid: {0}")]
    InvalidConfig(String),
    /// Used for all other errors that should bubble up to the runtime.
    #[error("an internal advisor error occurred: {0}")]
    Internal(String),
}

/// Everything a single advisor actor needs to run.
#[derive(Clone, Debug)]
pub struct AdvisorSpec {
    /// Registry name of the advisor module that will host this spec.
    pub module: String,
    pub group_id: String,
    pub advisor_id: String,
    pub products: Vec<Product>,
    /// Venue to sorted symbol list, derived from `products`.
    pub order_books: BTreeMap<VenueId, Vec<ProductSymbol>>,
    pub config: serde_json::Value,
    /// Opaque seed for the module's initial store.
    pub store: serde_json::Value,
    pub trades: Vec<String>,
}

impl AdvisorSpec {
    pub fn new(
        module: impl Into<String>,
        group_id: impl Into<String>,
        advisor_id: impl Into<String>,
        products: Vec<Product>,
    ) -> Self {
        let mut order_books: BTreeMap<VenueId, Vec<ProductSymbol>> = BTreeMap::new();
        for product in &products {
            order_books
                .entry(product.venue_id.clone())
                .or_default()
                .push(product.symbol.clone());
        }
        for symbols in order_books.values_mut() {
            symbols.sort();
        }
        Self {
            module: module.into(),
            group_id: group_id.into(),
            advisor_id: advisor_id.into(),
            products,
            order_books,
            config: serde_json::Value::Null,
            store: serde_json::Value::Null,
            trades: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// The actor address: `advisor_{group_id}_{advisor_id}`.
    #[must_use]
    pub fn address(&self) -> String {
        format!("advisor_{}_{}", self.group_id, self.advisor_id)
    }
}

/// State held privately by each advisor actor and shared read-only with
/// callbacks.
pub struct AdvisorState<S> {
    pub group_id: String,
    pub advisor_id: String,
    pub products: Vec<Product>,
    pub market_quotes: MarketQuoteCache,
    pub config: serde_json::Value,
    pub store: S,
    pub trades: Vec<String>,
    orders: OrderPipeline,
    order_sink: Arc<dyn OrderUpdateSink>,
}

impl<S> AdvisorState<S> {
    /// Handle for submitting, amending and canceling orders.
    #[must_use]
    pub fn orders(&self) -> &OrderPipeline {
        &self.orders
    }

    /// Callback delivering order updates back into this advisor's
    /// mailbox.
    #[must_use]
    pub fn update_callback(&self) -> UpdateCallback {
        UpdateCallback::new(self.order_sink.clone())
    }

    /// As [`Self::update_callback`], with per-order context echoed on
    /// every invocation.
    #[must_use]
    pub fn update_callback_with_opts(&self, opts: serde_json::Value) -> UpdateCallback {
        UpdateCallback::with_opts(self.order_sink.clone(), opts)
    }

    #[must_use]
    pub fn address(&self) -> String {
        format!("advisor_{}_{}", self.group_id, self.advisor_id)
    }
}

/// Strategy callbacks invoked by the advisor actor.
///
/// Every callback receives the current state and returns the next store
/// value; returning an error (or panicking) preserves the pre-callback
/// store and is demoted to a warning event by the runtime.
pub trait Advisor: Send + Sync + 'static {
    /// Opaque user state threaded through the callbacks.
    type Store: Clone + Send + 'static;

    /// Invoked once after the actor starts, before any subscription is
    /// consumed. The returned store replaces the initial one.
    fn after_start(&self, state: &AdvisorState<Self::Store>) -> AdvisorResult<Self::Store> {
        Ok(state.store.clone())
    }

    /// Invoked when the cached inside quote for a product was refreshed
    /// with a materially different value.
    fn handle_inside_quote(
        &self,
        _quote: &MarketQuote,
        _changes: &OrderBookChanges,
        state: &AdvisorState<Self::Store>,
    ) -> AdvisorResult<Self::Store> {
        Ok(state.store.clone())
    }

    /// Invoked for every market quote event.
    fn handle_event(
        &self,
        _quote: &MarketQuote,
        state: &AdvisorState<Self::Store>,
    ) -> AdvisorResult<Self::Store> {
        Ok(state.store.clone())
    }

    /// Invoked when an order owned by this advisor transitions.
    fn handle_order_updated(
        &self,
        _old: Option<&Order>,
        _updated: &Order,
        _opts: Option<&serde_json::Value>,
        state: &AdvisorState<Self::Store>,
    ) -> AdvisorResult<Self::Store> {
        Ok(state.store.clone())
    }
}

/// Type-erased constructor that can start an advisor actor from a spec.
pub trait AdvisorModule: Send + Sync {
    /// Canonical registry name (e.g. `spread_logger`).
    fn name(&self) -> &'static str;

    /// Start the actor and hand back its handle.
    fn spawn(&self, spec: AdvisorSpec, deps: AdvisorDeps) -> AdvisorHandle;
}

static MODULE_REGISTRY: Lazy<RwLock<HashMap<String, Arc<dyn AdvisorModule>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// Registers an advisor module under its canonical name.
pub fn register_advisor_module(module: Arc<dyn AdvisorModule>) {
    let name = normalize_name(module.name());
    let mut registry = MODULE_REGISTRY.write();
    if registry.insert(name, module.clone()).is_some() {
        tracing::warn!(
            module = module.name(),
            "duplicate advisor module registration detected; overriding previous entry"
        );
    }
}

/// Looks up a registered advisor module by name.
pub fn advisor_module(name: &str) -> Option<Arc<dyn AdvisorModule>> {
    MODULE_REGISTRY.read().get(&normalize_name(name)).cloned()
}

/// Names of all registered advisor modules, sorted.
pub fn registered_advisor_modules() -> Vec<String> {
    let mut names: Vec<String> = MODULE_REGISTRY.read().keys().cloned().collect();
    names.sort_unstable();
    names
}

/// Registers the modules bundled with the workspace.
pub fn register_builtin_modules() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        register_advisor_module(Arc::new(SpreadLoggerModule));
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_address_follows_the_actor_naming_scheme() {
        let spec = AdvisorSpec::new("noop", "group_a", "btc_usd", vec![]);
        assert_eq!(spec.address(), "advisor_group_a_btc_usd");
    }

    #[test]
    fn spec_derives_order_books_from_products() {
        let spec = AdvisorSpec::new(
            "noop",
            "group_a",
            "all",
            vec![
                Product::new("exchange_b", "ltc_usd"),
                Product::new("exchange_a", "eth_usd"),
                Product::new("exchange_a", "btc_usd"),
            ],
        );
        let venues: Vec<_> = spec.order_books.keys().cloned().collect();
        assert_eq!(venues, vec!["exchange_a", "exchange_b"]);
        assert_eq!(
            spec.order_books["exchange_a"],
            vec!["btc_usd".to_string(), "eth_usd".to_string()]
        );
    }

    #[test]
    fn module_registry_is_case_insensitive() {
        register_builtin_modules();
        assert!(advisor_module("spread_logger").is_some());
        assert!(advisor_module("Spread_Logger").is_some());
        assert!(advisor_module("missing").is_none());
    }
}
