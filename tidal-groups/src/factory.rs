//! Factories minting advisor specs for a group's matched products.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tidal_advisor::AdvisorSpec;
use tidal_core::Product;

use crate::config::AdvisorGroup;

/// Decides how many advisors a group materializes and which products
/// each one owns.
pub trait AdvisorFactory: Send + Sync {
    /// Canonical registry name (e.g. `one_per_product`).
    fn name(&self) -> &'static str;

    /// Mint the group's specs for the filtered product list.
    fn build_specs(&self, group: &AdvisorGroup, products: &[Product]) -> Vec<AdvisorSpec>;
}

static FACTORY_REGISTRY: Lazy<RwLock<HashMap<String, Arc<dyn AdvisorFactory>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// Registers a factory under its canonical name.
pub fn register_factory(factory: Arc<dyn AdvisorFactory>) {
    let name = normalize_name(factory.name());
    let mut registry = FACTORY_REGISTRY.write();
    if registry.insert(name, factory.clone()).is_some() {
        tracing::warn!(
            factory = factory.name(),
            "duplicate factory registration detected; overriding previous entry"
        );
    }
}

/// Looks up a registered factory by name.
pub fn factory(name: &str) -> Option<Arc<dyn AdvisorFactory>> {
    FACTORY_REGISTRY.read().get(&normalize_name(name)).cloned()
}

/// Names of all registered factories, sorted.
pub fn registered_factories() -> Vec<String> {
    let mut names: Vec<String> = FACTORY_REGISTRY.read().keys().cloned().collect();
    names.sort_unstable();
    names
}

/// Registers the factories bundled with the workspace.
pub fn register_builtin_factories() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        register_factory(Arc::new(OnePerProduct));
        register_factory(Arc::new(OneForAllProducts));
    });
}

fn base_spec(group: &AdvisorGroup, advisor_id: String, products: Vec<Product>) -> AdvisorSpec {
    let mut spec = AdvisorSpec::new(group.advisor.clone(), group.id.clone(), advisor_id, products)
        .with_config(group.config.clone());
    spec.trades = group.trades.clone();
    spec
}

/// Mints one advisor per matched product, addressed `{venue}_{symbol}`.
pub struct OnePerProduct;

impl AdvisorFactory for OnePerProduct {
    fn name(&self) -> &'static str {
        "one_per_product"
    }

    fn build_specs(&self, group: &AdvisorGroup, products: &[Product]) -> Vec<AdvisorSpec> {
        products
            .iter()
            .map(|product| {
                base_spec(
                    group,
                    format!("{}_{}", product.venue_id, product.symbol),
                    vec![product.clone()],
                )
            })
            .collect()
    }
}

/// Mints a single advisor owning every matched product.
pub struct OneForAllProducts;

impl AdvisorFactory for OneForAllProducts {
    fn name(&self) -> &'static str {
        "one_for_all_products"
    }

    fn build_specs(&self, group: &AdvisorGroup, products: &[Product]) -> Vec<AdvisorSpec> {
        if products.is_empty() {
            return Vec::new();
        }
        vec![base_spec(group, "all".to_string(), products.to_vec())]
    }
}
