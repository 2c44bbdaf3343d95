//! Reference advisor that logs the inside spread as it refreshes.

use tracing::info;

use crate::runtime::{spawn_advisor, AdvisorDeps, AdvisorHandle};
use crate::{Advisor, AdvisorModule, AdvisorResult, AdvisorSpec, AdvisorState};
use tidal_core::{MarketQuote, OrderBookChanges};

/// Logs every inside-quote refresh together with the running count.
pub struct SpreadLogger;

#[derive(Clone, Debug, Default)]
pub struct SpreadLoggerStore {
    pub refreshes: u64,
}

impl Advisor for SpreadLogger {
    type Store = SpreadLoggerStore;

    fn handle_inside_quote(
        &self,
        quote: &MarketQuote,
        _changes: &OrderBookChanges,
        state: &AdvisorState<Self::Store>,
    ) -> AdvisorResult<Self::Store> {
        let mut store = state.store.clone();
        store.refreshes += 1;
        info!(
            target: "tidal::advisor",
            advisor = %state.address(),
            venue = %quote.venue_id,
            symbol = %quote.product_symbol,
            bid = %quote.bid.price,
            ask = %quote.ask.price,
            spread = %quote.spread(),
            refreshes = store.refreshes,
            "inside quote refreshed"
        );
        Ok(store)
    }
}

/// Registry entry for [`SpreadLogger`].
pub struct SpreadLoggerModule;

impl AdvisorModule for SpreadLoggerModule {
    fn name(&self) -> &'static str {
        "spread_logger"
    }

    fn spawn(&self, spec: AdvisorSpec, deps: AdvisorDeps) -> AdvisorHandle {
        spawn_advisor(SpreadLogger, SpreadLoggerStore::default(), spec, deps)
    }
}
