//! Wires the runtime together and drives the start/stop commands.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tidal_advisor::{register_builtin_modules, AdvisorDeps, AdvisorSpec};
use tidal_broker::{InsideQuotes, VenueAdapter, VenueRouter};
use tidal_core::VenueId;
use tidal_events::EventBus;
use tidal_groups::{build_specs, register_builtin_factories, AdvisorsSupervisor};
use tidal_orders::{OrderPipeline, OrderStore};
use tidal_sim::{SimOrderBooks, SimVenueAdapter};
use tracing::info;

use crate::settings::AppConfig;

/// Fully wired runtime for one CLI session.
pub struct AppState {
    pub bus: Arc<EventBus>,
    pub books: Arc<SimOrderBooks>,
    pub pipeline: OrderPipeline,
    pub supervisor: AdvisorsSupervisor,
    pub specs: Vec<AdvisorSpec>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("specs", &self.specs)
            .finish_non_exhaustive()
    }
}

/// Build the event bus, venue adapters, order pipeline, and the advisor
/// fleet described by the configuration.
pub fn bootstrap(config: &AppConfig) -> Result<AppState> {
    register_builtin_modules();
    register_builtin_factories();

    let mut routes: HashMap<VenueId, Arc<dyn VenueAdapter>> = HashMap::new();
    for (venue_id, venue) in &config.venues {
        match venue.driver.as_str() {
            "sim" => {
                routes.insert(venue_id.clone(), Arc::new(SimVenueAdapter::new(venue_id)));
            }
            other => bail!("venue '{venue_id}' uses unknown driver '{other}'"),
        }
    }

    let bus = Arc::new(EventBus::new());
    let books = Arc::new(SimOrderBooks::new());
    let pipeline = OrderPipeline::new(
        Arc::new(OrderStore::new()),
        Arc::new(VenueRouter::new(routes)),
    );
    let deps = AdvisorDeps::new(
        bus.clone(),
        books.clone() as Arc<dyn InsideQuotes>,
        pipeline.clone(),
    );

    let universe = config.product_universe();
    let specs = build_specs(&config.groups_config(), &universe)
        .context("failed to build advisor specs")?;
    info!(
        venues = config.venues.len(),
        products = universe.len(),
        advisors = specs.len(),
        "runtime bootstrapped"
    );

    Ok(AppState {
        bus,
        books,
        pipeline,
        supervisor: AdvisorsSupervisor::new(deps),
        specs,
    })
}

/// `start`: boot the fleet, then run until interrupted.
pub async fn run_start(state: &AppState) -> Result<()> {
    let summary = state.supervisor.start(state.specs.clone());
    println!(
        "started {} new advisor(s), {} already running",
        summary.new, summary.already_running
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    let stopped = state.supervisor.stop_all().await;
    println!("stopped {} advisor(s)", stopped);
    Ok(())
}

/// `stop`: validate the configuration and stop any advisors owned by
/// this session.
pub async fn run_stop(state: &AppState) -> Result<()> {
    let stopped = state.supervisor.stop_all().await;
    println!(
        "stopped {} of {} configured advisor(s)",
        stopped,
        state.specs.len()
    );
    Ok(())
}
