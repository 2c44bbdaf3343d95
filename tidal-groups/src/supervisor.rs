//! Starts and stops advisor actors from materialized specs.

use std::collections::HashMap;

use parking_lot::Mutex;
use tidal_advisor::{advisor_module, AdvisorDeps, AdvisorHandle, AdvisorSpec};
use tracing::{error, info};

/// Outcome of one [`AdvisorsSupervisor::start`] call.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StartSummary {
    pub new: usize,
    pub already_running: usize,
}

/// Pairing of a spec with whether an actor currently runs under its
/// address.
#[derive(Debug)]
pub struct AdvisorStatus {
    pub spec: AdvisorSpec,
    pub running: bool,
}

/// Owns the running advisor actors, keyed by address.
pub struct AdvisorsSupervisor {
    deps: AdvisorDeps,
    running: Mutex<HashMap<String, AdvisorHandle>>,
}

impl AdvisorsSupervisor {
    #[must_use]
    pub fn new(deps: AdvisorDeps) -> Self {
        Self {
            deps,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Start an actor for every spec whose address is not already
    /// running, reporting both counts.
    pub fn start(&self, specs: Vec<AdvisorSpec>) -> StartSummary {
        let mut summary = StartSummary::default();
        let mut running = self.running.lock();
        for spec in specs {
            let address = spec.address();
            if let Some(handle) = running.get(&address) {
                if !handle.is_finished() {
                    summary.already_running += 1;
                    continue;
                }
            }
            let Some(module) = advisor_module(&spec.module) else {
                // Specs built through the registry always resolve; this
                // guards hand-rolled specs.
                error!(%address, module = %spec.module, "unknown advisor module; spec skipped");
                continue;
            };
            let handle = module.spawn(spec, self.deps.clone());
            running.insert(address, handle);
            summary.new += 1;
        }
        info!(
            new = summary.new,
            already_running = summary.already_running,
            "advisors started"
        );
        summary
    }

    /// Report the running state of each spec.
    pub fn info(&self, specs: &[AdvisorSpec]) -> Vec<AdvisorStatus> {
        let running = self.running.lock();
        specs
            .iter()
            .map(|spec| AdvisorStatus {
                spec: spec.clone(),
                running: running
                    .get(&spec.address())
                    .is_some_and(|handle| !handle.is_finished()),
            })
            .collect()
    }

    /// Stop the actor at `address` if one is running. Idempotent.
    pub async fn terminate(&self, address: &str) -> bool {
        let handle = self.running.lock().remove(address);
        match handle {
            Some(handle) => {
                handle.stop().await;
                true
            }
            None => false,
        }
    }

    /// Stop every running actor, returning how many were stopped.
    pub async fn stop_all(&self) -> usize {
        let drained: Vec<AdvisorHandle> = {
            let mut running = self.running.lock();
            running.drain().map(|(_, handle)| handle).collect()
        };
        let stopped = drained.len();
        for handle in drained {
            handle.stop().await;
        }
        info!(stopped, "advisors stopped");
        stopped
    }

    #[must_use]
    pub fn running_count(&self) -> usize {
        self.running.lock().len()
    }

    /// Addresses of all running actors, sorted.
    #[must_use]
    pub fn running_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.running.lock().keys().cloned().collect();
        addresses.sort_unstable();
        addresses
    }
}
