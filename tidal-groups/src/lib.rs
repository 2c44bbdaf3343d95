//! Advisor group configuration, product selection, and supervision.

use thiserror::Error;

mod config;
mod factory;
mod selector;
mod specs;
mod supervisor;

pub use config::{parse_config, AdvisorGroup, ConfigErrors, FieldError, GroupEntry, GroupsConfig};
pub use factory::{
    factory, register_builtin_factories, register_factory, registered_factories, AdvisorFactory,
    OneForAllProducts, OnePerProduct,
};
pub use selector::{ProductSelector, SelectorToken};
pub use specs::{build_specs, build_specs_for_advisor, build_specs_for_group};
pub use supervisor::{AdvisorStatus, AdvisorsSupervisor, StartSummary};

/// Failure variants surfaced while materializing advisor fleets.
#[derive(Debug, Error)]
pub enum GroupsError {
    /// One or more groups failed validation; the map carries the
    /// per-group field errors verbatim.
    #[error("invalid advisor group configuration: {0}")]
    Config(ConfigErrors),
    /// A group references a factory that was never registered.
    #[error("group '{group_id}' references unknown factory '{factory}'")]
    UnknownFactory { group_id: String, factory: String },
    /// A group references an advisor module that was never registered.
    #[error("group '{group_id}' references unknown advisor module '{module}'")]
    UnknownModule { group_id: String, module: String },
}
