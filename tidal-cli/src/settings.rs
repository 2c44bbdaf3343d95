//! Layered configuration loading for the CLI.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use tidal_core::Product;
use tidal_groups::{GroupEntry, GroupsConfig};

/// Root application configuration deserialized from layered sources.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub venues: BTreeMap<String, VenueConfig>,
    #[serde(default)]
    pub groups: BTreeMap<String, GroupEntry>,
}

/// Connection and universe settings for one venue.
#[derive(Clone, Debug, Deserialize)]
pub struct VenueConfig {
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default = "default_accounts")]
    pub accounts: Vec<String>,
    #[serde(default)]
    pub products: Vec<String>,
}

impl AppConfig {
    /// The advisor group section in the form `tidal-groups` consumes.
    #[must_use]
    pub fn groups_config(&self) -> GroupsConfig {
        GroupsConfig {
            groups: self.groups.clone(),
        }
    }

    /// Every configured product across all venues, in venue order.
    #[must_use]
    pub fn product_universe(&self) -> Vec<Product> {
        self.venues
            .iter()
            .flat_map(|(venue_id, venue)| {
                venue
                    .products
                    .iter()
                    .map(move |symbol| Product::new(venue_id.clone(), symbol.clone()))
            })
            .collect()
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_driver() -> String {
    "sim".to_string()
}

fn default_accounts() -> Vec<String> {
    vec!["main".to_string()]
}

/// Loads configuration by merging the given file with environment
/// variables prefixed `TIDAL_` (separator `__`).
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let config = Config::builder()
        .add_source(File::from(path).required(true))
        .add_source(
            Environment::with_prefix("TIDAL")
                .separator("__")
                .ignore_empty(true),
        )
        .build()
        .with_context(|| format!("failed to read configuration at {}", path.display()))?;
    config
        .try_deserialize()
        .context("configuration is invalid")
}
