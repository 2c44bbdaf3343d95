//! Declarative advisor group configuration and its validation.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

/// Raw advisor group configuration as loaded from file.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct GroupsConfig {
    #[serde(default)]
    pub groups: BTreeMap<String, GroupEntry>,
}

/// One unvalidated group entry keyed by group id.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct GroupEntry {
    pub advisor: Option<String>,
    pub factory: Option<String>,
    pub products: Option<String>,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
    #[serde(default)]
    pub trades: Vec<String>,
}

/// A validated advisor group.
#[derive(Clone, Debug, PartialEq)]
pub struct AdvisorGroup {
    pub id: String,
    /// Registry name of the advisor module hosted by this group.
    pub advisor: String,
    /// Registry name of the factory that mints the group's specs.
    pub factory: String,
    /// Product selector expression (`*` | `venue` | `venue.symbol`, unioned).
    pub products: String,
    pub config: serde_json::Value,
    pub trades: Vec<String>,
}

/// A single `{field, message}` validation failure.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn must_be_present(field: &str) -> Self {
        Self {
            field: field.to_string(),
            message: "must be present".to_string(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.message)
    }
}

/// Validation failures collected across every group, keyed by group id.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfigErrors(pub BTreeMap<String, Vec<FieldError>>);

impl ConfigErrors {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (group_id, errors) in &self.0 {
            for error in errors {
                if !first {
                    write!(f, "; ")?;
                }
                first = false;
                write!(f, "{group_id}: {error}")?;
            }
        }
        Ok(())
    }
}

/// Validate the raw configuration into a list of advisor groups.
///
/// Every group entry requires `advisor`, `factory` and `products`;
/// `config` defaults to an empty mapping. Errors from all groups are
/// returned together.
pub fn parse_config(config: &GroupsConfig) -> Result<Vec<AdvisorGroup>, ConfigErrors> {
    let mut groups = Vec::with_capacity(config.groups.len());
    let mut errors = ConfigErrors::default();

    for (id, entry) in &config.groups {
        let mut group_errors = Vec::new();
        if entry.advisor.is_none() {
            group_errors.push(FieldError::must_be_present("advisor"));
        }
        if entry.factory.is_none() {
            group_errors.push(FieldError::must_be_present("factory"));
        }
        if entry.products.is_none() {
            group_errors.push(FieldError::must_be_present("products"));
        }
        if !group_errors.is_empty() {
            errors.0.insert(id.clone(), group_errors);
            continue;
        }

        groups.push(AdvisorGroup {
            id: id.clone(),
            advisor: entry.advisor.clone().unwrap_or_default(),
            factory: entry.factory.clone().unwrap_or_default(),
            products: entry.products.clone().unwrap_or_default(),
            config: entry
                .config
                .clone()
                .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new())),
            trades: entry.trades.clone(),
        });
    }

    if errors.is_empty() {
        Ok(groups)
    } else {
        Err(errors)
    }
}
