//! Expanding validated groups into a concrete fleet of advisor specs.

use tidal_advisor::{advisor_module, AdvisorSpec};
use tidal_core::Product;

use crate::config::{parse_config, GroupsConfig};
use crate::factory::factory;
use crate::selector::ProductSelector;
use crate::GroupsError;

/// Resolve every group and delegate to its factory over the filtered
/// product universe.
pub fn build_specs(
    config: &GroupsConfig,
    universe: &[Product],
) -> Result<Vec<AdvisorSpec>, GroupsError> {
    let groups = parse_config(config).map_err(GroupsError::Config)?;
    let mut specs = Vec::new();
    for group in &groups {
        if advisor_module(&group.advisor).is_none() {
            return Err(GroupsError::UnknownModule {
                group_id: group.id.clone(),
                module: group.advisor.clone(),
            });
        }
        let factory = factory(&group.factory).ok_or_else(|| GroupsError::UnknownFactory {
            group_id: group.id.clone(),
            factory: group.factory.clone(),
        })?;
        let products = ProductSelector::parse(&group.products).filter(universe);
        specs.extend(factory.build_specs(group, &products));
    }
    Ok(specs)
}

/// Narrow [`build_specs`] to a single group.
pub fn build_specs_for_group(
    config: &GroupsConfig,
    universe: &[Product],
    group_id: &str,
) -> Result<Vec<AdvisorSpec>, GroupsError> {
    let mut specs = build_specs(config, universe)?;
    specs.retain(|spec| spec.group_id == group_id);
    Ok(specs)
}

/// Narrow [`build_specs`] to a single advisor of a single group.
pub fn build_specs_for_advisor(
    config: &GroupsConfig,
    universe: &[Product],
    group_id: &str,
    advisor_id: &str,
) -> Result<Vec<AdvisorSpec>, GroupsError> {
    let mut specs = build_specs_for_group(config, universe, group_id)?;
    specs.retain(|spec| spec.advisor_id == advisor_id);
    Ok(specs)
}
