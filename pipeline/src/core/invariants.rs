//! Conformance rules a unit descriptor must satisfy before it is catalogued.

use crate::core::descriptor::UnitDescriptor;
use crate::core::state::StateSet;

/// Check the structural rules every descriptor must satisfy:
/// - Non-empty name
/// - Never adds and removes the same item
/// - Never needs and forbids the same item, by default or under any feature combination
/// - Never removes an item it also forbids
/// - Adapters declare no state constraints and change the node type
/// - Protections name at least one item
/// - Ancestor access names a type other than the unit's own
pub fn validate_descriptor(descriptor: &UnitDescriptor) -> Vec<String> {
    let mut errors = Vec::new();
    let declared = descriptor.declarations();

    if descriptor.name().trim().is_empty() {
        errors.push("unit name must not be empty".to_string());
    }

    check_overlap(
        &declared.adds,
        &declared.removes,
        "adds and removes",
        None,
        &mut errors,
    );
    check_overlap(
        &declared.needs,
        &declared.forbids,
        "needs and forbids",
        None,
        &mut errors,
    );
    check_overlap(
        &declared.removes,
        &declared.forbids,
        "removes and forbids",
        None,
        &mut errors,
    );

    for entry in descriptor.feature_constraints() {
        let features = entry.features.to_string();
        check_overlap(
            &entry.needs,
            &entry.forbids,
            "needs and forbids",
            Some(&features),
            &mut errors,
        );
        check_overlap(
            &declared.removes,
            &entry.forbids,
            "removes and forbids",
            Some(&features),
            &mut errors,
        );
    }

    if let Some(produced) = descriptor.produced_type() {
        if !declared.is_empty()
            || descriptor.declared_overrides()
            || !descriptor.protections().is_empty()
            || !descriptor.produces().is_empty()
        {
            errors.push("adapter must not declare state constraints or deliverables".to_string());
        }
        if produced == descriptor.node_type() {
            errors.push(format!(
                "adapter must change the node type, but consumes and produces {}",
                produced
            ));
        }
    }

    for (idx, protection) in descriptor.protections().iter().enumerate() {
        if protection.items().is_empty() {
            errors.push(format!("protection {} names no items", idx));
        }
    }

    if let Some(access) = descriptor.access() {
        if access.node_type == descriptor.node_type() {
            errors.push(format!(
                "ancestor access names the unit's own node type {}",
                access.node_type
            ));
        }
    }

    errors
}

fn check_overlap(
    left: &StateSet,
    right: &StateSet,
    rule: &str,
    features: Option<&str>,
    errors: &mut Vec<String>,
) {
    let shared = left.intersection(right);
    if shared.is_empty() {
        return;
    }
    match features {
        Some(features) => errors.push(format!(
            "{} the same items {} when {} is enabled",
            rule, shared, features
        )),
        None => errors.push(format!("{} the same items {}", rule, shared)),
    }
}
