//! Immutable table of every unit known to a process.

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::descriptor::{UnitDefinition, UnitDescriptor};
use crate::error::DescriptorError;

/// Validated descriptors in registration order, looked up by name.
///
/// Built once at startup and shared behind an `Arc`; nothing mutates it
/// afterwards, so concurrent readers need no locking.
#[derive(Debug, Default)]
pub struct Catalog {
    units: Vec<Arc<UnitDescriptor>>,
    by_name: HashMap<String, usize>,
}

impl Catalog {
    /// Extract and register every definition, failing on the first bad one.
    pub fn new(definitions: impl IntoIterator<Item = UnitDefinition>) -> Result<Self, DescriptorError> {
        let mut catalog = Catalog::default();
        for definition in definitions {
            if catalog.by_name.contains_key(definition.name()) {
                return Err(DescriptorError::DuplicateName {
                    unit: definition.name().to_string(),
                });
            }
            let descriptor = UnitDescriptor::extract(definition)?;
            catalog
                .by_name
                .insert(descriptor.name().to_string(), catalog.units.len());
            catalog.units.push(Arc::new(descriptor));
        }
        tracing::debug!(units = catalog.units.len(), "catalogue built");
        Ok(catalog)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<UnitDescriptor>> {
        self.by_name.get(name).map(|&idx| &self.units[idx])
    }

    /// Look up a unit, failing with `UnknownUnit`.
    pub fn require(&self, name: &str) -> Result<&Arc<UnitDescriptor>, DescriptorError> {
        self.get(name).ok_or_else(|| DescriptorError::UnknownUnit {
            name: name.to_string(),
        })
    }

    /// Position of a unit in registration order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<UnitDescriptor>> {
        self.units.iter()
    }

    pub fn runners(&self) -> impl Iterator<Item = &Arc<UnitDescriptor>> {
        self.units.iter().filter(|unit| !unit.is_adapter())
    }

    pub fn adapters(&self) -> impl Iterator<Item = &Arc<UnitDescriptor>> {
        self.units.iter().filter(|unit| unit.is_adapter())
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CLASS, METHOD, NoopAdapter, NoopRunner, X};

    #[test]
    fn duplicate_names_are_rejected() {
        let err = Catalog::new([
            UnitDefinition::runner("A", METHOD, NoopRunner),
            UnitDefinition::runner("A", CLASS, NoopRunner),
        ])
        .expect_err("duplicate");
        assert!(matches!(err, DescriptorError::DuplicateName { unit } if unit == "A"));
    }

    #[test]
    fn contradictory_unit_fails_catalogue_build() {
        let err = Catalog::new([UnitDefinition::runner("C", METHOD, NoopRunner)
            .needs([X])
            .forbids([X])])
        .expect_err("contradiction");
        assert!(matches!(err, DescriptorError::Conformance { .. }));
    }

    #[test]
    fn lookup_and_partition_by_kind() {
        let catalog = Catalog::new([
            UnitDefinition::runner("A", METHOD, NoopRunner),
            UnitDefinition::adapter("ClassToMethod", CLASS, METHOD, NoopAdapter),
            UnitDefinition::runner("B", CLASS, NoopRunner),
        ])
        .expect("catalogue");

        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.position("B"), Some(2));
        let runners: Vec<_> = catalog.runners().map(|u| u.name().to_string()).collect();
        assert_eq!(runners, ["A", "B"]);
        assert_eq!(catalog.adapters().count(), 1);
        assert!(catalog.require("missing").is_err());
    }
}
