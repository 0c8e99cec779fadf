//! The query a caller fills in before planning.

use std::sync::Arc;

use crate::core::catalog::Catalog;
use crate::core::descriptor::UnitDescriptor;
use crate::core::state::{Feature, FeatureSet, Production, ProductionSet, StateItem, StateSet};
use crate::error::DescriptorError;

/// Initial and target state, deliverables, features and candidate units.
///
/// Planners and verification only read a request; callers finish filling it
/// before handing it over.
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    catalog: Arc<Catalog>,
    initial: StateSet,
    target_include: StateSet,
    target_exclude: StateSet,
    productions: ProductionSet,
    features: FeatureSet,
    runners: Vec<Arc<UnitDescriptor>>,
    adapters: Vec<Arc<UnitDescriptor>>,
}

impl ScheduleRequest {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            initial: StateSet::new(),
            target_include: StateSet::new(),
            target_exclude: StateSet::new(),
            productions: ProductionSet::new(),
            features: FeatureSet::new(),
            runners: Vec::new(),
            adapters: Vec::new(),
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn add_initial(&mut self, items: impl IntoIterator<Item = StateItem>) -> &mut Self {
        self.initial.extend(items);
        self
    }

    pub fn add_target_include(&mut self, items: impl IntoIterator<Item = StateItem>) -> &mut Self {
        self.target_include.extend(items);
        self
    }

    pub fn add_target_exclude(&mut self, items: impl IntoIterator<Item = StateItem>) -> &mut Self {
        self.target_exclude.extend(items);
        self
    }

    pub fn add_production(&mut self, production: Production) -> &mut Self {
        self.productions.insert(production);
        self
    }

    pub fn enable_feature(&mut self, feature: Feature) -> &mut Self {
        self.features.insert(feature);
        self
    }

    /// Add a catalogued runner or visitor as a candidate.
    pub fn add_runner(&mut self, name: &str) -> Result<&mut Self, DescriptorError> {
        let unit = self.catalog.require(name)?;
        if unit.is_adapter() {
            return Err(DescriptorError::UnexpectedKind {
                unit: name.to_string(),
                expected: "runner",
                found: unit.body().kind_name(),
            });
        }
        let unit = Arc::clone(unit);
        if !self.runners.iter().any(|known| known.name() == name) {
            self.runners.push(unit);
        }
        Ok(self)
    }

    /// Make a catalogued adapter available for type transitions.
    pub fn add_adapter(&mut self, name: &str) -> Result<&mut Self, DescriptorError> {
        let unit = self.catalog.require(name)?;
        if !unit.is_adapter() {
            return Err(DescriptorError::UnexpectedKind {
                unit: name.to_string(),
                expected: "adapter",
                found: unit.body().kind_name(),
            });
        }
        let unit = Arc::clone(unit);
        if !self.adapters.iter().any(|known| known.name() == name) {
            self.adapters.push(unit);
        }
        Ok(self)
    }

    /// Add every catalogued unit, runners and adapters alike.
    pub fn add_all_units(&mut self) -> &mut Self {
        let catalog = Arc::clone(&self.catalog);
        for unit in catalog.iter() {
            let pool = if unit.is_adapter() {
                &mut self.adapters
            } else {
                &mut self.runners
            };
            if !pool.iter().any(|known| known.name() == unit.name()) {
                pool.push(Arc::clone(unit));
            }
        }
        self
    }

    pub fn initial(&self) -> &StateSet {
        &self.initial
    }

    pub fn target_include(&self) -> &StateSet {
        &self.target_include
    }

    pub fn target_exclude(&self) -> &StateSet {
        &self.target_exclude
    }

    pub fn productions(&self) -> &ProductionSet {
        &self.productions
    }

    pub fn features(&self) -> &FeatureSet {
        &self.features
    }

    pub fn runners(&self) -> &[Arc<UnitDescriptor>] {
        &self.runners
    }

    pub fn adapters(&self) -> &[Arc<UnitDescriptor>] {
        &self.adapters
    }

    /// Runners usable with the enabled features: every feature they support
    /// must be enabled.
    pub fn candidate_runners(&self) -> impl Iterator<Item = &Arc<UnitDescriptor>> {
        self.runners
            .iter()
            .filter(|unit| unit.supports().is_subset(&self.features))
    }
}
