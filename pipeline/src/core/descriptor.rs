//! Processing-unit definitions and the validated descriptors extracted from them.
//!
//! A [`UnitDefinition`] is the statically declared table entry for one unit:
//! its body plus every constraint it declares. [`UnitDescriptor::extract`]
//! flattens helper composition, merges feature-specific overrides onto the
//! default constraints and checks the result against the conformance rules in
//! [`crate::core::invariants`].

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::core::invariants::validate_descriptor;
use crate::core::state::{
    Feature, FeatureSet, NodeType, Production, ProductionSet, StateItem, StateSet,
};
use crate::error::DescriptorError;
use crate::unit::{Adapter, DataNode, Filter, Runner, Visitor};

/// Executable body of a unit.
#[derive(Clone)]
pub enum UnitBody {
    Runner(Arc<dyn Runner>),
    Visitor(Arc<dyn Visitor>),
    Adapter {
        produces: NodeType,
        adapter: Arc<dyn Adapter>,
    },
}

impl UnitBody {
    pub fn kind_name(&self) -> &'static str {
        match self {
            UnitBody::Runner(_) => "runner",
            UnitBody::Visitor(_) => "visitor",
            UnitBody::Adapter { .. } => "adapter",
        }
    }
}

impl fmt::Debug for UnitBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitBody::Adapter { produces, .. } => {
                f.debug_struct("Adapter").field("produces", produces).finish()
            }
            other => f.write_str(other.kind_name()),
        }
    }
}

/// State transitions and requirements a unit or helper declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Declarations {
    pub needs: StateSet,
    pub forbids: StateSet,
    pub adds: StateSet,
    pub removes: StateSet,
    pub modifies: StateSet,
}

impl Declarations {
    fn merge(&mut self, other: &Declarations) {
        self.needs.extend_from(&other.needs);
        self.forbids.extend_from(&other.forbids);
        self.adds.extend_from(&other.adds);
        self.removes.extend_from(&other.removes);
        self.modifies.extend_from(&other.modifies);
    }

    pub fn is_empty(&self) -> bool {
        self.needs.is_empty()
            && self.forbids.is_empty()
            && self.adds.is_empty()
            && self.removes.is_empty()
            && self.modifies.is_empty()
    }
}

/// Auxiliary declarations pulled into a unit with [`UnitDefinition::uses`].
#[derive(Debug, Clone)]
pub struct HelperDefinition {
    name: String,
    declared: Declarations,
    uses: Vec<HelperDefinition>,
}

impl HelperDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared: Declarations::default(),
            uses: Vec::new(),
        }
    }

    pub fn needs(mut self, items: impl IntoIterator<Item = StateItem>) -> Self {
        self.declared.needs.extend(items);
        self
    }

    pub fn forbids(mut self, items: impl IntoIterator<Item = StateItem>) -> Self {
        self.declared.forbids.extend(items);
        self
    }

    pub fn adds(mut self, items: impl IntoIterator<Item = StateItem>) -> Self {
        self.declared.adds.extend(items);
        self
    }

    pub fn removes(mut self, items: impl IntoIterator<Item = StateItem>) -> Self {
        self.declared.removes.extend(items);
        self
    }

    pub fn uses(mut self, helper: HelperDefinition) -> Self {
        self.uses.push(helper);
        self
    }
}

/// Constraints that only apply when a feature combination is enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureOverride {
    features: FeatureSet,
    needs: StateSet,
    forbids: StateSet,
}

impl FeatureOverride {
    pub fn when(features: impl IntoIterator<Item = Feature>) -> Self {
        Self {
            features: features.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn needs(mut self, items: impl IntoIterator<Item = StateItem>) -> Self {
        self.needs.extend(items);
        self
    }

    pub fn forbids(mut self, items: impl IntoIterator<Item = StateItem>) -> Self {
        self.forbids.extend(items);
        self
    }

    pub fn features(&self) -> &FeatureSet {
        &self.features
    }

    pub fn needs_set(&self) -> &StateSet {
        &self.needs
    }

    pub fn forbids_set(&self) -> &StateSet {
        &self.forbids
    }
}

/// Items a unit relies on staying untouched after it has run.
///
/// The protection holds until one of `lifted_by` is added by a later step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Protection {
    items: StateSet,
    lifted_by: StateSet,
}

impl Protection {
    pub fn new(items: impl IntoIterator<Item = StateItem>) -> Self {
        Self {
            items: items.into_iter().collect(),
            lifted_by: StateSet::new(),
        }
    }

    pub fn lifted_by(mut self, items: impl IntoIterator<Item = StateItem>) -> Self {
        self.lifted_by.extend(items);
        self
    }

    pub fn items(&self) -> &StateSet {
        &self.items
    }

    pub fn lifting_items(&self) -> &StateSet {
        &self.lifted_by
    }
}

/// Access a unit requires to an ancestor node while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AncestorAccess {
    pub node_type: NodeType,
    pub exclusive: bool,
}

/// Raw declaration of one processing unit, as registered at startup.
#[derive(Debug, Clone)]
pub struct UnitDefinition {
    name: String,
    description: String,
    node_type: NodeType,
    body: UnitBody,
    declared: Declarations,
    produces: ProductionSet,
    supports: FeatureSet,
    uses: Vec<HelperDefinition>,
    overrides: Vec<FeatureOverride>,
    protections: Vec<Protection>,
    access: Option<AncestorAccess>,
    filters: Vec<Filter>,
    synchronized: bool,
}

impl UnitDefinition {
    fn with_body(name: impl Into<String>, node_type: NodeType, body: UnitBody) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            node_type,
            body,
            declared: Declarations::default(),
            produces: ProductionSet::new(),
            supports: FeatureSet::new(),
            uses: Vec::new(),
            overrides: Vec::new(),
            protections: Vec::new(),
            access: None,
            filters: Vec::new(),
            synchronized: false,
        }
    }

    pub fn runner(
        name: impl Into<String>,
        node_type: NodeType,
        runner: impl Runner + 'static,
    ) -> Self {
        Self::with_body(name, node_type, UnitBody::Runner(Arc::new(runner)))
    }

    pub fn visitor(
        name: impl Into<String>,
        node_type: NodeType,
        visitor: impl Visitor + 'static,
    ) -> Self {
        Self::with_body(name, node_type, UnitBody::Visitor(Arc::new(visitor)))
    }

    pub fn adapter(
        name: impl Into<String>,
        from: NodeType,
        to: NodeType,
        adapter: impl Adapter + 'static,
    ) -> Self {
        Self::with_body(
            name,
            from,
            UnitBody::Adapter {
                produces: to,
                adapter: Arc::new(adapter),
            },
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    pub fn needs(mut self, items: impl IntoIterator<Item = StateItem>) -> Self {
        self.declared.needs.extend(items);
        self
    }

    pub fn forbids(mut self, items: impl IntoIterator<Item = StateItem>) -> Self {
        self.declared.forbids.extend(items);
        self
    }

    pub fn adds(mut self, items: impl IntoIterator<Item = StateItem>) -> Self {
        self.declared.adds.extend(items);
        self
    }

    pub fn removes(mut self, items: impl IntoIterator<Item = StateItem>) -> Self {
        self.declared.removes.extend(items);
        self
    }

    pub fn modifies(mut self, items: impl IntoIterator<Item = StateItem>) -> Self {
        self.declared.modifies.extend(items);
        self
    }

    pub fn produces(mut self, production: Production) -> Self {
        self.produces.insert(production);
        self
    }

    pub fn supports(mut self, feature: Feature) -> Self {
        self.supports.insert(feature);
        self
    }

    pub fn uses(mut self, helper: HelperDefinition) -> Self {
        self.uses.push(helper);
        self
    }

    pub fn optional(mut self, constraints: FeatureOverride) -> Self {
        self.overrides.push(constraints);
        self
    }

    pub fn protects(mut self, protection: Protection) -> Self {
        self.protections.push(protection);
        self
    }

    pub fn shared_access(mut self, ancestor: NodeType) -> Self {
        self.access = Some(AncestorAccess {
            node_type: ancestor,
            exclusive: false,
        });
        self
    }

    pub fn exclusive_access(mut self, ancestor: NodeType) -> Self {
        self.access = Some(AncestorAccess {
            node_type: ancestor,
            exclusive: true,
        });
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Ask the engine to never run two invocations of this unit at once.
    pub fn synchronized(mut self) -> Self {
        self.synchronized = true;
        self
    }
}

/// Constraints resolved for one feature combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureConstraints {
    pub features: FeatureSet,
    pub needs: StateSet,
    pub forbids: StateSet,
}

/// Immutable, validated metadata for one processing unit.
#[derive(Debug)]
pub struct UnitDescriptor {
    name: String,
    description: String,
    node_type: NodeType,
    body: UnitBody,
    declared: Declarations,
    feature_constraints: Vec<FeatureConstraints>,
    produces: ProductionSet,
    supports: FeatureSet,
    protections: Vec<Protection>,
    access: Option<AncestorAccess>,
    filters: Vec<Filter>,
    synchronized: bool,
    had_overrides: bool,
}

impl UnitDescriptor {
    /// Derive a descriptor from a definition, or report every rule it breaks.
    ///
    /// Helper composition is resolved first, then the unit's own
    /// declarations, then feature overrides (which are keyed off the merged
    /// default sets).
    pub fn extract(definition: UnitDefinition) -> Result<Self, DescriptorError> {
        let UnitDefinition {
            name,
            description,
            node_type,
            body,
            declared,
            produces,
            supports,
            uses,
            overrides,
            protections,
            access,
            filters,
            synchronized,
        } = definition;

        let mut merged = Declarations::default();
        let mut seen = HashSet::new();
        for helper in &uses {
            resolve_helper(helper, &mut merged, &mut seen);
        }
        merged.merge(&declared);

        let had_overrides = !overrides.is_empty();
        let mut feature_constraints: Vec<FeatureConstraints> = Vec::new();
        for over in overrides {
            match feature_constraints
                .iter_mut()
                .find(|existing| existing.features == over.features)
            {
                Some(existing) => {
                    existing.needs.extend_from(&over.needs);
                    existing.forbids.extend_from(&over.forbids);
                }
                None => feature_constraints.push(FeatureConstraints {
                    needs: merged.needs.union(&over.needs),
                    forbids: merged.forbids.union(&over.forbids),
                    features: over.features,
                }),
            }
        }

        let descriptor = Self {
            name,
            description,
            node_type,
            body,
            declared: merged,
            feature_constraints,
            produces,
            supports,
            protections,
            access,
            filters,
            synchronized,
            had_overrides,
        };

        let violations = validate_descriptor(&descriptor);
        if !violations.is_empty() {
            return Err(DescriptorError::Conformance {
                unit: descriptor.name,
                violations,
            });
        }
        Ok(descriptor)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Node type this unit consumes.
    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn body(&self) -> &UnitBody {
        &self.body
    }

    pub fn is_adapter(&self) -> bool {
        matches!(self.body, UnitBody::Adapter { .. })
    }

    /// Node type produced by an adapter; `None` for runners and visitors.
    pub fn produced_type(&self) -> Option<NodeType> {
        match &self.body {
            UnitBody::Adapter { produces, .. } => Some(*produces),
            _ => None,
        }
    }

    pub fn declarations(&self) -> &Declarations {
        &self.declared
    }

    pub fn feature_constraints(&self) -> &[FeatureConstraints] {
        &self.feature_constraints
    }

    pub(crate) fn declared_overrides(&self) -> bool {
        self.had_overrides
    }

    /// Items that must hold before this unit runs with `features` enabled.
    pub fn needs_for(&self, features: &FeatureSet) -> StateSet {
        let mut needs = self.declared.needs.clone();
        for applicable in self.applicable(features) {
            needs.extend_from(&applicable.needs);
        }
        needs
    }

    /// Items that must be absent before this unit runs with `features` enabled.
    pub fn forbids_for(&self, features: &FeatureSet) -> StateSet {
        let mut forbids = self.declared.forbids.clone();
        for applicable in self.applicable(features) {
            forbids.extend_from(&applicable.forbids);
        }
        forbids
    }

    fn applicable<'a>(
        &'a self,
        features: &'a FeatureSet,
    ) -> impl Iterator<Item = &'a FeatureConstraints> + 'a {
        self.feature_constraints
            .iter()
            .filter(move |entry| entry.features.is_subset(features))
    }

    pub fn adds(&self) -> &StateSet {
        &self.declared.adds
    }

    pub fn removes(&self) -> &StateSet {
        &self.declared.removes
    }

    pub fn modifies(&self) -> &StateSet {
        &self.declared.modifies
    }

    /// Every item this unit's effects touch.
    pub fn touched(&self) -> StateSet {
        self.declared
            .adds
            .union(&self.declared.removes)
            .union(&self.declared.modifies)
    }

    pub fn produces(&self) -> &ProductionSet {
        &self.produces
    }

    pub fn supports(&self) -> &FeatureSet {
        &self.supports
    }

    pub fn protections(&self) -> &[Protection] {
        &self.protections
    }

    pub fn access(&self) -> Option<AncestorAccess> {
        self.access
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// True if every filter accepts `node`.
    pub fn accepts(&self, node: &dyn DataNode) -> bool {
        self.filters.iter().all(|filter| filter.accepts(node))
    }

    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }
}

/// Depth-first flattening of helper composition; each helper applies once.
fn resolve_helper(helper: &HelperDefinition, into: &mut Declarations, seen: &mut HashSet<String>) {
    if !seen.insert(helper.name.clone()) {
        return;
    }
    for nested in &helper.uses {
        resolve_helper(nested, into, seen);
    }
    into.merge(&helper.declared);
}
