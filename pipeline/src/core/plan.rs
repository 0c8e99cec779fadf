//! Nested plans and the builder used to assemble them by hand.

use std::fmt;
use std::sync::Arc;

use crate::core::descriptor::UnitDescriptor;
use crate::core::request::ScheduleRequest;
use crate::core::state::NodeType;
use crate::error::PlanError;

/// Ordered steps over one node type; adapter steps own a nested plan.
#[derive(Clone, PartialEq, Eq)]
pub struct Plan {
    node_type: NodeType,
    steps: Vec<PlanStep>,
}

#[derive(Clone)]
pub enum PlanStep {
    Runner(Arc<UnitDescriptor>),
    Adapter {
        adapter: Arc<UnitDescriptor>,
        plan: Plan,
    },
}

impl PlanStep {
    pub fn unit(&self) -> &Arc<UnitDescriptor> {
        match self {
            PlanStep::Runner(unit) => unit,
            PlanStep::Adapter { adapter, .. } => adapter,
        }
    }

    pub fn name(&self) -> &str {
        self.unit().name()
    }
}

// Descriptors are unique by name within a catalogue.
impl PartialEq for PlanStep {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PlanStep::Runner(left), PlanStep::Runner(right)) => left.name() == right.name(),
            (
                PlanStep::Adapter {
                    adapter: left,
                    plan: left_plan,
                },
                PlanStep::Adapter {
                    adapter: right,
                    plan: right_plan,
                },
            ) => left.name() == right.name() && left_plan == right_plan,
            _ => false,
        }
    }
}

impl Eq for PlanStep {}

impl fmt::Debug for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanStep::Runner(unit) => f.write_str(unit.name()),
            PlanStep::Adapter { adapter, plan } => {
                write!(f, "{} ", adapter.name())?;
                fmt::Debug::fmt(plan, f)
            }
        }
    }
}

impl fmt::Debug for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.node_type)?;
        f.debug_list().entries(&self.steps).finish()
    }
}

impl Plan {
    pub fn new(node_type: NodeType) -> Self {
        Self {
            node_type,
            steps: Vec::new(),
        }
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Append a runner or visitor running on this plan's node type.
    pub fn push_runner(&mut self, unit: &Arc<UnitDescriptor>) -> Result<(), PlanError> {
        if unit.is_adapter() {
            return Err(PlanError::UnexpectedKind {
                unit: unit.name().to_string(),
                expected: "runner",
                found: unit.body().kind_name(),
            });
        }
        self.check_type(unit)?;
        self.steps.push(PlanStep::Runner(Arc::clone(unit)));
        Ok(())
    }

    /// Append an adapter step and return its empty nested plan.
    pub fn push_adapter(&mut self, unit: &Arc<UnitDescriptor>) -> Result<&mut Plan, PlanError> {
        let Some(produced) = unit.produced_type() else {
            return Err(PlanError::UnexpectedKind {
                unit: unit.name().to_string(),
                expected: "adapter",
                found: unit.body().kind_name(),
            });
        };
        self.check_type(unit)?;
        self.steps.push(PlanStep::Adapter {
            adapter: Arc::clone(unit),
            plan: Plan::new(produced),
        });
        match self.steps.last_mut() {
            Some(PlanStep::Adapter { plan, .. }) => Ok(plan),
            _ => unreachable!("adapter step was just pushed"),
        }
    }

    /// Append an adapter step whose nested plan was assembled separately.
    pub(crate) fn push_nested(
        &mut self,
        adapter: &Arc<UnitDescriptor>,
        nested: Plan,
    ) -> Result<(), PlanError> {
        let sub = self.push_adapter(adapter)?;
        if sub.node_type != nested.node_type {
            return Err(PlanError::NodeTypeMismatch {
                unit: adapter.name().to_string(),
                expected: sub.node_type,
                found: nested.node_type,
            });
        }
        *sub = nested;
        Ok(())
    }

    fn check_type(&self, unit: &UnitDescriptor) -> Result<(), PlanError> {
        if unit.node_type() != self.node_type {
            return Err(PlanError::NodeTypeMismatch {
                unit: unit.name().to_string(),
                expected: self.node_type,
                found: unit.node_type(),
            });
        }
        Ok(())
    }

    /// Every step in execution order, nested plans walked pre-order.
    pub fn walk(&self) -> Vec<&PlanStep> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a PlanStep>) {
        for step in &self.steps {
            out.push(step);
            if let PlanStep::Adapter { plan, .. } = step {
                plan.collect(out);
            }
        }
    }

    /// Runner and visitor steps in execution order.
    pub fn runners(&self) -> Vec<&Arc<UnitDescriptor>> {
        self.walk()
            .into_iter()
            .filter_map(|step| match step {
                PlanStep::Runner(unit) => Some(unit),
                PlanStep::Adapter { .. } => None,
            })
            .collect()
    }

    /// Total number of steps, nested ones included.
    pub fn step_count(&self) -> usize {
        self.walk().len()
    }
}

/// Hand-assembles a plan rooted at one node type.
#[derive(Debug)]
pub struct PlanBuilder {
    plan: Plan,
}

impl PlanBuilder {
    pub fn new(root: NodeType) -> Self {
        Self {
            plan: Plan::new(root),
        }
    }

    /// Append a runner to the root level.
    pub fn append(&mut self, unit: &Arc<UnitDescriptor>) -> Result<&mut Self, PlanError> {
        self.plan.push_runner(unit)?;
        Ok(self)
    }

    /// Append an adapter to the root level; further appends on the returned
    /// builder go into its nested plan.
    pub fn append_sub_plan(
        &mut self,
        adapter: &Arc<UnitDescriptor>,
    ) -> Result<SubPlanBuilder<'_>, PlanError> {
        let plan = self.plan.push_adapter(adapter)?;
        Ok(SubPlanBuilder { plan })
    }

    /// Builder scoped to the root level.
    pub fn root(&mut self) -> SubPlanBuilder<'_> {
        SubPlanBuilder {
            plan: &mut self.plan,
        }
    }

    /// Finalize and verify the plan against `request`.
    pub fn get_plan(self, request: &ScheduleRequest) -> Result<Plan, PlanError> {
        self.plan.verify(request)?;
        Ok(self.plan)
    }

    /// Finalize without verification.
    pub fn into_unverified(self) -> Plan {
        self.plan
    }
}

/// Builder scoped to one nested level of a plan.
#[derive(Debug)]
pub struct SubPlanBuilder<'a> {
    plan: &'a mut Plan,
}

impl SubPlanBuilder<'_> {
    pub fn node_type(&self) -> NodeType {
        self.plan.node_type()
    }

    pub fn append(&mut self, unit: &Arc<UnitDescriptor>) -> Result<&mut Self, PlanError> {
        self.plan.push_runner(unit)?;
        Ok(self)
    }

    pub fn append_sub_plan(
        &mut self,
        adapter: &Arc<UnitDescriptor>,
    ) -> Result<SubPlanBuilder<'_>, PlanError> {
        let plan = self.plan.push_adapter(adapter)?;
        Ok(SubPlanBuilder { plan })
    }
}
