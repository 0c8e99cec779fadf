//! Error types for catalogue building, planning and execution.

use crate::core::state::{NodeType, ProductionSet, StateSet};
use crate::engine::watchdog::WatchdogReport;

/// The result type used for operations that may fail in more than one family.
pub type Result<T> = std::result::Result<T, Error>;

/// Malformed unit declarations, detected while building the catalogue.
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    /// The unit breaks one or more structural rules.
    #[error("unit '{unit}' is malformed: {}", .violations.join("; "))]
    Conformance {
        /// Name of the offending unit.
        unit: String,
        /// Every rule the unit breaks.
        violations: Vec<String>,
    },

    /// Two definitions share a name.
    #[error("unit '{unit}' is already registered")]
    DuplicateName {
        /// The repeated name.
        unit: String,
    },

    /// A request named a unit the catalogue does not know.
    #[error("unknown unit '{name}'")]
    UnknownUnit {
        /// The name that was looked up.
        name: String,
    },

    /// A request added a unit in the wrong role.
    #[error("unit '{unit}' is a {found}, expected {expected}")]
    UnexpectedKind {
        unit: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// Failures while building, replaying, searching for or verifying a plan.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// A unit was appended at a level of a different node type.
    #[error("cannot append '{unit}' which runs on {found} to a plan over {expected}")]
    NodeTypeMismatch {
        unit: String,
        expected: NodeType,
        found: NodeType,
    },

    /// A runner was used where an adapter was required, or the reverse.
    #[error("unit '{unit}' is a {found}, expected {expected}")]
    UnexpectedKind {
        unit: String,
        expected: &'static str,
        found: &'static str,
    },

    /// A step runs while some of its needed items do not hold.
    #[error("step '{step}' needs {missing} which are missing from state {state}")]
    MissingItems {
        /// The failing step.
        step: String,
        /// Needed items absent from the state.
        missing: StateSet,
        /// Accumulated state before the step.
        state: StateSet,
    },

    /// A step runs while some of its forbidden items hold.
    #[error("step '{step}' forbids {conflicting} which are present in state {state}")]
    ForbiddenItems {
        /// The failing step.
        step: String,
        /// Forbidden items present in the state.
        conflicting: StateSet,
        /// Accumulated state before the step.
        state: StateSet,
    },

    /// A step touches items an earlier step protects.
    #[error("step '{step}' touches {items} protected by '{protector}' in state {state}")]
    Protected {
        /// The failing step.
        step: String,
        /// Protected items the step adds, removes or modifies.
        items: StateSet,
        /// The step that declared the protection.
        protector: String,
        /// Accumulated state before the step.
        state: StateSet,
    },

    /// The final state lacks requested items.
    #[error("final state {state} lacks target items {missing}")]
    TargetMissing { missing: StateSet, state: StateSet },

    /// The final state holds excluded items.
    #[error("final state {state} contains excluded items {present}")]
    TargetExcluded { present: StateSet, state: StateSet },

    /// The plan's deliverables differ from the requested deliverables.
    #[error("plan produces {actual} but {expected} was requested")]
    ProductionMismatch {
        expected: ProductionSet,
        actual: ProductionSet,
    },

    /// A replay outline could not be turned into a plan.
    #[error("replay line {line}: {message}")]
    Replay { line: usize, message: String },

    /// No valid ordering exists for the candidates.
    #[error("plan not found")]
    PlanNotFound,
}

/// Failures raised while a plan runs.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// A unit's entry point failed or panicked.
    #[error("unit '{unit}' failed on {node}")]
    Unit {
        /// Name of the failing unit.
        unit: String,
        /// Label of the node it was processing.
        node: String,
        /// The underlying cause.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The root node does not match the plan's node type.
    #[error("plan runs on {expected} but the root node is {found}")]
    RootMismatch { expected: NodeType, found: NodeType },

    /// An engine thread could not be started.
    #[error("failed to spawn engine thread '{name}'")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The engine thread died outside any unit.
    #[error("engine thread panicked: {message}")]
    EnginePanicked { message: String },

    /// The watchdog found every active worker implicated and aborted the run.
    #[error("run aborted by watchdog: {}", .report.headline())]
    Watchdog { report: Box<WatchdogReport> },
}

/// Any failure raised by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Run(#[from] RunError),
}

impl RunError {
    pub(crate) fn unit(unit: &str, node: String, cause: anyhow::Error) -> Self {
        RunError::Unit {
            unit: unit.to_string(),
            node,
            source: cause.into(),
        }
    }
}
