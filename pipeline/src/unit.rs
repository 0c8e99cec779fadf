//! Entry points implemented by processing units and the data nodes they run on.
//!
//! The planner only ever sees descriptors; these traits are touched by the
//! execution engines alone.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::core::state::NodeType;

/// Shared handle to a node of the tree being processed.
pub type NodeRef = Arc<dyn DataNode>;

/// Finite, lazily produced sequence of child nodes.
pub type NodeIter<'a> = Box<dyn Iterator<Item = NodeRef> + 'a>;

/// A node of the tree handed to `ScheduleInstance::process`.
///
/// Engines never inspect nodes beyond these methods. Mutation goes through
/// interior mutability owned by the node and is the units' responsibility.
pub trait DataNode: Send + Sync + fmt::Debug + 'static {
    fn node_type(&self) -> NodeType;

    fn as_any(&self) -> &dyn Any;

    /// Human-readable identity used in error messages and watchdog dumps.
    fn label(&self) -> String {
        format!("{:?}", self)
    }

    /// Direct descendants walked by visitor units.
    fn children(&self) -> Vec<NodeRef> {
        Vec::new()
    }
}

/// Downcast a node to its concrete type.
pub fn downcast<T: Any>(node: &NodeRef) -> anyhow::Result<&T> {
    node.as_any().downcast_ref::<T>().ok_or_else(|| {
        anyhow::anyhow!(
            "node {} of type {} is not a {}",
            node.label(),
            node.node_type(),
            std::any::type_name::<T>()
        )
    })
}

/// Unit that processes one node and may mutate the tree in place.
pub trait Runner: Send + Sync {
    fn run(&self, ctx: &RunContext<'_>, node: &NodeRef) -> anyhow::Result<()>;
}

/// Runner-kind unit applied to a node and every descendant, pre-order.
pub trait Visitor: Send + Sync {
    fn visit(&self, ctx: &RunContext<'_>, node: &NodeRef) -> anyhow::Result<()>;
}

/// Unit that expands one node into a sequence of nodes of another type.
pub trait Adapter: Send + Sync {
    fn adapt<'a>(&'a self, ctx: &RunContext<'_>, node: &'a NodeRef)
    -> anyhow::Result<NodeIter<'a>>;
}

/// Chain of nodes above the one being processed, nearest first.
#[derive(Debug)]
pub struct Lineage {
    node: NodeRef,
    parent: Option<Arc<Lineage>>,
}

impl Lineage {
    pub fn new(node: NodeRef, parent: Option<Arc<Lineage>>) -> Self {
        Self { node, parent }
    }

    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeRef> {
        std::iter::successors(Some(self), |link| link.parent.as_deref()).map(|link| &link.node)
    }
}

/// Context handed to every unit invocation.
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    unit: &'a str,
    lineage: Option<&'a Lineage>,
}

impl<'a> RunContext<'a> {
    pub fn new(unit: &'a str, lineage: Option<&'a Lineage>) -> Self {
        Self { unit, lineage }
    }

    /// Name of the unit currently running.
    pub fn unit_name(&self) -> &'a str {
        self.unit
    }

    /// Ancestors of the current node, nearest first.
    pub fn ancestors(&self) -> impl Iterator<Item = &'a NodeRef> + 'a {
        self.lineage.into_iter().flat_map(Lineage::iter)
    }

    /// Nearest ancestor of the given node type.
    pub fn ancestor(&self, node_type: NodeType) -> Option<&'a NodeRef> {
        self.ancestors()
            .find(|node| node.node_type() == node_type)
    }
}

/// Named per-instance predicate deciding whether a unit runs on a node.
#[derive(Clone)]
pub struct Filter {
    name: String,
    predicate: Arc<dyn Fn(&dyn DataNode) -> bool + Send + Sync>,
}

impl Filter {
    pub fn new(
        name: impl Into<String>,
        predicate: impl Fn(&dyn DataNode) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn accepts(&self, node: &dyn DataNode) -> bool {
        (self.predicate)(node)
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Filter").field(&self.name).finish()
    }
}
