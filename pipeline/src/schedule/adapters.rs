//! Node-type transitions: finding adapter chains and nesting a flat
//! sequence of runners into a plan tree.

use std::sync::Arc;

use crate::core::descriptor::UnitDescriptor;
use crate::core::plan::Plan;
use crate::core::state::NodeType;
use crate::error::PlanError;

/// Adapter edges available to a request, searched to a bounded depth.
#[derive(Debug, Clone, Copy)]
pub struct AdapterGraph<'r> {
    adapters: &'r [Arc<UnitDescriptor>],
    max_depth: usize,
}

impl<'r> AdapterGraph<'r> {
    pub fn new(adapters: &'r [Arc<UnitDescriptor>], max_depth: usize) -> Self {
        Self {
            adapters,
            max_depth,
        }
    }

    /// Shortest adapter chain from `from` to `to`, or `None` when none exists
    /// within the depth bound. An empty chain means the types are equal.
    pub fn path(&self, from: NodeType, to: NodeType) -> Option<Vec<Arc<UnitDescriptor>>> {
        let mut chain = Vec::new();
        let mut visited = vec![from];
        (0..=self.max_depth)
            .find(|&limit| self.descend(from, to, limit, &mut chain, &mut visited))
            .map(|_| chain)
    }

    fn descend(
        &self,
        at: NodeType,
        to: NodeType,
        limit: usize,
        chain: &mut Vec<Arc<UnitDescriptor>>,
        visited: &mut Vec<NodeType>,
    ) -> bool {
        if at == to {
            return true;
        }
        if limit == 0 {
            return false;
        }
        for adapter in self.adapters {
            let Some(next) = adapter.produced_type() else {
                continue;
            };
            if adapter.node_type() != at || visited.contains(&next) {
                continue;
            }
            chain.push(Arc::clone(adapter));
            visited.push(next);
            if self.descend(next, to, limit - 1, chain, visited) {
                return true;
            }
            visited.pop();
            chain.pop();
        }
        false
    }

    /// True if a runner of this type (and ancestor access) can be nested under `root`.
    pub fn reachable(&self, root: NodeType, unit: &UnitDescriptor) -> bool {
        match unit.access() {
            Some(access) => {
                self.path(root, access.node_type).is_some()
                    && self.path(access.node_type, unit.node_type()).is_some()
            }
            None => self.path(root, unit.node_type()).is_some(),
        }
    }
}

/// An open level of the plan under construction.
struct Frame {
    plan: Plan,
    opened_by: Option<Arc<UnitDescriptor>>,
}

/// Nests a flat runner sequence into a plan tree rooted at one node type.
///
/// A runner whose type is already open returns to that level; otherwise the
/// nearest open level with an adapter chain to its type is extended. Runners
/// with ancestor access stay within that ancestor's scope, and exclusive
/// access gives the runner its own adapter chain below the ancestor.
pub struct Nester<'r> {
    graph: AdapterGraph<'r>,
    stack: Vec<Frame>,
}

impl<'r> Nester<'r> {
    pub fn new(graph: AdapterGraph<'r>, root: NodeType) -> Self {
        Self {
            graph,
            stack: vec![Frame {
                plan: Plan::new(root),
                opened_by: None,
            }],
        }
    }

    pub fn push(&mut self, unit: &Arc<UnitDescriptor>) -> Result<(), PlanError> {
        match unit.access() {
            None => {
                self.enter(unit.node_type(), 0)?;
            }
            Some(access) if access.exclusive => {
                let scope = self.ensure_open(access.node_type)?;
                self.pop_to(scope)?;
                self.enter(unit.node_type(), scope)?;
            }
            Some(access) => {
                let scope = self.ensure_open(access.node_type)?;
                self.enter(unit.node_type(), scope)?;
            }
        }
        self.top_mut()?.plan.push_runner(unit)?;
        if let Some(access) = unit.access().filter(|access| access.exclusive) {
            let scope = self.ensure_open(access.node_type)?;
            self.pop_to(scope)?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<Plan, PlanError> {
        self.pop_to(0)?;
        self.stack
            .pop()
            .map(|frame| frame.plan)
            .ok_or(PlanError::PlanNotFound)
    }

    /// Index of the innermost open level of `node_type`, opening one if needed.
    fn ensure_open(&mut self, node_type: NodeType) -> Result<usize, PlanError> {
        match self.innermost(node_type, 0) {
            Some(idx) => Ok(idx),
            None => self.enter(node_type, 0),
        }
    }

    /// Make a level of `node_type` the innermost open one, never closing
    /// levels at or above `floor`. Returns its stack index.
    fn enter(&mut self, node_type: NodeType, floor: usize) -> Result<usize, PlanError> {
        if let Some(idx) = self.innermost(node_type, floor) {
            self.pop_to(idx)?;
            return Ok(idx);
        }
        for idx in (floor..self.stack.len()).rev() {
            let from = self.stack[idx].plan.node_type();
            if let Some(chain) = self.graph.path(from, node_type) {
                self.pop_to(idx)?;
                for adapter in chain {
                    let Some(produced) = adapter.produced_type() else {
                        return Err(PlanError::PlanNotFound);
                    };
                    self.stack.push(Frame {
                        plan: Plan::new(produced),
                        opened_by: Some(adapter),
                    });
                }
                return Ok(self.stack.len() - 1);
            }
        }
        tracing::debug!(%node_type, floor, "no adapter chain to node type");
        Err(PlanError::PlanNotFound)
    }

    fn innermost(&self, node_type: NodeType, floor: usize) -> Option<usize> {
        (floor..self.stack.len())
            .rev()
            .find(|&idx| self.stack[idx].plan.node_type() == node_type)
    }

    /// Close every level above `idx`.
    fn pop_to(&mut self, idx: usize) -> Result<(), PlanError> {
        while self.stack.len() > idx + 1 {
            let Some(Frame {
                plan,
                opened_by: Some(adapter),
            }) = self.stack.pop()
            else {
                return Err(PlanError::PlanNotFound);
            };
            self.top_mut()?.plan.push_nested(&adapter, plan)?;
        }
        Ok(())
    }

    fn top_mut(&mut self) -> Result<&mut Frame, PlanError> {
        self.stack.last_mut().ok_or(PlanError::PlanNotFound)
    }
}
