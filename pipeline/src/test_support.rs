//! Test-only helpers for building catalogues and node trees.

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::state::{NodeType, StateItem};
use crate::unit::{Adapter, DataNode, NodeIter, NodeRef, RunContext, Runner, Visitor};

pub const SESSION: NodeType = NodeType::new("session");
pub const CLASS: NodeType = NodeType::new("class");
pub const METHOD: NodeType = NodeType::new("method");

pub const X: StateItem = StateItem::tag("x");
pub const Y: StateItem = StateItem::tag("y");
pub const Z: StateItem = StateItem::tag("z");

/// Scratch directory for config and replay files, removed on drop.
pub fn temp_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("pipeline-")
        .tempdir()
        .expect("create temp dir")
}

/// Node with a fixed label and child list.
#[derive(Debug)]
pub struct TestNode {
    node_type: NodeType,
    label: String,
    children: Vec<NodeRef>,
}

impl TestNode {
    /// Create a childless node.
    pub fn new(node_type: NodeType, label: &str) -> NodeRef {
        Self::with_children(node_type, label, Vec::new())
    }

    pub fn with_children(node_type: NodeType, label: &str, children: Vec<NodeRef>) -> NodeRef {
        Arc::new(Self {
            node_type,
            label: label.to_string(),
            children,
        })
    }
}

impl DataNode for TestNode {
    fn node_type(&self) -> NodeType {
        self.node_type
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn children(&self) -> Vec<NodeRef> {
        self.children.clone()
    }
}

/// Builders for session/class/method trees.
pub struct TestTree;

impl TestTree {
    /// Class `label` with methods `label.m0`, `label.m1`, ...
    pub fn class(label: &str, methods: usize) -> NodeRef {
        let methods = (0..methods)
            .map(|i| TestNode::new(METHOD, &format!("{label}.m{i}")))
            .collect();
        TestNode::with_children(CLASS, label, methods)
    }

    pub fn session(label: &str, classes: Vec<NodeRef>) -> NodeRef {
        TestNode::with_children(SESSION, label, classes)
    }

    /// Session `s` with `classes` classes of `methods` methods each.
    pub fn uniform(classes: usize, methods: usize) -> NodeRef {
        let classes = (0..classes)
            .map(|i| Self::class(&format!("c{i}"), methods))
            .collect();
        Self::session("s", classes)
    }
}

/// Runner that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRunner;

impl Runner for NoopRunner {
    fn run(&self, _ctx: &RunContext<'_>, _node: &NodeRef) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Adapter that produces no nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAdapter;

impl Adapter for NoopAdapter {
    fn adapt<'a>(
        &'a self,
        _ctx: &RunContext<'_>,
        _node: &'a NodeRef,
    ) -> anyhow::Result<NodeIter<'a>> {
        Ok(Box::new(std::iter::empty()))
    }
}

/// Adapter that produces the node's children.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChildrenAdapter;

impl Adapter for ChildrenAdapter {
    fn adapt<'a>(
        &'a self,
        _ctx: &RunContext<'_>,
        node: &'a NodeRef,
    ) -> anyhow::Result<NodeIter<'a>> {
        Ok(Box::new(node.children().into_iter()))
    }
}

/// Runner or visitor backed by a closure.
pub struct FnRunner<F> {
    call: F,
}

impl<F> FnRunner<F>
where
    F: Fn(&RunContext<'_>, &NodeRef) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(call: F) -> Self {
        Self { call }
    }
}

impl<F> Runner for FnRunner<F>
where
    F: Fn(&RunContext<'_>, &NodeRef) -> anyhow::Result<()> + Send + Sync,
{
    fn run(&self, ctx: &RunContext<'_>, node: &NodeRef) -> anyhow::Result<()> {
        (self.call)(ctx, node)
    }
}

impl<F> Visitor for FnRunner<F>
where
    F: Fn(&RunContext<'_>, &NodeRef) -> anyhow::Result<()> + Send + Sync,
{
    fn visit(&self, ctx: &RunContext<'_>, node: &NodeRef) -> anyhow::Result<()> {
        (self.call)(ctx, node)
    }
}

/// Shared log of `unit:node` entries written by recording runners.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runner appending `unit:label` for every node it sees.
    pub fn runner(&self) -> impl Runner + Visitor + 'static {
        let entries = Arc::clone(&self.entries);
        FnRunner::new(move |ctx: &RunContext<'_>, node: &NodeRef| {
            entries
                .lock()
                .push(format!("{}:{}", ctx.unit_name(), node.label()));
            Ok(())
        })
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Entries for one node, in the order they were recorded.
    pub fn for_node(&self, label: &str) -> Vec<String> {
        let suffix = format!(":{label}");
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.ends_with(&suffix))
            .cloned()
            .collect()
    }
}
