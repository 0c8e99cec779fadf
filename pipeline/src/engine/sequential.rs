//! Depth-first engine running on one dedicated thread.

use std::sync::Arc;
use std::thread;

use tracing::instrument;

use crate::core::plan::Plan;
use crate::engine::{
    Level, ScheduleInstance, check_root, next_child, open_adapter, panic_message, run_unit,
};
use crate::error::RunError;
use crate::io::config::EngineConfig;
use crate::unit::{Lineage, NodeRef};

const THREAD_NAME: &str = "pipeline-main";

/// Processes each node to completion before the next one starts.
///
/// The walk runs on its own thread only to get a configurable stack size;
/// the caller blocks until it finishes.
#[derive(Debug)]
pub struct SequentialEngine {
    root: Arc<Level>,
    stack_size: usize,
}

impl SequentialEngine {
    pub fn new(plan: &Plan, cfg: &EngineConfig) -> Self {
        let (root, _) = Level::compile(plan, false);
        Self {
            root,
            stack_size: cfg.stack_size_bytes,
        }
    }
}

impl ScheduleInstance for SequentialEngine {
    #[instrument(skip_all, fields(engine = "single-threaded", root = %root.label()))]
    fn process(&self, root: NodeRef) -> Result<(), RunError> {
        check_root(&self.root, &root)?;
        tracing::info!("run started");
        let level = Arc::clone(&self.root);
        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .stack_size(self.stack_size)
            .spawn(move || run_level(&level, &root, None))
            .map_err(|source| RunError::Spawn {
                name: THREAD_NAME.to_string(),
                source,
            })?;
        let outcome = match handle.join() {
            Ok(outcome) => outcome,
            Err(payload) => Err(RunError::EnginePanicked {
                message: panic_message(payload.as_ref()),
            }),
        };
        match &outcome {
            Ok(()) => tracing::info!("run finished"),
            Err(err) => tracing::info!(error = %err, "run failed"),
        }
        outcome
    }
}

fn run_level(
    level: &Level,
    node: &NodeRef,
    lineage: Option<&Arc<Lineage>>,
) -> Result<(), RunError> {
    for step in &level.steps {
        let Some(nested) = &step.nested else {
            run_unit(&step.unit, node, lineage)?;
            continue;
        };
        let below = Arc::new(Lineage::new(Arc::clone(node), lineage.cloned()));
        let mut children = open_adapter(&step.unit, node, lineage)?;
        while let Some(child) = next_child(&step.unit, node, &mut children, nested.node_type)? {
            run_level(nested, &child, Some(&below))?;
        }
    }
    Ok(())
}
