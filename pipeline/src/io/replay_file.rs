//! Reading and writing recorded plans.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::core::plan::Plan;
use crate::schedule::replay::{ReplayEntry, parse_outline};

/// Read and parse a replay file.
pub fn load_replay(path: &Path) -> Result<Vec<ReplayEntry>> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let entries = parse_outline(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(entries)
}

/// Atomically record a plan in replay format.
pub fn write_replay(path: &Path, plan: &Plan) -> Result<()> {
    super::write_atomic(path, &plan.to_replay())
}
