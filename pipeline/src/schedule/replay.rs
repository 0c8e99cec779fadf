//! Planner that rebuilds a previously recorded plan.
//!
//! The replay format is line oriented: one unit name per line, `{` on its own
//! line opens the sub-plan of the adapter named just before it and `}` closes
//! it. Lines are trimmed and blank lines ignored.

use std::fmt::Write as _;

use tracing::instrument;

use crate::core::plan::{Plan, PlanBuilder, SubPlanBuilder};
use crate::core::request::ScheduleRequest;
use crate::core::state::NodeType;
use crate::error::PlanError;
use crate::schedule::Planner;

/// One recorded step; `children` is set for adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayEntry {
    pub name: String,
    pub line: usize,
    pub children: Option<Vec<ReplayEntry>>,
}

/// Parse replay text into a tree of entries.
pub fn parse_outline(text: &str) -> Result<Vec<ReplayEntry>, PlanError> {
    // Each open level keeps its entries plus the line of its opening brace.
    let mut stack: Vec<(Vec<ReplayEntry>, usize)> = vec![(Vec::new(), 0)];
    let mut last_line = 0;

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        last_line = line;
        let token = raw.trim();
        match token {
            "" => {}
            "{" => {
                let Some((level, _)) = stack.last() else {
                    return Err(replay_error(line, "unbalanced braces"));
                };
                match level.last() {
                    None => return Err(replay_error(line, "'{' must follow a unit name")),
                    Some(entry) if entry.children.is_some() => {
                        return Err(replay_error(
                            line,
                            format!("'{}' already has a sub-plan", entry.name),
                        ));
                    }
                    Some(_) => stack.push((Vec::new(), line)),
                }
            }
            "}" => {
                if stack.len() < 2 {
                    return Err(replay_error(line, "'}' without matching '{'"));
                }
                let Some((children, _)) = stack.pop() else {
                    return Err(replay_error(line, "unbalanced braces"));
                };
                if let Some(owner) = stack.last_mut().and_then(|(level, _)| level.last_mut()) {
                    owner.children = Some(children);
                }
            }
            name => {
                if name.contains(char::is_whitespace) || name.contains(['{', '}']) {
                    return Err(replay_error(
                        line,
                        format!("expected a single unit name, got '{}'", name),
                    ));
                }
                if let Some((level, _)) = stack.last_mut() {
                    level.push(ReplayEntry {
                        name: name.to_string(),
                        line,
                        children: None,
                    });
                }
            }
        }
    }

    if stack.len() > 1 {
        let opened = stack.last().map(|(_, line)| *line).unwrap_or(last_line);
        return Err(replay_error(
            last_line,
            format!("sub-plan opened on line {} is never closed", opened),
        ));
    }
    Ok(stack.pop().map(|(entries, _)| entries).unwrap_or_default())
}

/// Render parsed entries as an indented outline.
pub fn render_outline(entries: &[ReplayEntry]) -> String {
    let mut out = String::new();
    render_level(entries, 0, &mut out);
    out
}

fn render_level(entries: &[ReplayEntry], depth: usize, out: &mut String) {
    for entry in entries {
        let _ = writeln!(out, "{}{}", "  ".repeat(depth), entry.name);
        if let Some(children) = &entry.children {
            render_level(children, depth + 1, out);
        }
    }
}

fn replay_error(line: usize, message: impl Into<String>) -> PlanError {
    PlanError::Replay {
        line,
        message: message.into(),
    }
}

/// Rebuilds a recorded plan through the builder API and verifies it.
#[derive(Debug, Clone)]
pub struct ReplayPlanner {
    entries: Vec<ReplayEntry>,
}

impl ReplayPlanner {
    pub fn new(entries: Vec<ReplayEntry>) -> Self {
        Self { entries }
    }

    pub fn from_text(text: &str) -> Result<Self, PlanError> {
        Ok(Self::new(parse_outline(text)?))
    }
}

impl Planner for ReplayPlanner {
    #[instrument(skip_all, fields(root = %root, entries = self.entries.len()))]
    fn build_plan(&self, request: &ScheduleRequest, root: NodeType) -> Result<Plan, PlanError> {
        let mut builder = PlanBuilder::new(root);
        build_level(&mut builder.root(), &self.entries, request)?;
        builder.get_plan(request)
    }
}

fn build_level(
    builder: &mut SubPlanBuilder<'_>,
    entries: &[ReplayEntry],
    request: &ScheduleRequest,
) -> Result<(), PlanError> {
    for entry in entries {
        let unit = request
            .catalog()
            .require(&entry.name)
            .map_err(|err| replay_error(entry.line, err.to_string()))?;
        match &entry.children {
            None => {
                builder
                    .append(unit)
                    .map_err(|err| replay_error(entry.line, err.to_string()))?;
            }
            Some(children) => {
                let mut sub = builder
                    .append_sub_plan(unit)
                    .map_err(|err| replay_error(entry.line, err.to_string()))?;
                build_level(&mut sub, children, request)?;
            }
        }
    }
    Ok(())
}
