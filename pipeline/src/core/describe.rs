//! Text renderings of a plan: a readable outline and the replay format.

use std::fmt::Write as _;

use crate::core::plan::{Plan, PlanStep};

const INDENT: &str = "  ";

impl Plan {
    /// One line per step, indented per nesting level.
    ///
    /// `detailed` appends each runner's item sets and each adapter's
    /// from/to node types.
    pub fn describe(&self, detailed: bool) -> String {
        let mut out = String::new();
        describe_level(self, detailed, 0, &mut out);
        out
    }

    /// Serialize to the line-oriented replay format read back by the replay planner.
    pub fn to_replay(&self) -> String {
        let mut out = String::new();
        replay_level(self, 0, &mut out);
        out
    }
}

fn describe_level(plan: &Plan, detailed: bool, depth: usize, out: &mut String) {
    let pad = INDENT.repeat(depth);
    for step in plan.steps() {
        match step {
            PlanStep::Runner(unit) => {
                let _ = write!(out, "{}{}", pad, unit.name());
                if detailed {
                    let declared = unit.declarations();
                    let _ = write!(
                        out,
                        " needs={} forbids={} adds={} removes={} modifies={}",
                        declared.needs,
                        declared.forbids,
                        declared.adds,
                        declared.removes,
                        declared.modifies
                    );
                }
                out.push('\n');
            }
            PlanStep::Adapter { adapter, plan } => {
                let _ = write!(out, "{}{}", pad, adapter.name());
                if detailed {
                    let _ = write!(out, " {} -> {}", adapter.node_type(), plan.node_type());
                }
                out.push('\n');
                describe_level(plan, detailed, depth + 1, out);
            }
        }
    }
}

fn replay_level(plan: &Plan, depth: usize, out: &mut String) {
    let pad = INDENT.repeat(depth);
    for step in plan.steps() {
        let _ = writeln!(out, "{}{}", pad, step.name());
        if let PlanStep::Adapter { plan, .. } = step {
            let _ = writeln!(out, "{}{{", pad);
            replay_level(plan, depth + 1, out);
            let _ = writeln!(out, "{}}}", pad);
        }
    }
}
