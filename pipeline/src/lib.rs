//! Constraint-driven pipeline planner and execution engine.
//!
//! Processing units declare which state items they need, forbid, add and
//! remove. A planner orders them into a [`core::plan::Plan`] whose every
//! step is checked against the state threaded through the steps before it,
//! and an engine runs that plan over a tree of data nodes.
//!
//! - **[`core`]**: Pure, deterministic model (descriptors, requests, plans,
//!   verification). No I/O, fully testable in isolation.
//! - **[`io`]**: Configuration and replay files on disk.
//!
//! Orchestration modules ([`schedule`], [`engine`]) build plans from
//! requests and run them, single-threaded or on a worker pool.

pub mod core;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod schedule;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod unit;

pub use error::{DescriptorError, Error, PlanError, Result, RunError};
