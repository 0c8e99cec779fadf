//! Deterministic, pure planning model.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! descriptors, requests and plans and return deterministic outputs suitable
//! for tests.

pub mod catalog;
pub mod describe;
pub mod descriptor;
pub mod invariants;
pub mod plan;
pub mod request;
pub mod state;
pub mod verify;
