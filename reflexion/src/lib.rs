//! Quality-gated multi-agent pipeline.
//!
//! A [`controller::RunController`] turns a goal into one deliverable answer by
//! sequencing four agent stages (plan, research, code, review) and looping
//! back to planning while the critic's score stays below a threshold. Runs are
//! bounded by a retry limit, a step budget, and an optional deadline.
//!
//! - **[`core`]**: deterministic logic (state, budget, decisions, plan and
//!   review parsing, invariants). No I/O.
//! - **[`io`]**: side effects behind narrow seams: configuration, prompts,
//!   reasoning backends, subprocesses, and the run journal.
//! - **[`tools`]**: the tool registry and the shipped tools.
//! - **[`agents`]**: the stage implementations.
//!
//! [`controller`] wires these together; [`request`] and [`result`] are its
//! input and output contracts.

pub mod agents;
pub mod controller;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod request;
pub mod result;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
