//! Deterministic, pure logic for the reflexion loop.
//!
//! Core modules are free of I/O side effects. They operate on in-memory data
//! (plans, reviews, budgets, run state) and return deterministic outputs
//! suitable for tests.

pub mod budget;
pub mod decision;
pub mod events;
pub mod fenced;
pub mod invariants;
pub mod plan;
pub mod review;
pub mod schema;
pub mod state;
pub mod types;
