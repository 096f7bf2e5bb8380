//! Side-effecting collaborators: configuration, reasoning backends, child
//! processes, prompt rendering, and the run journal.

pub mod backends;
pub mod config;
pub mod journal;
pub mod process;
pub mod prompt;
pub mod reasoning;
