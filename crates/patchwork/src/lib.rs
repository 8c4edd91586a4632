//! An issue solver built on the patchwork kernel.
//!
//! Five agents take a plain-text issue report from analysis to a unified
//! git diff: an Orchestrator routes the work, an Analyzer normalizes the
//! report, an Explorer researches it, an Engineer writes the patch and a
//! Validator reviews it. The crate includes a CLI reading the issue from
//! standard input, and can also be used as a library.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod solver;
pub mod tools;
pub mod workflow;

pub use solver::{IssueSolver, IssueSolverBuilder};

/// Re-exports of [`patchwork_core`] crate.
pub mod core {
    pub use patchwork_core::*;
}
