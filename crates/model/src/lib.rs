//! An abstraction layer for the completion services agents talk to.
//!
//! This crate establishes an unified protocol for the kernel to interact
//! with various supported LLMs, so that an agent can be bound to any of
//! them without modifying the core codebase.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to. Concepts such as
//! handoffs or run budgets belong to the kernel and are deliberately
//! absent here: a handoff is just another tool the model may call.

#![deny(missing_docs)]

mod error;
mod opaque;
mod provider;
mod request;
mod response;
mod usage;

pub use error::*;
pub use opaque::*;
pub use provider::*;
pub use request::*;
pub use response::*;
pub use usage::*;
