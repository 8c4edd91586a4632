//! Core logic including the handoff engine, tool invocation, agent graph
//! and output contract.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod agent;
pub mod completion;
pub mod contract;
pub mod conversation;
mod engine;
mod error;
mod model_client;
mod registry;
pub mod tool;
mod usage;

pub use agent::{AgentBuilder, AgentDescriptor, AgentSettings};
pub use completion::{CompletionAdapter, handoff_tool_name};
pub use contract::{ContractPolicy, OutputContract, to_single_line};
pub use engine::{
    ContextForwarding, Engine, RunConfig, RunEvent, RunResult,
};
pub use error::RunError;
pub use model_client::{ModelClient, ModelClientResponse, RetryPolicy};
pub use registry::{GraphError, Registry, RegistryBuilder};
pub use tokio_util::sync::CancellationToken;
pub use usage::UsageSummary;
