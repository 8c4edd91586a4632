//! Tool call supports.
//!
//! Agents never run tools themselves. They ask for them in a completion,
//! and the engine dispatches the requests through the [`Invoker`], which
//! owns every registered tool and turns whatever happens (success, bad
//! arguments, failure, timeout) into a [`ToolOutput`] the agent can read.
//!
//! [`ToolOutput`]: crate::conversation::ToolOutput

mod error;
mod invoker;
mod object;

use serde::de::DeserializeOwned;
use serde_json::Value;

pub use error::{Error, ErrorKind};
pub use invoker::{
    DEFAULT_TOOL_TIMEOUT, Invoker, MAX_PAYLOAD_CHARS, truncate_payload,
};
pub(crate) use object::{AnyTool, ToolObject};

/// The result of executing a tool.
pub type ToolResult = Result<String, Error>;

/// A tool that can be called by an agent.
///
/// Implementations of this trait should be stateless. One tool instance is
/// shared by every agent allowed to call it and by every concurrent run.
///
/// The tool can be context-aware, meaning it can access additional
/// information such as an HTTP client or a base URL. Make the context an
/// immutable part of the tool, set during initialization, and clone what the
/// future needs when executing.
pub trait Tool: Send + Sync + 'static {
    /// The type of input that the tool accepts.
    type Input: DeserializeOwned;

    /// Returns the name of the tool, which is also its id in agent
    /// descriptors.
    fn name(&self) -> &str;

    /// Returns the description of the tool.
    fn description(&self) -> &str;

    /// Returns the parameter schema of the tool.
    fn parameter_schema(&self) -> &Value;

    /// Executes the tool with the given input.
    ///
    /// This method must return a future that is fully independent of `self`,
    /// and the future should be cancellation safe: the invoker drops it when
    /// it times out or when the run is cancelled.
    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static;
}
