mod builder;

use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::completion::CompletionAdapter;
pub use builder::AgentBuilder;

/// Execution settings of an agent.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct AgentSettings {
    /// Whether several tool calls from one completion run concurrently.
    pub parallel_tool_calls: bool,
    /// Whether token usage of this agent is collected into the run result.
    pub usage_metering: bool,
}

/// An immutable description of one agent.
///
/// Descriptors are built with [`AgentBuilder`] and handed to a
/// [`RegistryBuilder`](crate::RegistryBuilder), which validates how they
/// reference tools and each other. Instructions are opaque to the kernel,
/// they are only ever forwarded to the completion service.
#[derive(Clone)]
pub struct AgentDescriptor {
    pub(crate) name: String,
    pub(crate) instructions: String,
    pub(crate) handoff_description: Option<String>,
    pub(crate) tools: Vec<String>,
    pub(crate) handoffs: Vec<String>,
    pub(crate) follow_up: Option<String>,
    pub(crate) settings: AgentSettings,
    pub(crate) completion: Option<Arc<dyn CompletionAdapter>>,
}

impl AgentDescriptor {
    /// Returns the unique name of the agent.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the instructions sent as the system message.
    #[inline]
    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// Returns the text other agents see about when to transfer here.
    #[inline]
    pub fn handoff_description(&self) -> Option<&str> {
        self.handoff_description.as_deref()
    }

    /// Returns the tools this agent may call, in registration order.
    #[inline]
    pub fn tools(&self) -> &[String] {
        &self.tools
    }

    /// Returns the agents this agent may hand off to.
    #[inline]
    pub fn handoffs(&self) -> &[String] {
        &self.handoffs
    }

    /// Returns the agent that always runs after this one answers.
    #[inline]
    pub fn follow_up(&self) -> Option<&str> {
        self.follow_up.as_deref()
    }

    /// Returns the execution settings.
    #[inline]
    pub fn settings(&self) -> AgentSettings {
        self.settings
    }

    /// Returns `true` if the agent may call `tool`.
    #[inline]
    pub fn allows_tool(&self, tool: &str) -> bool {
        self.tools.iter().any(|t| t == tool)
    }

    /// Returns `true` if the agent may transfer control to `target`.
    #[inline]
    pub fn allows_handoff(&self, target: &str) -> bool {
        self.handoffs.iter().any(|h| h == target)
    }
}

impl Debug for AgentDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentDescriptor")
            .field("name", &self.name)
            .field("tools", &self.tools)
            .field("handoffs", &self.handoffs)
            .field("follow_up", &self.follow_up)
            .field("settings", &self.settings)
            .field("has_completion", &self.completion.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let engineer = AgentBuilder::new("Engineer")
            .with_instructions("Return a unified diff.")
            .with_handoff_description("Writes the patch.")
            .with_handoff("Validator")
            .with_handoff("Orchestrator")
            .with_handoff("Validator")
            .with_follow_up("Validator")
            .with_usage_metering(true)
            .build();

        assert_eq!(engineer.name(), "Engineer");
        assert_eq!(engineer.instructions(), "Return a unified diff.");
        assert_eq!(engineer.handoffs(), ["Validator", "Orchestrator"]);
        assert_eq!(engineer.follow_up(), Some("Validator"));
        assert!(engineer.allows_handoff("Orchestrator"));
        assert!(!engineer.allows_handoff("Analyzer"));
        assert!(engineer.tools().is_empty());
        assert!(!engineer.allows_tool("fetch_url"));
        assert_eq!(
            engineer.settings(),
            AgentSettings {
                parallel_tool_calls: false,
                usage_metering: true,
            }
        );
        assert!(engineer.completion.is_none());
    }
}
