use std::sync::Arc;

use patchwork_model::ModelProvider;

use super::{AgentDescriptor, AgentSettings};
use crate::completion::CompletionAdapter;
use crate::model_client::ModelClient;

/// [`AgentDescriptor`] builder.
pub struct AgentBuilder {
    descriptor: AgentDescriptor,
}

impl AgentBuilder {
    /// Creates a new builder for an agent called `name`.
    #[inline]
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            descriptor: AgentDescriptor {
                name: name.into(),
                instructions: String::new(),
                handoff_description: None,
                tools: vec![],
                handoffs: vec![],
                follow_up: None,
                settings: AgentSettings::default(),
                completion: None,
            },
        }
    }

    /// Sets the instructions.
    #[inline]
    pub fn with_instructions<S: Into<String>>(mut self, instructions: S) -> Self {
        self.descriptor.instructions = instructions.into();
        self
    }

    /// Sets the description advertised to agents that may transfer here.
    #[inline]
    pub fn with_handoff_description<S: Into<String>>(mut self, desc: S) -> Self {
        self.descriptor.handoff_description = Some(desc.into());
        self
    }

    /// Allows the agent to call the tool named `tool`.
    pub fn with_tool<S: Into<String>>(mut self, tool: S) -> Self {
        let tool = tool.into();
        if !self.descriptor.allows_tool(&tool) {
            self.descriptor.tools.push(tool);
        }
        self
    }

    /// Allows the agent to hand off to `target`.
    pub fn with_handoff<S: Into<String>>(mut self, target: S) -> Self {
        let target = target.into();
        if !self.descriptor.allows_handoff(&target) {
            self.descriptor.handoffs.push(target);
        }
        self
    }

    /// Makes `target` run every time this agent returns final text.
    ///
    /// The target must also be an allowed handoff target, which is checked
    /// when the registry is built.
    #[inline]
    pub fn with_follow_up<S: Into<String>>(mut self, target: S) -> Self {
        self.descriptor.follow_up = Some(target.into());
        self
    }

    /// Lets tool calls from one completion run concurrently.
    #[inline]
    pub fn with_parallel_tool_calls(mut self, enabled: bool) -> Self {
        self.descriptor.settings.parallel_tool_calls = enabled;
        self
    }

    /// Collects the agent's token usage into the run result.
    #[inline]
    pub fn with_usage_metering(mut self, enabled: bool) -> Self {
        self.descriptor.settings.usage_metering = enabled;
        self
    }

    /// Binds the agent to a completion adapter, overriding the registry's
    /// default.
    #[inline]
    pub fn with_completion<C: CompletionAdapter + 'static>(
        mut self,
        completion: C,
    ) -> Self {
        self.descriptor.completion = Some(Arc::new(completion));
        self
    }

    /// Binds the agent to a model provider through a [`ModelClient`].
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        self,
        provider: P,
    ) -> Self {
        self.with_completion(ModelClient::new(provider))
    }

    /// Builds the descriptor.
    #[inline]
    pub fn build(self) -> AgentDescriptor {
        self.descriptor
    }
}
