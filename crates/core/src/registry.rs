//! The agent graph.
//!
//! A [`Registry`] holds every agent descriptor and every tool of a process.
//! It is validated once when built and then shared read-only by all runs,
//! usually behind an `Arc`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use patchwork_model::{ModelProvider, ModelTool};

use crate::agent::AgentDescriptor;
use crate::completion::{
    CompletionAdapter, HANDOFF_TOOL_PREFIX, HandoffTool, handoff_tool_name,
};
use crate::model_client::ModelClient;
use crate::tool::{AnyTool, Invoker, Tool, ToolObject};

/// Why a registry can't be built.
///
/// Every reference between agents and tools is checked when the registry
/// is built, so none of these can show up in the middle of a run.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("no agents registered")]
    Empty,
    #[error("agent `{0}` is registered more than once")]
    DuplicateAgent(String),
    #[error("tool `{0}` is registered more than once")]
    DuplicateTool(String),
    #[error("tool name `{0}` is reserved for handoffs")]
    ReservedToolName(String),
    #[error("agent `{agent}` refers to unknown tool `{tool}`")]
    UnknownTool { agent: String, tool: String },
    #[error("agent `{agent}` hands off to unknown agent `{target}`")]
    UnknownHandoffTarget { agent: String, target: String },
    #[error(
        "follow-up `{target}` of agent `{agent}` is not an allowed handoff target"
    )]
    FollowUpNotAllowed { agent: String, target: String },
    #[error("handoff tool `{name}` of agent `{agent}` names more than one target")]
    HandoffNameClash { agent: String, name: String },
    #[error("agent `{0}` has no completion binding")]
    MissingCompletion(String),
    #[error("unknown agent `{0}`")]
    UnknownAgent(String),
}

pub(crate) struct AgentNode {
    pub(crate) descriptor: AgentDescriptor,
    pub(crate) completion: Arc<dyn CompletionAdapter>,
    pub(crate) tools: Vec<ModelTool>,
    pub(crate) handoffs: Vec<HandoffTool>,
}

/// A validated agent graph together with its tools.
pub struct Registry {
    nodes: Vec<AgentNode>,
    index: HashMap<String, usize>,
    invoker: Invoker,
    entry: usize,
    authoritative: Option<usize>,
}

impl Registry {
    /// Returns the descriptor of `name`.
    #[inline]
    pub fn agent(&self, name: &str) -> Option<&AgentDescriptor> {
        self.index.get(name).map(|&idx| &self.nodes[idx].descriptor)
    }

    /// Iterates over all agents in registration order.
    pub fn agents(&self) -> impl Iterator<Item = &AgentDescriptor> {
        self.nodes.iter().map(|node| &node.descriptor)
    }

    /// Returns the agent every run starts with.
    #[inline]
    pub fn entry(&self) -> &AgentDescriptor {
        &self.nodes[self.entry].descriptor
    }

    /// Returns the agent whose text is returned to the caller, if any.
    #[inline]
    pub fn authoritative(&self) -> Option<&AgentDescriptor> {
        self.authoritative.map(|idx| &self.nodes[idx].descriptor)
    }

    /// Returns the invoker that runs this registry's tools.
    #[inline]
    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    /// Maps a requested handoff target back to an agent name. Targets of
    /// unknown `transfer_to_*` tools come as the tool name suffix.
    pub(crate) fn resolve_handoff<'a>(&'a self, target: &'a str) -> Option<&'a str> {
        if self.index.contains_key(target) {
            return Some(target);
        }
        let tool = format!("{HANDOFF_TOOL_PREFIX}{target}");
        self.agents()
            .map(AgentDescriptor::name)
            .find(|name| handoff_tool_name(name) == tool)
    }

    #[inline]
    pub(crate) fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    #[inline]
    pub(crate) fn entry_index(&self) -> usize {
        self.entry
    }

    #[inline]
    pub(crate) fn authoritative_index(&self) -> Option<usize> {
        self.authoritative
    }

    #[inline]
    pub(crate) fn node(&self, idx: usize) -> &AgentNode {
        &self.nodes[idx]
    }
}

/// [`Registry`] builder.
#[derive(Default)]
pub struct RegistryBuilder {
    agents: Vec<AgentDescriptor>,
    tools: Vec<Box<dyn ToolObject>>,
    entry: Option<String>,
    authoritative: Option<String>,
    completion: Option<Arc<dyn CompletionAdapter>>,
}

impl RegistryBuilder {
    /// Creates an empty builder.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an agent. The first agent added is the entry unless
    /// [`with_entry`](Self::with_entry) says otherwise.
    #[inline]
    pub fn with_agent(mut self, agent: AgentDescriptor) -> Self {
        self.agents.push(agent);
        self
    }

    /// Registers a tool.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.tools.push(Box::new(AnyTool(tool)));
        self
    }

    /// Sets the agent every run starts with.
    #[inline]
    pub fn with_entry<S: Into<String>>(mut self, name: S) -> Self {
        self.entry = Some(name.into());
        self
    }

    /// Designates the agent whose first non-empty text becomes the result
    /// of a run, whatever happens after it.
    #[inline]
    pub fn with_authoritative_agent<S: Into<String>>(mut self, name: S) -> Self {
        self.authoritative = Some(name.into());
        self
    }

    /// Sets the completion adapter of agents that don't have their own.
    #[inline]
    pub fn with_completion<C: CompletionAdapter + 'static>(
        mut self,
        completion: C,
    ) -> Self {
        self.completion = Some(Arc::new(completion));
        self
    }

    /// Sets a model provider as the default completion binding.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        self,
        provider: P,
    ) -> Self {
        self.with_completion(ModelClient::new(provider))
    }

    /// Validates the graph and builds the registry.
    pub fn build(self) -> Result<Registry, GraphError> {
        let Self {
            agents,
            tools,
            entry,
            authoritative,
            completion,
        } = self;

        if agents.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut index = HashMap::with_capacity(agents.len());
        for (idx, agent) in agents.iter().enumerate() {
            if index.insert(agent.name.clone(), idx).is_some() {
                return Err(GraphError::DuplicateAgent(agent.name.clone()));
            }
        }

        let mut tool_names = HashSet::with_capacity(tools.len());
        for tool in &tools {
            let name = tool.name();
            if name.starts_with(HANDOFF_TOOL_PREFIX) {
                return Err(GraphError::ReservedToolName(name.to_owned()));
            }
            if !tool_names.insert(name.to_owned()) {
                return Err(GraphError::DuplicateTool(name.to_owned()));
            }
        }
        let invoker = Invoker::with_tools(tools);

        let mut nodes = Vec::with_capacity(agents.len());
        for agent in &agents {
            nodes.push(build_node(agent, &agents, &index, &invoker, &completion)?);
        }

        let lookup = |name: String| {
            index
                .get(&name)
                .copied()
                .ok_or(GraphError::UnknownAgent(name))
        };
        let entry = match entry {
            Some(name) => lookup(name)?,
            None => 0,
        };
        let authoritative = authoritative.map(lookup).transpose()?;

        debug!(
            agents = nodes.len(),
            entry = %nodes[entry].descriptor.name,
            "agent graph validated"
        );
        Ok(Registry {
            nodes,
            index,
            invoker,
            entry,
            authoritative,
        })
    }
}

fn build_node(
    agent: &AgentDescriptor,
    agents: &[AgentDescriptor],
    index: &HashMap<String, usize>,
    invoker: &Invoker,
    default_completion: &Option<Arc<dyn CompletionAdapter>>,
) -> Result<AgentNode, GraphError> {
    let mut tools = Vec::with_capacity(agent.tools.len());
    for tool in &agent.tools {
        let Some(definition) = invoker.definition(tool) else {
            return Err(GraphError::UnknownTool {
                agent: agent.name.clone(),
                tool: tool.clone(),
            });
        };
        tools.push(definition);
    }

    let mut handoffs: Vec<HandoffTool> = Vec::with_capacity(agent.handoffs.len());
    for target in &agent.handoffs {
        let Some(&target_idx) = index.get(target) else {
            return Err(GraphError::UnknownHandoffTarget {
                agent: agent.name.clone(),
                target: target.clone(),
            });
        };
        let name = handoff_tool_name(target);
        if handoffs.iter().any(|h| h.tool.name == name) {
            return Err(GraphError::HandoffNameClash {
                agent: agent.name.clone(),
                name,
            });
        }
        handoffs.push(HandoffTool::new(&agents[target_idx]));
    }

    if let Some(target) = &agent.follow_up {
        if !agent.allows_handoff(target) {
            return Err(GraphError::FollowUpNotAllowed {
                agent: agent.name.clone(),
                target: target.clone(),
            });
        }
    }

    let completion = agent
        .completion
        .clone()
        .or_else(|| default_completion.clone())
        .ok_or_else(|| GraphError::MissingCompletion(agent.name.clone()))?;

    Ok(AgentNode {
        descriptor: agent.clone(),
        completion,
        tools,
        handoffs,
    })
}
