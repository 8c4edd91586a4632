//! The boundary to completion services.
//!
//! The engine never talks to a model directly. For every step it builds a
//! [`CompletionRequest`] and asks the agent's [`CompletionAdapter`] for
//! exactly one [`CompletionOutcome`]: final text, tool calls or a handoff.
//! [`ModelClient`](crate::ModelClient) is the adapter for anything that
//! implements [`ModelProvider`](patchwork_model::ModelProvider); tests and
//! embedders can plug in their own.

use async_trait::async_trait;
use patchwork_model::{
    ModelMessage, ModelProviderError, ModelTool, OpaqueMessage, TokenUsage,
    ToolCallRequest, ToolCallResult,
};
use serde_json::json;

use crate::agent::AgentDescriptor;
use crate::conversation::{Role, Turn, TurnContent};

/// Prefix of the synthetic tools that stand for handoffs.
pub const HANDOFF_TOOL_PREFIX: &str = "transfer_to_";

/// Returns the name of the tool that transfers control to `agent`.
///
/// ```
/// assert_eq!(
///     patchwork_core::handoff_tool_name("Orchestrator"),
///     "transfer_to_orchestrator"
/// );
/// assert_eq!(
///     patchwork_core::handoff_tool_name("Code Reviewer"),
///     "transfer_to_code_reviewer"
/// );
/// ```
pub fn handoff_tool_name(agent: &str) -> String {
    let mut name = String::from(HANDOFF_TOOL_PREFIX);
    let mut prev: Option<char> = None;
    for ch in agent.chars() {
        if ch.is_alphanumeric() {
            let boundary = ch.is_uppercase()
                && prev.is_some_and(|p| p.is_lowercase() || p.is_numeric());
            if boundary {
                name.push('_');
            }
            name.extend(ch.to_lowercase());
        } else if !name.ends_with('_') {
            name.push('_');
        }
        prev = Some(ch);
    }
    while name.len() > HANDOFF_TOOL_PREFIX.len() && name.ends_with('_') {
        name.pop();
    }
    name
}

/// A handoff advertised to the completion service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandoffTool {
    /// Name of the agent that receives control.
    pub target: String,
    /// The synthetic tool definition.
    pub tool: ModelTool,
}

impl HandoffTool {
    pub(crate) fn new(target: &AgentDescriptor) -> Self {
        let description = match target.handoff_description() {
            Some(desc) => format!(
                "Handoff to the {} agent to handle the request. {desc}",
                target.name()
            ),
            None => format!(
                "Handoff to the {} agent to handle the request.",
                target.name()
            ),
        };
        Self {
            target: target.name().to_owned(),
            tool: ModelTool {
                name: handoff_tool_name(target.name()),
                description,
                parameters: json!({
                    "type": "object",
                    "properties": {},
                    "additionalProperties": false,
                }),
            },
        }
    }
}

/// Everything an adapter needs to produce one completion.
pub struct CompletionRequest<'a> {
    /// The agent being executed.
    pub agent: &'a AgentDescriptor,
    /// The forwarded context, oldest first.
    pub turns: Vec<&'a Turn>,
    /// Definitions of the tools the agent may call.
    pub tools: &'a [ModelTool],
    /// The handoffs the agent may request.
    pub handoffs: &'a [HandoffTool],
}

/// A request to transfer control.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandoffRequest {
    /// Id of the `transfer_to_*` call.
    pub call_id: String,
    /// Requested target. Not validated yet, the engine checks it against
    /// the requester's allowed targets.
    pub target: String,
    /// Text emitted together with the transfer, if any.
    pub text: Option<String>,
    /// Other calls of the same response, never executed.
    pub dropped: Vec<ToolCallRequest>,
}

/// The single outcome of a completion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The agent answered.
    FinalText(String),
    /// The agent wants tools to run.
    ToolCalls(Vec<ToolCallRequest>),
    /// The agent hands control to another agent.
    Handoff(HandoffRequest),
}

/// A completed request.
#[derive(Clone, Debug)]
pub struct Completion {
    /// What the agent decided.
    pub outcome: CompletionOutcome,
    /// Provider message to replay in later requests.
    pub message: Option<OpaqueMessage>,
    /// Tokens spent, when the service reported them.
    pub usage: Option<TokenUsage>,
}

/// Why a completion failed.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    /// The completion service failed, after retries if it was transient.
    #[error("provider error: {0}")]
    Provider(Box<dyn ModelProviderError>),
    /// The service answered with something that can't be decoded.
    #[error("malformed completion: {0}")]
    Malformed(String),
}

/// The boundary between the engine and a completion service.
///
/// Implementations must be stateless from the engine's point of view: the
/// same adapter may serve several agents and concurrent runs. Retries, if
/// any, happen inside the adapter.
#[async_trait]
pub trait CompletionAdapter: Send + Sync {
    /// Produces one completion for the request.
    async fn complete(
        &self,
        req: CompletionRequest<'_>,
    ) -> Result<Completion, CompletionError>;
}

/// Decodes a raw response into an outcome.
///
/// Any call with the handoff prefix is a handoff, known or not. The first
/// one wins and the remaining calls are dropped, but kept in the request so
/// each of them can still be answered.
pub(crate) fn decode_outcome(
    text: String,
    tool_calls: Vec<ToolCallRequest>,
    handoffs: &[HandoffTool],
) -> CompletionOutcome {
    let handoff_idx = tool_calls
        .iter()
        .position(|call| call.name.starts_with(HANDOFF_TOOL_PREFIX));
    let Some(idx) = handoff_idx else {
        if tool_calls.is_empty() {
            return CompletionOutcome::FinalText(text);
        }
        if !text.is_empty() {
            debug!("text alongside tool calls: {text}");
        }
        return CompletionOutcome::ToolCalls(tool_calls);
    };

    let mut dropped = tool_calls;
    let call = dropped.remove(idx);
    if !dropped.is_empty() {
        let names: Vec<_> =
            dropped.iter().map(|call| call.name.as_str()).collect();
        warn!("handoff wins, dropping other calls: {}", names.join(", "));
    }
    let target = handoffs
        .iter()
        .find(|h| h.tool.name == call.name)
        .map(|h| h.target.clone())
        .unwrap_or_else(|| call.name[HANDOFF_TOOL_PREFIX.len()..].to_owned());
    CompletionOutcome::Handoff(HandoffRequest {
        call_id: call.id,
        target,
        text: (!text.is_empty()).then_some(text),
        dropped,
    })
}

/// Converts forwarded turns into provider messages, instructions first.
pub(crate) fn to_model_messages(
    instructions: &str,
    turns: &[&Turn],
) -> Vec<ModelMessage> {
    let mut messages = Vec::with_capacity(turns.len() + 1);
    messages.push(ModelMessage::System(instructions.to_owned()));

    for turn in turns {
        match (turn.role(), turn.content()) {
            (Role::User, content) => {
                let text = turn.text().unwrap_or_default();
                if !matches!(content, TurnContent::Text(_)) {
                    warn!("unexpected user turn content: {content:?}");
                }
                messages.push(ModelMessage::User(text.to_owned()));
            }
            (Role::Tool, TurnContent::ToolOutput(output)) => {
                messages.push(ModelMessage::Tool(ToolCallResult {
                    id: output.call_id.clone(),
                    content: output.payload.clone(),
                }));
            }
            (Role::Tool, content) => {
                warn!("unexpected tool turn content: {content:?}");
            }
            (Role::Agent, TurnContent::Handoff(handoff)) => {
                match (&turn.msg, &handoff.call_id) {
                    (Some(msg), Some(call_id)) => {
                        messages.push(ModelMessage::Opaque(msg.clone()));
                        // Every call needs an answer, the transfer is
                        // acknowledged with the name of the new agent.
                        messages.push(ModelMessage::Tool(ToolCallResult {
                            id: call_id.clone(),
                            content: json!({ "assistant": handoff.target })
                                .to_string(),
                        }));
                        for call in &handoff.dropped {
                            messages.push(ModelMessage::Tool(ToolCallResult {
                                id: call.id.clone(),
                                content: format!(
                                    "Error {}: not executed, control was \
                                     transferred to {}",
                                    call.name, handoff.target
                                ),
                            }));
                        }
                    }
                    _ => {
                        // Mandated follow-ups leave nothing for the model.
                        if let Some(text) = &handoff.text {
                            messages.push(ModelMessage::Assistant(text.clone()));
                        }
                    }
                }
            }
            (Role::Agent, _) => match &turn.msg {
                Some(msg) => messages.push(ModelMessage::Opaque(msg.clone())),
                None => {
                    let text = turn.text().map(str::to_owned);
                    messages.push(ModelMessage::Assistant(
                        text.unwrap_or_else(|| turn.transcript()),
                    ));
                }
            },
        }
    }
    messages
}
