//! Conversation-related types.
//!
//! A run owns one [`Context`], an append-only list of [`Turn`]s. Turns
//! remember who produced them, and agent turns also keep the provider's
//! opaque message so the conversation can be replayed to any completion
//! service bound to the next agent.

use std::fmt::{self, Display, Formatter};

use patchwork_model::{OpaqueMessage, ToolCallRequest};
use serde::{Deserialize, Serialize};

use crate::engine::ContextForwarding;
use crate::tool::{Error as ToolError, truncate_payload};

/// Who a turn belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The caller, including corrective instructions issued by the engine.
    User,
    /// An agent speaking, requesting tools or transferring control.
    Agent,
    /// The result of a tool call.
    Tool,
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Agent => f.write_str("agent"),
            Role::Tool => f.write_str("tool"),
        }
    }
}

/// Whether a tool call succeeded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    /// The tool returned a payload.
    Ok,
    /// The tool failed, timed out or got invalid arguments.
    Error,
}

/// The outcome of one tool call, as the requesting agent will see it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Id of the call this output answers.
    pub call_id: String,
    /// Name of the tool that was called.
    pub tool: String,
    /// Whether the call succeeded.
    pub status: ToolStatus,
    /// Text handed back to the agent, at most
    /// [`MAX_PAYLOAD_CHARS`](crate::tool::MAX_PAYLOAD_CHARS) characters.
    pub payload: String,
}

impl ToolOutput {
    pub(crate) fn succeeded(req: &ToolCallRequest, payload: &str) -> Self {
        Self {
            call_id: req.id.clone(),
            tool: req.name.clone(),
            status: ToolStatus::Ok,
            payload: truncate_payload(payload).to_owned(),
        }
    }

    pub(crate) fn failed(req: &ToolCallRequest, err: &ToolError) -> Self {
        let payload = format!("Error {}: {}", req.name, err);
        Self {
            call_id: req.id.clone(),
            tool: req.name.clone(),
            status: ToolStatus::Error,
            payload: truncate_payload(&payload).to_owned(),
        }
    }

    /// Returns `true` if the call failed.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.status == ToolStatus::Error
    }
}

/// A transfer of control recorded in the context.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandoffRecord {
    /// Id of the `transfer_to_*` call, absent for mandated follow-ups.
    pub call_id: Option<String>,
    /// The agent that receives control.
    pub target: String,
    /// Text the agent emitted together with the transfer.
    pub text: Option<String>,
    /// Calls requested alongside the transfer and never executed. Each one
    /// is answered with an error when the context is replayed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropped: Vec<ToolCallRequest>,
}

/// What a turn says.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TurnContent {
    /// Plain text.
    Text(String),
    /// A batch of tool calls requested by an agent.
    ToolCalls(Vec<ToolCallRequest>),
    /// The result of one tool call.
    ToolOutput(ToolOutput),
    /// A handoff to another agent.
    Handoff(HandoffRecord),
}

/// One entry of the [`Context`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Turn {
    role: Role,
    produced_by: Option<String>,
    content: TurnContent,
    pub(crate) msg: Option<OpaqueMessage>,
}

impl Turn {
    /// Creates a user turn.
    #[inline]
    pub fn user<S: Into<String>>(text: S) -> Self {
        Self {
            role: Role::User,
            produced_by: None,
            content: TurnContent::Text(text.into()),
            msg: None,
        }
    }

    pub(crate) fn agent(
        agent: &str,
        content: TurnContent,
        msg: Option<OpaqueMessage>,
    ) -> Self {
        Self {
            role: Role::Agent,
            produced_by: Some(agent.to_owned()),
            content,
            msg,
        }
    }

    pub(crate) fn tool(output: ToolOutput) -> Self {
        Self {
            role: Role::Tool,
            produced_by: Some(output.tool.clone()),
            content: TurnContent::ToolOutput(output),
            msg: None,
        }
    }

    /// Returns who this turn belongs to.
    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the agent name or tool id that produced this turn, `None`
    /// for user turns.
    #[inline]
    pub fn produced_by(&self) -> Option<&str> {
        self.produced_by.as_deref()
    }

    /// Returns what this turn says.
    #[inline]
    pub fn content(&self) -> &TurnContent {
        &self.content
    }

    /// Returns the text carried by this turn, if any.
    ///
    /// Handoff turns yield the text emitted alongside the transfer.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            TurnContent::Text(text) => Some(text),
            TurnContent::Handoff(handoff) => handoff.text.as_deref(),
            TurnContent::ToolCalls(_) | TurnContent::ToolOutput(_) => None,
        }
    }

    /// Returns the tool output carried by this turn, if any.
    #[inline]
    pub fn tool_output(&self) -> Option<&ToolOutput> {
        match &self.content {
            TurnContent::ToolOutput(output) => Some(output),
            _ => None,
        }
    }

    /// Returns the transcript of this turn.
    ///
    /// The transcript is a single human-readable line prefixed with the
    /// producer, meant for logs and exports. It is not enough to rebuild
    /// the turn.
    pub fn transcript(&self) -> String {
        let speaker = self.produced_by.as_deref().unwrap_or("user");
        match &self.content {
            TurnContent::Text(text) => format!("[{speaker}] {text}"),
            TurnContent::ToolCalls(calls) => {
                let names: Vec<_> =
                    calls.iter().map(|call| call.name.as_str()).collect();
                format!("[{speaker}] calls {}", names.join(", "))
            }
            TurnContent::ToolOutput(output) => {
                format!("[{speaker}] {:?}: {}", output.status, output.payload)
            }
            TurnContent::Handoff(handoff) => {
                format!("[{speaker}] transfers to {}", handoff.target)
            }
        }
    }
}

/// The ordered turns of one run.
///
/// The first turn is always the caller's input. Turns are only ever
/// appended.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Context {
    turns: Vec<Turn>,
}

impl Context {
    pub(crate) fn seeded<S: Into<String>>(input: S) -> Self {
        Self {
            turns: vec![Turn::user(input)],
        }
    }

    #[inline]
    pub(crate) fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Returns all turns in order.
    #[inline]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Returns the number of turns.
    #[inline]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Returns `true` if there are no turns, which never happens for the
    /// context of a run.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Iterates over every tool output recorded so far.
    pub fn tool_outputs(&self) -> impl Iterator<Item = &ToolOutput> {
        self.turns.iter().filter_map(Turn::tool_output)
    }

    /// Returns the turns forwarded to the next completion request.
    ///
    /// With a window, the seed turn is kept and the window never starts on
    /// tool results whose calls fell outside of it.
    pub(crate) fn forwarded(&self, forwarding: ContextForwarding) -> Vec<&Turn> {
        let ContextForwarding::Window(size) = forwarding else {
            return self.turns.iter().collect();
        };
        let Some((seed, rest)) = self.turns.split_first() else {
            return vec![];
        };

        let mut start = rest.len().saturating_sub(size);
        while start < rest.len() && rest[start].role == Role::Tool {
            start += 1;
        }
        std::iter::once(seed).chain(&rest[start..]).collect()
    }
}
