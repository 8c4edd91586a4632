use patchwork_model::{TokenUsage, ToolCallRequest};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// The events in a preset response.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresetEvent {
    #[serde(rename = "message_delta")]
    MessageDelta(String),
    #[serde(rename = "tool_call")]
    ToolCall(ToolCallRequest),
}

/// The preset response for an assistant step.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresetResponse {
    /// Events in this response.
    pub events: Vec<PresetEvent>,
    /// If set, the request will fail in the first `failures` attempts.
    /// `Some(0)` means the request will fail infinitely.
    pub failures: Option<u64>,
    /// Usage reported after completion, only when the request asks for it.
    pub usage: Option<TokenUsage>,
}

impl PresetResponse {
    /// Creates a `PresetResponse` with the specified events.
    #[inline]
    pub fn with_events(events: impl Into<Vec<PresetEvent>>) -> Self {
        Self {
            events: events.into(),
            failures: None,
            usage: None,
        }
    }

    /// A response that only says `text`, in a single delta.
    #[inline]
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self::with_events([PresetEvent::MessageDelta(text.into())])
    }

    /// A response that requests one tool call.
    #[inline]
    pub fn tool_call(id: &str, name: &str, arguments: Value) -> Self {
        Self::with_events([PresetEvent::tool_call(id, name, arguments)])
    }

    /// A response that calls the `transfer_to_*` tool named `handoff_tool`.
    #[inline]
    pub fn handoff(id: &str, handoff_tool: &str) -> Self {
        Self::tool_call(id, handoff_tool, json!({}))
    }

    /// Sets failure times before a successful response. `0` means the
    /// response will always be a failure.
    #[inline]
    pub fn with_failures(mut self, failures: u64) -> Self {
        self.failures = Some(failures);
        self
    }

    /// Sets the usage to report.
    #[inline]
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Appends one more event.
    #[inline]
    pub fn then(mut self, event: PresetEvent) -> Self {
        self.events.push(event);
        self
    }
}

impl PresetEvent {
    /// Shorthand for a tool call event.
    #[inline]
    pub fn tool_call(id: &str, name: &str, arguments: Value) -> Self {
        PresetEvent::ToolCall(ToolCallRequest {
            id: id.to_owned(),
            name: name.to_owned(),
            arguments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_deserialize() {
        let response = PresetResponse::text("diff --git a/auth.py b/auth.py\n")
            .then(PresetEvent::tool_call(
                "call_1",
                "transfer_to_validator",
                json!({}),
            ))
            .with_usage(TokenUsage::new(10, 5));

        let serialized = serde_json::to_string(&response).unwrap();
        let deserialized: PresetResponse =
            serde_json::from_str(&serialized).unwrap();

        assert_eq!(response, deserialized);
        assert!(serialized.contains(r#""type":"tool_call""#));
    }
}
