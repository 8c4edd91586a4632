//! A local fake model for testing purpose.

mod preset;

use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use patchwork_model::{
    ErrorKind, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent, OpaqueMessage,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: &'static str,
    kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub struct TestModelResponse {
    preset: PresetResponse,
    step_idx: usize,
    include_usage: bool,
    event_idx: usize,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl TestModelResponse {
    fn next_event(&mut self) -> Option<ModelResponseEvent> {
        let events = &self.preset.events;
        let idx = self.event_idx;
        self.event_idx += 1;

        if idx < events.len() {
            return Some(match &events[idx] {
                PresetEvent::MessageDelta(msg) => {
                    ModelResponseEvent::MessageDelta(msg.clone())
                }
                PresetEvent::ToolCall(req) => {
                    ModelResponseEvent::ToolCall(req.clone())
                }
            });
        }
        if idx == events.len() {
            let has_tool_call = events
                .iter()
                .any(|event| matches!(event, PresetEvent::ToolCall(_)));
            return Some(ModelResponseEvent::Completed(if has_tool_call {
                ModelFinishReason::ToolCalls
            } else {
                ModelFinishReason::Stop
            }));
        }
        if idx == events.len() + 1 && self.include_usage {
            return self.preset.usage.map(ModelResponseEvent::Usage);
        }
        // In case this method is called after completion.
        None
    }
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();

        let delay = this.delay;
        let sleep = this.sleep.get_or_insert_with(|| Box::pin(sleep(delay)));
        ready!(sleep.as_mut().poll(cx));
        this.sleep = None;

        Poll::Ready(Ok(this.next_event()))
    }

    fn make_opaque_message(&self) -> Option<OpaqueMessage> {
        let id = format!("msg:{}", self.step_idx);
        Some(OpaqueMessage::new(id, self.preset.clone()))
    }
}

/// A local fake model for testing purpose.
///
/// Before sending requests, you need to setup the script, which is how the
/// model should respond to each request. A step is selected by counting
/// the model-produced messages already present in the request: the first
/// request of a run gets step 0, the request after one assistant turn gets
/// step 1, and so on, no matter how many user or tool messages sit between
/// them. If there are no enough steps in the script, an error is returned.
///
/// Every received request is recorded and can be inspected with
/// [`TestModelProvider::requests`].
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    script: Vec<PresetResponse>,
    delay: Option<Duration>,
    attempts: Arc<Mutex<Vec<u64>>>,
    requests: Arc<Mutex<Vec<ModelRequest>>>,
}

impl TestModelProvider {
    /// Creates a provider that plays `steps` in order.
    #[inline]
    pub fn with_script(steps: impl IntoIterator<Item = PresetResponse>) -> Self {
        let mut provider = Self::default();
        for step in steps {
            provider.add_assistant_response_step(step);
        }
        provider
    }

    #[inline]
    pub fn add_assistant_response_step(&mut self, preset: PresetResponse) {
        self.script.push(preset);
    }

    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Returns the requests received so far, in order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn take_attempt(&self, step_idx: usize) -> u64 {
        let mut attempts = self.attempts.lock().unwrap();
        if attempts.len() <= step_idx {
            attempts.resize(step_idx + 1, 0);
        }
        let attempt = attempts[step_idx];
        attempts[step_idx] += 1;
        attempt
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn model_name(&self) -> Option<&str> {
        Some("test-model")
    }

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        self.requests.lock().unwrap().push(req.clone());

        let step_idx = req.messages.iter().filter(|m| m.is_from_model()).count();
        let result = 'blk: {
            let Some(preset) = self.script.get(step_idx) else {
                break 'blk Err(Error {
                    message: "no enough steps",
                    kind: ErrorKind::Other,
                });
            };

            let attempt = self.take_attempt(step_idx);
            let failing = match preset.failures {
                Some(0) => true,
                Some(failures) => attempt < failures,
                None => false,
            };
            if failing {
                break 'blk Err(Error {
                    message: "preset failure",
                    kind: ErrorKind::RateLimitExceeded,
                });
            }

            Ok(TestModelResponse {
                preset: preset.clone(),
                step_idx,
                include_usage: req.settings.include_usage,
                event_idx: 0,
                delay: self.delay.unwrap_or(Duration::from_millis(1)),
                sleep: None,
            })
        };
        ready(result)
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use patchwork_model::{
        ModelMessage, ModelSettings, ModelTool, TokenUsage, ToolCallRequest,
        ToolCallResult,
    };
    use serde_json::json;

    use super::*;

    struct Collected {
        text: String,
        tool_call: Option<ToolCallRequest>,
        usage: Option<TokenUsage>,
        opaque_msg: OpaqueMessage,
    }

    async fn collect_response(resp: TestModelResponse) -> Collected {
        let mut resp = pin!(resp);
        let mut text = String::new();
        let mut tool_call = None;
        let mut usage = None;
        while let Some(event) = poll_fn(|cx| resp.as_mut().poll_next_event(cx))
            .await
            .unwrap()
        {
            match event {
                ModelResponseEvent::Completed(_) => {}
                ModelResponseEvent::MessageDelta(delta) => {
                    text.push_str(&delta);
                }
                ModelResponseEvent::ToolCall(req) => tool_call = Some(req),
                ModelResponseEvent::Usage(u) => usage = Some(u),
            }
        }
        Collected {
            text,
            tool_call,
            usage,
            opaque_msg: resp.make_opaque_message().unwrap(),
        }
    }

    fn request(messages: Vec<ModelMessage>) -> ModelRequest {
        ModelRequest {
            messages,
            tools: vec![ModelTool {
                name: "fetch_url".to_owned(),
                description: "Fetches a page".to_owned(),
                parameters: json!({ "type": "object" }),
            }],
            settings: ModelSettings {
                parallel_tool_calls: None,
                include_usage: true,
            },
        }
    }

    #[tokio::test]
    async fn test_steps_follow_model_turns() {
        let provider = TestModelProvider::with_script([
            PresetResponse::tool_call(
                "call_1",
                "fetch_url",
                json!({ "url": "https://example.com" }),
            )
            .with_usage(TokenUsage::new(12, 3)),
            PresetResponse::text("The page explains installation."),
        ]);

        let mut req = request(vec![
            ModelMessage::System("Explain docs.".to_owned()),
            ModelMessage::User("https://example.com".to_owned()),
        ]);
        let resp = provider.send_request(&req).await.unwrap();
        let first = collect_response(resp).await;
        assert_eq!(first.text, "");
        assert_eq!(first.tool_call.unwrap().name, "fetch_url");
        assert_eq!(first.usage, Some(TokenUsage::new(12, 3)));

        // Tool results don't advance the script, only model turns do.
        req.messages.push(ModelMessage::Opaque(first.opaque_msg));
        req.messages.push(ModelMessage::Tool(ToolCallResult {
            id: "call_1".to_owned(),
            content: "Installation".to_owned(),
        }));
        let resp = provider.send_request(&req).await.unwrap();
        let second = collect_response(resp).await;
        assert_eq!(second.text, "The page explains installation.");
        assert!(second.tool_call.is_none());
        assert!(second.usage.is_none());

        assert_eq!(provider.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_preset_failures() {
        let provider = TestModelProvider::with_script([
            PresetResponse::text("ok").with_failures(2),
        ]);
        let req = request(vec![ModelMessage::User("hi".to_owned())]);

        for _ in 0..2 {
            let err = provider.send_request(&req).await.err().unwrap();
            assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        }
        let resp = provider.send_request(&req).await.unwrap();
        assert_eq!(collect_response(resp).await.text, "ok");
    }

    #[tokio::test]
    async fn test_script_exhausted() {
        let provider = TestModelProvider::default();
        let req = request(vec![ModelMessage::User("hi".to_owned())]);
        let err = provider.send_request(&req).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Other);
    }
}
