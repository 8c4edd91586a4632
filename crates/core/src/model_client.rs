use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use patchwork_model::{
    ModelFinishReason, ModelProvider, ModelProviderError, ModelRequest,
    ModelResponse, ModelResponseEvent, ModelSettings, OpaqueMessage, TokenUsage,
    ToolCallRequest,
};
use tracing::Instrument;

use crate::completion::{
    Completion, CompletionAdapter, CompletionError, CompletionRequest,
    decode_outcome, to_model_messages,
};

type SendRequestResult =
    Result<ModelClientResponse, Box<dyn ModelProviderError>>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
type HandlerFn = Arc<dyn Fn(ModelRequest) -> BoxedSendRequestFuture + Send + Sync>;

/// How transient provider failures are retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts in total, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry. Later delays grow exponentially.
    pub initial_interval: Duration,
    /// Upper bound of a single delay.
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(8),
        }
    }
}

/// A wrapper around a model provider that maintains an execution
/// environment for the provider and provides a type-erased interface
/// for the other modules.
///
/// This is the [`CompletionAdapter`] agents get when they are bound with
/// `with_model_provider`. Rate-limited requests are retried with
/// exponential backoff, any other provider failure is returned as is.
#[derive(Clone)]
pub struct ModelClient {
    handler_fn: HandlerFn,
    model_name: Option<String>,
    retry: RetryPolicy,
}

impl ModelClient {
    /// Creates a client for `provider`.
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        let model_name = provider.model_name().map(str::to_owned);
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        let handler_fn: HandlerFn = Arc::new(move |req| {
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    trace!("got a request: {:?}", req);
                    let resp_or_err = fut.await;
                    handle_response::<P>(resp_or_err).await
                }
                .instrument(trace_span!("model client req")),
            )
        });
        Self {
            handler_fn,
            model_name,
            retry: RetryPolicy::default(),
        }
    }

    /// Replaces the retry policy.
    #[inline]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the model name reported by the provider.
    #[inline]
    pub fn model_name(&self) -> Option<&str> {
        self.model_name.as_deref()
    }

    /// Sends a request and returns the fully received response, retrying
    /// transient failures.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    pub async fn send_request(
        &self,
        req: ModelRequest,
    ) -> Result<ModelClientResponse, Box<dyn ModelProviderError>> {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry.initial_interval)
            .with_max_interval(self.retry.max_interval)
            .with_max_elapsed_time(None)
            .build();
        let attempts = AtomicU32::new(0);

        backoff::future::retry(backoff, || {
            let fut = (self.handler_fn)(req.clone());
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            async move {
                fut.await.map_err(|err| {
                    if err.kind().is_transient()
                        && attempt < self.retry.max_attempts
                    {
                        warn!("transient error on attempt {attempt}: {err}");
                        backoff::Error::transient(err)
                    } else {
                        backoff::Error::permanent(err)
                    }
                })
            }
        })
        .await
    }
}

#[async_trait]
impl CompletionAdapter for ModelClient {
    async fn complete(
        &self,
        req: CompletionRequest<'_>,
    ) -> Result<Completion, CompletionError> {
        let settings = req.agent.settings();
        let mut tools = req.tools.to_vec();
        tools.extend(req.handoffs.iter().map(|h| h.tool.clone()));

        let model_req = ModelRequest {
            messages: to_model_messages(req.agent.instructions(), &req.turns),
            settings: ModelSettings {
                // Providers reject this flag on tool-less requests.
                parallel_tool_calls: (!tools.is_empty())
                    .then_some(settings.parallel_tool_calls),
                include_usage: settings.usage_metering,
            },
            tools,
        };

        let resp = self
            .send_request(model_req)
            .await
            .map_err(CompletionError::Provider)?;
        if resp.finish_reason == Some(ModelFinishReason::ToolCalls)
            && resp.tool_calls.is_empty()
        {
            return Err(CompletionError::Malformed(
                "finished for tool calls without any".to_owned(),
            ));
        }

        Ok(Completion {
            outcome: decode_outcome(resp.transcript, resp.tool_calls, req.handoffs),
            message: resp.opaque_msg,
            usage: resp.usage,
        })
    }
}

/// A completely received response from the model client.
#[derive(Clone, Debug)]
pub struct ModelClientResponse {
    /// Text streamed by the model.
    pub transcript: String,
    /// Provider message to replay in later requests.
    pub opaque_msg: Option<OpaqueMessage>,
    /// Tool calls requested by the model.
    pub tool_calls: Vec<ToolCallRequest>,
    /// The reason the model finished generating.
    pub finish_reason: Option<ModelFinishReason>,
    /// Tokens spent, if the provider reported them.
    pub usage: Option<TokenUsage>,
}

async fn handle_response<P: ModelProvider + 'static>(
    resp_or_err: Result<P::Response, P::Error>,
) -> SendRequestResult {
    let resp = match resp_or_err {
        Ok(resp) => resp,
        Err(err) => {
            error!("got an error: {err:?}");
            return Err(Box::new(err));
        }
    };

    let mut transcript = String::new();
    let opaque_msg;
    let mut tool_calls = Vec::new();
    let mut finish_reason = None;
    let mut usage: Option<TokenUsage> = None;

    trace!("start receiving events");

    let mut pinned_resp = pin!(resp);
    loop {
        let event_or_err =
            poll_fn(|cx| pinned_resp.as_mut().poll_next_event(cx)).await;
        let event = match event_or_err {
            Ok(event) => event,
            Err(err) => {
                error!("got an error: {err:?}");
                return Err(Box::new(err));
            }
        };

        let Some(event) = event else {
            // The request has been handled gracefully without errors,
            // now try getting the opaque message for this response.
            opaque_msg = pinned_resp.make_opaque_message();
            break;
        };
        trace!("got an event: {event:?}");

        match event {
            ModelResponseEvent::MessageDelta(msg) => {
                transcript.push_str(&msg);
            }
            ModelResponseEvent::ToolCall(req) => {
                tool_calls.push(req);
            }
            ModelResponseEvent::Completed(reason) => {
                finish_reason = Some(reason);
            }
            ModelResponseEvent::Usage(u) => {
                *usage.get_or_insert_default() += u;
            }
        }
    }

    trace!("finished a request");

    Ok(ModelClientResponse {
        transcript,
        opaque_msg,
        tool_calls,
        finish_reason,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use patchwork_model::{ErrorKind, ModelMessage};
    use patchwork_test_model::{PresetResponse, TestModelProvider};
    use serde_json::json;

    use super::*;
    use crate::agent::AgentBuilder;
    use crate::completion::{CompletionOutcome, HandoffTool};
    use crate::conversation::Context;

    fn request(text: &str) -> ModelRequest {
        ModelRequest {
            messages: vec![ModelMessage::User(text.to_owned())],
            tools: vec![],
            settings: ModelSettings {
                parallel_tool_calls: None,
                include_usage: true,
            },
        }
    }

    #[tokio::test]
    async fn test_send_request() {
        let provider = TestModelProvider::with_script([PresetResponse::text(
            "The issue concerns the login handler.",
        )
        .with_usage(TokenUsage::new(40, 8))]);
        let model_client = ModelClient::new(provider);
        assert_eq!(model_client.model_name(), Some("test-model"));

        let resp = model_client.send_request(request("Hi")).await.unwrap();
        assert_eq!(resp.transcript, "The issue concerns the login handler.");
        assert!(resp.opaque_msg.is_some());
        assert!(resp.tool_calls.is_empty());
        assert_eq!(resp.finish_reason, Some(ModelFinishReason::Stop));
        assert_eq!(resp.usage, Some(TokenUsage::new(40, 8)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_errors() {
        let provider = TestModelProvider::with_script([
            PresetResponse::text("ok").with_failures(2),
        ]);
        let model_client = ModelClient::new(provider.clone());

        let resp = model_client.send_request(request("Hi")).await.unwrap();
        assert_eq!(resp.transcript, "ok");
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let provider = TestModelProvider::with_script([
            PresetResponse::text("ok").with_failures(0),
        ]);
        let model_client = ModelClient::new(provider.clone())
            .with_retry_policy(RetryPolicy {
                max_attempts: 3,
                ..Default::default()
            });

        let err = model_client.send_request(request("Hi")).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let provider = TestModelProvider::default();
        let model_client = ModelClient::new(provider.clone());
        let resp_or_err = model_client.send_request(request("Hi")).await;
        assert!(matches!(resp_or_err, Err(_)));
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_complete_builds_request() {
        let provider = TestModelProvider::with_script([PresetResponse::handoff(
            "call_0",
            "transfer_to_analyzer",
        )]);
        let model_client = ModelClient::new(provider.clone());

        let orchestrator = AgentBuilder::new("Orchestrator")
            .with_instructions("Route the issue.")
            .with_handoff("Analyzer")
            .with_usage_metering(true)
            .build();
        let analyzer = AgentBuilder::new("Analyzer")
            .with_handoff_description("Normalizes issue reports.")
            .build();
        let handoffs = [HandoffTool::new(&analyzer)];
        let ctx = Context::seeded("Login fails with 500 on /auth");

        let completion = model_client
            .complete(CompletionRequest {
                agent: &orchestrator,
                turns: ctx.turns().iter().collect(),
                tools: &[],
                handoffs: &handoffs,
            })
            .await
            .unwrap();
        let CompletionOutcome::Handoff(handoff) = completion.outcome else {
            panic!("expected a handoff");
        };
        assert_eq!(handoff.call_id, "call_0");
        assert_eq!(handoff.target, "Analyzer");
        assert!(completion.message.is_some());

        let sent = &provider.requests()[0];
        assert_eq!(
            sent.messages,
            [
                ModelMessage::System("Route the issue.".to_owned()),
                ModelMessage::User("Login fails with 500 on /auth".to_owned()),
            ]
        );
        assert_eq!(sent.tools.len(), 1);
        assert_eq!(sent.tools[0].name, "transfer_to_analyzer");
        assert!(sent.tools[0].description.contains("Normalizes issue reports."));
        assert_eq!(sent.tools[0].parameters["type"], json!("object"));
        assert_eq!(
            sent.settings,
            ModelSettings {
                parallel_tool_calls: Some(false),
                include_usage: true,
            }
        );
    }
}
