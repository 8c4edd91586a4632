use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use patchwork_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
    OpaqueMessage, TokenUsage, ToolCallRequest,
};
use pin_project_lite::pin_project;
use serde_json::Value;

use crate::Error;
use crate::io::Sse;
use crate::proto::{ChatCompletionChunk, Message, ToolCall};

struct PartialState {
    sse: Sse,
    id: Option<String>,
    content: String,
    reasoning_content: Option<String>,
    tool_calls: Vec<ToolCall>,
    // This field records the index of the tool calls that are generated but not
    // yet sent to the model user. When calling `poll_next_event`, the response
    // will return the pending tool calls.
    pending_tool_call_idx: VecDeque<usize>,
    // This field will be cleared after the response returns the complete event.
    pending_finish_reason: Option<ModelFinishReason>,
    // Reported by the last chunk when usage is requested. Emitted after the
    // finish reason.
    pending_usage: Option<TokenUsage>,
}

impl PartialState {
    #[inline]
    fn finish(self) -> (String, Message) {
        (
            self.id.unwrap_or_default(),
            Message::Assistant {
                content: Some(self.content),
                tool_calls: if self.tool_calls.is_empty() {
                    None
                } else {
                    Some(self.tool_calls)
                },
                reasoning_content: self.reasoning_content,
            },
        )
    }
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    /// A streamed chat completion.
    pub struct OpenAIResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
        full_msg: Option<(String, Message)>,
    }
}

impl OpenAIResponse {
    #[inline]
    pub fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState {
            sse,
            id: None,
            content: Default::default(),
            reasoning_content: Default::default(),
            tool_calls: Default::default(),
            pending_tool_call_idx: Default::default(),
            pending_finish_reason: Default::default(),
            pending_usage: Default::default(),
        };
        let next_event_fut = async move { next_event(partial_state).await };
        Self {
            next_event_fut: Some(Box::pin(next_event_fut)),
            full_msg: None,
        }
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            // Polled after completion.
            return Poll::Ready(Ok(None));
        };
        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, partial_state)) => {
                    *this.next_event_fut = None;
                    *this.full_msg = Some(partial_state.finish());
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        // The stream may still have more data to pull, create a new future for
        // the next event.
        let next_event_fut = async move { next_event(partial_state).await };
        *this.next_event_fut = Some(Box::pin(next_event_fut));

        Poll::Ready(Ok(Some(event)))
    }

    fn make_opaque_message(&self) -> Option<OpaqueMessage> {
        self.full_msg
            .as_ref()
            .map(|(id, msg)| OpaqueMessage::new(id, msg.clone()))
    }
}

async fn next_event(
    mut partial_state: PartialState,
) -> Result<(Option<ModelResponseEvent>, PartialState), Error> {
    let mut message_delta = None;

    loop {
        let sse_event = match partial_state.sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(err) => {
                return Err(Error::new(err.to_string(), ErrorKind::Other));
            }
        };
        trace!("got sse event: {sse_event}");
        if sse_event == "[DONE]" {
            break;
        }

        let mut chunk = serde_json::from_str::<ChatCompletionChunk>(&sse_event)
            .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
        if !chunk.id.is_empty()
            && partial_state.id.get_or_insert_with(|| chunk.id.clone())
                != &chunk.id
        {
            return Err(Error::new("chunk id mismatch", ErrorKind::Other));
        };
        if let Some(usage) = chunk.usage {
            partial_state.pending_usage = Some(usage.into());
        }

        let Some(choice) = chunk.choices.pop() else {
            // A usage-only chunk, or a keep-alive from some gateways.
            if partial_state.pending_usage.is_some() {
                break;
            }
            continue;
        };

        if let Some(finish_reason) = choice.finish_reason {
            let finish_reason = match finish_reason.as_str() {
                "tool_calls" => ModelFinishReason::ToolCalls,
                "content_filter" => {
                    return Err(Error::new(
                        "response blocked by the content filter",
                        ErrorKind::Moderated,
                    ));
                }
                _ => ModelFinishReason::Stop,
            };
            partial_state.pending_finish_reason = Some(finish_reason);
            break;
        }

        if let Some(content) = choice.delta.content {
            partial_state.content.push_str(&content);
            message_delta = Some(content);
        }
        if let Some(reasoning_content) = &choice.delta.reasoning_content {
            partial_state
                .reasoning_content
                .get_or_insert_default()
                .push_str(reasoning_content);
        }
        if let Some(tool_calls) = choice.delta.tool_calls {
            for tool_call in tool_calls {
                merge_tool_call(&mut partial_state, tool_call);
            }
        }

        if message_delta.is_some() {
            break;
        }
    }

    // Emission order: message delta, pending tool calls, finish reason,
    // usage.

    if let Some(message_delta) = message_delta {
        return Ok((
            Some(ModelResponseEvent::MessageDelta(message_delta)),
            partial_state,
        ));
    }

    if let Some(idx) = partial_state.pending_tool_call_idx.pop_front() {
        let tool_call = &partial_state.tool_calls[idx];
        let id = tool_call.id.clone().unwrap_or_default();
        let name = tool_call
            .function
            .as_ref()
            .and_then(|f| f.name.clone())
            .unwrap_or_default();
        // Arguments that don't parse are passed on as a string so the tool
        // reports the failure.
        let arguments = tool_call
            .function
            .as_ref()
            .and_then(|f| f.arguments.as_deref())
            .map(|args| {
                serde_json::from_str::<Value>(args)
                    .unwrap_or_else(|_| Value::String(args.to_owned()))
            })
            .unwrap_or_else(|| Value::Object(Default::default()));
        return Ok((
            Some(ModelResponseEvent::ToolCall(ToolCallRequest {
                id,
                name,
                arguments,
            })),
            partial_state,
        ));
    }

    if let Some(finish_reason) = partial_state.pending_finish_reason.take() {
        return Ok((
            Some(ModelResponseEvent::Completed(finish_reason)),
            partial_state,
        ));
    }

    if let Some(usage) = partial_state.pending_usage.take() {
        return Ok((Some(ModelResponseEvent::Usage(usage)), partial_state));
    }

    Ok((None, partial_state))
}

fn merge_tool_call(partial_state: &mut PartialState, tool_call: ToolCall) {
    let Some(partial_tool_call) = partial_state
        .tool_calls
        .iter_mut()
        .find(|t| t.index == tool_call.index)
    else {
        partial_state
            .pending_tool_call_idx
            .push_back(partial_state.tool_calls.len());
        partial_state.tool_calls.push(tool_call);
        return;
    };
    if let Some(id) = tool_call.id {
        partial_tool_call.id.get_or_insert_default().push_str(&id);
    }
    if let Some(ty) = tool_call.r#type {
        partial_tool_call.r#type.get_or_insert_default().push_str(&ty);
    }
    let Some(function) = tool_call.function else {
        return;
    };
    match partial_tool_call.function {
        Some(ref mut partial_func) => {
            if let Some(name) = function.name {
                partial_func.name.get_or_insert_default().push_str(&name);
            }
            if let Some(arguments) = function.arguments {
                partial_func
                    .arguments
                    .get_or_insert_default()
                    .push_str(&arguments);
            }
        }
        None => partial_tool_call.function = Some(function),
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;

    use bytes::Bytes;

    use super::*;
    use crate::io::Chunks;

    fn response_of(body: &'static [u8]) -> OpenAIResponse {
        let chunks =
            Chunks::from_vec_deque(vec![Bytes::from_static(body)].into());
        OpenAIResponse::from_sse(Sse::new(chunks))
    }

    async fn collect(
        body: &'static [u8],
    ) -> (Vec<ModelResponseEvent>, OpenAIResponse) {
        let mut resp = response_of(body);
        let mut events = vec![];
        while let Some(event) =
            poll_fn(|cx| Pin::new(&mut resp).poll_next_event(cx))
                .await
                .unwrap()
        {
            events.push(event);
        }
        (events, resp)
    }

    #[tokio::test]
    async fn test_tool_call_stream() {
        let (events, resp) =
            collect(include_bytes!("../fixtures/test_response.txt")).await;
        assert_eq!(
            events,
            vec![
                ModelResponseEvent::MessageDelta("Looking at ".to_owned()),
                ModelResponseEvent::MessageDelta("both links.".to_owned()),
                ModelResponseEvent::ToolCall(ToolCallRequest {
                    id: "call_a".to_owned(),
                    name: "fetch_url".to_owned(),
                    arguments: serde_json::json!({
                        "url": "https://example.com/issues/1"
                    }),
                }),
                ModelResponseEvent::ToolCall(ToolCallRequest {
                    id: "call_b".to_owned(),
                    name: "fetch_url".to_owned(),
                    arguments: serde_json::json!({
                        "url": "https://example.com/docs"
                    }),
                }),
                ModelResponseEvent::Completed(ModelFinishReason::ToolCalls),
                ModelResponseEvent::Usage(TokenUsage::new(152, 41)),
            ]
        );

        let full_msg = resp.make_opaque_message().unwrap();
        let full_msg: &Message = full_msg.to_raw().unwrap();
        let Message::Assistant {
            content,
            tool_calls,
            ..
        } = full_msg
        else {
            panic!("expected an assistant message");
        };
        assert_eq!(content.as_deref(), Some("Looking at both links."));
        assert_eq!(tool_calls.as_ref().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn test_text_stream_without_usage() {
        let (events, _) = collect(
            b"data: {\"id\":\"c2\",\"choices\":[{\"delta\":{\"content\":\"diff --git\"},\"finish_reason\":null}]}\n\n\
              data: {\"id\":\"c2\",\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n\
              data: [DONE]\n\n",
        )
        .await;
        assert_eq!(
            events,
            vec![
                ModelResponseEvent::MessageDelta("diff --git".to_owned()),
                ModelResponseEvent::Completed(ModelFinishReason::Stop),
            ]
        );
    }

    #[tokio::test]
    async fn test_content_filter() {
        let mut resp = response_of(
            b"data: {\"id\":\"c3\",\"choices\":[{\"delta\":{},\"finish_reason\":\"content_filter\"}]}\n\n",
        );
        let err = poll_fn(|cx| Pin::new(&mut resp).poll_next_event(cx))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Moderated);
    }
}
