use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use patchwork_model::{ModelTool, ToolCallRequest};
use tokio::time::timeout;
use tracing::Instrument;

use super::{Error, ToolObject};
use crate::conversation::ToolOutput;

/// Upper bound, in characters, of every tool payload an agent gets to see.
pub const MAX_PAYLOAD_CHARS: usize = 8000;

/// Wall-clock limit applied to a tool call unless the run says otherwise.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(15);

/// Cuts `text` down to its first [`MAX_PAYLOAD_CHARS`] characters.
///
/// The cut always lands on a character boundary, and applying it to an
/// already cut payload returns it unchanged.
#[inline]
pub fn truncate_payload(text: &str) -> &str {
    match text.char_indices().nth(MAX_PAYLOAD_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Runs tool requests on behalf of agents.
///
/// The invoker is built once with the registry and shared read-only by all
/// runs. Whether a given agent may call a given tool is checked by the
/// engine before anything reaches the invoker.
pub struct Invoker {
    tools: HashMap<String, Arc<dyn ToolObject>>,
}

impl Invoker {
    pub(crate) fn with_tools(tools: Vec<Box<dyn ToolObject>>) -> Self {
        let tools = tools
            .into_iter()
            .map(|tool| (tool.name().to_owned(), Arc::from(tool)))
            .collect();
        Self { tools }
    }

    /// Returns `true` if a tool with this name is registered.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    #[inline]
    pub(crate) fn definition(&self, name: &str) -> Option<ModelTool> {
        self.tools.get(name).map(|tool| tool.definition())
    }

    /// Executes one request, bounded by `limit`.
    ///
    /// This never fails: unknown tools, invalid arguments, execution errors
    /// and timeouts all come back as an error output whose payload reads
    /// `Error <tool>: <cause>`.
    pub async fn invoke(
        &self,
        request: &ToolCallRequest,
        limit: Duration,
    ) -> ToolOutput {
        let Some(tool) = self.tools.get(&request.name) else {
            warn!("tool not found: {}", request.name);
            let err = Error::invalid_input().with_reason("no such tool");
            return ToolOutput::failed(request, &err);
        };

        // Progress marker, emitted before any side effect happens.
        info!(tool = %request.name, call_id = %request.id, "looking for info");
        trace!("tool arguments: {:?}", request.arguments);

        let result = match timeout(limit, tool.execute(request.arguments.clone()))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(limit)),
        };

        match result {
            Ok(payload) => {
                let output = ToolOutput::succeeded(request, &payload);
                debug!(
                    tool = %request.name,
                    chars = output.payload.chars().count(),
                    "tool finished"
                );
                output
            }
            Err(err) => {
                warn!(tool = %request.name, "tool failed: {err}");
                ToolOutput::failed(request, &err)
            }
        }
    }

    /// Executes a batch of requests from one completion.
    ///
    /// With `parallel` set the requests run concurrently and this waits for
    /// all of them; otherwise they run one after another. Outputs are always
    /// returned in request order.
    pub async fn invoke_all(
        &self,
        requests: &[ToolCallRequest],
        parallel: bool,
        limit: Duration,
    ) -> Vec<ToolOutput> {
        let span = debug_span!("tool invoker", count = requests.len(), parallel);
        async move {
            if parallel {
                return join_all(requests.iter().map(|req| self.invoke(req, limit)))
                    .await;
            }
            let mut outputs = Vec::with_capacity(requests.len());
            for req in requests {
                outputs.push(self.invoke(req, limit).await);
            }
            outputs
        }
        .instrument(span)
        .await
    }
}
