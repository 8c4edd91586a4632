//! The handoff router and execution engine.
//!
//! An [`Engine`] drives one run at a time through the agent graph of a
//! [`Registry`]: it asks the current agent for a completion, runs the tools
//! it requests, follows its handoffs and stops when an agent answers with
//! nothing left to do. The registry is shared, so any number of engines
//! (or runs of one engine) can execute concurrently.

mod config;
mod state;

use std::sync::Arc;

use patchwork_model::ToolCallRequest;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::completion::{Completion, CompletionOutcome, CompletionRequest};
use crate::contract::ContractPolicy;
use crate::conversation::{
    Context, HandoffRecord, ToolStatus, Turn, TurnContent,
};
use crate::error::RunError;
use crate::registry::Registry;
use crate::usage::UsageSummary;
pub use config::{ContextForwarding, RunConfig};
use state::{RunState, Stage};

type Observer = Arc<dyn Fn(&RunEvent) + Send + Sync>;

/// Progress of a run, reported to the observer set with
/// [`Engine::on_event`].
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunEvent {
    /// An agent received control.
    AgentStarted { agent: String },
    /// A tool call is about to run.
    ToolStarted {
        agent: String,
        tool: String,
        call_id: String,
    },
    /// A tool call finished, successfully or not.
    ToolFinished {
        agent: String,
        tool: String,
        call_id: String,
        status: ToolStatus,
    },
    /// Control moved from one agent to another.
    Handoff { from: String, to: String },
    /// The returned text violated the contract and its author is asked
    /// again.
    Reprompted { agent: String },
    /// The run finished with text from `agent`.
    Completed { agent: String },
}

/// The outcome of a successful run.
#[derive(Clone, Debug)]
pub struct RunResult {
    /// The returned text, checked against the output contract.
    pub output: String,
    /// The agent that produced [`output`](Self::output).
    pub output_agent: String,
    /// The agent that ran last.
    pub last_agent: String,
    /// Number of handoffs performed, mandated follow-ups included.
    pub handoffs: usize,
    /// Every turn of the run.
    pub context: Context,
    /// Token usage, present when any agent that ran is metered.
    pub usage: Option<UsageSummary>,
}

/// Runs tasks through the agent graph of a registry.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<Registry>,
    config: RunConfig,
    observer: Option<Observer>,
}

impl Engine {
    /// Creates an engine with the default [`RunConfig`].
    #[inline]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            config: RunConfig::default(),
            observer: None,
        }
    }

    /// Replaces the run configuration.
    #[inline]
    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Attaches a callback invoked for every [`RunEvent`].
    ///
    /// The callback runs inline on the engine's task, so it must return
    /// quickly. Send the event to a channel if there is more to do.
    #[inline]
    pub fn on_event(
        mut self,
        observer: impl Fn(&RunEvent) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Returns the shared registry.
    #[inline]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Returns the run configuration.
    #[inline]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Runs `input` from the entry agent to completion.
    pub async fn run<S: Into<String>>(
        &self,
        input: S,
    ) -> Result<RunResult, RunError> {
        self.run_with_cancellation(input, CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), but stops with [`RunError::Cancelled`] as
    /// soon as `cancel` fires. In-flight completions and tool calls are
    /// dropped.
    pub async fn run_with_cancellation<S: Into<String>>(
        &self,
        input: S,
        cancel: CancellationToken,
    ) -> Result<RunResult, RunError> {
        let entry = self.registry.entry();
        let span = info_span!("run", entry = %entry.name());
        self.execute(input.into(), cancel).instrument(span).await
    }

    async fn execute(
        &self,
        input: String,
        cancel: CancellationToken,
    ) -> Result<RunResult, RunError> {
        let registry = &*self.registry;
        let entry = registry.entry_index();
        let mut state = RunState::new(input, entry);
        let mut stage = Stage::Running(entry);

        info!("run started");
        self.emit(RunEvent::AgentStarted {
            agent: self.name_of(entry).to_owned(),
        });

        let (terminal_agent, terminal_text) = loop {
            if cancel.is_cancelled() {
                info!("run cancelled");
                return Err(RunError::Cancelled);
            }
            trace!("stage: {stage:?}");
            stage = match stage {
                Stage::Running(agent) => {
                    self.step(&mut state, agent, &cancel).await?
                }
                Stage::AwaitingTool { agent, pending } => {
                    self.dispatch(&mut state, agent, pending, &cancel).await?
                }
                Stage::Terminated { agent, text } => break (agent, text),
            };
        };

        let (output_agent, output) = match state.authored.take() {
            Some(authored) => authored,
            None => {
                if let Some(designated) = registry.authoritative() {
                    warn!(
                        "{} never answered, returning the text of {}",
                        designated.name(),
                        self.name_of(terminal_agent)
                    );
                }
                (terminal_agent, terminal_text)
            }
        };
        let output = self
            .enforce_contract(&mut state, output_agent, output, &cancel)
            .await?;

        let output_agent = self.name_of(output_agent).to_owned();
        info!(
            output_agent = %output_agent,
            handoffs = state.hops,
            turns = state.turns,
            "run completed"
        );
        self.emit(RunEvent::Completed {
            agent: output_agent.clone(),
        });

        Ok(RunResult {
            output,
            output_agent,
            last_agent: self.name_of(state.last_agent).to_owned(),
            handoffs: state.hops,
            context: state.context,
            usage: state.usage,
        })
    }

    /// Asks `agent` for a completion and decides where to go next.
    async fn step(
        &self,
        state: &mut RunState,
        agent: usize,
        cancel: &CancellationToken,
    ) -> Result<Stage, RunError> {
        let completion = self.complete(state, agent, cancel).await?;
        let descriptor = &self.registry.node(agent).descriptor;
        let name = descriptor.name();
        let designated = self.registry.authoritative_index();

        match completion.outcome {
            CompletionOutcome::FinalText(text) => {
                debug!(agent = %name, chars = text.len(), "final text");
                state.context.push(Turn::agent(
                    name,
                    TurnContent::Text(text.clone()),
                    completion.message,
                ));
                state.claim(agent, designated, &text);

                let Some(target) = descriptor.follow_up() else {
                    return Ok(Stage::Terminated { agent, text });
                };
                state.context.push(Turn::agent(
                    name,
                    TurnContent::Handoff(HandoffRecord {
                        call_id: None,
                        target: target.to_owned(),
                        text: None,
                        dropped: vec![],
                    }),
                    None,
                ));
                self.transfer(state, agent, target)
            }
            CompletionOutcome::ToolCalls(calls) => {
                if let Some(call) =
                    calls.iter().find(|call| !descriptor.allows_tool(&call.name))
                {
                    error!(agent = %name, tool = %call.name, "tool not allowed");
                    return Err(RunError::ToolNotAllowed {
                        agent: name.to_owned(),
                        tool: call.name.clone(),
                    });
                }
                debug!(agent = %name, count = calls.len(), "tool calls");
                state.context.push(Turn::agent(
                    name,
                    TurnContent::ToolCalls(calls.clone()),
                    completion.message,
                ));
                Ok(Stage::AwaitingTool {
                    agent,
                    pending: calls,
                })
            }
            CompletionOutcome::Handoff(req) => {
                if !descriptor.allows_handoff(&req.target) {
                    let target = self
                        .registry
                        .resolve_handoff(&req.target)
                        .unwrap_or(&req.target)
                        .to_owned();
                    error!(agent = %name, target = %target, "handoff not allowed");
                    return Err(RunError::HandoffNotAllowed {
                        agent: name.to_owned(),
                        target,
                    });
                }
                if let Some(text) = &req.text {
                    state.claim(agent, designated, text);
                }
                let target = req.target.clone();
                state.context.push(Turn::agent(
                    name,
                    TurnContent::Handoff(HandoffRecord {
                        call_id: Some(req.call_id),
                        target: req.target,
                        text: req.text,
                        dropped: req.dropped,
                    }),
                    completion.message,
                ));
                self.transfer(state, agent, &target)
            }
        }
    }

    /// Runs pending tool calls and returns control to the requesting agent.
    async fn dispatch(
        &self,
        state: &mut RunState,
        agent: usize,
        pending: Vec<ToolCallRequest>,
        cancel: &CancellationToken,
    ) -> Result<Stage, RunError> {
        let descriptor = &self.registry.node(agent).descriptor;
        let name = descriptor.name();
        for call in &pending {
            self.emit(RunEvent::ToolStarted {
                agent: name.to_owned(),
                tool: call.name.clone(),
                call_id: call.id.clone(),
            });
        }

        let invoker = self.registry.invoker();
        let parallel = descriptor.settings().parallel_tool_calls;
        let outputs = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("run cancelled while running tools");
                return Err(RunError::Cancelled);
            }
            outputs = invoker.invoke_all(&pending, parallel, self.config.tool_timeout()) => outputs,
        };

        for output in outputs {
            self.emit(RunEvent::ToolFinished {
                agent: name.to_owned(),
                tool: output.tool.clone(),
                call_id: output.call_id.clone(),
                status: output.status,
            });
            state.context.push(Turn::tool(output));
        }
        Ok(Stage::Running(agent))
    }

    /// Sends one completion request for `agent`, within the turn budget.
    async fn complete(
        &self,
        state: &mut RunState,
        agent: usize,
        cancel: &CancellationToken,
    ) -> Result<Completion, RunError> {
        state.turns += 1;
        if state.turns > self.config.max_turns() {
            error!("turn limit exceeded");
            return Err(RunError::MaxTurnsExceeded {
                limit: self.config.max_turns(),
            });
        }
        state.last_agent = agent;

        let node = self.registry.node(agent);
        let name = node.descriptor.name();
        let req = CompletionRequest {
            agent: &node.descriptor,
            turns: state.context.forwarded(self.config.forwarding()),
            tools: &node.tools,
            handoffs: &node.handoffs,
        };
        debug!(agent = %name, turns = req.turns.len(), "requesting completion");

        let completion = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("run cancelled while waiting for completion");
                return Err(RunError::Cancelled);
            }
            result = node.completion.complete(req) => {
                result.map_err(|source| {
                    error!(agent = %name, "completion failed: {source}");
                    RunError::Completion {
                        agent: name.to_owned(),
                        source,
                    }
                })?
            }
        };

        if node.descriptor.settings().usage_metering {
            let summary = state.usage.get_or_insert_default();
            if let Some(usage) = completion.usage {
                summary.record(name, usage);
            }
        }
        Ok(completion)
    }

    fn transfer(
        &self,
        state: &mut RunState,
        from: usize,
        target: &str,
    ) -> Result<Stage, RunError> {
        let from = self.name_of(from);
        state.hops += 1;
        if state.hops > self.config.max_hops() {
            error!(from = %from, to = %target, "handoff limit exceeded");
            return Err(RunError::HandoffLimitExceeded {
                limit: self.config.max_hops(),
            });
        }
        let Some(to) = self.registry.index_of(target) else {
            // Targets are validated with the registry, so this is a
            // descriptor edited after the fact.
            return Err(RunError::HandoffNotAllowed {
                agent: from.to_owned(),
                target: target.to_owned(),
            });
        };

        info!(from = %from, to = %target, hop = state.hops, "handoff");
        self.emit(RunEvent::Handoff {
            from: from.to_owned(),
            to: target.to_owned(),
        });
        self.emit(RunEvent::AgentStarted {
            agent: target.to_owned(),
        });
        Ok(Stage::Running(to))
    }

    /// Checks the returned text, asking its author once more if the policy
    /// says so.
    async fn enforce_contract(
        &self,
        state: &mut RunState,
        agent: usize,
        text: String,
        cancel: &CancellationToken,
    ) -> Result<String, RunError> {
        let Some(contract) = self.config.contract() else {
            return Ok(text);
        };
        let Err(violation) = contract.enforce(&text).map(|_| ()) else {
            return Ok(text);
        };
        if self.config.contract_policy() == ContractPolicy::Reject {
            warn!("output violates the contract: {violation}");
            return Err(violation.into());
        }

        let name = self.name_of(agent);
        warn!(agent = %name, "output violates the contract, asking again");
        self.emit(RunEvent::Reprompted {
            agent: name.to_owned(),
        });
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        state
            .context
            .push(Turn::user(contract.corrective_instruction()));
        let completion = self.complete(state, agent, cancel).await?;
        let text = match completion.outcome {
            CompletionOutcome::FinalText(text) => {
                state.context.push(Turn::agent(
                    name,
                    TurnContent::Text(text.clone()),
                    completion.message,
                ));
                text
            }
            CompletionOutcome::Handoff(req) => {
                warn!(agent = %name, target = %req.target, "ignoring handoff while correcting output");
                let text = req.text.clone().unwrap_or_default();
                state.context.push(Turn::agent(
                    name,
                    TurnContent::Handoff(HandoffRecord {
                        call_id: Some(req.call_id),
                        target: req.target,
                        text: req.text,
                        dropped: req.dropped,
                    }),
                    completion.message,
                ));
                text
            }
            CompletionOutcome::ToolCalls(calls) => {
                warn!(agent = %name, "ignoring tool calls while correcting output");
                state.context.push(Turn::agent(
                    name,
                    TurnContent::ToolCalls(calls),
                    completion.message,
                ));
                String::new()
            }
        };

        contract.enforce(&text)?;
        Ok(text)
    }

    #[inline]
    fn name_of(&self, agent: usize) -> &str {
        self.registry.node(agent).descriptor.name()
    }

    #[inline]
    fn emit(&self, event: RunEvent) {
        if let Some(observer) = &self.observer {
            observer(&event);
        }
    }
}
