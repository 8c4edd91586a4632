use std::sync::Arc;

use patchwork_core::tool::Tool;
use patchwork_core::{
    CancellationToken, Engine, GraphError, RunConfig, RunError, RunEvent,
    RunResult,
};
use patchwork_model::ModelProvider;

use crate::tools::FetchUrlTool;
use crate::workflow::issue_solver_graph;

type Observer = Box<dyn Fn(&RunEvent) + Send + Sync>;

/// An issue solver builder.
///
/// See [`IssueSolver`].
pub struct IssueSolverBuilder {
    graph: patchwork_core::RegistryBuilder,
    has_fetch_tool: bool,
    config: RunConfig,
    observer: Option<Observer>,
}

impl IssueSolverBuilder {
    /// Creates a builder binding every agent to `provider`.
    pub fn with_model_provider<M: ModelProvider + 'static>(
        provider: M,
    ) -> Self {
        Self {
            graph: issue_solver_graph().with_model_provider(provider),
            has_fetch_tool: false,
            config: RunConfig::default(),
            observer: None,
        }
    }

    /// Replaces the default [`FetchUrlTool`]. The tool must be named
    /// `fetch_url`.
    #[inline]
    pub fn with_fetch_tool<T: Tool>(mut self, tool: T) -> Self {
        self.graph = self.graph.with_tool(tool);
        self.has_fetch_tool = true;
        self
    }

    /// Sets the run limits and the output contract policy.
    #[inline]
    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Attaches a callback invoked with the progress of every run.
    #[inline]
    pub fn on_event(
        mut self,
        on_event: impl Fn(&RunEvent) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(Box::new(on_event));
        self
    }

    /// Builds the solver.
    pub fn build(self) -> Result<IssueSolver, GraphError> {
        let graph = if self.has_fetch_tool {
            self.graph
        } else {
            self.graph.with_tool(FetchUrlTool::new())
        };
        let mut engine =
            Engine::new(Arc::new(graph.build()?)).with_config(self.config);
        if let Some(observer) = self.observer {
            engine = engine.on_event(observer);
        }
        Ok(IssueSolver { engine })
    }
}

/// Turns an issue report into a patch.
///
/// The solver is a thin wrapper around an [`Engine`] running the
/// [issue-solver graph](crate::workflow). It holds no per-run state, so one
/// solver can work on several issues concurrently.
#[derive(Clone)]
pub struct IssueSolver {
    engine: Engine,
}

impl IssueSolver {
    /// Runs the workflow on `issue`. The output of a successful run has
    /// passed the output contract.
    #[inline]
    pub async fn solve(&self, issue: &str) -> Result<RunResult, RunError> {
        self.engine.run(issue).await
    }

    /// Like [`solve`](Self::solve), but stops as soon as `cancel` fires.
    #[inline]
    pub async fn solve_with_cancellation(
        &self,
        issue: &str,
        cancel: CancellationToken,
    ) -> Result<RunResult, RunError> {
        self.engine.run_with_cancellation(issue, cancel).await
    }

    /// Returns the underlying engine.
    #[inline]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}
