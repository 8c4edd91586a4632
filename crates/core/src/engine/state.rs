use patchwork_model::ToolCallRequest;

use crate::conversation::Context;
use crate::usage::UsageSummary;

/// Where a run is. Agents are referred to by their registry index.
#[derive(Debug)]
pub(crate) enum Stage {
    Running(usize),
    AwaitingTool {
        agent: usize,
        pending: Vec<ToolCallRequest>,
    },
    Terminated {
        agent: usize,
        text: String,
    },
}

pub(crate) struct RunState {
    pub(crate) context: Context,
    pub(crate) hops: usize,
    pub(crate) turns: usize,
    pub(crate) last_agent: usize,
    /// Text of the designated agent. Set once.
    pub(crate) authored: Option<(usize, String)>,
    pub(crate) usage: Option<UsageSummary>,
}

impl RunState {
    pub(crate) fn new(input: String, entry: usize) -> Self {
        Self {
            context: Context::seeded(input),
            hops: 0,
            turns: 0,
            last_agent: entry,
            authored: None,
            usage: None,
        }
    }

    /// Records `text` as the run's result if `agent` is the designated one
    /// and nothing has been recorded yet.
    pub(crate) fn claim(
        &mut self,
        agent: usize,
        designated: Option<usize>,
        text: &str,
    ) -> bool {
        if designated != Some(agent) || self.authored.is_some() || text.is_empty()
        {
            return false;
        }
        self.authored = Some((agent, text.to_owned()));
        true
    }
}
