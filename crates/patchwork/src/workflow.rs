//! The issue-solver agent graph.
//!
//! ```text
//! Orchestrator ──> Analyzer ──> Explorer ──> Engineer ══> Validator
//!       ^              │            │            │            │
//!       └──────────────┴────────────┴────────────┴────────────┘
//! ```
//!
//! The Orchestrator may also transfer straight to any specialist. `══>` is
//! the mandated follow-up: once the Engineer answers, the Validator always
//! runs. The Engineer's answer is the result of the run.

use patchwork_core::{AgentBuilder, AgentDescriptor, RegistryBuilder};

/// Name of the entry agent.
pub const ORCHESTRATOR: &str = "Orchestrator";
/// Name of the agent normalizing the issue.
pub const ANALYZER: &str = "Analyzer";
/// Name of the research agent.
pub const EXPLORER: &str = "Explorer";
/// Name of the agent writing the patch.
pub const ENGINEER: &str = "Engineer";
/// Name of the agent reviewing the patch.
pub const VALIDATOR: &str = "Validator";

/// Id of the tool the analyzer reads links with.
pub const FETCH_URL: &str = "fetch_url";

fn orchestrator() -> AgentDescriptor {
    AgentBuilder::new(ORCHESTRATOR)
        .with_instructions(include_str!("prompts/orchestrator.md"))
        .with_handoff_description(
            "Coordinates the specialists and returns the final patch.",
        )
        .with_handoff(ANALYZER)
        .with_handoff(EXPLORER)
        .with_handoff(ENGINEER)
        .with_handoff(VALIDATOR)
        .with_parallel_tool_calls(false)
        .with_usage_metering(true)
        .build()
}

fn analyzer() -> AgentDescriptor {
    AgentBuilder::new(ANALYZER)
        .with_instructions(include_str!("prompts/analyzer.md"))
        .with_handoff_description(
            "Extracts type, severity, components and symptoms from a raw \
             issue report.",
        )
        .with_tool(FETCH_URL)
        .with_handoff(EXPLORER)
        .with_handoff(ORCHESTRATOR)
        .with_usage_metering(true)
        .build()
}

fn explorer() -> AgentDescriptor {
    AgentBuilder::new(EXPLORER)
        .with_instructions(include_str!("prompts/explorer.md"))
        .with_handoff_description(
            "Researches root causes and similar patterns for an analyzed \
             issue.",
        )
        .with_handoff(ENGINEER)
        .with_handoff(ORCHESTRATOR)
        .with_usage_metering(true)
        .build()
}

fn engineer() -> AgentDescriptor {
    AgentBuilder::new(ENGINEER)
        .with_instructions(include_str!("prompts/engineer.md"))
        .with_handoff_description(
            "Writes the fix as a unified git diff from an issue analysis.",
        )
        .with_handoff(VALIDATOR)
        .with_handoff(ORCHESTRATOR)
        .with_follow_up(VALIDATOR)
        .with_usage_metering(true)
        .build()
}

fn validator() -> AgentDescriptor {
    AgentBuilder::new(VALIDATOR)
        .with_instructions(include_str!("prompts/validator.md"))
        .with_handoff_description(
            "Reviews a patch for scope, clean application and risks.",
        )
        .with_handoff(ORCHESTRATOR)
        .with_usage_metering(true)
        .build()
}

/// Returns a registry builder holding the five agents, with the
/// Orchestrator as entry and the Engineer as the author of the result.
///
/// Tools and the completion binding are left to the caller; the graph
/// needs a tool named [`FETCH_URL`].
pub fn issue_solver_graph() -> RegistryBuilder {
    RegistryBuilder::new()
        .with_agent(orchestrator())
        .with_agent(analyzer())
        .with_agent(explorer())
        .with_agent(engineer())
        .with_agent(validator())
        .with_entry(ORCHESTRATOR)
        .with_authoritative_agent(ENGINEER)
}
