use std::collections::BTreeMap;

use patchwork_model::TokenUsage;
use serde::{Deserialize, Serialize};

/// Token usage of the metered agents of one run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    /// Sum over every metered request.
    pub total: TokenUsage,
    /// Number of metered requests that reported usage.
    pub requests: u64,
    /// Usage broken down by agent name.
    pub by_agent: BTreeMap<String, TokenUsage>,
}

impl UsageSummary {
    /// Adds the usage of one request made by `agent`.
    pub fn record(&mut self, agent: &str, usage: TokenUsage) {
        self.total += usage;
        self.requests += 1;
        *self.by_agent.entry(agent.to_owned()).or_default() += usage;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record() {
        let mut summary = UsageSummary::default();
        summary.record("Orchestrator", TokenUsage::new(100, 10));
        summary.record("Engineer", TokenUsage::new(300, 120));
        summary.record("Orchestrator", TokenUsage::new(50, 5));

        assert_eq!(summary.requests, 3);
        assert_eq!(summary.total, TokenUsage::new(450, 135));
        assert_eq!(summary.total.total_tokens(), 585);
        assert_eq!(summary.by_agent["Orchestrator"], TokenUsage::new(150, 15));
        let agents: Vec<_> = summary.by_agent.keys().collect();
        assert_eq!(agents, ["Engineer", "Orchestrator"]);
    }
}
