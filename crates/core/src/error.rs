use crate::completion::CompletionError;
use crate::contract::ContractViolation;

/// Why a run failed.
///
/// Tool failures are not in here: they are reported to the agent inside the
/// conversation and never abort a run.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// An agent asked for a tool outside of its allowed set.
    #[error("agent `{agent}` is not allowed to call tool `{tool}`")]
    ToolNotAllowed { agent: String, tool: String },
    /// An agent asked to transfer control outside of its allowed targets.
    #[error("agent `{agent}` is not allowed to hand off to `{target}`")]
    HandoffNotAllowed { agent: String, target: String },
    /// The completion adapter of `agent` failed.
    #[error("completion of agent `{agent}` failed: {source}")]
    Completion {
        agent: String,
        #[source]
        source: CompletionError,
    },
    /// The returned text violates the output contract.
    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),
    /// More handoffs than allowed, the agents are most likely going around
    /// in circles.
    #[error("handoff limit of {limit} exceeded")]
    HandoffLimitExceeded { limit: usize },
    /// More completion requests than allowed.
    #[error("turn limit of {limit} exceeded")]
    MaxTurnsExceeded { limit: usize },
    /// The run was cancelled by the caller.
    #[error("run cancelled")]
    Cancelled,
}

impl RunError {
    /// Returns `true` for errors caused by a mismatch between what agents
    /// do and what the registry allows.
    #[inline]
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            RunError::ToolNotAllowed { .. } | RunError::HandoffNotAllowed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::OutputContract;

    #[test]
    fn test_display() {
        let err = RunError::HandoffNotAllowed {
            agent: "Analyzer".to_owned(),
            target: "Validator".to_owned(),
        };
        assert!(err.is_configuration_error());
        assert_eq!(
            err.to_string(),
            "agent `Analyzer` is not allowed to hand off to `Validator`"
        );

        let violation = OutputContract::unified_diff()
            .enforce("Here is the patch:")
            .unwrap_err();
        let err = RunError::from(violation);
        assert!(!err.is_configuration_error());
        assert_eq!(err.to_string(), "output does not start with `diff --git`");
    }
}
