use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::contract::{ContractPolicy, OutputContract};
use crate::tool::DEFAULT_TOOL_TIMEOUT;

/// How much of the context is forwarded to each completion request.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ContextForwarding {
    /// Every turn so far.
    #[default]
    Full,
    /// The caller's input plus the last `n` turns.
    Window(usize),
}

/// Limits and policies of a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunConfig {
    max_hops: usize,
    max_turns: usize,
    tool_timeout: Duration,
    forwarding: ContextForwarding,
    contract: Option<OutputContract>,
    contract_policy: ContractPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_hops: 16,
            max_turns: 48,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            forwarding: ContextForwarding::Full,
            contract: Some(OutputContract::unified_diff()),
            contract_policy: ContractPolicy::Reject,
        }
    }
}

impl RunConfig {
    /// Sets how many handoffs a run may perform, mandated follow-ups
    /// included.
    #[inline]
    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    /// Sets how many completion requests a run may make.
    #[inline]
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Sets the wall-clock limit of each tool call.
    #[inline]
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Sets how much context is forwarded to completions.
    #[inline]
    pub fn with_forwarding(mut self, forwarding: ContextForwarding) -> Self {
        self.forwarding = forwarding;
        self
    }

    /// Sets the contract the returned text must satisfy.
    #[inline]
    pub fn with_contract(mut self, contract: OutputContract) -> Self {
        self.contract = Some(contract);
        self
    }

    /// Returns whatever text the run ends with, unchecked.
    #[inline]
    pub fn without_contract(mut self) -> Self {
        self.contract = None;
        self
    }

    /// Sets what happens on a contract violation.
    #[inline]
    pub fn with_contract_policy(mut self, policy: ContractPolicy) -> Self {
        self.contract_policy = policy;
        self
    }

    /// Returns the handoff ceiling.
    #[inline]
    pub fn max_hops(&self) -> usize {
        self.max_hops
    }

    /// Returns the completion request ceiling.
    #[inline]
    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Returns the per-call tool timeout.
    #[inline]
    pub fn tool_timeout(&self) -> Duration {
        self.tool_timeout
    }

    /// Returns the forwarding mode.
    #[inline]
    pub fn forwarding(&self) -> ContextForwarding {
        self.forwarding
    }

    /// Returns the output contract, if any.
    #[inline]
    pub fn contract(&self) -> Option<&OutputContract> {
        self.contract.as_ref()
    }

    /// Returns the contract policy.
    #[inline]
    pub fn contract_policy(&self) -> ContractPolicy {
        self.contract_policy
    }
}
