use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

/// Token consumption reported by the provider for one request.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct TokenUsage {
    /// Tokens in the prompt, including the forwarded conversation.
    pub prompt_tokens: u64,
    /// Tokens generated by the model.
    pub completion_tokens: u64,
}

impl TokenUsage {
    /// Creates a usage record.
    #[inline]
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    /// Returns the sum of prompt and completion tokens.
    #[inline]
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl AddAssign for TokenUsage {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        self.prompt_tokens += rhs.prompt_tokens;
        self.completion_tokens += rhs.completion_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulate() {
        let mut usage = TokenUsage::default();
        usage += TokenUsage::new(120, 30);
        usage += TokenUsage::new(80, 20);
        assert_eq!(usage, TokenUsage::new(200, 50));
        assert_eq!(usage.total_tokens(), 250);
    }
}
