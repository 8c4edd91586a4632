//! Output contract enforcement.
//!
//! The text a run returns has to satisfy an [`OutputContract`] before the
//! caller sees it. The enforcer only ever accepts or rejects, it never
//! rewrites the text to make it pass.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// What to do when the returned text violates the contract.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ContractPolicy {
    /// Fail the run with the violation.
    #[default]
    Reject,
    /// Ask the agent that produced the text once more, with a corrective
    /// instruction, and fail if the new text still violates the contract.
    Reprompt,
}

/// A required prefix of the returned text.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OutputContract {
    prefix: Cow<'static, str>,
}

impl OutputContract {
    /// The first bytes of a git-style unified diff.
    pub const UNIFIED_DIFF_MARKER: &'static str = "diff --git";

    /// A verbatim unified diff, starting with `diff --git`.
    #[inline]
    pub fn unified_diff() -> Self {
        Self::with_prefix(Self::UNIFIED_DIFF_MARKER)
    }

    /// Requires the text to start with `prefix`, byte for byte.
    #[inline]
    pub fn with_prefix<S: Into<Cow<'static, str>>>(prefix: S) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Returns the required prefix.
    #[inline]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns `text` unchanged if it satisfies the contract.
    ///
    /// ```
    /// use patchwork_core::OutputContract;
    ///
    /// let contract = OutputContract::unified_diff();
    /// let patch = "diff --git a/x b/x\n--- a/x\n+++ b/x\n";
    /// assert_eq!(contract.enforce(patch), Ok(patch));
    /// assert!(contract.enforce("Here is the patch:\n").is_err());
    /// ```
    pub fn enforce<'a>(&self, text: &'a str) -> Result<&'a str, ContractViolation> {
        if text.starts_with(self.prefix()) {
            return Ok(text);
        }
        Err(ContractViolation {
            expected: self.prefix.to_string(),
            text: text.to_owned(),
        })
    }

    /// Returns the instruction appended when the policy is
    /// [`ContractPolicy::Reprompt`].
    pub fn corrective_instruction(&self) -> String {
        format!(
            "Your previous answer was rejected. Reply again with only the \
             result: the first line must start with \"{}\", with no \
             explanations, prose or code fences before or after it.",
            self.prefix
        )
    }
}

/// The returned text didn't satisfy the output contract.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("output does not start with `{expected}`")]
pub struct ContractViolation {
    expected: String,
    text: String,
}

impl ContractViolation {
    /// Returns the prefix the text was required to start with.
    #[inline]
    pub fn expected(&self) -> &str {
        &self.expected
    }

    /// Returns the rejected text.
    #[inline]
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Replaces carriage returns and line feeds with the two-character escapes
/// `\r` and `\n`, for printing a value on one line.
///
/// This is for display only, the contract is always checked against the
/// unescaped text.
pub fn to_single_line(text: &str) -> Cow<'_, str> {
    if !text.contains(['\r', '\n']) {
        return Cow::Borrowed(text);
    }
    let mut line = String::with_capacity(text.len() + 16);
    for ch in text.chars() {
        match ch {
            '\r' => line.push_str("\\r"),
            '\n' => line.push_str("\\n"),
            ch => line.push(ch),
        }
    }
    Cow::Owned(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATCH: &str = "diff --git a/auth.py b/auth.py\n\
                         --- a/auth.py\n\
                         +++ b/auth.py\n\
                         @@ -1 +1 @@\n\
                         -return None\n\
                         +return user\n";

    #[test]
    fn test_accepts_diff_unchanged() {
        let contract = OutputContract::unified_diff();
        let text = contract.enforce(PATCH).unwrap();
        assert_eq!(text, PATCH);
        assert!(std::ptr::eq(text, PATCH));
    }

    #[test]
    fn test_rejects_prose() {
        let contract = OutputContract::unified_diff();
        for text in [
            "Here is the patch:\ndiff --git a/x b/x\n",
            " diff --git a/x b/x",
            "```diff\ndiff --git a/x b/x\n```",
            "",
        ] {
            let violation = contract.enforce(text).unwrap_err();
            assert_eq!(violation.expected(), "diff --git");
            assert_eq!(violation.text(), text);
        }
    }

    #[test]
    fn test_custom_prefix() {
        let contract = OutputContract::with_prefix("{");
        assert!(contract.enforce(r#"{"verdict":"ok"}"#).is_ok());
        assert!(contract.corrective_instruction().contains("\"{\""));
    }

    #[test]
    fn test_to_single_line() {
        assert_eq!(to_single_line("line1\r\nline2"), "line1\\r\\nline2");
        assert!(matches!(to_single_line("one line"), Cow::Borrowed(_)));

        let stored = PATCH.to_owned();
        let shown = to_single_line(&stored);
        assert!(!shown.contains('\n'));
        assert_eq!(stored, PATCH);
        assert!(OutputContract::unified_diff().enforce(&stored).is_ok());
    }
}
