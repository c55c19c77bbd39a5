use crate::safety::SafetyError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building or applying a patch set.
#[derive(Error, Debug)]
pub enum PatchError {
    /// Pattern failed to compile, a replacement references an undefined
    /// capture, or the rule cannot be made idempotent.
    #[error("rule '{rule}' is malformed: {reason}")]
    MalformedRule { rule: String, reason: String },

    /// A required rule found nothing to replace in the current document.
    #[error("rule '{rule}' did not match: search block not found")]
    RuleNotMatched { rule: String },

    /// A second pass over an already patched document changed it again.
    #[error("rule '{rule}' is not idempotent: a second pass changed the document")]
    NotIdempotent { rule: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The input file no longer holds the text the rules were applied to.
    #[error("{} changed on disk while it was being patched", path.display())]
    ConcurrentModification { path: PathBuf },

    #[error(transparent)]
    Workspace(#[from] SafetyError),
}

impl PatchError {
    pub(crate) fn malformed(rule: &str, reason: impl Into<String>) -> Self {
        PatchError::MalformedRule {
            rule: rule.to_string(),
            reason: reason.into(),
        }
    }

    /// Identity of the rule this error refers to, if any.
    pub fn rule(&self) -> Option<&str> {
        match self {
            PatchError::MalformedRule { rule, .. }
            | PatchError::RuleNotMatched { rule }
            | PatchError::NotIdempotent { rule } => Some(rule),
            _ => None,
        }
    }
}
