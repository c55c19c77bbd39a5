//! Ordered rule lists and the per-run report.
//!
//! Rules in a [`PatchSet`] run in declared order, each one seeing the output
//! of the rule before it. A failed required rule stops the run; whatever was
//! applied before it stays in the returned document and the caller decides
//! whether to keep it.

use crate::error::PatchError;
use crate::rule::{apply_rule, RuleOutcome, RuleStatus, SubstitutionRule};
use log::{debug, warn};
use std::collections::HashSet;

/// An ordered list of rules targeting one document.
#[derive(Debug, Clone, Default)]
pub struct PatchSet {
    name: String,
    rules: Vec<SubstitutionRule>,
}

impl PatchSet {
    /// Build a patch set. Rule ids must be unique within the set.
    pub fn new(name: impl Into<String>, rules: Vec<SubstitutionRule>) -> Result<Self, PatchError> {
        let mut seen = HashSet::new();
        for rule in &rules {
            if !seen.insert(rule.id()) {
                return Err(PatchError::malformed(
                    rule.id(),
                    "rule id is used more than once in the patch set",
                ));
            }
        }
        Ok(Self {
            name: name.into(),
            rules,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &[SubstitutionRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Shorthand for [`apply_patch_set`].
    pub fn apply(&self, document: &str) -> PatchReport {
        apply_patch_set(document, self)
    }

    /// Apply the set, then make sure a second pass over the result is a no-op.
    ///
    /// The second pass treats every rule as optional: a rule that no longer
    /// matches is exactly what a second pass should see. The first rule that
    /// still rewrites the patched document is returned as
    /// [`PatchError::NotIdempotent`]. A failure on the first pass is reported
    /// as [`PatchError::RuleNotMatched`].
    pub fn check_idempotent(&self, document: &str) -> Result<(), PatchError> {
        let patched = self.apply(document).into_result()?.document;

        // Until some rule matches, the second pass never leaves `patched`.
        for rule in &self.rules {
            match apply_rule(&patched, rule) {
                Ok(outcome) if outcome.matched() => {
                    debug!(
                        "patch set '{}': rule '{}' matched on second pass",
                        self.name,
                        rule.id()
                    );
                    return Err(PatchError::NotIdempotent {
                        rule: rule.id().to_string(),
                    });
                }
                Ok(_) | Err(PatchError::RuleNotMatched { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

/// Outcome of one rule within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleReport {
    pub id: String,
    pub required: bool,
    pub status: RuleStatus,
}

/// Result of applying a patch set to a document.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "PatchReport should be checked for a failed rule"]
pub struct PatchReport {
    /// Document after every attempted rule
    pub document: String,
    /// One entry per rule, in declared order
    pub rules: Vec<RuleReport>,
}

impl PatchReport {
    /// First rule that failed, if any.
    pub fn failure(&self) -> Option<&RuleReport> {
        self.rules
            .iter()
            .find(|r| r.status == RuleStatus::Failed)
    }

    pub fn is_success(&self) -> bool {
        self.failure().is_none()
    }

    /// Whether any rule rewrote the document.
    pub fn changed(&self) -> bool {
        self.rules.iter().any(|r| r.status.matched())
    }

    /// Total occurrences replaced across all rules.
    pub fn occurrences(&self) -> usize {
        self.rules.iter().map(|r| r.status.occurrences()).sum()
    }

    /// Convert a failed run into [`PatchError::RuleNotMatched`].
    pub fn into_result(self) -> Result<Self, PatchError> {
        if let Some(failed) = self.failure() {
            return Err(PatchError::RuleNotMatched {
                rule: failed.id.clone(),
            });
        }
        Ok(self)
    }
}

/// Apply every rule of `patch_set` to `document`, in order.
///
/// Stops at the first required rule that does not match: that rule is
/// reported as [`RuleStatus::Failed`] and every rule after it as
/// [`RuleStatus::NotAttempted`].
pub fn apply_patch_set(document: &str, patch_set: &PatchSet) -> PatchReport {
    let mut current = document.to_string();
    let mut rules = Vec::with_capacity(patch_set.len());
    let mut halted = false;

    for rule in patch_set.rules() {
        let status = if halted {
            RuleStatus::NotAttempted
        } else {
            match apply_rule(&current, rule) {
                Ok(RuleOutcome { document, status }) => {
                    if status.matched() {
                        current = document.into_owned();
                    }
                    status
                }
                Err(err) => {
                    warn!("patch set '{}': {}", patch_set.name(), err);
                    halted = true;
                    RuleStatus::Failed
                }
            }
        };
        rules.push(RuleReport {
            id: rule.id().to_string(),
            required: rule.is_required(),
            status,
        });
    }

    debug!(
        "patch set '{}': {} rule(s), halted = {}",
        patch_set.name(),
        rules.len(),
        halted
    );

    PatchReport {
        document: current,
        rules,
    }
}
