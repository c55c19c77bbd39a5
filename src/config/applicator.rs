//! Patch applicator - runs loaded patch files against the workspace
//!
//! This module ties a [`PatchConfig`] to its compiled [`PatchSet`] and:
//! - Resolves the target and output paths against the workspace root
//! - Applies the set fail-closed through [`patch_file`]
//! - Evaluates status read-only for `status` and `verify`
//! - Stages dry-run results so later sets see earlier sets' output

use crate::config::schema::PatchConfig;
use crate::document::{patch_file, patch_text, ApplyOptions, FileReport};
use crate::error::PatchError;
use crate::patch_set::PatchSet;
use crate::safety::WorkspaceGuard;
use log::debug;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Apply a patch file's rules to its target.
pub fn apply_config(
    config: &PatchConfig,
    patch_set: &PatchSet,
    guard: &WorkspaceGuard,
    options: ApplyOptions,
) -> Result<FileReport, PatchError> {
    patch_file(
        patch_set,
        Path::new(&config.meta.target),
        config.meta.output.as_deref().map(Path::new),
        guard,
        options,
    )
}

/// Evaluate a patch file without touching the workspace.
///
/// Result semantics mirror [`apply_config`]: `Applied` means "would apply".
pub fn check_config(
    config: &PatchConfig,
    patch_set: &PatchSet,
    guard: &WorkspaceGuard,
) -> Result<FileReport, PatchError> {
    apply_config(config, patch_set, guard, ApplyOptions { dry_run: true })
}

/// Dry run over a sequence of patch files.
///
/// A real run writes each set's result before the next set reads its target.
/// `DryRun` keeps those results in memory instead, keyed by output path, so
/// the counts and diffs it reports match what a real run would do.
#[derive(Debug, Default)]
pub struct DryRun {
    staged: HashMap<PathBuf, String>,
}

impl DryRun {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate one patch file against its staged or on-disk target.
    pub fn check(
        &mut self,
        config: &PatchConfig,
        patch_set: &PatchSet,
        guard: &WorkspaceGuard,
    ) -> Result<FileReport, PatchError> {
        let target = guard.validate_output(&config.meta.target)?;
        let result = match self.staged.get(&target) {
            Some(text) => {
                debug!("{}: reading staged {}", patch_set.name(), target.display());
                patch_text(
                    patch_set,
                    &target,
                    config.meta.output.as_deref().map(Path::new),
                    text,
                    guard,
                )?
            }
            None => check_config(config, patch_set, guard)?,
        };

        // A failed set writes nothing in a real run either.
        if result.is_success() && result.report.changed() {
            self.staged
                .insert(result.output.clone(), result.patched().to_string());
        }
        Ok(result)
    }

    /// Text a real run would have written to `path` so far, if any.
    pub fn staged(&self, path: &Path) -> Option<&str> {
        self.staged.get(path).map(String::as_str)
    }
}

/// Whether a patch file is fully reflected in its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// No rule would change the target
    Verified,
    /// These rules still match and would rewrite the target
    Pending { rules: Vec<String> },
    /// A required rule neither matches nor shows applied evidence
    Missing { rule: String },
    /// Applying the set would not converge: a second pass rewrites again
    Unstable { rule: String },
}

impl Verification {
    pub fn is_verified(&self) -> bool {
        matches!(self, Verification::Verified)
    }
}

impl fmt::Display for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verification::Verified => write!(f, "verified (already applied)"),
            Verification::Pending { rules } => {
                write!(f, "not yet applied: {}", rules.join(", "))
            }
            Verification::Missing { rule } => {
                write!(f, "rule '{rule}' did not match and shows no applied evidence")
            }
            Verification::Unstable { rule } => {
                write!(f, "rule '{rule}' still matches after the set is applied")
            }
        }
    }
}

/// Read-only verification of a patch file against its target.
pub fn verify_config(
    config: &PatchConfig,
    patch_set: &PatchSet,
    guard: &WorkspaceGuard,
) -> Result<(FileReport, Verification), PatchError> {
    let result = check_config(config, patch_set, guard)?;

    if let Some(failed) = result.report.failure() {
        let rule = failed.id.clone();
        return Ok((result, Verification::Missing { rule }));
    }

    match patch_set.check_idempotent(&result.original) {
        Ok(()) => {}
        Err(PatchError::NotIdempotent { rule }) => {
            return Ok((result, Verification::Unstable { rule }));
        }
        Err(err) => return Err(err),
    }

    let pending: Vec<String> = result
        .report
        .rules
        .iter()
        .filter(|r| r.status.matched())
        .map(|r| r.id.clone())
        .collect();

    let verification = if pending.is_empty() {
        Verification::Verified
    } else {
        Verification::Pending { rules: pending }
    };
    Ok((result, verification))
}
