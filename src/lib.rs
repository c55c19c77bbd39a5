//! Textpatch: pattern-guarded text substitution for generated source files
//!
//! Edits are declared as data: a [`PatchSet`] is an ordered list of
//! [`SubstitutionRule`]s, each a literal or regex matcher plus a replacement.
//! One reusable function applies them, in memory, to one document at a time.
//!
//! # Architecture
//!
//! - [`apply_rule`] rewrites one document version with one rule. Pure, no I/O.
//! - [`apply_patch_set`] threads a document through every rule in order and
//!   stops at the first required rule that does not match.
//! - [`patch_file`] is the file boundary: read once, apply, write once.
//!   [`patch_text`] runs the same step on staged text for dry runs.
//! - [`config`] loads patch sets from TOML files.
//!
//! # Safety
//!
//! - Malformed patterns and unknown capture references fail at construction
//! - Fail-closed: a missing required match means nothing is written
//! - Atomic file writes (tempfile + fsync + rename)
//! - The source file must be unchanged between read and write
//! - Workspace boundary enforcement
//! - Rules whose output re-matches their own matcher are guarded by applied
//!   evidence, so re-running a set is a no-op
//!
//! # Example
//!
//! ```
//! use textpatch::{PatchSet, Scope, SubstitutionRule};
//!
//! let set = PatchSet::new(
//!     "stop-playback",
//!     vec![SubstitutionRule::literal(
//!         "drop-fallback-call",
//!         "useCallback(() => {\n  stopTextToSpeechFallback();\n",
//!         "useCallback(() => {\n",
//!         Scope::First,
//!     )
//!     .unwrap()],
//! )
//! .unwrap();
//!
//! let report = set.apply("const stop = useCallback(() => {\n  stopTextToSpeechFallback();\n");
//! assert!(report.is_success());
//! assert_eq!(report.document, "const stop = useCallback(() => {\n");
//! ```

pub mod config;
pub mod diagnostic;
pub mod document;
pub mod error;
pub mod patch_set;
pub mod rule;
pub mod safety;

// Re-exports
pub use config::{
    apply_config, check_config, load_from_path, load_from_str, load_patch_set, verify_config,
    ConfigError, DryRun, PatchConfig, Verification,
};
pub use diagnostic::{near_miss, NearMiss};
pub use document::{patch_file, patch_text, ApplyOptions, Document, FileReport, Fingerprint};
pub use error::PatchError;
pub use patch_set::{apply_patch_set, PatchReport, PatchSet, RuleReport};
pub use rule::{
    apply_rule, Matcher, PatternOptions, Replacement, RuleOptions, RuleOutcome, RuleStatus,
    Scope, SubstitutionRule,
};
pub use safety::{SafetyError, WorkspaceGuard};
