pub mod applicator;
pub mod loader;
pub mod schema;

pub use applicator::{apply_config, check_config, verify_config, DryRun, Verification};
pub use loader::{load_from_path, load_from_str, load_patch_set, ConfigError};
pub use schema::{
    MatcherDef, Metadata, Operation, PatchConfig, RuleDefinition, ValidationError,
    ValidationIssue,
};
