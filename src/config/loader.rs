use crate::config::schema::{PatchConfig, ValidationError};
use crate::error::PatchError;
use crate::patch_set::PatchSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Toml {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },
    Validation {
        path: Option<PathBuf>,
        source: ValidationError,
    },
    /// A rule failed to compile (bad pattern, unknown capture, ...)
    Rule {
        path: Option<PathBuf>,
        source: PatchError,
    },
}

impl ConfigError {
    fn with_path(self, path: &Path) -> Self {
        let path = Some(path.to_path_buf());
        match self {
            ConfigError::Toml { path: None, source } => ConfigError::Toml { path, source },
            ConfigError::Validation { path: None, source } => {
                ConfigError::Validation { path, source }
            }
            ConfigError::Rule { path: None, source } => ConfigError::Rule { path, source },
            other => other,
        }
    }
}

fn location(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" ({})", p.display()))
        .unwrap_or_default()
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(
                    f,
                    "failed to read patch file {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::Toml { path, source } => {
                write!(f, "failed to parse patch file TOML{}: {}", location(path), source)
            }
            ConfigError::Validation { path, source } => {
                write!(f, "invalid patch file{}: {}", location(path), source)
            }
            ConfigError::Rule { path, source } => {
                write!(f, "invalid rule in patch file{}: {}", location(path), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Toml { source, .. } => Some(source),
            ConfigError::Validation { source, .. } => Some(source),
            ConfigError::Rule { source, .. } => Some(source),
        }
    }
}

pub fn load_from_str(input: &str) -> Result<PatchConfig, ConfigError> {
    let config: PatchConfig = toml_edit::de::from_str(input)
        .map_err(|source| ConfigError::Toml { path: None, source })?;
    config
        .validate()
        .map_err(|source| ConfigError::Validation { path: None, source })?;
    Ok(config)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<PatchConfig, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&contents).map_err(|error| error.with_path(path))
}

/// Load, validate and compile a patch file in one step.
pub fn load_patch_set(path: impl AsRef<Path>) -> Result<(PatchConfig, PatchSet), ConfigError> {
    let path = path.as_ref();
    let config = load_from_path(path)?;
    let patch_set = config.to_patch_set().map_err(|source| ConfigError::Rule {
        path: Some(path.to_path_buf()),
        source,
    })?;
    Ok((config, patch_set))
}
