//! File boundary: load a document, run a patch set, write the result back.
//!
//! Reads happen once, before any rule runs. Writes happen once, after every
//! required rule matched, and go through tempfile + fsync + rename so an
//! interrupted run never leaves a half-written file behind.

use crate::error::PatchError;
use crate::patch_set::{apply_patch_set, PatchReport, PatchSet};
use crate::safety::WorkspaceGuard;
use log::{debug, info, warn};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use xxhash_rust::xxh3::xxh3_64;

/// xxh3 hash of a document's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub fn of(text: &str) -> Self {
        Fingerprint(xxh3_64(text.as_bytes()))
    }

    pub fn matches(&self, text: &str) -> bool {
        *self == Self::of(text)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// A UTF-8 text file loaded in full.
#[derive(Debug, Clone)]
pub struct Document {
    path: PathBuf,
    text: String,
    fingerprint: Fingerprint,
}

impl Document {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, PatchError> {
        let path = path.into();
        let text = fs::read_to_string(&path).map_err(|source| PatchError::Io {
            path: path.clone(),
            source,
        })?;
        let fingerprint = Fingerprint::of(&text);
        debug!(
            "loaded {} ({} bytes, xxh3 {:016x})",
            path.display(),
            text.len(),
            fingerprint.value()
        );
        Ok(Self {
            path,
            text,
            fingerprint,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Whether the file on disk still holds the text that was loaded.
    pub fn is_current(&self) -> Result<bool, PatchError> {
        let on_disk = fs::read_to_string(&self.path).map_err(|source| PatchError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(self.fingerprint.matches(&on_disk))
    }

    /// Atomically write `text` to `output`.
    ///
    /// Refuses with [`PatchError::ConcurrentModification`] if the source file
    /// changed since it was loaded.
    pub fn persist(&self, output: &Path, text: &str) -> Result<(), PatchError> {
        if !self.is_current()? {
            return Err(PatchError::ConcurrentModification {
                path: self.path.clone(),
            });
        }

        let io_err = |source| PatchError::Io {
            path: output.to_path_buf(),
            source,
        };
        atomic_write(output, text.as_bytes()).map_err(io_err)?;
        bump_mtime(output);

        Ok(())
    }
}

/// Set `path`'s mtime to now. Dev servers watching the tree key off mtime.
///
/// Runs after the rename has landed, so a failure here only loses the
/// notification and is logged rather than returned.
fn bump_mtime(path: &Path) {
    let now = filetime::FileTime::now();
    if let Err(e) = filetime::set_file_mtime(path, now) {
        warn!("wrote {} but could not update its mtime: {}", path.display(), e);
    }
}

/// Knobs for [`patch_file`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Run every rule but never write
    pub dry_run: bool,
}

/// Result of running one patch set against one file.
#[derive(Debug, Clone)]
#[must_use = "FileReport should be checked for a failed rule"]
pub struct FileReport {
    pub patch_set: String,
    pub target: PathBuf,
    pub output: PathBuf,
    /// Text as it was read, before any rule ran
    pub original: String,
    pub report: PatchReport,
    /// Whether the output file was written
    pub written: bool,
}

impl FileReport {
    pub fn is_success(&self) -> bool {
        self.report.is_success()
    }

    pub fn patched(&self) -> &str {
        &self.report.document
    }
}

/// Read `target`, apply `patch_set`, and write the result to `output`
/// (or back to `target`).
///
/// Fail-closed: if any required rule did not match, nothing is written and
/// the report says which rule failed. Paths are checked against `guard`
/// before reading and again right before writing.
pub fn patch_file(
    patch_set: &PatchSet,
    target: &Path,
    output: Option<&Path>,
    guard: &WorkspaceGuard,
    options: ApplyOptions,
) -> Result<FileReport, PatchError> {
    let target = guard.validate_path(target)?;
    let output = match output {
        Some(path) => guard.validate_output(path)?,
        None => target.clone(),
    };

    let document = Document::load(&target)?;
    let report = apply_patch_set(document.text(), patch_set);

    let needs_write = if output == target {
        report.changed()
    } else {
        fs::read_to_string(&output).map_or(true, |existing| existing != report.document)
    };

    let mut written = false;
    if let Some(failed) = report.failure() {
        warn!(
            "{}: required rule '{}' did not match; {} left untouched",
            patch_set.name(),
            failed.id,
            output.display()
        );
    } else if options.dry_run {
        debug!("{}: dry run, not writing", patch_set.name());
    } else if needs_write {
        let output = guard.revalidate(&output)?;
        document.persist(&output, &report.document)?;
        info!(
            "{}: wrote {} ({} occurrence(s) replaced)",
            patch_set.name(),
            output.display(),
            report.occurrences()
        );
        written = true;
    } else {
        debug!("{}: nothing to write", patch_set.name());
    }

    Ok(FileReport {
        patch_set: patch_set.name().to_string(),
        target,
        output,
        original: document.text,
        report,
        written,
    })
}

/// Apply `patch_set` to `text` as though it were the current content of
/// `target`. Nothing is read or written.
///
/// Dry runs use this to carry the result of one set into the next set that
/// targets the same file.
pub fn patch_text(
    patch_set: &PatchSet,
    target: &Path,
    output: Option<&Path>,
    text: &str,
    guard: &WorkspaceGuard,
) -> Result<FileReport, PatchError> {
    // The target may only exist as staged text, e.g. an earlier set's output.
    let target = guard.validate_output(target)?;
    let output = match output {
        Some(path) => guard.validate_output(path)?,
        None => target.clone(),
    };
    let report = apply_patch_set(text, patch_set);

    if let Some(failed) = report.failure() {
        warn!(
            "{}: required rule '{}' did not match",
            patch_set.name(),
            failed.id
        );
    }

    Ok(FileReport {
        patch_set: patch_set.name().to_string(),
        target,
        output,
        original: text.to_string(),
        report,
        written: false,
    })
}

/// Atomic file write: tempfile + fsync + rename.
///
/// Either the full write lands or the old file stays as it was. Permissions
/// of an existing file carry over to the replacement.
fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    // Same directory keeps the rename on one filesystem
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "Path has no parent directory",
        )
    })?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;

    if let Ok(metadata) = fs::metadata(path) {
        fs::set_permissions(temp.path(), metadata.permissions())?;
    }

    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}
