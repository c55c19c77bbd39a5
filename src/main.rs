use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use similar::{ChangeTag, TextDiff};
use std::env;
use std::path::{Path, PathBuf};
use textpatch::config::{
    apply_config, check_config, load_patch_set, verify_config, DryRun, PatchConfig,
};
use textpatch::{
    near_miss, ApplyOptions, FileReport, PatchSet, RuleStatus, Verification, WorkspaceGuard,
};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "textpatch")]
#[command(about = "Pattern-guarded text substitution driven by TOML patch sets", long_about = None)]
#[command(version)]
struct Cli {
    /// Debug logging; takes precedence over RUST_LOG
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply patch sets to their target files
    Apply {
        /// Path to workspace root (defaults to TEXTPATCH_WORKSPACE or the current directory)
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// Specific patch file to apply (otherwise applies all in patches/)
        #[arg(short, long)]
        patches: Option<PathBuf>,

        /// Dry run - run every rule but write nothing
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,
    },

    /// Show which rules are pending, applied or missing
    Status {
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        #[arg(short, long)]
        patches: Option<PathBuf>,
    },

    /// Check that every patch set is already applied and stable
    Verify {
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        #[arg(short, long)]
        patches: Option<PathBuf>,
    },

    /// List patch files, their targets and rules
    List {
        #[arg(short, long)]
        workspace: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if cli.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.format_timestamp(None).init();

    match cli.command {
        Commands::Apply {
            workspace,
            patches,
            dry_run,
            diff,
        } => cmd_apply(workspace, patches, dry_run, diff),

        Commands::Status { workspace, patches } => cmd_status(workspace, patches),

        Commands::Verify { workspace, patches } => cmd_verify(workspace, patches),

        Commands::List { workspace } => cmd_list(workspace),
    }
}

/// Helper: Discover all .toml patch files in a patches/ directory.
///
/// Discovery order:
/// 1. `<workspace>/patches`
/// 2. `./patches` relative to the current working directory
///
/// Files are returned sorted by name; the name prefix is the run order.
fn discover_patch_files(workspace: &Path) -> Result<Vec<PathBuf>> {
    let cwd_patches_dir = env::current_dir().ok().map(|cwd| cwd.join("patches"));
    let workspace_patches_dir = workspace.join("patches");

    let candidate_dirs: Vec<PathBuf> = std::iter::once(workspace_patches_dir)
        .chain(cwd_patches_dir)
        .collect();

    for patches_dir in candidate_dirs {
        if !patches_dir.exists() {
            continue;
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&patches_dir).max_depth(1) {
            let entry = entry?;
            if entry.file_type().is_file()
                && entry.path().extension().and_then(|s| s.to_str()) == Some("toml")
            {
                files.push(entry.path().to_path_buf());
            }
        }

        files.sort();

        if !files.is_empty() {
            return Ok(files);
        }
    }

    anyhow::bail!(
        "No .toml patch files found in either ./patches or {}/patches",
        workspace.display()
    )
}

/// Resolve workspace path
///
/// Priority order:
/// 1. Explicit --workspace flag
/// 2. TEXTPATCH_WORKSPACE environment variable
/// 3. Current directory
fn resolve_workspace(cli_workspace: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = cli_workspace {
        return path
            .canonicalize()
            .with_context(|| format!("workspace {} does not exist", path.display()));
    }

    if let Ok(env_path) = env::var("TEXTPATCH_WORKSPACE") {
        let path = PathBuf::from(&env_path);
        if path.exists() {
            return Ok(path.canonicalize()?);
        }
        eprintln!(
            "{}",
            format!(
                "Warning: TEXTPATCH_WORKSPACE is set but path doesn't exist: {}",
                env_path
            )
            .yellow()
        );
    }

    Ok(env::current_dir()?.canonicalize()?)
}

/// Load and compile every patch file up front so a malformed rule anywhere
/// aborts before any target is touched.
fn load_all(
    workspace: &Path,
    patches: Option<PathBuf>,
) -> Result<Vec<(PathBuf, PatchConfig, PatchSet)>> {
    let patch_files = match patches {
        Some(path) => vec![path],
        None => discover_patch_files(workspace)?,
    };

    let mut loaded = Vec::with_capacity(patch_files.len());
    for path in patch_files {
        let (config, set) = load_patch_set(&path)?;
        loaded.push((path, config, set));
    }
    Ok(loaded)
}

/// Helper: Show unified diff between original and modified content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
}

/// One line per rule: matched/not matched and the occurrence count.
fn print_rule_lines(result: &FileReport) {
    for rule in &result.report.rules {
        let glyph = match rule.status {
            RuleStatus::Applied { .. } => "✓".green(),
            RuleStatus::AlreadyApplied => "⊙".yellow(),
            RuleStatus::Skipped => "⊘".cyan(),
            RuleStatus::Failed => "✗".red(),
            RuleStatus::NotAttempted => "-".dimmed(),
        };
        println!("{} {}: {}", glyph, rule.id, rule.status);
    }
}

/// Explain a failed required rule, pointing at the closest line if any.
fn print_failure(result: &FileReport, set: &PatchSet) {
    let Some(failed) = result.report.failure() else {
        return;
    };

    eprintln!(
        "  {}",
        format!("CONFLICT: required rule '{}' did not match", failed.id).red()
    );
    eprintln!("  File: {}", result.target.display());

    if let Some(rule) = set.rules().iter().find(|r| r.id() == failed.id) {
        if let Some(hit) = near_miss(&result.report.document, rule.matcher()) {
            eprintln!(
                "  Closest line {} ({:.0}% similar): {}",
                hit.line,
                hit.similarity * 100.0,
                hit.text.dimmed()
            );
        }
    }
    eprintln!("  Nothing was written.");
    eprintln!("Search block not found.");
}

fn cmd_apply(
    workspace: Option<PathBuf>,
    patches: Option<PathBuf>,
    dry_run: bool,
    show_diff: bool,
) -> Result<()> {
    let workspace = resolve_workspace(workspace)?;
    let loaded = load_all(&workspace, patches)?;
    let guard = WorkspaceGuard::new(&workspace)?;

    println!("Workspace: {}", workspace.display());
    println!();

    let mut total_applied = 0;
    let mut total_already_applied = 0;
    let mut total_skipped = 0;
    let mut total_failed = 0;
    let mut staging = DryRun::new();

    for (patch_file, config, set) in loaded {
        println!(
            "Applying {} ({}) to {}...",
            set.name(),
            patch_file.display(),
            config.meta.target
        );
        if dry_run {
            println!("{}", "  [DRY RUN - nothing will be written]".cyan());
        }

        let result = if dry_run {
            staging.check(&config, &set, &guard)
        } else {
            apply_config(&config, &set, &guard, ApplyOptions::default())
        }
        .with_context(|| format!("failed to apply {}", patch_file.display()))?;

        print_rule_lines(&result);

        for rule in &result.report.rules {
            match rule.status {
                RuleStatus::Applied { .. } => total_applied += 1,
                RuleStatus::AlreadyApplied => total_already_applied += 1,
                RuleStatus::Skipped => total_skipped += 1,
                RuleStatus::Failed => total_failed += 1,
                RuleStatus::NotAttempted => {}
            }
        }

        if result.is_success() {
            if show_diff && result.original != result.patched() {
                display_diff(&result.output, &result.original, result.patched());
            }
            if result.written {
                println!("  Wrote {}", result.output.display());
            }
        } else {
            print_failure(&result, &set);
            // Later patch sets may depend on this one having run.
            println!();
            break;
        }

        println!();
    }

    println!("{}", "Summary:".bold());
    println!("  {} applied", format!("{}", total_applied).green());
    println!(
        "  {} already applied",
        format!("{}", total_already_applied).yellow()
    );
    println!("  {} skipped", format!("{}", total_skipped).cyan());
    println!("  {} failed", format!("{}", total_failed).red());

    if total_failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_status(workspace: Option<PathBuf>, patches: Option<PathBuf>) -> Result<()> {
    let workspace = resolve_workspace(workspace)?;
    let loaded = load_all(&workspace, patches)?;
    let guard = WorkspaceGuard::new(&workspace)?;

    println!("{}", "Patch Status Report".bold());
    println!("Workspace: {}", workspace.display());
    println!();

    for (_, config, set) in loaded {
        println!("{} -> {}", set.name().bold(), config.meta.target);

        // Read-only; each set is evaluated against the file as it is now.
        let result = match check_config(&config, &set, &guard) {
            Ok(result) => result,
            Err(e) => {
                eprintln!("  {} {}", "✗".red(), e);
                println!();
                continue;
            }
        };

        for rule in &result.report.rules {
            let label = match rule.status {
                RuleStatus::Applied { occurrences } => {
                    format!("PENDING ({} occurrence(s))", occurrences).yellow()
                }
                RuleStatus::AlreadyApplied => "APPLIED".green(),
                RuleStatus::Skipped => "NOT FOUND (optional)".cyan(),
                RuleStatus::Failed => "MISSING".red(),
                RuleStatus::NotAttempted => "BLOCKED".dimmed(),
            };
            println!("  - {}: {}", rule.id, label);
        }
        println!();
    }

    Ok(())
}

fn cmd_verify(workspace: Option<PathBuf>, patches: Option<PathBuf>) -> Result<()> {
    let workspace = resolve_workspace(workspace)?;
    let loaded = load_all(&workspace, patches)?;
    let guard = WorkspaceGuard::new(&workspace)?;

    println!("{}", "Verifying patches...".bold());
    println!("Workspace: {}", workspace.display());
    println!();

    let mut verified = 0;
    let mut mismatch = 0;

    for (_, config, set) in loaded {
        match verify_config(&config, &set, &guard) {
            Ok((_, Verification::Verified)) => {
                println!("{} {}: Verified (already applied)", "✓".green(), set.name());
                verified += 1;
            }
            Ok((result, verification)) => {
                eprintln!("{} {}: MISMATCH", "✗".red(), set.name());
                eprintln!("  {}", verification);
                eprintln!("  Location: {}", result.target.display());
                mismatch += 1;
            }
            Err(e) => {
                eprintln!("{} {}: MISMATCH", "✗".red(), set.name());
                eprintln!("  Error: {}", e);
                mismatch += 1;
            }
        }
    }

    println!();
    println!("{}", "Summary:".bold());
    println!("  {} verified", format!("{}", verified).green());
    println!("  {} mismatch", format!("{}", mismatch).red());

    if mismatch > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_list(workspace: Option<PathBuf>) -> Result<()> {
    let workspace = resolve_workspace(workspace)?;

    for (patch_file, config, set) in load_all(&workspace, None)? {
        let file_name = patch_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        println!("{} {}", file_name.bold(), format!("-> {}", config.meta.target).dimmed());
        if let Some(description) = &config.meta.description {
            println!("  {}", description);
        }
        for rule in set.rules() {
            let kind = if rule.matcher().is_pattern() {
                "regex"
            } else {
                "literal"
            };
            let required = if rule.is_required() {
                "required".red()
            } else {
                "optional".cyan()
            };
            println!(
                "  - {} [{}, scope={}, {}]",
                rule.id(),
                kind,
                rule.scope(),
                required
            );
        }
        println!();
    }

    Ok(())
}
