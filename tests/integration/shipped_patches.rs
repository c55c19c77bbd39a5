//! Integration tests for the patch sets shipped in `patches/`.
//!
//! Runs every set, in filename order, against a copy of the fixture
//! workspace under `tests/fixtures`.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use textpatch::config::{apply_config, load_patch_set, verify_config, DryRun, PatchConfig};
use textpatch::{ApplyOptions, PatchSet, RuleStatus, WorkspaceGuard};

fn manifest_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

fn shipped_patch_files() -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(manifest_dir().join("patches"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().and_then(|s| s.to_str()) == Some("toml"))
        .collect();
    files.sort();
    files
}

fn load_shipped() -> Vec<(PathBuf, PatchConfig, PatchSet)> {
    shipped_patch_files()
        .into_iter()
        .map(|path| {
            let (config, set) = load_patch_set(&path)
                .unwrap_or_else(|e| panic!("{} failed to load: {e}", path.display()));
            (path, config, set)
        })
        .collect()
}

fn copy_fixture(dest: &Path, relative: &str) {
    let target = dest.join(relative);
    fs::create_dir_all(target.parent().unwrap()).unwrap();
    fs::copy(manifest_dir().join("tests/fixtures").join(relative), target).unwrap();
}

fn setup_fixture_workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    copy_fixture(dir.path(), "client/src/App.jsx");
    copy_fixture(dir.path(), "server/index.js");
    dir
}

fn read(dir: &TempDir, relative: &str) -> String {
    fs::read_to_string(dir.path().join(relative)).unwrap()
}

#[test]
fn test_every_shipped_patch_file_compiles() {
    let loaded = load_shipped();
    assert_eq!(loaded.len(), 7, "expected seven shipped patch files");

    for (path, config, set) in &loaded {
        assert!(!set.is_empty(), "{} has no rules", path.display());
        assert!(
            config.meta.target == "client/src/App.jsx" || config.meta.target == "server/index.js",
            "{} targets an unexpected file",
            path.display()
        );
    }
}

#[test]
fn test_shipped_patches_run_in_filename_order() {
    let names: Vec<String> = load_shipped()
        .iter()
        .map(|(path, _, _)| path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();

    assert_eq!(
        names,
        vec![
            "10-extract-gemini-handlers.toml",
            "20-fix-text-handling.toml",
            "30-remove-audio-tts-check.toml",
            "40-update-clear-pending-tts.toml",
            "50-remove-tts-functions.toml",
            "60-clean-up-playback.toml",
            "70-rewrite-app-helpers.toml",
        ]
    );
}

#[test]
fn test_shipped_patches_apply_to_fixture() {
    let workspace = setup_fixture_workspace();
    let guard = WorkspaceGuard::new(workspace.path()).unwrap();

    for (path, config, set) in load_shipped() {
        let result = apply_config(&config, &set, &guard, ApplyOptions::default()).unwrap();
        assert!(
            result.is_success(),
            "{} failed: {:?}",
            path.display(),
            result.report.failure()
        );
        assert!(result.written, "{} wrote nothing", path.display());
        for rule in &result.report.rules {
            assert!(
                matches!(rule.status, RuleStatus::Applied { .. }),
                "{}: rule '{}' was {}",
                path.display(),
                rule.id,
                rule.status
            );
        }
    }

    let app = read(&workspace, "client/src/App.jsx");
    assert!(!app.contains("stopTextToSpeechFallback"));
    assert!(!app.contains("speakTextFallback"));
    assert!(!app.contains("ttsFallbackEnabledRef.current"));
    assert!(!app.contains("pendingTtsTimeoutRef.current"));
    assert!(!app.contains("currentTurnModeRef.current !== 'tts'"));
    assert!(app.contains("// No audio yet — release mic after a short wait"));
    assert!(app.contains("    [flushPcmChunks]\n"));
    assert!(app.contains("  const stopPlayback = useCallback(() => {\n    flushPcmChunks();\n  }, []);"));
    assert_eq!(app.matches("    const sendBootstrapPrompt = () => {").count(), 1);
    assert!(app.contains("    wsRef.current = socket;\n\n    const sendBootstrapPrompt = () => {"));
    assert!(app.contains("    };\n\n    socket.onopen = () => {"));
    assert!(app.contains("              sendBootstrapPrompt();\n"));
    assert!(app.contains("              if (shouldReturn) return;\n"));
    assert!(app.contains("          scheduleMicStart();\n"));
    assert_eq!(
        app.matches("micStartTimeoutRef.current = window.setTimeout").count(),
        1
    );
    assert!(app.contains("? `(كمّل من هنا بالظبط: \"${lastConv}\")`"));

    let server = read(&workspace, "server/index.js");
    assert_eq!(server.matches("const handleGeminiMessage = (message) => {").count(), 1);
    let handlers = server.find("const handleTranscription = (sc) => {").unwrap();
    let reconnect = server.find("const scheduleReconnect = async").unwrap();
    assert!(handlers < reconnect);
}

#[test]
fn test_shipped_patches_are_idempotent() {
    let workspace = setup_fixture_workspace();
    let guard = WorkspaceGuard::new(workspace.path()).unwrap();
    let loaded = load_shipped();

    for (_, config, set) in &loaded {
        apply_config(config, set, &guard, ApplyOptions::default()).unwrap();
    }
    let app_once = read(&workspace, "client/src/App.jsx");
    let server_once = read(&workspace, "server/index.js");

    for (path, config, set) in &loaded {
        let result = apply_config(config, set, &guard, ApplyOptions::default()).unwrap();
        assert!(result.is_success(), "{} failed on re-run", path.display());
        assert!(!result.written, "{} rewrote its target", path.display());
        assert!(result.report.rules.iter().all(|r| !r.status.matched()));
    }

    assert_eq!(read(&workspace, "client/src/App.jsx"), app_once);
    assert_eq!(read(&workspace, "server/index.js"), server_once);

    for (path, config, set) in &loaded {
        let (_, verification) = verify_config(config, set, &guard).unwrap();
        assert!(
            verification.is_verified(),
            "{}: {}",
            path.display(),
            verification
        );
    }
}

#[test]
fn test_fail_closed_on_drifted_target() {
    let workspace = setup_fixture_workspace();
    let app_path = workspace.path().join("client/src/App.jsx");

    // Upstream drift: the decision timer moved to 1000ms, so the pattern misses.
    let drifted = fs::read_to_string(&app_path)
        .unwrap()
        .replace("}, 1200);", "}, 1000);");
    fs::write(&app_path, &drifted).unwrap();

    let guard = WorkspaceGuard::new(workspace.path()).unwrap();
    let (config, set) =
        load_patch_set(manifest_dir().join("patches/20-fix-text-handling.toml")).unwrap();

    let result = apply_config(&config, &set, &guard, ApplyOptions::default()).unwrap();
    assert!(!result.is_success());
    assert!(!result.written);
    assert_eq!(
        result.report.failure().map(|r| r.id.as_str()),
        Some("replace-tts-decision-branch")
    );
    assert_eq!(fs::read_to_string(&app_path).unwrap(), drifted);
}

#[test]
fn test_drifted_dependency_list_is_not_mistaken_for_applied() {
    let workspace = setup_fixture_workspace();
    let app_path = workspace.path().join("client/src/App.jsx");

    // Upstream drift: stopPlayback gained a dependency. `  }, []);` still
    // appears elsewhere in the file, which must not count as applied.
    let original = fs::read_to_string(&app_path).unwrap();
    let drifted = original.replace(
        "    flushPcmChunks();\n  }, [stopTextToSpeechFallback]);",
        "    flushPcmChunks();\n  }, [stopTextToSpeechFallback, flushPcmChunks]);",
    );
    assert_ne!(drifted, original);
    fs::write(&app_path, &drifted).unwrap();

    let guard = WorkspaceGuard::new(workspace.path()).unwrap();
    for (path, config, set) in load_shipped() {
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        if name.starts_with("60-") {
            break;
        }
        let result = apply_config(&config, &set, &guard, ApplyOptions::default()).unwrap();
        assert!(result.is_success(), "{name} failed");
    }

    let before = fs::read_to_string(&app_path).unwrap();
    assert!(before.contains("  }, []);"));

    let (config, set) =
        load_patch_set(manifest_dir().join("patches/60-clean-up-playback.toml")).unwrap();
    let result = apply_config(&config, &set, &guard, ApplyOptions::default()).unwrap();

    assert!(!result.is_success());
    assert!(!result.written);
    assert_eq!(
        result.report.rules[0].status,
        RuleStatus::Applied { occurrences: 1 }
    );
    assert_eq!(
        result.report.failure().map(|r| r.id.as_str()),
        Some("stop-playback-deps")
    );
    assert_eq!(fs::read_to_string(&app_path).unwrap(), before);
}

#[test]
fn test_dry_run_counts_match_a_real_run() {
    let dry = setup_fixture_workspace();
    let real = setup_fixture_workspace();
    let dry_guard = WorkspaceGuard::new(dry.path()).unwrap();
    let real_guard = WorkspaceGuard::new(real.path()).unwrap();

    let app_before = read(&dry, "client/src/App.jsx");
    let server_before = read(&dry, "server/index.js");

    let mut staging = DryRun::new();
    let mut app_output = None;
    for (path, config, set) in load_shipped() {
        let staged = staging.check(&config, &set, &dry_guard).unwrap();
        let applied = apply_config(&config, &set, &real_guard, ApplyOptions::default()).unwrap();

        assert!(staged.is_success(), "{} failed in dry run", path.display());
        assert!(!staged.written);
        assert_eq!(
            staged.report.rules,
            applied.report.rules,
            "{}: dry run and real run disagree",
            path.display()
        );
        assert_eq!(staged.patched(), applied.patched());

        if config.meta.target == "client/src/App.jsx" {
            app_output = Some(staged.output.clone());
        }
        if set.name() == "clean-up-playback" {
            let deps = staged
                .report
                .rules
                .iter()
                .find(|r| r.id == "stop-playback-deps")
                .unwrap();
            assert_eq!(deps.status, RuleStatus::Applied { occurrences: 1 });
        }
    }

    assert_eq!(
        staging.staged(&app_output.unwrap()),
        Some(read(&real, "client/src/App.jsx").as_str())
    );
    assert_eq!(read(&dry, "client/src/App.jsx"), app_before);
    assert_eq!(read(&dry, "server/index.js"), server_before);
}
