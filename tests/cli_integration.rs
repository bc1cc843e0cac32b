//! CLI Integration Tests
//!
//! Tests the command-line interface end-to-end.

use assert_cmd::Command;
use assert_fs::prelude::*;
use predicates::prelude::*;

/// Get the binary to test.
fn modflow() -> Command {
    let mut cmd = Command::cargo_bin("modflow").unwrap();
    cmd.env_remove("RUST_LOG").env_remove("MODFLOW_CONFIG");
    cmd
}

// ============================================================================
// Help & Version Tests
// ============================================================================

#[test]
fn test_help_flag() {
    modflow()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Workflow engine for code migrations"));
}

#[test]
fn test_version_flag() {
    modflow()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_subcommand_required() {
    modflow().assert().failure().stderr(predicate::str::contains("Usage:"));
}

#[test]
fn test_completions_bash() {
    modflow()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("modflow"));
}

// ============================================================================
// Exec Tests
// ============================================================================

#[cfg(unix)]
#[test]
fn test_exec_prints_stdout() {
    let temp = assert_fs::TempDir::new().unwrap();

    modflow()
        .arg("--cwd")
        .arg(temp.path())
        .args(["exec", "echo", "hello", "world"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello world"));
}

#[cfg(unix)]
#[test]
fn test_exec_in_each_directory() {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("apps/web/.keep").touch().unwrap();
    temp.child("apps/api/.keep").touch().unwrap();
    temp.child("apps/README.md").touch().unwrap();

    modflow()
        .arg("--cwd")
        .arg(temp.path())
        .args(["exec", "--dirs", "apps/*", "pwd"])
        .assert()
        .success()
        .stdout(predicate::str::contains("apps/api").and(predicate::str::contains("apps/web")))
        .stdout(predicate::str::contains("README").not());
}

#[cfg(unix)]
#[test]
fn test_exec_failure_sets_exit_code() {
    let temp = assert_fs::TempDir::new().unwrap();

    modflow()
        .arg("--cwd")
        .arg(temp.path())
        .args(["exec", "sh", "-c", "exit 4"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("exec failed").and(predicate::str::contains("exited with code 4")));
}

#[cfg(unix)]
#[test]
fn test_print_tree() {
    let temp = assert_fs::TempDir::new().unwrap();

    modflow()
        .arg("--cwd")
        .arg(temp.path())
        .args(["--print-tree", "exec", "true"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""name": "exec""#))
        .stdout(predicate::str::contains(r#""content_hash""#));
}

// ============================================================================
// File Editing Tests
// ============================================================================

#[test]
fn test_add_import_merges_and_inserts() {
    let temp = assert_fs::TempDir::new().unwrap();
    let merged = temp.child("src/a.ts");
    merged.write_str("import { a } from \"m\";\nuse(a);\n").unwrap();
    let inserted = temp.child("src/b.tsx");
    inserted.write_str("render();\n").unwrap();
    let ignored = temp.child("node_modules/pkg/index.ts");
    ignored.write_str("export {};\n").unwrap();

    modflow()
        .arg("--cwd")
        .arg(temp.path())
        .args(["add-import", "import { b } from \"m\""])
        .assert()
        .success();

    merged.assert("import { a, b } from \"m\";\nuse(a);\n");
    inserted.assert("import { b } from \"m\";\nrender();\n");
    ignored.assert("export {};\n");
}

#[test]
fn test_remove_import_drops_empty_statement() {
    let temp = assert_fs::TempDir::new().unwrap();
    let file = temp.child("index.js");
    file.write_str("import { gone } from \"old\";\nimport { kept } from \"lib\";\nkept();\n").unwrap();

    modflow()
        .arg("--cwd")
        .arg(temp.path())
        .args(["remove-import", "import { gone } from \"old\"", "--files", "*.js"])
        .assert()
        .success();

    file.assert("import { kept } from \"lib\";\nkept();\n");
}

#[test]
fn test_replace_pattern() {
    let temp = assert_fs::TempDir::new().unwrap();
    let file = temp.child("app.js");
    file.write_str("console.log(a);\nconsole.log(b, c);\n").unwrap();
    let other = temp.child("notes.txt");
    other.write_str("console.log(a);\n").unwrap();

    modflow()
        .arg("--cwd")
        .arg(temp.path())
        .args(["replace", "console.log($$$ARGS)", "logger.info($$$ARGS)", "--files", "**/*.js"])
        .assert()
        .success();

    file.assert("logger.info(a);\nlogger.info(b, c);\n");
    other.assert("console.log(a);\n");
}

// ============================================================================
// Config Tests
// ============================================================================

#[test]
fn test_missing_config_file() {
    let temp = assert_fs::TempDir::new().unwrap();

    modflow()
        .arg("--cwd")
        .arg(temp.path())
        .args(["--config", "missing.toml", "replace", "a", "b"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}

#[test]
fn test_config_ignore_dirs() {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child(".modflow.toml").write_str("[general]\nignore_dirs = [\"vendor\"]\n").unwrap();
    let vendored = temp.child("vendor/lib.js");
    vendored.write_str("old();\n").unwrap();
    let own = temp.child("src/lib.js");
    own.write_str("old();\n").unwrap();

    modflow()
        .arg("--cwd")
        .arg(temp.path())
        .args(["replace", "old()", "new()", "--files", "**/*.js"])
        .assert()
        .success();

    vendored.assert("old();\n");
    own.assert("new();\n");
}

#[test]
fn test_missing_cwd() {
    modflow()
        .args(["--cwd", "/definitely/not/here", "replace", "a", "b"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Cannot change directory"));
}
