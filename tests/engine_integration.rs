//! Engine Integration Tests
//!
//! Pipelines built from the public steps, run under isolated runtimes.

use std::path::Path;
use std::sync::Arc;

use modflow::core::context::with_cwd;
use modflow::core::{MigrationRunner, Result, Runtime, WorkflowError};
use modflow::structural::{MatchNode, Matcher, Query};
use modflow::{ast_grep, dirs, dirs_with, exec, files, js_files};

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn read(root: &Path, rel: &str) -> String {
    std::fs::read_to_string(root.join(rel)).unwrap()
}

// ============================================================================
// Directory + File Pipelines
// ============================================================================

#[tokio::test]
async fn test_dirs_js_files_add_import() {
    let temp = tempfile::tempdir().unwrap();
    write(temp.path(), "apps/one/a.ts", "import { w } from \"y\";\nw();\n");
    write(temp.path(), "apps/two/b.ts", "run();\n");
    write(temp.path(), "apps/two/nested/c.ts", "run();\n");

    let runtime = Runtime::builder().build();
    runtime
        .clone()
        .enter(with_cwd(temp.path(), async {
            dirs_with("apps/*", |dir| async move {
                dir.js_files_with("*.ts", |js| async move {
                    js.add_import("import { x } from \"y\"").await
                })
                .await
            })
            .await
        }))
        .await
        .unwrap();

    assert_eq!(read(temp.path(), "apps/one/a.ts"), "import { w, x } from \"y\";\nw();\n");
    assert_eq!(read(temp.path(), "apps/two/b.ts"), "import { x } from \"y\";\nrun();\n");
    assert_eq!(read(temp.path(), "apps/two/nested/c.ts"), "run();\n");

    let tree = runtime.registry().snapshot();
    assert_eq!(tree.len(), 2);
    for visit in &tree {
        assert_eq!(visit.name, "dirs");
        assert_eq!(visit.children.len(), 1);
        assert_eq!(visit.children[0].name, "jsFiles");
        assert_eq!(visit.children[0].arguments, ["*.ts"]);
    }
    assert!(tree[0].arguments[0].ends_with("one"));
    assert!(tree[1].arguments[0].ends_with("two"));
}

#[tokio::test]
async fn test_chained_form_matches_callback_form() {
    let temp = tempfile::tempdir().unwrap();
    write(temp.path(), "apps/one/a.ts", "w();\n");
    write(temp.path(), "apps/two/b.ts", "run();\n");

    let runtime = Runtime::builder().build();
    runtime
        .clone()
        .enter(with_cwd(temp.path(), async {
            dirs("apps/*").js_files("*.ts").add_import("import { x } from \"y\"").await
        }))
        .await
        .unwrap();

    assert_eq!(read(temp.path(), "apps/one/a.ts"), "import { x } from \"y\";\nw();\n");
    assert_eq!(read(temp.path(), "apps/two/b.ts"), "import { x } from \"y\";\nrun();\n");

    let tree = runtime.registry().snapshot();
    assert_eq!(tree.len(), 2);
    for visit in &tree {
        assert_eq!(visit.name, "dirs");
        assert_eq!(visit.children.len(), 1);
        assert_eq!(visit.children[0].name, "jsFiles");
        assert_eq!(visit.children[0].arguments, ["*.ts"]);
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_step_runs_in_directory_where_awaited() {
    let built_in = tempfile::tempdir().unwrap();
    let awaited_in = tempfile::tempdir().unwrap();

    let outputs = Runtime::builder()
        .build()
        .enter(async {
            let step = with_cwd(built_in.path(), async { exec("pwd", Vec::<String>::new()) }).await;
            with_cwd(awaited_in.path(), async { step.await }).await
        })
        .await
        .unwrap();

    let printed = std::path::PathBuf::from(outputs[0].stdout_text());
    assert_eq!(printed.canonicalize().unwrap(), awaited_in.path().canonicalize().unwrap());
}

#[tokio::test]
async fn test_map_collects_across_files() {
    let temp = tempfile::tempdir().unwrap();
    write(temp.path(), "a.js", "todo(1);\ntodo(2);\n");
    write(temp.path(), "b.js", "todo(3);\n");
    write(temp.path(), "c.txt", "todo(4);\n");

    let found = Runtime::builder()
        .build()
        .enter(with_cwd(temp.path(), async {
            files("*.js")
                .ast_grep("todo($N)")
                .map(|node| node.get_match("N").map(|n| n.text().to_string()).unwrap_or_default())
                .await
        }))
        .await
        .unwrap();

    assert_eq!(found, ["2", "1", "3"]);
}

#[tokio::test]
async fn test_sequential_pipelines_on_same_file() {
    let temp = tempfile::tempdir().unwrap();
    write(
        temp.path(),
        "src/index.ts",
        "import { legacy } from \"old\";\nlegacy(1);\nlegacy(2);\n",
    );

    Runtime::builder()
        .build()
        .enter(with_cwd(temp.path(), async {
            js_files("src/**/*.ts")
                .remove_import("import { legacy } from \"old\"")
                .await?;
            js_files("src/**/*.ts").add_import("import { modern } from \"new\"").await?;
            files("src/**/*.ts").ast_grep("legacy($A)").replace("modern($A)").await
        }))
        .await
        .unwrap();

    assert_eq!(
        read(temp.path(), "src/index.ts"),
        "import { modern } from \"new\";\nmodern(1);\nmodern(2);\n"
    );
}

#[tokio::test]
async fn test_steps_need_their_context() {
    let err = ast_grep("a()").await.unwrap_err();
    assert!(matches!(err, WorkflowError::MissingContext(_)));

    let err = modflow::files::add_import("import { a } from \"b\"").await.unwrap_err();
    assert!(err.is_missing_context());
}

// ============================================================================
// Custom Matcher
// ============================================================================

/// Plain substring search, ignoring word boundaries.
struct SubstringMatcher;

impl Matcher for SubstringMatcher {
    fn name(&self) -> &str {
        "substring"
    }

    fn find_all(&self, _path: &Path, source: &str, query: &Query) -> Result<Vec<MatchNode>> {
        let Query::Pattern(needle) = query else {
            return Err(WorkflowError::Pattern("only plain patterns".to_string()));
        };
        Ok(source
            .match_indices(needle.as_str())
            .map(|(start, text)| MatchNode::new(text, start..start + text.len()))
            .collect())
    }
}

#[tokio::test]
async fn test_runtime_matcher_is_used() {
    let temp = tempfile::tempdir().unwrap();
    write(temp.path(), "words.txt", "foo foo-bar food\n");

    Runtime::builder()
        .matcher(Arc::new(SubstringMatcher))
        .build()
        .enter(with_cwd(temp.path(), async {
            files("*.txt").ast_grep("foo").replace("bar").await
        }))
        .await
        .unwrap();

    assert_eq!(read(temp.path(), "words.txt"), "bar bar-bar bard\n");
}

// ============================================================================
// Laziness
// ============================================================================

#[cfg(unix)]
#[tokio::test]
async fn test_chain_is_lazy_and_shared() {
    let temp = tempfile::tempdir().unwrap();
    let log = temp.path().join("log");

    Runtime::builder()
        .build()
        .enter(with_cwd(temp.path(), async {
            let chain = exec("sh", ["-c", "echo run >> log"]);
            tokio::task::yield_now().await;
            assert!(!log.exists());

            let lazy = chain.into_lazy();
            let other = lazy.clone();
            let (first, second) = tokio::join!(lazy.subscribe(), other.subscribe());
            assert_eq!(first.unwrap().len(), 1);
            assert_eq!(second.unwrap().len(), 1);
        }))
        .await;

    assert_eq!(std::fs::read_to_string(&log).unwrap(), "run\n");
}

#[cfg(unix)]
#[tokio::test]
#[serial_test::serial]
async fn test_exec_defaults_to_process_directory() {
    let temp = tempfile::tempdir().unwrap();
    let previous = std::env::current_dir().unwrap();
    std::env::set_current_dir(temp.path()).unwrap();

    let outputs = Runtime::builder().build().enter(async { exec("pwd", Vec::<String>::new()).await }).await;
    std::env::set_current_dir(previous).unwrap();

    let expected = temp.path().canonicalize().unwrap();
    let printed = std::path::PathBuf::from(outputs.unwrap()[0].stdout_text());
    assert_eq!(printed.canonicalize().unwrap(), expected);
}

// ============================================================================
// Migration Runner
// ============================================================================

#[tokio::test]
async fn test_runner_keeps_going_after_failed_step() {
    let temp = tempfile::tempdir().unwrap();
    write(temp.path(), "a.js", "x();\n");
    let root = temp.path().to_path_buf();
    let runtime = Runtime::builder().build();

    let report = runtime
        .enter(with_cwd(
            temp.path(),
            MigrationRunner::new()
                .step("outside file", || async { anyhow::Ok(ast_grep("x()").replace("y()").await?) })
                .step("rewrite", || async {
                    anyhow::Ok(files("*.js").ast_grep("x()").replace("y()").await?)
                })
                .run(),
        ))
        .await;

    assert_eq!(report.steps.len(), 2);
    assert_eq!(report.succeeded(), 1);
    let failed: Vec<_> = report.failed().collect();
    assert_eq!(failed[0].name, "outside file");
    assert!(failed[0].error.as_deref().unwrap().contains("context"));
    assert_eq!(read(&root, "a.js"), "y();\n");
}

// ============================================================================
// AI Patching
// ============================================================================

#[cfg(feature = "ai")]
mod ai {
    use async_trait::async_trait;
    use modflow::ai::{AiError, CompletionRequest, CompletionService};

    use super::*;

    /// Echoes the labelled prompt back with `old(` renamed.
    struct Renamer;

    #[async_trait]
    impl CompletionService for Renamer {
        fn name(&self) -> &str {
            "renamer"
        }

        async fn complete(&self, request: &CompletionRequest) -> std::result::Result<String, AiError> {
            Ok(format!("Sure.\n```ts\n{}\n```\n", request.user.replace("old(", "new(")))
        }
    }

    #[tokio::test]
    async fn test_ai_patches_every_file() {
        let temp = tempfile::tempdir().unwrap();
        write(temp.path(), "a.ts", "old(1);\nkeep();\nold(2);\n");
        write(temp.path(), "b.ts", "old(3);\n");

        let report = Runtime::builder()
            .completion(Arc::new(Renamer))
            .build()
            .enter(with_cwd(temp.path(), async {
                files("*.ts").ast_grep("old($A)").ai("rename the calls").await
            }))
            .await
            .unwrap();

        assert_eq!(report.written.len(), 2);
        assert!(report.skipped.is_empty());
        assert_eq!(read(temp.path(), "a.ts"), "new(1);\nkeep();\nnew(2);\n");
        assert_eq!(read(temp.path(), "b.ts"), "new(3);\n");
    }
}
