//! Performance benchmarks for modflow.
//!
//! This module contains benchmarks for:
//! - Structural pattern matching over generated sources
//! - Import reconciliation with many queued edits
//! - Glob walking over a generated directory tree
//! - Argument parsing and execution tree hashing
//!
//! Run with: `cargo bench`

use std::path::Path;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use modflow::core::ExecutionNode;
use modflow::files::{reconcile, ImportEdit};
use modflow::fs::{glob, parse_multistring, EntryKind, Patterns};
use modflow::structural::{AstGrepMatcher, Matcher, Query};

// ============================================================================
// Mock Data Fixtures
// ============================================================================

mod fixtures {
    use std::path::Path;

    /// Generate a TypeScript module with `calls` logging calls.
    pub fn generate_source(calls: usize) -> String {
        let mut source = String::from("import { a, b } from \"lib\";\nimport React from \"react\";\n\n");
        for i in 0..calls {
            source.push_str(&format!("export function f{i}(x: number) {{\n"));
            source.push_str(&format!("  console.log(\"value\", x, {i});\n"));
            source.push_str("  return a(x) + b(x);\n}\n\n");
        }
        source
    }

    /// Generate `count` add edits spread over a handful of modules.
    pub fn generate_edits(count: usize) -> Vec<super::ImportEdit> {
        (0..count)
            .map(|i| super::ImportEdit::add(format!("import {{ name{i} }} from \"mod{}\"", i % 5)))
            .collect()
    }

    /// Create `apps` directories each holding `files` source files.
    pub fn generate_tree(root: &Path, apps: usize, files: usize) {
        for app in 0..apps {
            for file in 0..files {
                let dir = root.join(format!("apps/app{app}/src"));
                std::fs::create_dir_all(&dir).unwrap();
                std::fs::write(dir.join(format!("file{file}.ts")), "export {};\n").unwrap();
            }
            let ignored = root.join(format!("apps/app{app}/node_modules/dep"));
            std::fs::create_dir_all(&ignored).unwrap();
            std::fs::write(ignored.join("index.js"), "module.exports = {};\n").unwrap();
        }
    }
}

// ============================================================================
// Structural Matching Benchmarks
// ============================================================================

fn bench_pattern_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("pattern_matching");
    let matcher = AstGrepMatcher::new();

    let queries = [
        ("single", Query::parse("a($X)").unwrap()),
        ("multiple", Query::parse("console.log($$$ARGS)").unwrap()),
        ("any", Query::any(["a($X)", "b($X)"])),
    ];

    for calls in [10, 100, 1000] {
        let source = fixtures::generate_source(calls);
        group.throughput(Throughput::Bytes(source.len() as u64));

        for (name, query) in &queries {
            group.bench_with_input(BenchmarkId::new(*name, calls), &source, |b, source| {
                b.iter(|| black_box(matcher.find_all(Path::new("bench.ts"), black_box(source), query).unwrap()));
            });
        }
    }

    group.finish();
}

// ============================================================================
// Import Reconciliation Benchmarks
// ============================================================================

fn bench_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile_imports");
    let matcher = AstGrepMatcher::new();
    let source = fixtures::generate_source(100);

    for count in [1, 10, 100] {
        let edits = fixtures::generate_edits(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("add", count), &edits, |b, edits| {
            b.iter(|| black_box(reconcile(&matcher, Path::new("bench.ts"), black_box(&source), edits).unwrap()));
        });
    }

    group.finish();
}

// ============================================================================
// Glob Benchmarks
// ============================================================================

fn bench_glob(c: &mut Criterion) {
    let mut group = c.benchmark_group("glob");
    let temp = tempfile::tempdir().unwrap();
    fixtures::generate_tree(temp.path(), 20, 25);
    let ignore_dirs = vec!["node_modules".to_string()];

    let cases = [
        ("dirs", Patterns::from("apps/*"), EntryKind::Directory),
        ("ts_files", Patterns::from("**/*.ts"), EntryKind::File),
        ("js_family", Patterns::from("**/*.{js,jsx,ts,tsx}"), EntryKind::File),
    ];

    for (name, patterns, kind) in &cases {
        group.bench_function(*name, |b| {
            b.iter(|| black_box(glob(temp.path(), patterns, *kind, &ignore_dirs).unwrap()));
        });
    }

    group.finish();
}

// ============================================================================
// Misc Benchmarks
// ============================================================================

fn bench_parse_multistring(c: &mut Criterion) {
    let input = (0..200).map(|i| format!("apps/app{i}/{{src,lib}}/*.ts")).collect::<Vec<_>>().join(",\n");

    c.bench_function("parse_multistring", |b| {
        b.iter(|| black_box(parse_multistring(black_box(&input))));
    });
}

fn bench_node_hashing(c: &mut Criterion) {
    let args: Vec<String> = (0..50).map(|i| format!("packages/pkg{i}/**/*.ts")).collect();

    c.bench_function("execution_node_new", |b| {
        b.iter(|| black_box(ExecutionNode::new("files", "modflow::files", black_box(&args))));
    });
}

// ============================================================================
// Criterion Groups and Main
// ============================================================================

criterion_group!(matching_benches, bench_pattern_matching, bench_reconcile,);

criterion_group!(fs_benches, bench_glob,);

criterion_group!(misc_benches, bench_parse_multistring, bench_node_hashing,);

criterion_main!(matching_benches, fs_benches, misc_benches,);
