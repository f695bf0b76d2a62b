//! Hygiene: budgets for antipatterns in library code.
//!
//! Scans `src/` and `frames/src/` (test files and fixtures excluded). A budget
//! may only shrink; the remaining `let _ =` sites are sends to receivers that
//! may already be gone and best-effort close flushes.

use std::fs;
use std::path::Path;

const ROOTS: &[&str] = &["src", "frames/src"];

/// Files that only compile under `cfg(test)`.
const TEST_ONLY: &[&str] = &["test_helpers.rs"];

struct Budget {
    pattern: &'static str,
    max: usize,
}

const NO_PANICS: &[Budget] = &[
    Budget { pattern: ".unwrap()", max: 0 },
    Budget { pattern: ".expect(", max: 0 },
    Budget { pattern: "panic!(", max: 0 },
    Budget { pattern: "unreachable!(", max: 0 },
    Budget { pattern: "todo!(", max: 0 },
    Budget { pattern: "unimplemented!(", max: 0 },
];

const SILENT_DISCARD: Budget = Budget { pattern: "let _ =", max: 10 };
const DOT_OK: Budget = Budget { pattern: ".ok()", max: 2 };
const ALLOW_DEAD_CODE: Budget = Budget { pattern: "#[allow(dead_code)]", max: 0 };

struct SourceFile {
    path: String,
    content: String,
}

fn source_files() -> Vec<SourceFile> {
    let mut files = Vec::new();
    for root in ROOTS {
        collect_rs_files(Path::new(root), &mut files);
    }
    assert!(!files.is_empty(), "no sources found; run from the package root");
    files
}

fn collect_rs_files(dir: &Path, out: &mut Vec<SourceFile>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rs_files(&path, out);
            continue;
        }
        let name = path.file_name().unwrap_or_default().to_string_lossy();
        if path.extension().is_none_or(|e| e != "rs") || name.ends_with("_test.rs") || TEST_ONLY.contains(&&*name) {
            continue;
        }
        if let Ok(content) = fs::read_to_string(&path) {
            out.push(SourceFile { path: path.to_string_lossy().to_string(), content });
        }
    }
}

fn check(files: &[SourceFile], budget: &Budget) {
    let hits: Vec<(&str, usize)> = files
        .iter()
        .map(|file| (file.path.as_str(), file.content.lines().filter(|line| line.contains(budget.pattern)).count()))
        .filter(|(_, count)| *count > 0)
        .collect();
    let count: usize = hits.iter().map(|(_, c)| c).sum();
    let listing: Vec<String> = hits.iter().map(|(path, c)| format!("  {path}: {c}")).collect();
    assert!(
        count <= budget.max,
        "`{}` budget exceeded: found {count}, max {}.\n{}",
        budget.pattern,
        budget.max,
        listing.join("\n")
    );
}

#[test]
fn no_panicking_shortcuts() {
    let files = source_files();
    for budget in NO_PANICS {
        check(&files, budget);
    }
}

#[test]
fn silent_discard_budget() {
    check(&source_files(), &SILENT_DISCARD);
}

#[test]
fn dot_ok_budget() {
    check(&source_files(), &DOT_OK);
}

#[test]
fn allow_dead_code_budget() {
    check(&source_files(), &ALLOW_DEAD_CODE);
}
