//! Integration Test: Async Discipline
//!
//! **Policy**: production code in the client crates must not block the runtime,
//! and the core must not panic on errors or print to the terminal.
//! **Exceptions**: test code (`#[cfg(test)]` modules, `testing.rs`, `tests/`)

use architectural_enforcement::{report, scan_dir, workspace_root, BLOCKING_RULES, CORE_RULES};

#[test]
fn test_core_has_no_blocking_calls() {
    let violations = scan_dir(&workspace_root().join("client/core/src"), BLOCKING_RULES);
    assert!(violations.is_empty(), "\n{}", report(&violations));
}

#[test]
fn test_cli_has_no_blocking_calls() {
    let violations = scan_dir(&workspace_root().join("client/cli/src"), BLOCKING_RULES);
    assert!(violations.is_empty(), "\n{}", report(&violations));
}

#[test]
fn test_core_propagates_errors_and_never_prints() {
    let violations = scan_dir(&workspace_root().join("client/core/src"), CORE_RULES);
    assert!(violations.is_empty(), "\n{}", report(&violations));
}

#[test]
fn test_sources_are_found() {
    // Guards against a wrong root making every check pass vacuously
    let root = workspace_root().join("client/core/src");
    let files = walkdir::WalkDir::new(&root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .count();
    assert!(files > 10, "only {files} files under {}", root.display());
}
