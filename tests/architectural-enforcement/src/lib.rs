//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles:
//! - No blocking sleep or blocking I/O in production code
//! - No panicking shortcuts in the client core
//! - The client core stays headless (it logs, it never prints)
//!
//! Only production code is scanned. A file is cut at its first
//! `#[cfg(test)]` item, and test-only helper modules are skipped entirely.

use std::fmt;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Files that only exist for unit tests
const TEST_ONLY_FILES: &[&str] = &["testing.rs"];

/// A forbidden pattern and why it is forbidden
#[derive(Clone, Copy, Debug)]
pub struct Rule {
    /// Substring that must not appear
    pub pattern: &'static str,
    /// Shown when the rule is broken
    pub reason: &'static str,
}

/// Blocking calls that would stall the async runtime
pub const BLOCKING_RULES: &[Rule] = &[
    Rule {
        pattern: "thread::sleep",
        reason: "blocks the runtime; use tokio::time",
    },
    Rule {
        pattern: "std::fs",
        reason: "blocking file I/O; use tokio::fs",
    },
    Rule {
        pattern: "std::net",
        reason: "blocking sockets; go through the HTTP transport",
    },
    Rule {
        pattern: "reqwest::blocking",
        reason: "blocking HTTP client; use the async transport",
    },
];

/// Shortcuts the client core must not take outside tests
pub const CORE_RULES: &[Rule] = &[
    Rule {
        pattern: ".unwrap()",
        reason: "propagate the error instead",
    },
    Rule {
        pattern: ".expect(",
        reason: "propagate the error instead",
    },
    Rule {
        pattern: "println!",
        reason: "the core is headless; log with tracing or publish an event",
    },
    Rule {
        pattern: "eprintln!",
        reason: "the core is headless; log with tracing or publish an event",
    },
];

/// One broken rule
#[derive(Clone, Debug)]
pub struct Violation {
    pub file: PathBuf,
    pub line: usize,
    pub text: String,
    pub reason: &'static str,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: {} ({})",
            self.file.display(),
            self.line,
            self.text.trim(),
            self.reason
        )
    }
}

/// Root of the workspace this crate lives in
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// Production lines of one source file, numbered from 1
pub fn production_lines(source: &str) -> Vec<(usize, &str)> {
    source
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .filter(|(_, line)| {
            let trimmed = line.trim_start();
            !trimmed.starts_with("//")
        })
        .map(|(idx, line)| (idx + 1, line))
        .collect()
}

/// Check one source text against `rules`
pub fn check_source(file: &Path, source: &str, rules: &[Rule]) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (line, text) in production_lines(source) {
        for rule in rules {
            if text.contains(rule.pattern) {
                violations.push(Violation {
                    file: file.to_path_buf(),
                    line,
                    text: text.to_string(),
                    reason: rule.reason,
                });
            }
        }
    }
    violations
}

/// Check every Rust file under `dir` against `rules`
pub fn scan_dir(dir: &Path, rules: &[Rule]) -> Vec<Violation> {
    let mut violations = Vec::new();
    for entry in WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("rs") {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if TEST_ONLY_FILES.contains(&name.as_ref()) {
            continue;
        }
        match std::fs::read_to_string(path) {
            Ok(source) => violations.extend(check_source(path, &source, rules)),
            Err(e) => violations.push(Violation {
                file: path.to_path_buf(),
                line: 0,
                text: e.to_string(),
                reason: "unreadable source file",
            }),
        }
    }
    violations
}

/// Render violations for an assertion message
pub fn report(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_modules_are_not_scanned() {
        let source = "fn run() {}\n#[cfg(test)]\nmod tests {\n    fn t() { x.unwrap(); }\n}\n";
        assert!(check_source(Path::new("a.rs"), source, CORE_RULES).is_empty());
    }

    #[test]
    fn test_violation_reports_line() {
        let source = "use tokio::fs;\n\nfn run() {\n    std::thread::sleep(d);\n}\n";
        let violations = check_source(Path::new("a.rs"), source, BLOCKING_RULES);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].line, 4);
    }

    #[test]
    fn test_comments_are_ignored() {
        let source = "// never call std::thread::sleep here\nfn run() {}\n";
        assert!(check_source(Path::new("a.rs"), source, BLOCKING_RULES).is_empty());
    }
}
