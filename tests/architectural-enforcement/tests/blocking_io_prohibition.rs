//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Gateway code running on the tokio runtime MUST NOT block.
//! **Required**: Use `tokio::fs`, `tokio::net`, `tokio::process` and async
//! `reqwest` inside async functions.
//!
//! Synchronous functions (configuration loading before the dispatcher
//! starts, CLI parsing) and test code are exempt.

use architectural_enforcement::{scan, SourceFile, Violation};
use std::path::Path;

/// Test that async production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_async_code() {
    let violations = scan(blocking_io);

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O calls found in async gateway code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - tokio::fs::read_to_string().await");
        eprintln!("  - tokio::net::TcpStream::connect().await");
        eprintln!("  - tokio::process::Command::output().await");
        eprintln!("  - reqwest::Client::get().send().await");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.",
            violations.len()
        );
    }
}

fn blocking_io(_path: &Path, source: &SourceFile<'_>, idx: usize) -> Option<&'static str> {
    let code = source.code(idx);

    // reqwest::blocking is never acceptable
    if code.contains("reqwest::blocking") {
        return Some("Blocking HTTP client");
    }

    if source.is_test_code(idx) {
        return None;
    }
    let in_async = source.enclosing_fn(idx).is_some_and(|f| f.is_async);
    if !in_async {
        return None;
    }

    if code.contains("std::fs::") || code.contains("File::open(") {
        Some("Blocking file I/O")
    } else if code.contains("std::net::TcpStream") || code.contains("std::net::TcpListener") {
        Some("Blocking network I/O")
    } else if code.contains("std::process::Command") {
        Some("Blocking process I/O")
    } else if code.contains("std::io::stdin()") || code.contains("read_line(") {
        Some("Blocking stdin in async")
    } else {
        None
    }
}

fn check_snippet(snippet: &str) -> Vec<Option<&'static str>> {
    let source = SourceFile::new(snippet);
    (0..source.lines.len())
        .map(|idx| blocking_io(Path::new("snippet.rs"), &source, idx))
        .collect()
}

#[test]
fn test_detects_std_fs_in_async_fn() {
    let found = check_snippet(
        "pub async fn load() {\n    let s = std::fs::read_to_string(\"gateway.toml\");\n}\n",
    );
    assert_eq!(found[1], Some("Blocking file I/O"));
}

#[test]
fn test_allows_std_fs_in_sync_fn() {
    let found = check_snippet(
        "pub fn load_config_from_path() {\n    let s = std::fs::read_to_string(\"gateway.toml\");\n}\n",
    );
    assert!(found.iter().all(Option::is_none));
}

#[test]
fn test_allows_tokio_fs_in_async_fn() {
    let found = check_snippet(
        "async fn sample() {\n    let stat = tokio::fs::read_to_string(\"/proc/stat\").await;\n}\n",
    );
    assert!(found.iter().all(Option::is_none));
}

#[test]
fn test_flags_blocking_reqwest_anywhere() {
    let found = check_snippet("fn ping() {\n    let r = reqwest::blocking::get(\"http://x\");\n}\n");
    assert_eq!(found[1], Some("Blocking HTTP client"));
}

#[test]
fn test_violation_display() {
    let violation = Violation {
        path: "gateway/core/src/x.rs".into(),
        line: 7,
        kind: "Blocking file I/O",
        text: "std::fs::read(p)".into(),
    };
    assert_eq!(
        violation.to_string(),
        "gateway/core/src/x.rs:7 - Blocking file I/O: std::fs::read(p)"
    );
}
