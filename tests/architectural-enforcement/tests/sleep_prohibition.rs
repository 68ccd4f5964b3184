//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Gateway production code MUST NOT call sleep methods. Waiting
//! is done on I/O, channels, semaphores, `Notify` or `tokio::time::interval`.
//! **Exceptions**: test code and the scripted backend used as a test double,
//! whose configurable latency is the point of the type.

use architectural_enforcement::{scan, SourceFile};
use std::path::Path;

/// Files that may sleep outside test code
const ALLOWED_FILES: &[&str] = &["routing/test_utils.rs"];

#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan(sleep_call);

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ ACCEPTABLE waits:");
        eprintln!("  - tokio::time::interval() for periodic work");
        eprintln!("  - tokio::time::timeout() around a real future");
        eprintln!("  - Notify, watch, Semaphore for hand-off");

        panic!(
            "\nFound {} sleep violation(s) in production code.",
            violations.len()
        );
    }
}

fn sleep_call(path: &Path, source: &SourceFile<'_>, idx: usize) -> Option<&'static str> {
    let code = source.code(idx);
    if !(code.contains("::sleep(") || code.contains(".sleep(")) {
        return None;
    }
    if source.is_test_code(idx) {
        return None;
    }
    let path = path.to_string_lossy();
    if ALLOWED_FILES.iter().any(|allowed| path.ends_with(allowed)) {
        return None;
    }
    Some("Sleep call")
}

#[test]
fn test_detects_sleep_in_worker_loop() {
    let source = SourceFile::new(
        "async fn poll() {\n    loop {\n        tokio::time::sleep(d).await;\n    }\n}\n",
    );
    assert_eq!(
        sleep_call(Path::new("gateway/core/src/dispatcher/mod.rs"), &source, 2),
        Some("Sleep call")
    );
}

#[test]
fn test_allows_sleep_in_tests_and_doubles() {
    let source = SourceFile::new("#[tokio::test]\nasync fn t() {\n    tokio::time::sleep(d).await;\n}\n");
    assert_eq!(sleep_call(Path::new("gateway/core/src/cache/mod.rs"), &source, 2), None);

    let double = SourceFile::new("async fn generate() {\n    tokio::time::sleep(self.latency).await;\n}\n");
    assert_eq!(
        sleep_call(Path::new("gateway/core/src/routing/test_utils.rs"), &double, 1),
        None
    );
}
