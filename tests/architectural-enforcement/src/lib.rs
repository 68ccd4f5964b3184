//! Architectural Enforcement Integration Tests
//!
//! Source scanners shared by the integration tests in `tests/`. They enforce
//! two rules on the gateway's production code:
//! - No blocking I/O inside async functions
//! - No sleep() calls outside tests and scripted test doubles
//!
//! The scan is line-based. It finds the enclosing function by walking
//! backwards to the nearest `fn` header, which is good enough for the code
//! layout used in this workspace.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source trees scanned by the enforcement tests
pub const PRODUCTION_DIRS: &[&str] = &["gateway/core/src", "gateway/daemon/src"];

/// Workspace root, two levels above this crate
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Every `.rs` file under the production directories
pub fn production_files() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files: Vec<PathBuf> = PRODUCTION_DIRS
        .iter()
        .map(|dir| root.join(dir))
        .filter(|dir| dir.exists())
        .flat_map(|dir| {
            walkdir::WalkDir::new(dir)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
                .map(|e| e.path().to_path_buf())
                .collect::<Vec<_>>()
        })
        .collect();
    files.sort();
    files
}

/// A single rule violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: PathBuf,
    pub line: usize,
    pub kind: &'static str,
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.kind,
            self.text
        )
    }
}

/// Function header found above a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnclosingFn {
    pub is_async: bool,
    pub is_test: bool,
}

/// Lines of one source file plus where its test module starts
pub struct SourceFile<'a> {
    pub lines: Vec<&'a str>,
    test_module_start: Option<usize>,
}

impl<'a> SourceFile<'a> {
    pub fn new(content: &'a str) -> Self {
        let lines: Vec<&str> = content.lines().collect();
        let test_module_start = lines.iter().enumerate().find_map(|(idx, line)| {
            if line.trim() != "#[cfg(test)]" {
                return None;
            }
            lines[idx + 1..]
                .iter()
                .map(|l| l.trim())
                .find(|l| !l.is_empty())
                .filter(|l| l.starts_with("mod ") || l.starts_with("pub mod "))
                .map(|_| idx)
        });
        Self {
            lines,
            test_module_start,
        }
    }

    /// Code part of a line with any trailing `//` comment removed
    pub fn code(&self, idx: usize) -> &'a str {
        let line = self.lines[idx];
        line.split("//").next().unwrap_or(line)
    }

    /// Whether the line sits inside the `#[cfg(test)]` module
    pub fn in_test_module(&self, idx: usize) -> bool {
        self.test_module_start.is_some_and(|start| idx > start)
    }

    /// Nearest function header above `idx`
    pub fn enclosing_fn(&self, idx: usize) -> Option<EnclosingFn> {
        let header = (0..idx).rev().find(|&i| fn_header(self.lines[i]).is_some())?;
        let is_async = fn_header(self.lines[header]) == Some(true);

        let is_test = self.lines[..header]
            .iter()
            .rev()
            .map(|l| l.trim())
            .take_while(|l| l.starts_with("#[") || l.starts_with("///") || l.is_empty())
            .any(|l| l.starts_with("#[test]") || l.starts_with("#[tokio::test"));

        Some(EnclosingFn { is_async, is_test })
    }

    /// Test code: the test module or a `#[test]` function
    pub fn is_test_code(&self, idx: usize) -> bool {
        self.in_test_module(idx) || self.enclosing_fn(idx).is_some_and(|f| f.is_test)
    }
}

/// `Some(is_async)` when the line opens a function
fn fn_header(line: &str) -> Option<bool> {
    let mut rest = line.trim();
    for prefix in ["pub(crate) ", "pub(super) ", "pub "] {
        if let Some(stripped) = rest.strip_prefix(prefix) {
            rest = stripped;
            break;
        }
    }
    if rest.starts_with("async fn ") {
        Some(true)
    } else if rest.starts_with("fn ") {
        Some(false)
    } else {
        None
    }
}

/// Run `check` over every production file and collect violations
pub fn scan<F>(check: F) -> Vec<Violation>
where
    F: Fn(&Path, &SourceFile<'_>, usize) -> Option<&'static str>,
{
    let root = workspace_root();
    let mut violations = Vec::new();
    for path in production_files() {
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        let source = SourceFile::new(&content);
        for idx in 0..source.lines.len() {
            if let Some(kind) = check(&path, &source, idx) {
                violations.push(Violation {
                    path: path.strip_prefix(&root).unwrap_or(&path).to_path_buf(),
                    line: idx + 1,
                    kind,
                    text: source.lines[idx].trim().to_string(),
                });
            }
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_headers() {
        assert_eq!(fn_header("    pub async fn submit(&self) {"), Some(true));
        assert_eq!(fn_header("fn main() {"), Some(false));
        assert_eq!(fn_header("pub(crate) fn helper() {"), Some(false));
        assert_eq!(fn_header("let f = async move {"), None);
    }

    #[test]
    fn test_enclosing_async_fn() {
        let source = SourceFile::new(
            "async fn bad() {\n    let s = std::fs::read_to_string(\"x\");\n}\n",
        );
        assert_eq!(
            source.enclosing_fn(1),
            Some(EnclosingFn {
                is_async: true,
                is_test: false
            })
        );
    }

    #[test]
    fn test_test_code_detection() {
        let source = SourceFile::new(
            "fn prod() {}\n\n#[cfg(test)]\nmod tests {\n    #[test]\n    fn t() {\n        x();\n    }\n}\n",
        );
        assert!(!source.is_test_code(0));
        assert!(source.is_test_code(6));

        let attributed = SourceFile::new("#[tokio::test]\nasync fn t() {\n    x();\n}\n");
        assert!(attributed.is_test_code(2));
    }

    #[test]
    fn test_comments_are_stripped() {
        let source = SourceFile::new("let a = 1; // std::fs::read\n");
        assert_eq!(source.code(0).trim(), "let a = 1;");
    }

    #[test]
    fn test_production_files_found() {
        let files = production_files();
        assert!(files.iter().any(|p| p.ends_with("gateway/core/src/lib.rs")));
        assert!(files.iter().any(|p| p.ends_with("gateway/daemon/src/main.rs")));
    }
}
