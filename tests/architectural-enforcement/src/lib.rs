//! Architectural Enforcement
//!
//! Source scanners shared by the integration tests in `tests/`. They read
//! the workspace's Rust sources as text and report lines that break the
//! engine's rules:
//! - no blocking sleeps, and timer waits only where pacing or retry needs them
//! - no blocking I/O once the runtime is running
//! - no `unwrap()` / `expect()` outside tests
//!
//! The scan is line-based on purpose: it has to stay fast and dependency-free
//! enough to run on every `cargo test`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Production source roots, relative to the workspace root
pub const PRODUCTION_ROOTS: &[&str] = &["client/core/src", "client/cli/src"];

/// One offending line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File, relative to the workspace root
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// What rule was broken
    pub rule: &'static str,
    /// The trimmed source line
    pub source: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.rule,
            self.source
        )
    }
}

/// A Rust file split into lines
pub struct SourceFile {
    /// Path relative to the workspace root
    pub path: PathBuf,
    /// Raw lines
    pub lines: Vec<String>,
}

impl SourceFile {
    /// Build from in-memory text
    pub fn from_text(path: impl Into<PathBuf>, text: &str) -> Self {
        Self {
            path: path.into(),
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    /// File name, e.g. `drip.rs`
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// Production lines: 1-based number and the code before any `//` comment
    ///
    /// Everything from the first `#[cfg(test)]` on is test code; the
    /// workspace keeps its unit tests at the bottom of each file.
    pub fn production_lines(&self) -> impl Iterator<Item = (usize, &str)> {
        self.lines
            .iter()
            .take_while(|line| !line.trim_start().starts_with("#[cfg(test)]"))
            .enumerate()
            .filter(|(_, line)| !line.trim_start().starts_with("//"))
            .map(|(idx, line)| (idx + 1, code_part(line)))
    }

    /// Whether line `idx` (0-based) sits inside an `async fn`
    pub fn is_in_async_function(&self, idx: usize) -> bool {
        for line in self.lines[..idx].iter().rev() {
            let line = line.trim();
            if line.contains("async fn ") {
                return true;
            }
            if is_fn_header(line) {
                return false;
            }
            if line.starts_with("mod ") || (line.starts_with("impl") && line.ends_with('{')) {
                return false;
            }
        }
        false
    }

    /// Report a violation at `line`
    pub fn violation(&self, line: usize, rule: &'static str) -> Violation {
        Violation {
            path: self.path.clone(),
            line,
            rule,
            source: self.lines[line - 1].trim().to_string(),
        }
    }
}

fn is_fn_header(line: &str) -> bool {
    line.starts_with("fn ") || line.starts_with("pub fn ") || line.contains(" fn ")
}

/// Strip a trailing `//` comment, leaving string literals with `//` (URLs) intact
fn code_part(line: &str) -> &str {
    let mut in_string = false;
    let mut prev = '\0';
    for (i, ch) in line.char_indices() {
        match ch {
            '"' if prev != '\\' => in_string = !in_string,
            '/' if !in_string && prev == '/' => return &line[..i - 1],
            _ => {}
        }
        prev = ch;
    }
    line
}

/// Workspace root, located from this crate's manifest
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|_| PathBuf::from("../.."))
}

/// Every production `.rs` file in the workspace
pub fn production_sources() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut out = Vec::new();

    for dir in PRODUCTION_ROOTS {
        for entry in walkdir::WalkDir::new(root.join(dir))
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            let Ok(text) = fs::read_to_string(path) else {
                continue;
            };
            let relative = path.strip_prefix(&root).unwrap_or(path);
            out.push(SourceFile::from_text(relative, &text));
        }
    }
    out
}

/// Print violations and fail the calling test
pub fn report(title: &str, hint: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n{title}\n");
    for violation in violations {
        eprintln!("  {violation}");
    }
    eprintln!("\n{hint}");
    panic!("Found {} violation(s)", violations.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_module_is_not_production() {
        let file = SourceFile::from_text(
            "x.rs",
            "fn a() {}\n#[cfg(test)]\nmod tests {\n    fn b() { x.unwrap(); }\n}\n",
        );
        let lines: Vec<_> = file.production_lines().collect();
        assert_eq!(lines, vec![(1, "fn a() {}")]);
    }

    #[test]
    fn test_comment_stripping_keeps_urls() {
        assert_eq!(code_part(r#"let u = "http://x"; // note"#), r#"let u = "http://x"; "#);
        assert_eq!(code_part("foo(); // bar.unwrap()"), "foo(); ");
    }

    #[test]
    fn test_async_function_detection() {
        let file = SourceFile::from_text(
            "x.rs",
            "async fn bad() {\n    std::io::stdin();\n}\nfn fine() {\n    std::io::stdout();\n}\n",
        );
        assert!(file.is_in_async_function(1));
        assert!(!file.is_in_async_function(4));
    }
}
