//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: once the runtime is running, all I/O is async.
//! **Required**: `tokio::fs`, `tokio::io`, async `reqwest`.
//!
//! Exceptions:
//! - `config.rs` reads the config file with `std::fs`; it runs before the
//!   engine starts
//! - stdout/stderr writes from non-async functions (terminal output)

use architectural_enforcement::{production_sources, report, Violation};

/// Files allowed to touch `std::fs`
const SYNC_FS_ALLOWED: &[&str] = &["config.rs"];

#[test]
fn test_no_blocking_io_in_production_code() {
    let mut violations: Vec<Violation> = Vec::new();

    for file in production_sources() {
        for (line, code) in file.production_lines() {
            if code.contains("std::fs") && !SYNC_FS_ALLOWED.contains(&file.file_name()) {
                violations.push(file.violation(line, "Blocking file I/O"));
            }
            if code.contains("std::net") {
                violations.push(file.violation(line, "Blocking network I/O"));
            }
            if code.contains("reqwest::blocking") {
                violations.push(file.violation(line, "Blocking HTTP client"));
            }
            if code.contains("std::process::Command") {
                violations.push(file.violation(line, "Blocking process I/O"));
            }
            if (code.contains("std::io::stdin()") || code.contains("std::io::stdout()"))
                && file.is_in_async_function(line - 1)
            {
                violations.push(file.violation(line, "Blocking stdin/stdout in async"));
            }
        }
    }

    report(
        "Blocking I/O calls found in production code",
        "Use tokio::fs / tokio::io, or move terminal writes into a plain fn.",
        &violations,
    );
}
