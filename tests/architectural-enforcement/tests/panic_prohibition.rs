//! Integration Test: No Panicking Shortcuts
//!
//! **Policy**: production code propagates errors with `?` or handles them;
//! `unwrap()` and `expect()` appear only in tests.

use architectural_enforcement::{production_sources, report, Violation};

#[test]
fn test_no_unwrap_or_expect_in_production_code() {
    let mut violations: Vec<Violation> = Vec::new();

    for file in production_sources() {
        for (line, code) in file.production_lines() {
            if code.contains(".unwrap()") {
                violations.push(file.violation(line, "unwrap()"));
            }
            if code.contains(".expect(") {
                violations.push(file.violation(line, "expect()"));
            }
        }
    }

    report(
        "Panicking shortcuts found in production code",
        "Return a Result, fall back to a default, or log and continue.",
        &violations,
    );
}
