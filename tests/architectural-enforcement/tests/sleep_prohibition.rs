//! Integration Test: Sleep Prohibition
//!
//! **Policy**: production code never blocks a thread with `std::thread::sleep`.
//! Timer waits (`tokio::time::sleep`) are allowed only where waiting is the
//! feature itself:
//! - `drip.rs`: typing pacing
//! - `progress/channel.rs`: reconnect backoff
//! - `storage.rs`: draft debounce
//!
//! Everything else waits on I/O, channels or `tokio::time::interval`.

use architectural_enforcement::{production_sources, report, Violation};

/// Files whose timer waits are part of their behaviour
const TIMER_OWNERS: &[&str] = &["drip.rs", "channel.rs", "storage.rs"];

#[test]
fn test_no_sleep_in_production_code() {
    let mut violations: Vec<Violation> = Vec::new();

    for file in production_sources() {
        let may_wait = TIMER_OWNERS.contains(&file.file_name());
        for (line, code) in file.production_lines() {
            if code.contains("thread::sleep") {
                violations.push(file.violation(line, "Blocking sleep"));
            } else if (code.contains("::sleep(") || code.contains(".sleep(")) && !may_wait {
                violations.push(file.violation(line, "Timer wait outside pacing/backoff/debounce"));
            }
        }
    }

    report(
        "Sleep calls found in production code",
        "Wait on the event instead (channel, Notify, watch) or use tokio::time::interval.",
        &violations,
    );
}

/// Every allowed timer owner still exists; a rename must update the list
#[test]
fn test_timer_owners_exist() {
    let names: Vec<String> = production_sources()
        .iter()
        .map(|f| f.file_name().to_string())
        .collect();
    for owner in TIMER_OWNERS {
        assert!(names.iter().any(|n| n == owner), "{owner} not found");
    }
}
