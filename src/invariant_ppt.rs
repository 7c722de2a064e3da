//! # Invariant Ledger
//!
//! Runtime checks for the invariants the overseer relies on (one Shell per scope, serialized
//! Shell tasks, append-only message list). Every check that passes is recorded so tests can
//! assert, after driving the coordinator or the Shell, that the relevant invariants were
//! actually exercised.

use std::collections::HashSet;
use std::sync::Mutex;
use lazy_static::lazy_static;
use log::{error, info};

/// A Shell was installed only while no other Shell was installed.
pub const ONE_SHELL_PER_SCOPE: &str = "At most one Shell is installed per scope";
/// The coordinator only builds Shells that wait for an explicit shutdown.
pub const EXPLICIT_SHUTDOWN_ONLY: &str = "Coordinator Shell uses explicit-only shutdown";
/// No task started while another task was still running.
pub const SERIALIZED_SHELL_TASKS: &str = "Shell tasks run one at a time";
/// The message list never shrank across a task.
pub const APPEND_ONLY_MESSAGES: &str = "Shell message list is append-only";

lazy_static! {
    /// Descriptions of invariants that have been asserted and held.
    static ref CHECKED_INVARIANTS: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
}

/// Asserts that a critical invariant holds.
///
/// A violation panics in debug and test builds and is logged as a critical error in release
/// builds. A passing check is recorded for [`contract_test`].
///
/// # Arguments
/// * `condition` - The result of the check.
/// * `description` - One of the invariant constants above, or any stable description.
/// * `component` - Optional component tag (e.g., "Shell", "Coordinator").
pub fn assert_invariant(condition: bool, description: &str, component: Option<&str>) {
    if !condition {
        let msg = format!(
            "CRITICAL INVARIANT VIOLATION [{}]: {}",
            component.unwrap_or("General"),
            description
        );
        error!("{}", msg);

        if cfg!(debug_assertions) || cfg!(test) {
            panic!("{}", msg);
        }
    } else if let Ok(mut set) = CHECKED_INVARIANTS.lock() {
        set.insert(description.to_string());
    }
}

/// Verifies that every listed invariant was asserted at least once in this process.
///
/// # Arguments
/// * `context` - Name of the test context.
/// * `required_invariants` - Descriptions that MUST have been asserted.
#[allow(dead_code)]
pub fn contract_test(context: &str, required_invariants: &[&str]) {
    let missing: Vec<&str> = match CHECKED_INVARIANTS.lock() {
        Ok(checked) => required_invariants
            .iter()
            .copied()
            .filter(|req| !checked.contains(*req))
            .collect(),
        Err(poisoned) => {
            let checked = poisoned.into_inner();
            required_invariants
                .iter()
                .copied()
                .filter(|req| !checked.contains(*req))
                .collect()
        }
    };

    if !missing.is_empty() {
        panic!(
            "Contract Test Failed for '{}'. The following invariants were NOT checked:\n{:#?}",
            context, missing
        );
    }
    info!("Contract Test Passed: {}", context);
}
