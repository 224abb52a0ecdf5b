//! Runtime invariant checks with contract tracking
//!
//! Control-loop code asserts its invariants through [`assert_invariant!`].
//! Every checked message is recorded per thread so a test can later require
//! that a given set of invariants was actually exercised.
//!
//! ```rust,ignore
//! use crabexposure::assert_invariant;
//!
//! assert_invariant!(
//!     exposure >= min && exposure <= max,
//!     "Exposure time stays within device bounds",
//!     "controller::complete"
//! );
//!
//! // later, in a test
//! crabexposure::invariants::contract_test("bounds", &[
//!     "Exposure time stays within device bounds",
//! ]);
//! ```

use std::cell::RefCell;
use std::collections::HashSet;
use std::thread_local;

thread_local! {
    static CHECKED: RefCell<HashSet<&'static str>> = RefCell::new(HashSet::new());
}

/// Assert an invariant and record that it was checked.
///
/// Panics with the message and optional context when the condition is false.
#[macro_export]
macro_rules! assert_invariant {
    ($condition:expr, $message:expr) => {
        $crate::invariants::__check($condition, $message, None)
    };
    ($condition:expr, $message:expr, $context:expr) => {
        $crate::invariants::__check($condition, $message, Some($context))
    };
}

#[doc(hidden)]
pub fn __check(condition: bool, message: &'static str, context: Option<&str>) {
    CHECKED.with(|checked| {
        checked.borrow_mut().insert(message);
    });

    if !condition {
        panic!(
            "INVARIANT VIOLATION [{}]: {}",
            context.unwrap_or("unknown"),
            message
        );
    }
}

/// Invariant messages checked so far on this thread
pub fn checked_invariants() -> Vec<&'static str> {
    CHECKED.with(|checked| {
        let mut messages: Vec<_> = checked.borrow().iter().copied().collect();
        messages.sort_unstable();
        messages
    })
}

/// Panic unless every listed invariant was checked on this thread.
pub fn contract_test(test_name: &str, required: &[&str]) {
    let missing: Vec<&str> = CHECKED.with(|checked| {
        let checked = checked.borrow();
        required
            .iter()
            .copied()
            .filter(|message| !checked.contains(*message))
            .collect()
    });

    if !missing.is_empty() {
        panic!(
            "CONTRACT FAILURE [{}]: invariants never checked:\n  - {}",
            test_name,
            missing.join("\n  - ")
        );
    }
}

/// Forget recorded checks on this thread
pub fn clear_invariant_log() {
    CHECKED.with(|checked| checked.borrow_mut().clear());
}
