//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod items;

use std::time::{Duration, Instant};

/// Upper bound for anything the tests wait on
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Poll `cond` until it holds or the test timeout passes
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + test_timeout();
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    false
}
