//! Fuzz target for TTL override parsing.
//!
//! Any policy that parses must be monotonic for every tool and the default,
//! and no row may exceed the maximum TTL.
//!
//! Run with: cargo +nightly fuzz run ttl_policy_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::time::Duration;

use memelab_core::{TtlPolicy, MAX_TTL_MINUTES};

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(policy) = TtlPolicy::from_toml_str(input) else {
        return;
    };

    assert!(policy.default_row().is_monotonic());
    for (_, row) in policy.tools() {
        assert!(row.is_monotonic());
    }
    assert!(policy.max_ttl() <= Duration::from_secs(MAX_TTL_MINUTES * 60));
});
