//! Fuzz target for cache key derivation.
//!
//! Feeds arbitrary JSON documents through canonicalization and checks that
//! the canonical form is stable and parses back to the same value.
//!
//! Run with: cargo +nightly fuzz run cache_key_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use memelab_core::{canonical_json, CacheKey, ToolName};
use serde_json::Value;

fuzz_target!(|data: &[u8]| {
    let Ok(params) = serde_json::from_slice::<Value>(data) else {
        return;
    };

    let canonical = canonical_json(&params);
    let reparsed: Value = serde_json::from_str(&canonical).expect("canonical output must be valid JSON");
    assert_eq!(reparsed, params, "canonicalization must not change the value");
    assert_eq!(canonical_json(&reparsed), canonical, "canonicalization must be idempotent");

    let tool = ToolName::new("fuzz").expect("static tool name is valid");
    let key = CacheKey::derive(&tool, Some(&params));
    assert!(key.as_str().starts_with("fuzz:"));
    assert!(key.belongs_to(&tool));
});
