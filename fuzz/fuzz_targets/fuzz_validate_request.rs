//! Fuzz testing for request and response validation.
//!
//! Feeds arbitrary JSON documents through the validator. Validation must:
//!
//! - Never panic on any input
//! - Reject anything that is not a well-formed request with an error, never a crash
//! - Keep its statistics consistent (errors never exceed validations)
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! # Install cargo-fuzz (requires nightly)
//! cargo +nightly install cargo-fuzz
//!
//! # Run the target
//! cargo +nightly fuzz run fuzz_validate_request
//!
//! # Run with a time limit (e.g., 60 seconds)
//! cargo +nightly fuzz run fuzz_validate_request -- -max_total_time=60
//! ```

#![no_main]

use libfuzzer_sys::fuzz_target;
use mcp_guard::RequestValidator;
use mcp_guard::validation::ALLOWED_METHODS;
use serde_json::Value;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = serde_json::from_slice::<Value>(data) else {
        return;
    };

    let validator = RequestValidator::default();
    let _ = validator.validate_request(&raw);

    // Treat the same document as a response to each known method
    for method in ALLOWED_METHODS {
        let _ = validator.validate_response(&raw, method);
    }

    let stats = validator.stats();
    assert!(stats.validation_errors <= stats.total_validations);
});
