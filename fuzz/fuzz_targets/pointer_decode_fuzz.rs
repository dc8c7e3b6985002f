//! Fuzz test for the pointer decoder
//!
//! Feeds arbitrary byte sequences through `Pointer::decode` to find panics,
//! infinite loops, or memory safety issues in the grammar.
//!
//! Run with: cargo +nightly fuzz run pointer_decode_fuzz -- -max_total_time=60

#![no_main]

use beacon_core::Pointer;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // The decoder only ever sees text; non-UTF-8 input never reaches it.
    if let Ok(input) = std::str::from_utf8(data) {
        // Decoding must never panic; errors are the expected outcome for
        // almost all inputs.
        if let Ok(pointer) = Pointer::decode(input) {
            // Anything that decodes must re-encode to a form that decodes
            // back to the same pointer.
            let encoded = pointer.encode();
            let reparsed =
                Pointer::decode(&encoded).expect("encoded pointer should decode");
            assert_eq!(pointer, reparsed, "encode/decode should agree");

            // The derived filter must be constructible for every pointer.
            let _ = pointer.filter();
            let _ = pointer.cache_id();
        }
    }
});
