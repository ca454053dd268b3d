#![no_main]

use libfuzzer_sys::fuzz_target;
use keyrescue_core::crypto::SjclEnvelope;

/// Keeps each PBKDF2 run short enough to fuzz
const MAX_ITERATIONS: u32 = 1_000;

fuzz_target!(|data: &[u8]| {
    // Parsing and opening arbitrary envelopes must never panic.
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(envelope) = SjclEnvelope::parse(s) else {
        return;
    };
    if envelope.iter <= MAX_ITERATIONS {
        let _ = envelope.open("correct horse battery staple");
    }
});
