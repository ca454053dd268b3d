#![no_main]

use libfuzzer_sys::fuzz_target;
use keyrescue_core::{resolve_key, KeyRole, SjclDecryptor};

fuzz_target!(|data: &[u8]| {
    // Keycard text is either an extended key or an envelope; neither path may panic.
    if let Ok(s) = std::str::from_utf8(data) {
        if s.contains("\"iter\"") {
            // Skip envelopes so PBKDF2 cost stays out of the loop
            return;
        }
        let _ = resolve_key(KeyRole::User, s, "", &SjclDecryptor);
        let _ = resolve_key(KeyRole::Bitgo, s, "", &SjclDecryptor);

        // Exercise the base58 path with a plausible prefix
        let prefixed = format!("xprv{}", s);
        let _ = resolve_key(KeyRole::Backup, &prefixed, "", &SjclDecryptor);
    }
});
