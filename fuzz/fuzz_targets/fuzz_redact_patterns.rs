#![no_main]

use libfuzzer_sys::fuzz_target;

use votebot::logging::sanitize_log_message;

fuzz_target!(|data: &str| {
    // Log sanitization runs on error strings from the chat server and the
    // database. Libfuzzer's per-input timeout catches catastrophic regex
    // backtracking.
    let once = sanitize_log_message(data);
    let _ = sanitize_log_message(&once);
});
