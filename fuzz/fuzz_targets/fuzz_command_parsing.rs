#![no_main]

use libfuzzer_sys::fuzz_target;

use votebot::commands::{parse_command, split_quoted, Command};

fuzz_target!(|data: &str| {
    // Chat text is attacker-controlled. Parsing must never panic, and a
    // parsed create must always carry a title plus at least two options.
    if let Command::Create { title, options } = parse_command(data) {
        assert!(!title.is_empty());
        assert!(options.len() >= 2);
    }

    let _ = split_quoted(data);
});
