#![no_main]

use libfuzzer_sys::fuzz_target;
use ddsprobe::replay::{parse_events, parse_symbols, scan};
use ddsprobe::rules::RuleTable;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Neither parser may panic, whatever the input
        let routines = parse_symbols(input);
        let _ = parse_events(input);

        if let Ok(rules) = RuleTable::builtin() {
            let _ = scan(&rules, &routines);
        }
    }
});
