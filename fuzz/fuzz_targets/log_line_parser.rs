#![no_main]

use coastline::analyzer::parse_line;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Log files are read as text; anything that isn't UTF-8 never reaches the parser
    if let Ok(input) = std::str::from_utf8(data) {
        if let Some(record) = parse_line(input) {
            assert!(record.duration_ms >= 0.0);
        }
    }
});
