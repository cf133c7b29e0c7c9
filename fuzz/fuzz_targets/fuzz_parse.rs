#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(source) = std::str::from_utf8(data) {
        // The parser should never panic, and whatever it accepts must dump
        // back to text it accepts again.
        if let Ok(module) = dmagen_parser::parse_module(source) {
            let text = dmagen_ir::dump_module(&module);
            let _ = dmagen_parser::parse_module(&text);
        }
    }
});
