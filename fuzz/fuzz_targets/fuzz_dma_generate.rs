#![no_main]

use libfuzzer_sys::fuzz_target;

use dmagen_opt::{DmaGeneration, Pass};

fuzz_target!(|data: &[u8]| {
    if let Ok(source) = std::str::from_utf8(data) {
        if let Ok(mut module) = dmagen_parser::parse_module(source) {
            if module
                .functions
                .iter()
                .all(|(_, f)| dmagen_ir::verify_function(f).is_ok())
            {
                // Verified input must stay verified after the pass.
                DmaGeneration::default().run(&mut module);
                for (_, f) in module.functions.iter() {
                    assert_eq!(dmagen_ir::verify_function(f), Ok(()));
                }
            }
        }
    }
});
