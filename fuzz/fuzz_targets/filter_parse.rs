#![no_main]
use libfuzzer_sys::fuzz_target;

use covex::core::CoveredBlock;
use covex::query::parse_block_filter;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    match parse_block_filter(text) {
        Ok(filter) => {
            let block = CoveredBlock {
                start: 0x401000,
                size: 16,
                hits: 3,
                module_id: None,
                function: "Main".to_string(),
            };
            let _ = filter.matches(&block);
        }
        // offsets point at a condition inside the input
        Err(err) => assert!(err.position < text.chars().count()),
    }
});
