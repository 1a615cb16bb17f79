#![no_main]
use libfuzzer_sys::fuzz_target;
use std::path::Path;

use covex::formats::drcov::DrcovData;

fuzz_target!(|data: &[u8]| {
    if let Ok(decoded) = DrcovData::decode(data) {
        let trace = decoded.to_trace(Path::new("<fuzz>"));
        assert_eq!(
            trace.spans.len() + trace.unresolved_spans,
            decoded.blocks.len()
        );
        let _ = DrcovData::decode(&decoded.encode());
    }
});
