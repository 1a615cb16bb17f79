#![no_main]
use libfuzzer_sys::fuzz_target;
use std::path::Path;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let lines: Vec<&str> = text.lines().take(32).collect();
    let _ = covex::formats::addr_trace::looks_like_addr_trace(&lines);
    let _ = covex::formats::addr_trace::parse_addr_trace_str(&text, Path::new("<fuzz>"));
});
