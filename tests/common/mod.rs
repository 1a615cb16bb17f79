//! Shared fixtures for the integration tests.
//!
//! Trace files are written to temporary files; the program image is always
//! a `MemoryModel` so instruction lengths and block boundaries are exact.

#![allow(dead_code)]

use std::io::Write;

use covex::formats::drcov::{DrcovBlock, DrcovData, DrcovModule};
use covex::model::{MemoryModel, SectionSemantics, SegmentFlags};
use tempfile::NamedTempFile;

pub const IMAGE_PATH: &str = "/opt/app/bin/target";
pub const IMAGE_BASE: u64 = 0x400000;
pub const IMAGE_END: u64 = 0x410000;

/// Base the fixture drcov trace recorded `target` at.
pub const RECORDED_BASE: u64 = 0x5555_5555_4000;

pub fn write_text(body: &str) -> NamedTempFile {
    write_bytes(body.as_bytes())
}

pub fn write_bytes(bytes: &[u8]) -> NamedTempFile {
    let mut f = NamedTempFile::new().expect("create temp file");
    f.write_all(bytes).expect("write trace");
    f.flush().expect("flush trace");
    f
}

/// Image with one code segment, three functions and a data segment:
///
/// ```text
/// 0x401000 init_a   block 0x401000+0x10
/// 0x401010 init_b   block 0x401010+0x10
/// 0x401020 main     blocks 0x401020+0x8, 0x401028+0x8
/// 0x408000 data     (rw-)
/// ```
///
/// Instructions are 4 bytes throughout.
pub fn sample_model() -> MemoryModel {
    MemoryModel::new(IMAGE_PATH, IMAGE_BASE, IMAGE_END)
        .with_default_instruction_length(4)
        .with_alignment(4)
        .with_segment(0x400000, 0x408000, SegmentFlags::code())
        .with_segment(0x408000, 0x410000, SegmentFlags::data())
        .with_section(0x401000, 0x408000, SectionSemantics::ReadOnlyCode)
        .with_section(0x408000, 0x410000, SectionSemantics::ReadWriteData)
        .with_function(0x401000, 0x401010, "init_a")
        .with_function(0x401010, 0x401020, "init_b")
        .with_function(0x401020, 0x401030, "main")
        .with_block(0x401000, 0x10, "init_a")
        .with_block(0x401010, 0x10, "init_b")
        .with_block(0x401020, 0x8, "main")
        .with_block(0x401028, 0x8, "main")
}

/// Two-module drcov trace: `target` at `RECORDED_BASE` and a shared library.
/// The last block names a module id missing from the table.
pub fn sample_drcov(hitcounts: Option<Vec<u32>>) -> DrcovData {
    DrcovData {
        version: 2,
        flavor: Some("drcov".to_string()),
        module_table_version: 2,
        modules: vec![
            DrcovModule {
                id: 0,
                base: RECORDED_BASE,
                end: RECORDED_BASE + 0x10000,
                entry: RECORDED_BASE + 0x1000,
                path: "/home/user/build/TARGET".to_string(),
            },
            DrcovModule {
                id: 1,
                base: 0x7f00_0000_0000,
                end: 0x7f00_0010_0000,
                entry: 0,
                path: "/usr/lib/libc.so.6".to_string(),
            },
        ],
        blocks: vec![
            // init_a, two instructions
            DrcovBlock {
                start: 0x1000,
                size: 8,
                module_id: 0,
            },
            // main, runs into its second block
            DrcovBlock {
                start: 0x1024,
                size: 8,
                module_id: 0,
            },
            DrcovBlock {
                start: 0x500,
                size: 16,
                module_id: 1,
            },
            DrcovBlock {
                start: 0x40,
                size: 4,
                module_id: 7,
            },
        ],
        hitcounts,
    }
}
