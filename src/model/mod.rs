//! Program model capability interface.
//!
//! The coverage pipeline never decodes instructions or builds control flow
//! itself. It asks a `ProgramModel` for address validity, instruction
//! lengths, block and function membership, segment and section attributes,
//! and (for discovery) to create functions. `ObjectModel` answers from an
//! on-disk image; `MemoryModel` answers from tables the caller fills in.

pub mod memory;
pub mod object;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryModel;
pub use object::ObjectModel;

bitflags! {
    /// Segment attribute flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SegmentFlags: u32 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
        const EXECUTABLE = 1 << 2;
        const CONTAINS_DATA = 1 << 3;
        const CONTAINS_CODE = 1 << 4;
        /// Execution is explicitly forbidden (W^X data, NX stack)
        const DENY_EXECUTE = 1 << 5;
        const DENY_WRITE = 1 << 6;
    }
}

impl SegmentFlags {
    /// Typical `r-x` code segment.
    pub fn code() -> Self {
        Self::READABLE | Self::EXECUTABLE | Self::CONTAINS_CODE
    }

    /// Typical `rw-` data segment.
    pub fn data() -> Self {
        Self::READABLE | Self::WRITABLE | Self::CONTAINS_DATA | Self::DENY_EXECUTE
    }
}

/// What a section holds, as far as the model can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SectionSemantics {
    Default,
    ReadOnlyCode,
    ReadOnlyData,
    ReadWriteData,
    External,
}

/// A basic block as the model sees it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockInfo {
    pub start: u64,
    pub length: u64,
    /// Name of the function the block belongs to
    pub function: String,
}

impl BlockInfo {
    pub fn new(start: u64, length: u64, function: impl Into<String>) -> Self {
        Self {
            start,
            length,
            function: function.into(),
        }
    }

    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.length)
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end()
    }
}

/// A function known to the model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub start: u64,
    pub name: String,
}

/// Failures reported by a program model.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("failed to parse image {path}: {message}")]
    Parse { path: String, message: String },
    #[error("no decoder for architecture {0}")]
    UnsupportedArchitecture(String),
    #[error("function already exists at {0:#x}")]
    FunctionExists(u64),
    #[error("no valid instruction at {0:#x}")]
    InvalidInstruction(u64),
    #[error("address {0:#x} is not mapped")]
    Unmapped(u64),
    #[error("function creation rejected at {0:#x}")]
    Rejected(u64),
}

/// Queries and the single mutation the coverage pipeline needs from a
/// disassembler/program database.
pub trait ProgramModel {
    /// Path of the analyzed image as originally opened.
    fn image_path(&self) -> &str;

    /// Load address the image is analyzed at.
    fn image_base(&self) -> u64;

    /// Lowest address of the image.
    fn start(&self) -> u64;

    /// Exclusive end of the image.
    fn end(&self) -> u64;

    /// Whether `addr` lies in `[start, end)`.
    fn contains_address(&self, addr: u64) -> bool {
        addr >= self.start() && addr < self.end()
    }

    /// Whether `addr` is backed by a mapped segment. Defaults to the image
    /// range for models without holes.
    fn is_valid_offset(&self, addr: u64) -> bool {
        self.contains_address(addr)
    }

    /// Length of the instruction decoded at `addr`, 0 if none decodes.
    fn instruction_length(&self, addr: u64) -> u64;

    fn max_instruction_length(&self) -> u64;

    /// Required instruction alignment in bytes (1 for variable-length ISAs).
    fn instruction_alignment(&self) -> u64 {
        1
    }

    fn blocks_containing(&self, addr: u64) -> Vec<BlockInfo>;

    fn blocks_starting_at(&self, addr: u64) -> Vec<BlockInfo>;

    fn functions_containing(&self, addr: u64) -> Vec<FunctionInfo>;

    fn functions_at(&self, addr: u64) -> Vec<FunctionInfo>;

    /// Flags of the segment mapping `addr`, if any.
    fn segment_flags_at(&self, addr: u64) -> Option<SegmentFlags>;

    /// Semantics of every section covering `addr`.
    fn section_semantics_at(&self, addr: u64) -> Vec<SectionSemantics>;

    /// Whether a typed data object occupies `addr`.
    fn has_data_variable_at(&self, addr: u64) -> bool;

    /// Create a function at `entrypoint` using the default platform.
    fn create_function(&mut self, entrypoint: u64) -> Result<FunctionInfo, ModelError>;

    /// Bring derived analysis up to date after mutations.
    fn update_analysis(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_flag_presets() {
        let code = SegmentFlags::code();
        assert!(code.contains(SegmentFlags::EXECUTABLE));
        assert!(!code.contains(SegmentFlags::DENY_EXECUTE));
        let data = SegmentFlags::data();
        assert!(data.contains(SegmentFlags::DENY_EXECUTE));
        assert!(!data.contains(SegmentFlags::EXECUTABLE));
    }

    #[test]
    fn test_block_contains() {
        let block = BlockInfo::new(0x1000, 0x10, "main");
        assert!(block.contains(0x1000));
        assert!(block.contains(0x100f));
        assert!(!block.contains(0x1010));
        assert_eq!(block.end(), 0x1010);
    }
}
