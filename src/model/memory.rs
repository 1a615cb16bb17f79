//! MemoryModel: a program model backed by caller-provided tables.
//!
//! Every answer comes from explicit tables, so instruction strides, block
//! boundaries and function extents are exactly what the caller wrote. Used
//! as the deterministic fake in tests and for hosts that already have their
//! own analysis results in memory.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::{
    BlockInfo, FunctionInfo, ModelError, ProgramModel, SectionSemantics, SegmentFlags,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct FunctionRange {
    start: u64,
    end: u64,
    name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Region<T> {
    start: u64,
    end: u64,
    value: T,
}

impl<T> Region<T> {
    fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// In-memory program model.
#[derive(Debug, Clone)]
pub struct MemoryModel {
    path: String,
    image_base: u64,
    start: u64,
    end: u64,
    default_instruction_length: u64,
    instruction_lengths: BTreeMap<u64, u64>,
    max_instruction_length: u64,
    alignment: u64,
    unmapped: Vec<Region<()>>,
    blocks: Vec<BlockInfo>,
    functions: Vec<FunctionRange>,
    segments: Vec<Region<SegmentFlags>>,
    sections: Vec<Region<SectionSemantics>>,
    data_variables: BTreeSet<u64>,
    rejected: BTreeSet<u64>,
    created: Vec<u64>,
    analysis_updates: usize,
}

impl MemoryModel {
    /// Model of the image at `path` spanning `[start, end)`, loaded at
    /// `start`. Every address decodes as a 1-byte instruction until told
    /// otherwise.
    pub fn new(path: impl Into<String>, start: u64, end: u64) -> Self {
        Self {
            path: path.into(),
            image_base: start,
            start,
            end,
            default_instruction_length: 1,
            instruction_lengths: BTreeMap::new(),
            max_instruction_length: 16,
            alignment: 1,
            unmapped: Vec::new(),
            blocks: Vec::new(),
            functions: Vec::new(),
            segments: Vec::new(),
            sections: Vec::new(),
            data_variables: BTreeSet::new(),
            rejected: BTreeSet::new(),
            created: Vec::new(),
            analysis_updates: 0,
        }
    }

    pub fn with_image_base(mut self, base: u64) -> Self {
        self.image_base = base;
        self
    }

    /// Length reported for addresses without an explicit entry; 0 makes
    /// them undecodable.
    pub fn with_default_instruction_length(mut self, len: u64) -> Self {
        self.default_instruction_length = len;
        self
    }

    pub fn with_instruction(mut self, addr: u64, len: u64) -> Self {
        self.instruction_lengths.insert(addr, len);
        self
    }

    /// Lay out consecutive instructions of the given lengths from `start`.
    pub fn with_instructions(mut self, start: u64, lengths: &[u64]) -> Self {
        let mut addr = start;
        for &len in lengths {
            self.instruction_lengths.insert(addr, len);
            addr = addr.saturating_add(len.max(1));
        }
        self
    }

    pub fn with_max_instruction_length(mut self, len: u64) -> Self {
        self.max_instruction_length = len;
        self
    }

    pub fn with_alignment(mut self, alignment: u64) -> Self {
        self.alignment = alignment.max(1);
        self
    }

    /// Mark `[start, end)` as a hole: inside the image range but not backed.
    pub fn with_unmapped(mut self, start: u64, end: u64) -> Self {
        self.unmapped.push(Region {
            start,
            end,
            value: (),
        });
        self
    }

    pub fn with_block(mut self, start: u64, length: u64, function: impl Into<String>) -> Self {
        self.blocks.push(BlockInfo::new(start, length, function));
        self
    }

    pub fn with_function(mut self, start: u64, end: u64, name: impl Into<String>) -> Self {
        self.functions.push(FunctionRange {
            start,
            end,
            name: name.into(),
        });
        self
    }

    pub fn with_segment(mut self, start: u64, end: u64, flags: SegmentFlags) -> Self {
        self.segments.push(Region {
            start,
            end,
            value: flags,
        });
        self
    }

    pub fn with_section(mut self, start: u64, end: u64, semantics: SectionSemantics) -> Self {
        self.sections.push(Region {
            start,
            end,
            value: semantics,
        });
        self
    }

    pub fn with_data_variable(mut self, addr: u64) -> Self {
        self.data_variables.insert(addr);
        self
    }

    /// Make `create_function` fail at `addr`.
    pub fn rejecting_creation_at(mut self, addr: u64) -> Self {
        self.rejected.insert(addr);
        self
    }

    /// Entrypoints of functions created through `create_function`, in order.
    pub fn created_functions(&self) -> &[u64] {
        &self.created
    }

    pub fn analysis_updates(&self) -> usize {
        self.analysis_updates
    }

    fn creation_extent(&self, entry: u64, len: u64) -> u64 {
        self.blocks
            .iter()
            .filter(|b| b.contains(entry))
            .map(BlockInfo::end)
            .max()
            .unwrap_or_else(|| entry.saturating_add(len.max(1)))
    }
}

impl ProgramModel for MemoryModel {
    fn image_path(&self) -> &str {
        &self.path
    }

    fn image_base(&self) -> u64 {
        self.image_base
    }

    fn start(&self) -> u64 {
        self.start
    }

    fn end(&self) -> u64 {
        self.end
    }

    fn is_valid_offset(&self, addr: u64) -> bool {
        self.contains_address(addr) && !self.unmapped.iter().any(|r| r.contains(addr))
    }

    fn instruction_length(&self, addr: u64) -> u64 {
        if !self.is_valid_offset(addr) {
            return 0;
        }
        self.instruction_lengths
            .get(&addr)
            .copied()
            .unwrap_or(self.default_instruction_length)
    }

    fn max_instruction_length(&self) -> u64 {
        self.max_instruction_length
    }

    fn instruction_alignment(&self) -> u64 {
        self.alignment
    }

    fn blocks_containing(&self, addr: u64) -> Vec<BlockInfo> {
        self.blocks
            .iter()
            .filter(|b| b.contains(addr))
            .cloned()
            .collect()
    }

    fn blocks_starting_at(&self, addr: u64) -> Vec<BlockInfo> {
        self.blocks
            .iter()
            .filter(|b| b.start == addr)
            .cloned()
            .collect()
    }

    fn functions_containing(&self, addr: u64) -> Vec<FunctionInfo> {
        self.functions
            .iter()
            .filter(|f| addr >= f.start && addr < f.end)
            .map(|f| FunctionInfo {
                start: f.start,
                name: f.name.clone(),
            })
            .collect()
    }

    fn functions_at(&self, addr: u64) -> Vec<FunctionInfo> {
        self.functions
            .iter()
            .filter(|f| f.start == addr)
            .map(|f| FunctionInfo {
                start: f.start,
                name: f.name.clone(),
            })
            .collect()
    }

    fn segment_flags_at(&self, addr: u64) -> Option<SegmentFlags> {
        self.segments
            .iter()
            .find(|s| s.contains(addr))
            .map(|s| s.value)
    }

    fn section_semantics_at(&self, addr: u64) -> Vec<SectionSemantics> {
        self.sections
            .iter()
            .filter(|s| s.contains(addr))
            .map(|s| s.value)
            .collect()
    }

    fn has_data_variable_at(&self, addr: u64) -> bool {
        self.data_variables.contains(&addr)
    }

    fn create_function(&mut self, entrypoint: u64) -> Result<FunctionInfo, ModelError> {
        if self.rejected.contains(&entrypoint) {
            return Err(ModelError::Rejected(entrypoint));
        }
        if !self.functions_at(entrypoint).is_empty() {
            return Err(ModelError::FunctionExists(entrypoint));
        }
        let len = self.instruction_length(entrypoint);
        if len == 0 {
            return Err(ModelError::InvalidInstruction(entrypoint));
        }
        let end = self.creation_extent(entrypoint, len);
        let name = format!("sub_{:x}", entrypoint);
        if self.blocks_containing(entrypoint).is_empty() {
            self.blocks
                .push(BlockInfo::new(entrypoint, end - entrypoint, name.clone()));
        }
        self.functions.push(FunctionRange {
            start: entrypoint,
            end,
            name: name.clone(),
        });
        self.created.push(entrypoint);
        Ok(FunctionInfo {
            start: entrypoint,
            name,
        })
    }

    fn update_analysis(&mut self) {
        self.analysis_updates += 1;
    }
}
