//! ObjectModel: a program model over an on-disk ELF/PE/Mach-O image.
//!
//! Segments, sections and symbols come from the `object` crate. Functions
//! are seeded from text symbols and split into basic blocks by linear decode
//! with the architecture's instruction decoder.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use object::{Object, ObjectSection, ObjectSegment, ObjectSymbol, SectionKind, SymbolKind};
use tracing::{debug, info};

use crate::disasm::registry::{self, Backend};
use crate::disasm::{Architecture, Endianness, Flow, InstructionDecoder};
use crate::model::{
    BlockInfo, FunctionInfo, ModelError, ProgramModel, SectionSemantics, SegmentFlags,
};

#[derive(Debug, Clone)]
struct Segment {
    start: u64,
    end: u64,
    file_offset: u64,
    file_size: u64,
    flags: SegmentFlags,
}

impl Segment {
    fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }
}

#[derive(Debug, Clone)]
struct Section {
    start: u64,
    end: u64,
    kind: SectionKind,
}

#[derive(Debug, Clone)]
struct Function {
    end: u64,
    name: String,
}

/// Program model backed by an object file.
pub struct ObjectModel {
    path: String,
    data: Vec<u8>,
    decoder: Backend,
    image_base: u64,
    start: u64,
    end: u64,
    segments: Vec<Segment>,
    sections: Vec<(u64, u64, SectionSemantics)>,
    data_symbols: BTreeSet<u64>,
    functions: BTreeMap<u64, Function>,
    longest_function: u64,
    blocks: BTreeMap<u64, BlockInfo>,
    longest_block: u64,
    // functions created since the last update_analysis
    pending: Vec<u64>,
}

impl std::fmt::Debug for ObjectModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectModel")
            .field("path", &self.path)
            .field("arch", &self.decoder.architecture())
            .field("image_base", &self.image_base)
            .field("functions", &self.functions.len())
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

fn parse_error(path: &str, message: impl ToString) -> ModelError {
    ModelError::Parse {
        path: path.to_string(),
        message: message.to_string(),
    }
}

/// Translate native permission bits into segment flags.
fn segment_flags(flags: object::SegmentFlags) -> SegmentFlags {
    let (r, w, x, code) = match flags {
        object::SegmentFlags::Elf { p_flags } => (
            p_flags & object::elf::PF_R != 0,
            p_flags & object::elf::PF_W != 0,
            p_flags & object::elf::PF_X != 0,
            false,
        ),
        object::SegmentFlags::MachO { initprot, .. } => (
            initprot & object::macho::VM_PROT_READ != 0,
            initprot & object::macho::VM_PROT_WRITE != 0,
            initprot & object::macho::VM_PROT_EXECUTE != 0,
            false,
        ),
        object::SegmentFlags::Coff { characteristics } => (
            characteristics & object::pe::IMAGE_SCN_MEM_READ != 0,
            characteristics & object::pe::IMAGE_SCN_MEM_WRITE != 0,
            characteristics & object::pe::IMAGE_SCN_MEM_EXECUTE != 0,
            characteristics & object::pe::IMAGE_SCN_CNT_CODE != 0,
        ),
        _ => (true, false, false, false),
    };
    let mut out = SegmentFlags::empty();
    out.set(SegmentFlags::READABLE, r);
    out.set(SegmentFlags::WRITABLE, w);
    out.set(SegmentFlags::EXECUTABLE, x);
    out.set(SegmentFlags::CONTAINS_CODE, code);
    // W^X images never execute writable data
    out.set(SegmentFlags::DENY_EXECUTE, w && !x);
    out.set(SegmentFlags::DENY_WRITE, !w);
    out
}

fn section_semantics(kind: SectionKind) -> SectionSemantics {
    match kind {
        SectionKind::Text => SectionSemantics::ReadOnlyCode,
        SectionKind::ReadOnlyData
        | SectionKind::ReadOnlyDataWithRel
        | SectionKind::ReadOnlyString => SectionSemantics::ReadOnlyData,
        SectionKind::Data
        | SectionKind::UninitializedData
        | SectionKind::Tls
        | SectionKind::UninitializedTls
        | SectionKind::Common => SectionSemantics::ReadWriteData,
        _ => SectionSemantics::Default,
    }
}

fn is_data_kind(kind: SectionKind) -> bool {
    matches!(
        section_semantics(kind),
        SectionSemantics::ReadOnlyData | SectionSemantics::ReadWriteData
    )
}

impl ObjectModel {
    /// Read and analyze the image at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let display = path.to_string_lossy().into_owned();
        let data = std::fs::read(path).map_err(|e| parse_error(&display, e))?;
        Self::from_bytes(display, data)
    }

    /// Analyze an image already in memory; `path` is what traces are
    /// matched against.
    pub fn from_bytes(path: impl Into<String>, data: Vec<u8>) -> Result<Self, ModelError> {
        let path = path.into();
        let obj = object::File::parse(&*data).map_err(|e| parse_error(&path, e))?;

        let arch = Architecture::from(obj.architecture());
        let endianness = if obj.is_little_endian() {
            Endianness::Little
        } else {
            Endianness::Big
        };
        let decoder = registry::for_arch(arch, endianness)
            .ok_or_else(|| ModelError::UnsupportedArchitecture(arch.to_string()))?;

        let sections: Vec<Section> = obj
            .sections()
            .filter(|s| s.size() > 0 && s.address() != 0)
            .map(|s| Section {
                start: s.address(),
                end: s.address().saturating_add(s.size()),
                kind: s.kind(),
            })
            .collect();

        let mut segments: Vec<Segment> = obj
            .segments()
            .filter(|s| s.size() > 0)
            .map(|s| {
                let (file_offset, file_size) = s.file_range();
                Segment {
                    start: s.address(),
                    end: s.address().saturating_add(s.size()),
                    file_offset,
                    file_size,
                    flags: segment_flags(s.flags()),
                }
            })
            .collect();

        if segments.is_empty() {
            // Images without program headers: one region per allocated section
            for sec in obj.sections() {
                if sec.size() == 0 || sec.address() == 0 {
                    continue;
                }
                let (file_offset, file_size) = sec.file_range().unwrap_or((0, 0));
                let kind = sec.kind();
                let mut flags = SegmentFlags::READABLE;
                match section_semantics(kind) {
                    SectionSemantics::ReadOnlyCode => flags |= SegmentFlags::EXECUTABLE,
                    SectionSemantics::ReadWriteData => {
                        flags |= SegmentFlags::WRITABLE | SegmentFlags::DENY_EXECUTE
                    }
                    _ => flags |= SegmentFlags::DENY_WRITE,
                }
                segments.push(Segment {
                    start: sec.address(),
                    end: sec.address().saturating_add(sec.size()),
                    file_offset,
                    file_size,
                    flags,
                });
            }
        }

        for seg in &mut segments {
            for sec in sections.iter().filter(|s| s.start < seg.end && s.end > seg.start) {
                if sec.kind == SectionKind::Text {
                    seg.flags |= SegmentFlags::CONTAINS_CODE;
                } else if is_data_kind(sec.kind) {
                    seg.flags |= SegmentFlags::CONTAINS_DATA;
                }
            }
        }
        segments.sort_by_key(|s| s.start);

        let start = segments.iter().map(|s| s.start).min().unwrap_or(0);
        let end = segments.iter().map(|s| s.end).max().unwrap_or(0);
        let image_base = match obj.relative_address_base() {
            0 => start,
            base => base,
        };

        let mut data_symbols = BTreeSet::new();
        let mut text_symbols: BTreeMap<u64, (u64, String)> = BTreeMap::new();
        for sym in obj.symbols().chain(obj.dynamic_symbols()) {
            if !sym.is_definition() || sym.address() == 0 {
                continue;
            }
            match sym.kind() {
                SymbolKind::Data | SymbolKind::Tls => {
                    data_symbols.insert(sym.address());
                }
                SymbolKind::Text => {
                    let name = sym.name().unwrap_or("").to_string();
                    text_symbols
                        .entry(sym.address())
                        .or_insert((sym.size(), name));
                }
                _ => {}
            }
        }

        let mut model = Self {
            path,
            data: Vec::new(),
            decoder,
            image_base,
            start,
            end,
            segments,
            sections: sections
                .iter()
                .map(|s| (s.start, s.end, section_semantics(s.kind)))
                .collect(),
            data_symbols,
            functions: BTreeMap::new(),
            longest_function: 0,
            blocks: BTreeMap::new(),
            longest_block: 0,
            pending: Vec::new(),
        };
        drop(obj);
        model.data = data;

        let seeds: Vec<(u64, u64, String)> = text_symbols
            .iter()
            .map(|(&addr, (size, name))| (addr, *size, name.clone()))
            .collect();
        for (i, (addr, size, name)) in seeds.iter().enumerate() {
            if !model.is_valid_offset(*addr) {
                continue;
            }
            let next = seeds.get(i + 1).map(|s| s.0);
            let fn_end = if *size > 0 {
                addr.saturating_add(*size)
            } else {
                model.decode_extent(*addr, next)
            };
            let name = if name.is_empty() {
                format!("sub_{:x}", addr)
            } else {
                name.clone()
            };
            model.insert_function(*addr, fn_end.max(addr.saturating_add(1)), name);
            model.build_blocks(*addr);
        }

        info!(
            image = %model.path,
            arch = %arch,
            decoder = model.decoder.name(),
            functions = model.functions.len(),
            blocks = model.blocks.len(),
            "Loaded program model"
        );
        Ok(model)
    }

    pub fn architecture(&self) -> Architecture {
        self.decoder.architecture()
    }

    fn segment_at(&self, addr: u64) -> Option<&Segment> {
        self.segments.iter().find(|s| s.contains(addr))
    }

    /// File-backed bytes at `addr`, at most `len` of them.
    fn bytes_at(&self, addr: u64, len: usize) -> Option<&[u8]> {
        let seg = self.segment_at(addr)?;
        let offset = addr - seg.start;
        if offset >= seg.file_size {
            return None;
        }
        let avail = (seg.file_size - offset).min(len as u64) as usize;
        let from = usize::try_from(seg.file_offset.checked_add(offset)?).ok()?;
        self.data.get(from..from.checked_add(avail)?)
    }

    fn decode(&self, addr: u64) -> Option<crate::disasm::Decoded> {
        let bytes = self.bytes_at(addr, self.decoder.max_instruction_length())?;
        self.decoder.decode(addr, bytes)
    }

    /// End of straight-line code from `entry`: stops after a return,
    /// unconditional branch or trap, before an undecodable instruction, or
    /// at `limit`.
    fn decode_extent(&self, entry: u64, limit: Option<u64>) -> u64 {
        let seg_end = self.segment_at(entry).map(|s| s.end).unwrap_or(entry);
        let limit = limit.map_or(seg_end, |l| l.min(seg_end));
        let mut addr = entry;
        while addr < limit {
            let Some(ins) = self.decode(addr) else {
                break;
            };
            addr = addr.saturating_add(ins.length as u64);
            if !ins.flow.falls_through() {
                break;
            }
        }
        addr.min(limit)
    }

    fn insert_function(&mut self, start: u64, end: u64, name: String) {
        self.longest_function = self.longest_function.max(end - start);
        self.functions.insert(start, Function { end, name });
    }

    /// Split the function at `start` into basic blocks.
    fn build_blocks(&mut self, start: u64) {
        let Some(func) = self.functions.get(&start).cloned() else {
            return;
        };

        let mut instructions: Vec<(u64, u64, Flow)> = Vec::new();
        let mut leaders = BTreeSet::from([start]);
        let mut addr = start;
        while addr < func.end {
            let Some(ins) = self.decode(addr) else {
                break;
            };
            let next = addr.saturating_add(ins.length as u64);
            instructions.push((addr, ins.length as u64, ins.flow));
            if ins.flow.ends_block() && next < func.end {
                leaders.insert(next);
            }
            if let Flow::Branch {
                target: Some(target),
                ..
            } = ins.flow
            {
                if target >= start && target < func.end {
                    leaders.insert(target);
                }
            }
            addr = next;
        }

        let mut block_start: Option<u64> = None;
        let mut new_blocks = Vec::new();
        for (i, &(addr, len, flow)) in instructions.iter().enumerate() {
            let begin = *block_start.get_or_insert(addr);
            let next = addr + len;
            let contiguous = instructions.get(i + 1).map(|n| n.0) == Some(next);
            if flow.ends_block() || leaders.contains(&next) || !contiguous {
                new_blocks.push(BlockInfo::new(begin, next - begin, func.name.clone()));
                block_start = None;
            }
        }

        debug!(function = %func.name, start, blocks = new_blocks.len(), "Built blocks");
        for block in new_blocks {
            self.longest_block = self.longest_block.max(block.length);
            self.blocks.entry(block.start).or_insert(block);
        }
    }
}

impl ProgramModel for ObjectModel {
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
        self.segment_at(addr).is_some()
    }

    fn instruction_length(&self, addr: u64) -> u64 {
        self.decode(addr).map_or(0, |ins| ins.length as u64)
    }

    fn max_instruction_length(&self) -> u64 {
        self.decoder.max_instruction_length() as u64
    }

    fn instruction_alignment(&self) -> u64 {
        self.decoder.instruction_alignment() as u64
    }

    fn blocks_containing(&self, addr: u64) -> Vec<BlockInfo> {
        let from = addr.saturating_sub(self.longest_block);
        self.blocks
            .range(from..=addr)
            .filter(|(_, b)| b.contains(addr))
            .map(|(_, b)| b.clone())
            .collect()
    }

    fn blocks_starting_at(&self, addr: u64) -> Vec<BlockInfo> {
        self.blocks.get(&addr).cloned().into_iter().collect()
    }

    fn functions_containing(&self, addr: u64) -> Vec<FunctionInfo> {
        let from = addr.saturating_sub(self.longest_function);
        self.functions
            .range(from..=addr)
            .filter(|(_, f)| addr < f.end)
            .map(|(&start, f)| FunctionInfo {
                start,
                name: f.name.clone(),
            })
            .collect()
    }

    fn functions_at(&self, addr: u64) -> Vec<FunctionInfo> {
        self.functions
            .get(&addr)
            .map(|f| FunctionInfo {
                start: addr,
                name: f.name.clone(),
            })
            .into_iter()
            .collect()
    }

    fn segment_flags_at(&self, addr: u64) -> Option<SegmentFlags> {
        self.segment_at(addr).map(|s| s.flags)
    }

    fn section_semantics_at(&self, addr: u64) -> Vec<SectionSemantics> {
        self.sections
            .iter()
            .filter(|(start, end, _)| addr >= *start && addr < *end)
            .map(|(_, _, semantics)| *semantics)
            .collect()
    }

    fn has_data_variable_at(&self, addr: u64) -> bool {
        self.data_symbols.contains(&addr)
    }

    fn create_function(&mut self, entrypoint: u64) -> Result<FunctionInfo, ModelError> {
        if self.functions.contains_key(&entrypoint) {
            return Err(ModelError::FunctionExists(entrypoint));
        }
        if !self.is_valid_offset(entrypoint) {
            return Err(ModelError::Unmapped(entrypoint));
        }
        if self.decode(entrypoint).is_none() {
            return Err(ModelError::InvalidInstruction(entrypoint));
        }
        let next = self
            .functions
            .range(entrypoint..)
            .next()
            .map(|(&start, _)| start);
        let end = self.decode_extent(entrypoint, next);
        let name = format!("sub_{:x}", entrypoint);
        self.insert_function(entrypoint, end, name.clone());
        self.pending.push(entrypoint);
        debug!(entrypoint, end, "Created function");
        Ok(FunctionInfo {
            start: entrypoint,
            name,
        })
    }

    fn update_analysis(&mut self) {
        for start in std::mem::take(&mut self.pending) {
            self.build_blocks(start);
        }
    }
}
