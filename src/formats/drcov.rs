//! drcov block-trace codec.
//!
//! Layout (text header, binary tables):
//!
//! ```text
//! DRCOV VERSION: 2
//! DRCOV FLAVOR: drcov
//! Module Table: version 2, count 1
//! Columns: id, base, end, entry, path
//!   0, 0x400000, 0x401000, 0x400100, /bin/target
//! BB Table: 2 bbs
//! <2 x {u32 start, u16 size, u16 module_id}, little endian>
//! Hit Count Table: 2
//! <2 x u32, little endian>
//! ```
//!
//! Legacy files use `Module Table: <count>` with implicit columns
//! `id, base, end, entry, path`. The hit count table is optional.

use std::path::Path;

use memchr::memchr;
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::config::IoConfig;
use crate::core::{CoverageSpan, CoverageTrace, ModuleInfo, TraceFormat};
use crate::error::Result;
use crate::formats::io::{file_has_block_trace_magic, read_trace_file, BLOCK_TRACE_MAGIC};
use crate::formats::CoverageParser;

const BLOCK_RECORD_SIZE: usize = 8;
const LEGACY_COLUMNS: &[&str] = &["id", "base", "end", "entry", "path"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DrcovError {
    #[error("missing DRCOV magic")]
    MissingMagic,
    #[error("invalid header: {0}")]
    Header(String),
    #[error("invalid module table: {0}")]
    ModuleTable(String),
    #[error("invalid basic block table: {0}")]
    BlockTable(String),
    #[error("invalid hit count table: {0}")]
    HitCountTable(String),
    #[error("truncated {section}: expected {expected} bytes, found {found}")]
    Truncated {
        section: &'static str,
        expected: usize,
        found: usize,
    },
}

type DrcovResult<T> = std::result::Result<T, DrcovError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrcovModule {
    pub id: u32,
    pub base: u64,
    pub end: u64,
    pub entry: u64,
    pub path: String,
}

/// One basic block record, offset relative to its module's base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrcovBlock {
    pub start: u32,
    pub size: u16,
    pub module_id: u16,
}

/// Decoded drcov file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrcovData {
    pub version: u32,
    pub flavor: Option<String>,
    pub module_table_version: u32,
    pub modules: Vec<DrcovModule>,
    pub blocks: Vec<DrcovBlock>,
    /// Parallel to `blocks` when present
    pub hitcounts: Option<Vec<u32>>,
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Next text line without its terminator, or `None` at end of input.
    fn line(&mut self) -> DrcovResult<Option<&'a str>> {
        if self.at_end() {
            return Ok(None);
        }
        let rest = self.remaining();
        let (raw, consumed) = match memchr(b'\n', rest) {
            Some(nl) => (&rest[..nl], nl + 1),
            None => (rest, rest.len()),
        };
        self.pos += consumed;
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        std::str::from_utf8(raw)
            .map(Some)
            .map_err(|_| DrcovError::Header("header line is not UTF-8".to_string()))
    }

    fn peek_starts_with(&self, prefix: &[u8]) -> bool {
        self.remaining().starts_with(prefix)
    }

    fn skip_line_breaks(&mut self) {
        while matches!(self.remaining().first(), Some(b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn take(&mut self, len: usize, section: &'static str) -> DrcovResult<&'a [u8]> {
        let rest = self.remaining();
        if rest.len() < len {
            return Err(DrcovError::Truncated {
                section,
                expected: len,
                found: rest.len(),
            });
        }
        self.pos += len;
        Ok(&rest[..len])
    }
}

/// Decimal, or hexadecimal with a `0x` prefix.
fn parse_int(text: &str) -> Option<u64> {
    let text = text.trim();
    match text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

fn expect_line<'a>(cursor: &mut Cursor<'a>, what: &str) -> DrcovResult<&'a str> {
    cursor
        .line()?
        .ok_or_else(|| DrcovError::Header(format!("unexpected end of file before {}", what)))
}

/// `Module Table: version 2, count 3` or legacy `Module Table: 3`.
fn parse_module_table_header(line: &str) -> DrcovResult<(u32, usize)> {
    let body = line
        .strip_prefix("Module Table:")
        .ok_or_else(|| DrcovError::ModuleTable(format!("expected module table, got {:?}", line)))?
        .trim();
    let bad = || DrcovError::ModuleTable(format!("malformed header {:?}", line));
    if let Some(rest) = body.strip_prefix("version") {
        let (version, count) = rest.split_once(',').ok_or_else(bad)?;
        let version = parse_int(version).ok_or_else(bad)?;
        let count = count
            .trim()
            .strip_prefix("count")
            .and_then(parse_int)
            .ok_or_else(bad)?;
        Ok((version as u32, count as usize))
    } else {
        let count = parse_int(body).ok_or_else(bad)?;
        Ok((1, count as usize))
    }
}

struct ColumnLayout {
    names: Vec<String>,
    id: usize,
    base: usize,
    end: usize,
    entry: Option<usize>,
}

impl ColumnLayout {
    fn new(names: Vec<String>) -> DrcovResult<Self> {
        let find = |candidates: &[&str]| names.iter().position(|n| candidates.contains(&n.as_str()));
        let missing = |col: &str| DrcovError::ModuleTable(format!("missing {} column", col));
        let id = find(&["id"]).ok_or_else(|| missing("id"))?;
        let base = find(&["base", "start"]).ok_or_else(|| missing("base"))?;
        let end = find(&["end"]).ok_or_else(|| missing("end"))?;
        let entry = find(&["entry"]);
        if names.last().map(String::as_str) != Some("path") {
            return Err(DrcovError::ModuleTable(
                "path must be the last column".to_string(),
            ));
        }
        Ok(Self {
            names,
            id,
            base,
            end,
            entry,
        })
    }

    fn parse_row(&self, line: &str) -> DrcovResult<DrcovModule> {
        let fields: Vec<&str> = line.trim_start().splitn(self.names.len(), ',').collect();
        if fields.len() != self.names.len() {
            return Err(DrcovError::ModuleTable(format!(
                "expected {} columns in {:?}",
                self.names.len(),
                line
            )));
        }
        let num = |idx: usize| {
            parse_int(fields[idx]).ok_or_else(|| {
                DrcovError::ModuleTable(format!(
                    "bad {} value {:?}",
                    self.names[idx],
                    fields[idx].trim()
                ))
            })
        };
        let id = u32::try_from(num(self.id)?)
            .map_err(|_| DrcovError::ModuleTable(format!("module id out of range in {:?}", line)))?;
        Ok(DrcovModule {
            id,
            base: num(self.base)?,
            end: num(self.end)?,
            entry: match self.entry {
                Some(idx) => num(idx)?,
                None => 0,
            },
            path: fields[fields.len() - 1].trim().to_string(),
        })
    }
}

impl DrcovData {
    pub fn has_hitcounts(&self) -> bool {
        self.hitcounts.is_some()
    }

    pub fn decode(data: &[u8]) -> DrcovResult<Self> {
        if !data.starts_with(BLOCK_TRACE_MAGIC) {
            return Err(DrcovError::MissingMagic);
        }
        let mut cursor = Cursor::new(data);

        let version_line = expect_line(&mut cursor, "version")?;
        let version = version_line
            .strip_prefix("DRCOV VERSION:")
            .and_then(parse_int)
            .ok_or_else(|| DrcovError::Header(format!("bad version line {:?}", version_line)))?
            as u32;

        let mut flavor = None;
        let mut line = expect_line(&mut cursor, "module table")?;
        if let Some(f) = line.strip_prefix("DRCOV FLAVOR:") {
            flavor = Some(f.trim().to_string());
            line = expect_line(&mut cursor, "module table")?;
        }

        let (module_table_version, count) = parse_module_table_header(line)?;
        let layout = if module_table_version >= 2 {
            let columns = expect_line(&mut cursor, "module columns")?;
            let names = columns
                .strip_prefix("Columns:")
                .ok_or_else(|| {
                    DrcovError::ModuleTable(format!("expected columns, got {:?}", columns))
                })?
                .split(',')
                .map(|c| c.trim().to_string())
                .collect();
            ColumnLayout::new(names)?
        } else {
            ColumnLayout::new(LEGACY_COLUMNS.iter().map(|c| c.to_string()).collect())?
        };

        let mut modules = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let row = expect_line(&mut cursor, "module row")?;
            modules.push(layout.parse_row(row)?);
        }

        let bb_line = expect_line(&mut cursor, "basic block table")?;
        let block_count = bb_line
            .strip_prefix("BB Table:")
            .map(|rest| rest.trim().trim_end_matches("bbs").trim())
            .and_then(parse_int)
            .ok_or_else(|| DrcovError::BlockTable(format!("bad header {:?}", bb_line)))?
            as usize;
        let table_len = block_count
            .checked_mul(BLOCK_RECORD_SIZE)
            .ok_or_else(|| DrcovError::BlockTable("block count overflows".to_string()))?;
        let raw = cursor.take(table_len, "basic block table")?;
        let blocks: Vec<DrcovBlock> = raw
            .chunks_exact(BLOCK_RECORD_SIZE)
            .map(|rec| DrcovBlock {
                start: u32::from_le_bytes([rec[0], rec[1], rec[2], rec[3]]),
                size: u16::from_le_bytes([rec[4], rec[5]]),
                module_id: u16::from_le_bytes([rec[6], rec[7]]),
            })
            .collect();

        cursor.skip_line_breaks();
        let mut hitcounts = None;
        if cursor.peek_starts_with(b"Hit Count Table:") {
            let header = expect_line(&mut cursor, "hit count table")?;
            let n = header
                .strip_prefix("Hit Count Table:")
                .and_then(parse_int)
                .ok_or_else(|| DrcovError::HitCountTable(format!("bad header {:?}", header)))?
                as usize;
            if n != blocks.len() {
                return Err(DrcovError::HitCountTable(format!(
                    "{} counts for {} blocks",
                    n,
                    blocks.len()
                )));
            }
            let len = n
                .checked_mul(4)
                .ok_or_else(|| DrcovError::HitCountTable("count overflows".to_string()))?;
            let raw = cursor.take(len, "hit count table")?;
            hitcounts = Some(
                raw.chunks_exact(4)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            );
        }

        trace!(
            version,
            modules = modules.len(),
            blocks = blocks.len(),
            hitcounts = hitcounts.is_some(),
            "Decoded drcov"
        );
        Ok(Self {
            version,
            flavor,
            module_table_version,
            modules,
            blocks,
            hitcounts,
        })
    }

    /// Serialize in the layout `decode` reads. Module tables of version 2
    /// and up get an explicit `Columns:` line.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(format!("DRCOV VERSION: {}\n", self.version).as_bytes());
        if let Some(flavor) = &self.flavor {
            out.extend_from_slice(format!("DRCOV FLAVOR: {}\n", flavor).as_bytes());
        }
        if self.module_table_version >= 2 {
            out.extend_from_slice(
                format!(
                    "Module Table: version {}, count {}\nColumns: id, base, end, entry, path\n",
                    self.module_table_version,
                    self.modules.len()
                )
                .as_bytes(),
            );
        } else {
            out.extend_from_slice(format!("Module Table: {}\n", self.modules.len()).as_bytes());
        }
        for m in &self.modules {
            out.extend_from_slice(
                format!(
                    "{:3}, {:#018x}, {:#018x}, {:#018x}, {}\n",
                    m.id, m.base, m.end, m.entry, m.path
                )
                .as_bytes(),
            );
        }
        out.extend_from_slice(format!("BB Table: {} bbs\n", self.blocks.len()).as_bytes());
        for b in &self.blocks {
            out.extend_from_slice(&b.start.to_le_bytes());
            out.extend_from_slice(&b.size.to_le_bytes());
            out.extend_from_slice(&b.module_id.to_le_bytes());
        }
        if let Some(counts) = &self.hitcounts {
            out.extend_from_slice(format!("Hit Count Table: {}\n", counts.len()).as_bytes());
            for c in counts {
                out.extend_from_slice(&c.to_le_bytes());
            }
        }
        out
    }

    /// Translate to a trace: span address = module base + block offset.
    /// Blocks naming a module absent from the table, or whose address does
    /// not fit in 64 bits, are dropped and counted in `unresolved_spans`.
    pub fn to_trace(&self, path: &Path) -> CoverageTrace {
        let mut trace = CoverageTrace::new(TraceFormat::BlockTrace, path);
        trace.has_hitcounts = self.has_hitcounts();
        for m in &self.modules {
            trace
                .modules
                .insert(m.id, ModuleInfo::new(m.id, m.base, m.end, m.path.clone()));
        }
        trace.spans.reserve(self.blocks.len());
        for (i, bb) in self.blocks.iter().enumerate() {
            let id = u32::from(bb.module_id);
            let Some(module) = trace.modules.get(&id) else {
                trace.unresolved_spans += 1;
                continue;
            };
            let hits = match &self.hitcounts {
                Some(counts) => counts.get(i).map_or(1, |&c| u64::from(c)),
                None => 1,
            };
            let Some(address) = module.base.checked_add(u64::from(bb.start)) else {
                trace!(module = id, offset = bb.start, "Block address overflows");
                trace.unresolved_spans += 1;
                continue;
            };
            trace
                .spans
                .push(CoverageSpan::new(address, u32::from(bb.size), hits, Some(id)));
        }
        trace
    }
}

/// Parser for drcov block traces, sniffed by the `DRCOV` magic.
#[derive(Debug, Clone)]
pub struct DrcovParser {
    header_probe_size: usize,
    max_file_size: u64,
}

impl DrcovParser {
    pub fn new(config: &IoConfig) -> Self {
        Self {
            header_probe_size: config.header_probe_size,
            max_file_size: config.max_file_size,
        }
    }
}

impl Default for DrcovParser {
    fn default() -> Self {
        Self::new(&IoConfig::default())
    }
}

impl CoverageParser for DrcovParser {
    fn name(&self) -> &str {
        "drcov"
    }

    fn can_parse(&self, path: &Path) -> bool {
        file_has_block_trace_magic(path, self.header_probe_size)
    }

    fn parse(&self, path: &Path) -> Result<CoverageTrace> {
        let data = read_trace_file(path, self.max_file_size)?;
        let decoded = DrcovData::decode(&data)?;
        let trace = decoded.to_trace(path);
        if trace.unresolved_spans > 0 {
            debug!(
                trace = %trace.name,
                dropped = trace.unresolved_spans,
                "Dropped blocks with unknown module ids"
            );
        }
        info!(
            trace = %trace.name,
            version = decoded.version,
            modules = trace.modules.len(),
            spans = trace.spans.len(),
            hitcounts = trace.has_hitcounts,
            "Loaded drcov trace"
        );
        Ok(trace)
    }
}
