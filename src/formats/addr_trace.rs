//! Plain-text address list traces.
//!
//! One address per line, optionally followed by a hit count:
//!
//! ```text
//! # comment
//! 0x401000
//! 401010, 5
//! 0x401020:12   // inline comment
//! ```
//!
//! Addresses and counts are hexadecimal with an optional `0x` prefix. `,`
//! and `:` separate tokens like whitespace. Comments start with `#`, `;` or
//! `//`. Repeated addresses accumulate.

use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

use crate::config::IoConfig;
use crate::core::{CoverageSpan, CoverageTrace, HitMap, TraceFormat};
use crate::error::Result;
use crate::formats::io::{file_has_block_trace_magic, read_sample_lines, read_trace_file};
use crate::formats::CoverageParser;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddrTraceError {
    /// 1-based line number and the offending line as written
    #[error("invalid address trace line {line}: {text}")]
    InvalidLine { line: usize, text: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AddrEntry {
    address: u64,
    hits: u64,
    explicit: bool,
}

fn strip_comment(line: &str) -> &str {
    let cut = ["#", ";", "//"]
        .iter()
        .filter_map(|marker| line.find(marker))
        .min();
    match cut {
        Some(pos) => &line[..pos],
        None => line,
    }
}

/// Comment-free, trimmed content of a line.
fn clean_line(line: &str) -> &str {
    strip_comment(line).trim()
}

fn parse_hex(token: &str) -> Option<u64> {
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

fn parse_entry(cleaned: &str) -> Option<AddrEntry> {
    let mut tokens = cleaned
        .split(|c: char| c.is_whitespace() || c == ',' || c == ':')
        .filter(|t| !t.is_empty());
    let address = parse_hex(tokens.next()?)?;
    let (hits, explicit) = match tokens.next() {
        Some(tok) => (parse_hex(tok)?, true),
        None => (1, false),
    };
    if tokens.next().is_some() {
        return None;
    }
    Some(AddrEntry {
        address,
        hits,
        explicit,
    })
}

/// Whether sampled lines look like an address list: at least one entry and
/// no line that fails to parse.
pub fn looks_like_addr_trace<S: AsRef<str>>(lines: &[S]) -> bool {
    let mut valid = 0usize;
    for line in lines {
        let cleaned = clean_line(line.as_ref());
        if cleaned.is_empty() {
            continue;
        }
        if parse_entry(cleaned).is_none() {
            return false;
        }
        valid += 1;
    }
    valid > 0
}

/// Parse address-list text into a trace attributed to `path`.
pub fn parse_addr_trace_str(
    text: &str,
    path: &Path,
) -> std::result::Result<CoverageTrace, AddrTraceError> {
    let mut hits = HitMap::new();
    let mut explicit = false;
    for (idx, line) in text.lines().enumerate() {
        let cleaned = clean_line(line);
        if cleaned.is_empty() {
            continue;
        }
        let entry = parse_entry(cleaned).ok_or_else(|| AddrTraceError::InvalidLine {
            line: idx + 1,
            text: line.to_string(),
        })?;
        explicit |= entry.explicit;
        let slot = hits.entry(entry.address).or_insert(0);
        *slot = slot.saturating_add(entry.hits);
    }

    let format = if explicit {
        TraceFormat::AddressHitList
    } else {
        TraceFormat::AddressList
    };
    let mut trace = CoverageTrace::new(format, path);
    trace.has_hitcounts = explicit;
    trace.spans = hits
        .into_iter()
        .map(|(addr, count)| CoverageSpan::unit(addr, count))
        .collect();
    Ok(trace)
}

/// Address-list parser. Rejects anything carrying the block-trace magic.
#[derive(Debug, Clone)]
pub struct AddrTraceParser {
    header_probe_size: usize,
    sniff_line_limit: usize,
    sniff_byte_limit: usize,
    max_file_size: u64,
}

impl AddrTraceParser {
    pub fn new(config: &IoConfig) -> Self {
        Self {
            header_probe_size: config.header_probe_size,
            sniff_line_limit: config.sniff_line_limit,
            sniff_byte_limit: config.sniff_byte_limit,
            max_file_size: config.max_file_size,
        }
    }
}

impl Default for AddrTraceParser {
    fn default() -> Self {
        Self::new(&IoConfig::default())
    }
}

impl CoverageParser for AddrTraceParser {
    fn name(&self) -> &str {
        "address-list"
    }

    fn can_parse(&self, path: &Path) -> bool {
        if file_has_block_trace_magic(path, self.header_probe_size) {
            return false;
        }
        read_sample_lines(path, self.sniff_line_limit, self.sniff_byte_limit)
            .map(|lines| looks_like_addr_trace(&lines))
            .unwrap_or(false)
    }

    fn parse(&self, path: &Path) -> Result<CoverageTrace> {
        let data = read_trace_file(path, self.max_file_size)?;
        let text = String::from_utf8_lossy(&data);
        let trace = parse_addr_trace_str(&text, path)?;
        debug!(trace = %trace.name, spans = trace.spans.len(), "Parsed address list");
        info!(
            trace = %trace.name,
            format = %trace.format,
            addresses = trace.spans.len(),
            hitcounts = trace.has_hitcounts,
            "Loaded address trace"
        );
        Ok(trace)
    }
}
