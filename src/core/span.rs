//! Recorded execution spans and the modules they belong to.

use serde::{Deserialize, Serialize};

/// One contiguous recorded execution region.
///
/// Spans with `size == 0` are inert; every consumer ignores them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoverageSpan {
    /// Start address as recorded (absolute, possibly from another load base)
    pub address: u64,
    /// Length in bytes
    pub size: u32,
    /// Execution count; synthetic `1` when the format has no counts
    pub hits: u64,
    /// Owning module id in the trace's module table, if the format has one
    pub module_id: Option<u32>,
}

impl CoverageSpan {
    pub fn new(address: u64, size: u32, hits: u64, module_id: Option<u32>) -> Self {
        Self {
            address,
            size,
            hits,
            module_id,
        }
    }

    /// A single-byte span with no module, as produced from a hit map entry.
    pub fn unit(address: u64, hits: u64) -> Self {
        Self::new(address, 1, hits, None)
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Exclusive end address, or `None` if it would not fit in 64 bits.
    pub fn end(&self) -> Option<u64> {
        self.address.checked_add(u64::from(self.size))
    }
}

/// A loaded image referenced by a trace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// Unique within one trace
    pub id: u32,
    pub base: u64,
    pub end: u64,
    /// Recorded image path; empty paths never match by name
    pub path: String,
}

impl ModuleInfo {
    pub fn new(id: u32, base: u64, end: u64, path: impl Into<String>) -> Self {
        Self {
            id,
            base,
            end,
            path: path.into(),
        }
    }

    /// Final path component; both `/` and `\` count as separators.
    pub fn basename(&self) -> &str {
        basename(&self.path)
    }
}

/// Final component of a path string using either separator style.
pub fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_end_overflow() {
        let span = CoverageSpan::new(u64::MAX - 1, 4, 1, None);
        assert_eq!(span.end(), None);
        let span = CoverageSpan::new(0x1000, 4, 1, None);
        assert_eq!(span.end(), Some(0x1004));
        assert!(CoverageSpan::new(0x1000, 0, 1, None).is_empty());
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("/usr/bin/ls"), "ls");
        assert_eq!(basename(r"C:\Windows\notepad.exe"), "notepad.exe");
        assert_eq!(basename("plain.exe"), "plain.exe");
        assert_eq!(basename(""), "");
        let module = ModuleInfo::new(0, 0x1000, 0x2000, "/opt/app/target.so");
        assert_eq!(module.basename(), "target.so");
    }
}
