//! Bounded file access for trace sniffing and loading.
//!
//! Sniffing helpers never fail: any I/O problem simply means "not this
//! format". Full loads go through `read_trace_file`, which enforces the
//! configured size limit before reading.

use std::fs::File;
use std::io::{BufRead, Read};
use std::path::Path;

use tracing::{debug, trace};

use crate::error::{CovexError, Result};

/// Magic bytes at offset 0 of every block-trace file.
pub const BLOCK_TRACE_MAGIC: &[u8; 5] = b"DRCOV";

/// Read up to `len` bytes from the start of `path`.
pub fn read_prefix(path: &Path, len: usize) -> Option<Vec<u8>> {
    let file = File::open(path).ok()?;
    let mut buf = Vec::with_capacity(len);
    file.take(len as u64).read_to_end(&mut buf).ok()?;
    Some(buf)
}

pub fn has_block_trace_magic(bytes: &[u8]) -> bool {
    bytes.starts_with(BLOCK_TRACE_MAGIC)
}

/// Whether the file at `path` starts with the block-trace magic.
pub fn file_has_block_trace_magic(path: &Path, probe_size: usize) -> bool {
    read_prefix(path, probe_size.max(BLOCK_TRACE_MAGIC.len()))
        .map(|prefix| has_block_trace_magic(&prefix))
        .unwrap_or(false)
}

/// Up to `max_lines` lines from the first `max_bytes` bytes of a text file.
/// A line cut off by the byte cap is dropped. `None` if the file cannot be
/// opened or a sampled line is not UTF-8.
pub fn read_sample_lines(path: &Path, max_lines: usize, max_bytes: usize) -> Option<Vec<String>> {
    let mut prefix = read_prefix(path, max_bytes.saturating_add(1))?;
    if prefix.len() > max_bytes {
        prefix.truncate(max_bytes);
        let keep = memchr::memrchr(b'\n', &prefix).map_or(0, |pos| pos + 1);
        prefix.truncate(keep);
    }
    let mut lines = Vec::new();
    for line in prefix.as_slice().lines().take(max_lines) {
        lines.push(line.ok()?);
    }
    trace!(path = %path.display(), lines = lines.len(), bytes = prefix.len(), "Sampled lines");
    Some(lines)
}

/// Read a whole trace file, refusing files larger than `max_file_size`.
pub fn read_trace_file(path: &Path, max_file_size: u64) -> Result<Vec<u8>> {
    let size = std::fs::metadata(path)?.len();
    if size > max_file_size {
        return Err(CovexError::FileTooLarge {
            size,
            limit: max_file_size,
        });
    }
    let data = std::fs::read(path)?;
    debug!(path = %path.display(), bytes = data.len(), "Read trace file");
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_prefix_and_magic() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"DRCOV VERSION: 2\n").unwrap();
        let prefix = read_prefix(f.path(), 16).unwrap();
        assert_eq!(prefix.len(), 16);
        assert!(has_block_trace_magic(&prefix));
        assert!(file_has_block_trace_magic(f.path(), 16));
        assert!(!has_block_trace_magic(b"DRCO"));
    }

    #[test]
    fn test_missing_file_is_not_magic() {
        let path = Path::new("/nonexistent/covex/trace.log");
        assert!(read_prefix(path, 16).is_none());
        assert!(!file_has_block_trace_magic(path, 16));
        assert!(read_sample_lines(path, 4, 1024).is_none());
        assert!(matches!(
            read_trace_file(path, 1024),
            Err(CovexError::Io(_))
        ));
    }

    #[test]
    fn test_size_limit() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&[b'a'; 64]).unwrap();
        let err = read_trace_file(f.path(), 32).unwrap_err();
        assert!(matches!(err, CovexError::FileTooLarge { size: 64, limit: 32 }));
        assert_eq!(read_trace_file(f.path(), 64).unwrap().len(), 64);
    }

    #[test]
    fn test_sample_lines_limit() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        for i in 0..10 {
            writeln!(f, "0x{:x}", i).unwrap();
        }
        let lines = read_sample_lines(f.path(), 3, 1024).unwrap();
        assert_eq!(lines, vec!["0x0", "0x1", "0x2"]);
    }

    #[test]
    fn test_sample_lines_byte_cap() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"0x1\n0x2\r\n0x33333333\n").unwrap();
        let lines = read_sample_lines(f.path(), 32, 12).unwrap();
        assert_eq!(lines, vec!["0x1", "0x2"]);
        let all = read_sample_lines(f.path(), 32, 1024).unwrap();
        assert_eq!(all.len(), 3);
        // exactly at the cap nothing is cut
        let exact = read_sample_lines(f.path(), 32, 20).unwrap();
        assert_eq!(exact.len(), 3);
    }

    #[test]
    fn test_sample_lines_without_newline_stay_bounded() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        let chunk = vec![b'a'; 1024 * 1024];
        for _ in 0..8 {
            f.write_all(&chunk).unwrap();
        }
        f.flush().unwrap();
        let lines = read_sample_lines(f.path(), 32, 64 * 1024).unwrap();
        assert!(lines.is_empty());
    }
}
