//! Coverage trace formats.
//!
//! Each format is a `CoverageParser`: a cheap content sniff plus a full
//! parse into a `CoverageTrace`. Callers build a `ParserRegistry` with the
//! parsers they want, in the order they should be tried.

pub mod addr_trace;
pub mod drcov;
pub mod io;

use std::path::Path;

use tracing::debug;

use crate::config::IoConfig;
use crate::core::CoverageTrace;
use crate::error::Result;

pub use addr_trace::AddrTraceParser;
pub use drcov::DrcovParser;

/// A detector and decoder for one on-disk trace format.
pub trait CoverageParser: Send + Sync {
    /// Short format name for logs and diagnostics.
    fn name(&self) -> &str;

    /// Cheap content sniff. Never fails; unreadable files are simply not
    /// this format.
    fn can_parse(&self, path: &Path) -> bool;

    /// Full parse. Fails with a descriptive error if the file is malformed
    /// after passing the sniff.
    fn parse(&self, path: &Path) -> Result<CoverageTrace>;
}

/// Ordered collection of parsers tried first-match-wins.
#[derive(Default)]
pub struct ParserRegistry {
    parsers: Vec<Box<dyn CoverageParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block-trace parser first, then the address-list parser.
    pub fn with_defaults(config: &IoConfig) -> Self {
        let mut registry = Self::new();
        registry.register(DrcovParser::new(config));
        registry.register(AddrTraceParser::new(config));
        registry
    }

    pub fn register<P: CoverageParser + 'static>(&mut self, parser: P) {
        self.parsers.push(Box::new(parser));
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.parsers.iter().map(|p| p.name()).collect()
    }

    /// Parse `path` with the first parser whose sniff accepts it.
    ///
    /// `Ok(None)` means no registered parser recognized the file; that is a
    /// valid outcome, not an error.
    pub fn parse_first_match(&self, path: &Path) -> Result<Option<CoverageTrace>> {
        for parser in &self.parsers {
            if !parser.can_parse(path) {
                continue;
            }
            debug!(parser = parser.name(), path = %path.display(), "Parser selected");
            return parser.parse(path).map(Some);
        }
        debug!(path = %path.display(), "No parser recognized trace");
        Ok(None)
    }
}
