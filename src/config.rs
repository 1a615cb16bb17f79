//! Configuration for the coverage pipeline.
//!
//! Provides centralized configuration for parsing, mapping, composition and
//! discovery with sensible defaults. Every section deserializes from partial
//! JSON; omitted fields keep their defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::query::compose::{ComposePolicies, HitMergePolicy};

/// Master configuration for covex.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CovexConfig {
    /// Trace file reading and format sniffing.
    pub io: IoConfig,
    /// Span to instruction mapping.
    pub mapping: MappingConfig,
    /// Default merge policies for the composition language.
    pub compose: ComposeConfig,
    /// Function discovery from uncovered hits.
    pub discovery: DiscoveryConfig,
}

impl CovexConfig {
    /// Parse a (possibly partial) JSON document.
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read and parse a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// I/O configuration for trace reading and sniffing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Bytes read when probing for the block-trace magic (default: 16).
    pub header_probe_size: usize,
    /// Lines sampled when sniffing address-list traces (default: 32).
    pub sniff_line_limit: usize,
    /// Bytes read when sniffing address-list traces (default: 64KB).
    pub sniff_byte_limit: usize,
    /// Largest trace file accepted (default: 256MB).
    pub max_file_size: u64,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            header_probe_size: 16,
            sniff_line_limit: 32,
            sniff_byte_limit: 64 * 1024,
            max_file_size: 256 * 1024 * 1024,
        }
    }
}

/// Span mapping configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Instruction lengths above this are treated as bogus and replaced by a
    /// single byte stride (default: 16).
    pub max_instruction_length: u64,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            max_instruction_length: 16,
        }
    }
}

/// Default merge policy per composition operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposeConfig {
    pub union: HitMergePolicy,
    pub intersect: HitMergePolicy,
    pub subtract: HitMergePolicy,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        let policies = ComposePolicies::default();
        Self {
            union: policies.union,
            intersect: policies.intersect,
            subtract: policies.subtract,
        }
    }
}

impl From<ComposeConfig> for ComposePolicies {
    fn from(config: ComposeConfig) -> Self {
        ComposePolicies {
            union: config.union,
            intersect: config.intersect,
            subtract: config.subtract,
        }
    }
}

/// Function discovery configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Bytes to scan backwards from a hit for an earlier entrypoint
    /// (default: 0, the hit is its own entrypoint).
    pub backward_scan_bytes: u64,
    /// Require a read-only code section at the hit (default: false).
    pub require_code_section: bool,
    /// Require the segment's contains-code flag (default: false).
    pub require_segment_code_flag: bool,
    /// Re-run analysis after every created function instead of once at the
    /// end (default: true).
    pub update_analysis_per_function: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            backward_scan_bytes: 0,
            require_code_section: false,
            require_segment_code_flag: false,
            update_analysis_per_function: true,
        }
    }
}
