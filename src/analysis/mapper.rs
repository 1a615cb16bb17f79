//! Span to instruction mapping and block aggregation.
//!
//! Spans are block-granular; the mapper walks each one in instruction
//! strides reported by the program model, so the resulting hit map holds
//! one entry per instruction start the model recognizes at mapping time.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace};

use crate::analysis::matcher::{apply_slide, match_trace, ModuleMatch};
use crate::config::MappingConfig;
use crate::core::{
    CoverageDataset, CoverageIndex, CoverageInput, CoverageTrace, CoveredBlock, HitMap,
    MapDiagnostics,
};
use crate::model::ProgramModel;

/// Maps traces and datasets onto a program model.
#[derive(Debug, Clone, Default)]
pub struct CoverageMapper {
    config: MappingConfig,
}

impl CoverageMapper {
    pub fn new(config: MappingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    /// Stride at `addr`: the model's instruction length, or 1 byte when the
    /// model reports 0 or more than the configured maximum, never more than
    /// `remaining`.
    fn stride<M: ProgramModel + ?Sized>(&self, model: &M, addr: u64, remaining: u64) -> u64 {
        let mut len = model.instruction_length(addr);
        if len == 0 || len > self.config.max_instruction_length {
            len = 1;
        }
        len.min(remaining.max(1))
    }

    /// Map a parsed trace: match its module, slide its spans, and walk them
    /// in instruction strides.
    pub fn map_trace<M: ProgramModel + ?Sized>(
        &self,
        trace: &CoverageTrace,
        model: &M,
    ) -> CoverageIndex {
        let mut diagnostics = MapDiagnostics {
            spans_total: trace.spans.len(),
            image_base: model.image_base(),
            ..MapDiagnostics::default()
        };
        let matched = match_trace(trace, model);
        if let Some(m) = &matched {
            record_match(&mut diagnostics, m);
        }

        let mut hits = HitMap::new();
        let mut invalid = BTreeSet::new();

        for span in &trace.spans {
            if span.is_empty() {
                continue;
            }
            let mut address = span.address;
            if let (Some(m), Some(module_id)) = (&matched, span.module_id) {
                if module_id != m.id {
                    diagnostics.spans_skipped += 1;
                    continue;
                }
                match apply_slide(span.address, m.slide) {
                    Some(slid) => address = slid,
                    None => {
                        trace!(address = span.address, slide = m.slide, "Unmappable slide");
                        invalid.insert(span.address);
                        continue;
                    }
                }
            }

            diagnostics.spans_mapped += 1;
            if !model.contains_address(address) {
                invalid.insert(address);
                continue;
            }
            let Some(end) = address.checked_add(u64::from(span.size)) else {
                invalid.insert(address);
                continue;
            };

            let mut current = address;
            while current < end {
                if !model.contains_address(current) {
                    trace!(address = current, "Span runs past image end");
                    invalid.insert(current);
                    break;
                }
                let slot = hits.entry(current).or_insert(0);
                *slot = slot.saturating_add(span.hits);
                current += self.stride(model, current, end - current);
            }
        }

        let dataset = CoverageDataset::from_hits(hits);
        let module_id = matched.as_ref().map(|m| m.id);
        let blocks = derive_blocks(dataset.hits(), model, module_id);
        debug!(
            trace = %trace.name,
            spans = diagnostics.spans_total,
            mapped = diagnostics.spans_mapped,
            skipped = diagnostics.spans_skipped,
            addresses = dataset.stats().unique_addresses,
            blocks = blocks.len(),
            invalid = invalid.len(),
            "Mapped trace"
        );
        CoverageIndex {
            dataset,
            blocks,
            invalid_addresses: invalid.into_iter().collect(),
            diagnostics,
        }
    }

    /// Re-validate an already address-indexed dataset against the model:
    /// addresses outside the image are dropped (and reported invalid), and
    /// blocks are re-derived.
    pub fn map_dataset<M: ProgramModel + ?Sized>(
        &self,
        dataset: &CoverageDataset,
        model: &M,
    ) -> CoverageIndex {
        let mut hits = HitMap::new();
        let mut invalid = Vec::new();
        for (&addr, &count) in dataset.hits() {
            if model.contains_address(addr) {
                hits.insert(addr, count);
            } else {
                invalid.push(addr);
            }
        }
        let mapped = CoverageDataset::from_hits(hits);
        let blocks = derive_blocks(mapped.hits(), model, None);
        let diagnostics = MapDiagnostics {
            spans_total: dataset.hits().len(),
            spans_mapped: mapped.hits().len(),
            image_base: model.image_base(),
            ..MapDiagnostics::default()
        };
        debug!(
            addresses = diagnostics.spans_total,
            kept = diagnostics.spans_mapped,
            blocks = blocks.len(),
            "Mapped dataset"
        );
        CoverageIndex {
            dataset: mapped,
            blocks,
            invalid_addresses: invalid,
            diagnostics,
        }
    }

    pub fn map_input<M: ProgramModel + ?Sized>(
        &self,
        input: &CoverageInput,
        model: &M,
    ) -> CoverageIndex {
        match input {
            CoverageInput::Trace(trace) => self.map_trace(trace, model),
            CoverageInput::Dataset(dataset) => self.map_dataset(dataset, model),
        }
    }
}

fn record_match(diagnostics: &mut MapDiagnostics, m: &ModuleMatch) {
    diagnostics.matched_module_id = Some(m.id);
    diagnostics.matched_module_base = Some(m.module_base);
    diagnostics.matched_module_end = Some(m.module_end);
    diagnostics.matched_module_path = m.path.clone();
    diagnostics.match_reason = Some(m.reason);
    diagnostics.image_base = m.image_base;
    diagnostics.slide = m.slide;
    diagnostics.used_fallback = m.fallback;
}

fn derive_blocks<M: ProgramModel + ?Sized>(
    hits: &HitMap,
    model: &M,
    module_id: Option<u32>,
) -> Vec<CoveredBlock> {
    let mut blocks: BTreeMap<u64, CoveredBlock> = BTreeMap::new();
    for (&addr, &count) in hits {
        for block in model.blocks_containing(addr) {
            let entry = blocks.entry(block.start).or_insert_with(|| CoveredBlock {
                start: block.start,
                size: u32::try_from(block.length).unwrap_or(u32::MAX),
                hits: 0,
                module_id,
                function: block.function.clone(),
            });
            entry.hits = entry.hits.saturating_add(count);
        }
    }
    blocks.into_values().collect()
}

/// Aggregate hits onto the model's basic blocks, sorted by block start.
///
/// The first hit inside a block materializes it with the block's size and
/// function; later hits only add to `hits`. Hits in no block are ignored
/// here but stay in the hit map.
pub fn derive_blocks_from_hits<M: ProgramModel + ?Sized>(
    hits: &HitMap,
    model: &M,
) -> Vec<CoveredBlock> {
    derive_blocks(hits, model, None)
}
