//! Module identification and slide computation.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::span::basename;
use crate::core::{CoverageTrace, ModuleInfo};
use crate::model::ProgramModel;

/// Which rule produced a module match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchReason {
    /// Recorded path equals the image path (case-insensitive)
    Path,
    /// Final path components are equal (case-insensitive)
    Basename,
    /// The trace names exactly one module
    SingleModule,
}

impl MatchReason {
    pub fn label(&self) -> &'static str {
        match self {
            MatchReason::Path => "path",
            MatchReason::Basename => "basename",
            MatchReason::SingleModule => "single-module",
        }
    }
}

impl fmt::Display for MatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A trace module matched to the analyzed image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMatch {
    pub id: u32,
    pub module_base: u64,
    pub module_end: u64,
    pub path: String,
    pub image_base: u64,
    /// `image_base - module_base`, added to the module's recorded addresses
    pub slide: i64,
    pub reason: MatchReason,
    /// Matched only because the trace has a single module
    pub fallback: bool,
}

fn compute_slide(image_base: u64, module_base: u64) -> i64 {
    (image_base as i64).wrapping_sub(module_base as i64)
}

fn make_match(module: &ModuleInfo, image_base: u64, reason: MatchReason) -> ModuleMatch {
    ModuleMatch {
        id: module.id,
        module_base: module.base,
        module_end: module.end,
        path: module.path.clone(),
        image_base,
        slide: compute_slide(image_base, module.base),
        reason,
        fallback: reason == MatchReason::SingleModule,
    }
}

/// Find the module in `modules` that corresponds to the image at
/// `image_path` loaded at `image_base`.
///
/// Tried in order: exact path, basename with the smallest `|slide|` (the
/// lowest module id among equal minimums), then the single-module fallback.
/// Returns `None` when the image path is empty, the table is empty, or no
/// rule applies.
pub fn find_module_match(
    modules: &BTreeMap<u32, ModuleInfo>,
    image_path: &str,
    image_base: u64,
) -> Option<ModuleMatch> {
    if image_path.is_empty() || modules.is_empty() {
        return None;
    }
    let image_path_lower = image_path.to_lowercase();
    let image_base_lower = basename(image_path).to_lowercase();

    let named = || modules.values().filter(|m| !m.path.is_empty());

    if let Some(module) = named().find(|m| m.path.to_lowercase() == image_path_lower) {
        return Some(make_match(module, image_base, MatchReason::Path));
    }

    let mut best: Option<(&ModuleInfo, u64)> = None;
    for module in named().filter(|m| m.basename().to_lowercase() == image_base_lower) {
        let distance = compute_slide(image_base, module.base).unsigned_abs();
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((module, distance));
        }
    }
    if let Some((module, _)) = best {
        return Some(make_match(module, image_base, MatchReason::Basename));
    }

    if modules.len() == 1 {
        return modules
            .values()
            .next()
            .map(|m| make_match(m, image_base, MatchReason::SingleModule));
    }
    None
}

/// Match a trace's module table against a program model's identity.
pub fn match_trace<M: ProgramModel + ?Sized>(
    trace: &CoverageTrace,
    model: &M,
) -> Option<ModuleMatch> {
    let found = find_module_match(&trace.modules, model.image_path(), model.image_base());
    match &found {
        Some(m) => info!(
            trace = %trace.name,
            module = m.id,
            path = %m.path,
            reason = %m.reason,
            slide = m.slide,
            fallback = m.fallback,
            "Matched trace module"
        ),
        None if trace.modules.is_empty() => {
            debug!(trace = %trace.name, "Trace has no module table")
        }
        None => warn!(
            trace = %trace.name,
            modules = trace.modules.len(),
            image = model.image_path(),
            "No trace module matched the image"
        ),
    }
    found
}

/// Shift `addr` by `slide`; `None` on underflow or overflow, never a
/// wrapped value.
pub fn apply_slide(addr: u64, slide: i64) -> Option<u64> {
    if slide >= 0 {
        addr.checked_add(slide as u64)
    } else {
        addr.checked_sub(slide.unsigned_abs())
    }
}
