//! Score normalization and cross-source fusion.
//!
//! Backends score on incompatible scales (BM25-ish hybrid scores, cosine
//! similarities), so each source's hit list is min-max rescaled to [0, 1]
//! before lists are merged. Fusion itself is pure and deterministic: given
//! the same per-source hits it always produces the same ranked list.

use crate::types::{CandidateHit, ToolMatch};
use std::collections::HashMap;

/// Rescale one backend's hits to [0, 1] via min-max over that list only.
///
/// Degenerate inputs: an empty list stays empty; a single hit or an
/// all-equal list maps every score to 1.0, which avoids the zero-width
/// divide and keeps the backend's produced ranking instead of collapsing
/// it to the bottom of the fused list.
pub fn normalize_hits(hits: Vec<CandidateHit>) -> Vec<ToolMatch> {
    if hits.is_empty() {
        return Vec::new();
    }

    let min = hits.iter().map(|h| h.score).fold(f64::INFINITY, f64::min);
    let max = hits
        .iter()
        .map(|h| h.score)
        .fold(f64::NEG_INFINITY, f64::max);
    let width = max - min;

    hits.into_iter()
        .map(|hit| {
            let normalized = if width > 0.0 {
                (hit.score - min) / width
            } else {
                1.0
            };
            hit.into_match(normalized)
        })
        .collect()
}

/// Merge normalized per-source lists into one ranked result.
///
/// Lists are concatenated in source order, deduplicated by tool id keeping
/// the higher score on conflict, filtered by `min_score`, stably sorted
/// descending (so score ties keep first-seen source order), and truncated
/// to `return_limit`.
pub fn fuse(
    source_lists: Vec<Vec<ToolMatch>>,
    min_score: f64,
    return_limit: usize,
) -> Vec<ToolMatch> {
    let mut merged: Vec<ToolMatch> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for tool in source_lists.into_iter().flatten() {
        match seen.get(&tool.id) {
            Some(&idx) => {
                if tool.score > merged[idx].score {
                    merged[idx] = tool;
                }
            }
            None => {
                seen.insert(tool.id.clone(), merged.len());
                merged.push(tool);
            }
        }
    }

    merged.retain(|tool| tool.score >= min_score);
    // Vec::sort_by is stable; equal scores keep insertion (source) order.
    merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    merged.truncate(return_limit);
    merged
}
