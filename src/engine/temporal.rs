//! Two-step temporal queries: "find X, shortly followed by Y".

use serde::{Deserialize, Serialize};

use crate::corpus::VideoBounds;
use crate::engine::errors::EngineError;
use crate::engine::scores::{ItemId, ScoreVector, MAX_DISTANCE};

/// Separator between the two clauses of a temporal query.
pub const CLAUSE_SEPARATOR: char = '>';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalOptions {
    /// How many following items may match the second clause.
    #[serde(default = "default_window")]
    pub window: usize,
    /// Context shown before each anchor.
    #[serde(default = "default_before")]
    pub before: usize,
    /// Context shown after each anchor.
    #[serde(default = "default_after")]
    pub after: usize,
}

fn default_window() -> usize {
    3
}

fn default_before() -> usize {
    2
}

fn default_after() -> usize {
    5
}

impl Default for TemporalOptions {
    fn default() -> Self {
        Self {
            window: default_window(),
            before: default_before(),
            after: default_after(),
        }
    }
}

/// Split `"a>b"` into `("a", "b")`. Clauses are not trimmed.
pub fn split_clauses(query: &str) -> Result<(&str, &str), EngineError> {
    let mut parts = query.split(CLAUSE_SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(first), Some(then), None) => Ok((first, then)),
        _ => Err(EngineError::MalformedTemporalQuery(query.to_string())),
    }
}

/// `first[i] + min(then[i+1..=i+window])`, or `first[i] + 2` when no item
/// follows `i`.
pub fn followed_by(first: &ScoreVector, then: &ScoreVector, window: usize) -> ScoreVector {
    let then = then.as_slice();
    let len = then.len();

    ScoreVector::from_vec(
        first
            .as_slice()
            .iter()
            .enumerate()
            .map(|(i, &score)| {
                let start = (i + 1).min(len);
                let end = i.saturating_add(1).saturating_add(window).min(len);
                let best_next = then[start..end]
                    .iter()
                    .copied()
                    .reduce(f32::min)
                    .unwrap_or(MAX_DISTANCE);
                score + best_next
            })
            .collect(),
    )
}

/// Replace each anchor by its neighbourhood `anchor-before ..= anchor+after`.
///
/// Ids outside `0..len`, ids from another video than the anchor, and ids
/// already shown are skipped. The result holds at most `limit` ids.
pub fn expand(
    anchors: &[ItemId],
    len: usize,
    options: &TemporalOptions,
    videos: Option<&VideoBounds>,
    limit: usize,
) -> Vec<ItemId> {
    let mut shown = Vec::with_capacity(limit);

    for &anchor in anchors {
        let start = anchor.saturating_sub(options.before);
        let end = anchor.saturating_add(options.after).min(len.saturating_sub(1));

        for id in start..=end {
            if shown.len() == limit {
                return shown;
            }
            if videos.map_or(false, |v| !v.same_video(anchor, id)) {
                continue;
            }
            if !shown.contains(&id) {
                shown.push(id);
            }
        }
    }

    shown
}
