//! Offline comparison of fusion policies.
//!
//! A recorded text query log is replayed against the corpus once per
//! [`FusionPolicy`]. For every query the rank of the session's target under
//! that policy is written out, so policies can be compared on the same user
//! behaviour without running new sessions.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::corpus::{Corpus, VideoBounds};
use crate::embeddings::EmbeddingProvider;
use crate::engine::{rank_of, FusionPolicy, ItemId, ScoreVector, DEFAULT_SHOWING};

/// Shares of the first query's order the second query may be re-ranked
/// over in limited runs.
pub const LIMITS: [f64; 3] = [0.25, 0.5, 0.75];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayOptions {
    /// Queries per (target, session) that are replayed; later ones are
    /// skipped.
    pub reform_count: usize,
    /// Rank at or below which a target counts as found.
    pub showing: usize,
    /// Neighbours on each side of the target that also count as a hit in
    /// `context_rank`.
    pub surrounding: usize,
    /// Share of the corpus, best first by the previous query, that the
    /// second query of a search is ranked over. `1.0` ranks the full corpus.
    pub limit: f64,
}

impl ReplayOptions {
    /// `""` for full runs, `"_limit_25"` and so on for limited ones.
    pub fn file_suffix(&self) -> String {
        if self.limit < 1.0 {
            format!("_limit_{}", (self.limit * 100.0).round() as u32)
        } else {
            String::new()
        }
    }
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            reform_count: 2,
            showing: DEFAULT_SHOWING,
            surrounding: 2,
            limit: 1.0,
        }
    }
}

/// One row of a text query log.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoggedQuery {
    pub query: String,
    pub target: Option<ItemId>,
    pub session: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayedQuery {
    pub query: String,
    pub target: ItemId,
    pub session: String,
    /// Position of the target in the full order, 1-based, -1 if absent.
    pub rank: i64,
    /// Best rank of the target or a neighbour from the same video.
    pub context_rank: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicySummary {
    pub policy: FusionPolicy,
    pub queries: usize,
    pub found: usize,
    pub mean_rank: f64,
}

/// Read a `;` separated query log as written by the query logger.
pub fn read_log(path: &Path) -> anyhow::Result<Vec<LoggedQuery>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut entries = Vec::new();
    for (line, record) in reader.deserialize::<LoggedQuery>().enumerate() {
        let entry = record.with_context(|| format!("Malformed log entry at row {}", line + 2))?;
        entries.push(entry);
    }

    Ok(entries)
}

pub struct Replayer<'a> {
    corpus: &'a Corpus,
    provider: &'a dyn EmbeddingProvider,
    videos: Option<&'a VideoBounds>,
    options: ReplayOptions,
}

impl<'a> Replayer<'a> {
    pub fn new(
        corpus: &'a Corpus,
        provider: &'a dyn EmbeddingProvider,
        videos: Option<&'a VideoBounds>,
        options: ReplayOptions,
    ) -> Self {
        Self {
            corpus,
            provider,
            videos,
            options,
        }
    }

    /// Replay `entries` under every policy, in [`FusionPolicy::ALL`] order.
    ///
    /// Entries without a target are skipped. Memory starts over whenever the
    /// target or the session changes.
    pub fn run(
        &self,
        entries: &[LoggedQuery],
    ) -> anyhow::Result<Vec<(FusionPolicy, Vec<ReplayedQuery>)>> {
        let mut results: Vec<(FusionPolicy, Vec<ReplayedQuery>)> = FusionPolicy::ALL
            .iter()
            .map(|&policy| (policy, Vec::new()))
            .collect();

        let mut previous: Option<(ItemId, &str)> = None;
        let mut memory: Option<ScoreVector> = None;
        let mut same_count = 0;
        let mut searches = 0;

        for entry in entries {
            let Some(target) = entry.target else {
                log::debug!("skipping query {:?} without target", entry.query);
                continue;
            };

            if previous != Some((target, entry.session.as_str())) {
                searches += 1;
                same_count = 1;
                memory = None;
            } else {
                same_count += 1;
            }
            previous = Some((target, entry.session.as_str()));

            if same_count > self.options.reform_count {
                continue;
            }

            let embedding = self
                .provider
                .encode_text(&entry.query)
                .with_context(|| format!("Failed to encode {:?}", entry.query))?;
            if embedding.len() != self.corpus.dimensions() {
                anyhow::bail!(
                    "Model produces {} dimensions, corpus has {}",
                    embedding.len(),
                    self.corpus.dimensions()
                );
            }
            let raw = self.corpus.distances(&embedding);

            let subset = match &memory {
                Some(last) if same_count == 2 && self.options.limit < 1.0 => {
                    let keep = (last.len() as f64 * self.options.limit) as usize;
                    Some(last.argsort().into_iter().take(keep).collect::<Vec<_>>())
                }
                _ => None,
            };

            for (policy, rows) in results.iter_mut() {
                let combined = match &memory {
                    Some(last) => policy.fuse(&raw, last),
                    None => policy.fuse(&raw, &policy.baseline(raw.len())),
                };
                let order = match &subset {
                    Some(subset) => {
                        let scores = combined.as_slice();
                        let mut order = subset.clone();
                        order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));
                        order
                    }
                    None => combined.argsort(),
                };

                rows.push(ReplayedQuery {
                    query: entry.query.clone(),
                    target,
                    session: entry.session.clone(),
                    rank: rank_of(&order, Some(target)),
                    context_rank: self.context_rank(&order, target),
                });
            }

            memory = Some(raw);
        }

        log::info!("replayed {searches} searches");
        Ok(results)
    }

    fn context_rank(&self, order: &[ItemId], target: ItemId) -> i64 {
        let len = self.corpus.len();
        if target >= len {
            return -1;
        }

        let mut ranks = vec![0usize; len];
        for (pos, &id) in order.iter().enumerate() {
            ranks[id] = pos + 1;
        }

        let (low, high) = match self.videos {
            Some(videos) => {
                let video = videos.video_of(target);
                (
                    target.saturating_sub(self.options.surrounding).max(*video.start()),
                    target
                        .saturating_add(self.options.surrounding)
                        .min(*video.end())
                        .min(len - 1),
                )
            }
            None => (target, target),
        };

        // 0 marks items left out of a limited order
        (low..=high)
            .map(|id| ranks[id])
            .filter(|&rank| rank > 0)
            .min()
            .map(|rank| rank as i64)
            .unwrap_or(-1)
    }
}

pub fn summarize(
    results: &[(FusionPolicy, Vec<ReplayedQuery>)],
    showing: usize,
) -> Vec<PolicySummary> {
    results
        .iter()
        .map(|(policy, rows)| {
            let ranked: Vec<i64> = rows.iter().map(|r| r.rank).filter(|&r| r > 0).collect();
            let found = ranked.iter().filter(|&&r| r as usize <= showing).count();
            let mean_rank = if ranked.is_empty() {
                0.0
            } else {
                ranked.iter().sum::<i64>() as f64 / ranked.len() as f64
            };

            PolicySummary {
                policy: *policy,
                queries: rows.len(),
                found,
                mean_rank,
            }
        })
        .collect()
}

/// Write `replay_<policy><suffix>.csv` per policy and
/// `replay_summary<suffix>.csv` to `out`.
pub fn write_results(
    out: &Path,
    suffix: &str,
    results: &[(FusionPolicy, Vec<ReplayedQuery>)],
    summary: &[PolicySummary],
) -> anyhow::Result<()> {
    std::fs::create_dir_all(out).with_context(|| format!("Failed to create {}", out.display()))?;

    for (policy, rows) in results {
        let path = out.join(format!("replay_{}{suffix}.csv", policy.name()));
        let mut writer = csv::WriterBuilder::new().delimiter(b';').from_path(&path)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
    }

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_path(out.join(format!("replay_summary{suffix}.csv")))?;
    for row in summary {
        writer.serialize(row)?;
    }
    writer.flush()?;

    Ok(())
}
