//! Ranking and relevance-feedback engine.
//!
//! The engine owns the shared read-only corpus and embedding provider plus
//! the per-session ranking memory. It is built once at start-up and handed
//! to request handlers behind an `Arc`.
//!
//! - `scores`: distances, score vectors, stable ordering
//! - `fusion`: combining consecutive text queries of a session
//! - `temporal`: "X then Y" queries and neighbourhood expansion
//! - `feedback`: Bayesian re-ranking from a positive example
//! - `session`: per-session memory and its locking

pub mod errors;
pub mod feedback;
pub mod fusion;
pub mod scores;
pub mod session;
pub mod temporal;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::corpus::{ClassLabels, Corpus, VideoBounds};
use crate::embeddings::{EmbeddingError, EmbeddingProvider};
use crate::query_log::QueryLogger;
use crate::targets::TargetPlan;

pub use errors::EngineError;
pub use feedback::FeedbackParams;
pub use fusion::FusionPolicy;
pub use scores::{rank_of, ItemId, ScoreVector};
pub use session::{SessionId, SessionState, SessionStore};
pub use temporal::TemporalOptions;

/// Items shown per screen (12 per line, 5 lines).
pub const DEFAULT_SHOWING: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// How many items a search returns.
    pub showing: usize,
    /// Policy used by fused text searches.
    pub fusion: FusionPolicy,
    pub feedback: FeedbackParams,
    pub temporal: TemporalOptions,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            showing: DEFAULT_SHOWING,
            fusion: FusionPolicy::default(),
            feedback: FeedbackParams::default(),
            temporal: TemporalOptions::default(),
        }
    }
}

pub struct RankingEngine {
    corpus: Arc<Corpus>,
    provider: Arc<dyn EmbeddingProvider>,
    logger: Arc<dyn QueryLogger>,
    videos: Option<VideoBounds>,
    labels: Option<ClassLabels>,
    targets: TargetPlan,
    sessions: SessionStore,
    options: EngineOptions,
}

impl RankingEngine {
    pub fn new(
        corpus: Arc<Corpus>,
        provider: Arc<dyn EmbeddingProvider>,
        logger: Arc<dyn QueryLogger>,
        options: EngineOptions,
    ) -> Self {
        Self {
            corpus,
            provider,
            logger,
            videos: None,
            labels: None,
            targets: TargetPlan::default(),
            sessions: SessionStore::new(),
            options,
        }
    }

    /// Keep temporal context inside the video of each match.
    pub fn with_videos(mut self, videos: VideoBounds) -> Self {
        self.videos = Some(videos);
        self
    }

    /// Attach noun-class labels reported with each result screen.
    pub fn with_labels(mut self, labels: ClassLabels) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn with_targets(mut self, targets: TargetPlan) -> Self {
        self.targets = targets;
        self
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    pub fn labels(&self) -> Option<&ClassLabels> {
        self.labels.as_ref()
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn targets(&self) -> &TargetPlan {
        &self.targets
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Copy of the current memory of `session`.
    pub fn session_state(&self, session: &SessionId) -> Result<SessionState, EngineError> {
        self.sessions
            .with_session(session, false, |state| Ok(state.clone()))
    }

    /// Create a fresh session with reset memory.
    pub fn start_session(&self) -> Result<SessionId, EngineError> {
        let session = SessionId::new();
        self.reset_session(&session)?;
        log::info!("started session {session}");
        Ok(session)
    }

    /// Forget the ranking memory of `session`, creating it if needed.
    ///
    /// Fused text search starts over as if no earlier query existed.
    pub fn reset_session(&self, session: &SessionId) -> Result<(), EngineError> {
        let baseline = self.baseline();
        self.sessions.with_session(session, true, |state| {
            state.reset(baseline);
            Ok(())
        })
    }

    pub fn current_target(&self, session: &SessionId) -> Result<Option<ItemId>, EngineError> {
        self.sessions
            .with_session(session, false, |state| Ok(self.targets.get(state.target_index)))
    }

    /// Move `session` on to the next target. Returns `None` once the plan
    /// is exhausted.
    pub fn advance_target(&self, session: &SessionId) -> Result<Option<ItemId>, EngineError> {
        let baseline = self.baseline();
        self.sessions.with_session(session, false, |state| {
            state.target_index += 1;
            state.reset(baseline);
            Ok(self.targets.get(state.target_index))
        })
    }

    /// Rank the corpus against a text query.
    ///
    /// With `fusion_enabled` the raw distances are combined with those of
    /// the session's previous fused query under the configured policy, and
    /// remembered for the next one.
    pub fn text_search(
        &self,
        query: &str,
        session: &SessionId,
        fusion_enabled: bool,
        activity: &str,
    ) -> Result<Vec<ItemId>, EngineError> {
        let embedding = self.encode(query)?;
        let raw = self.corpus.distances(&embedding);
        let policy = self.options.fusion;
        let showing = self.options.showing;

        let (order, target) = self.sessions.with_session(session, true, |state| {
            let combined = if fusion_enabled {
                let last = state
                    .last_raw
                    .get_or_insert_with(|| policy.baseline(raw.len()));
                policy.fuse(&raw, last)
            } else {
                raw.clone()
            };

            let order = combined.argsort();
            let shown: Vec<ItemId> = order.iter().take(showing).copied().collect();
            let scores = shown
                .iter()
                .map(|&id| (id, combined.as_slice()[id]))
                .collect();
            state.remember(scores, shown);

            if fusion_enabled {
                state.last_raw = Some(raw);
            }

            Ok((order, self.targets.get(state.target_index)))
        })?;

        let rank = rank_of(&order, target);
        log::debug!("session {session}: text query {query:?}, target rank {rank}");
        if let Err(err) = self
            .logger
            .append_text_query(query, target, session, rank, activity)
        {
            log::error!("failed to log text query: {err}");
        }

        Ok(order.into_iter().take(showing).collect())
    }

    /// Rank the corpus for "something matching the first clause, shortly
    /// followed by something matching the second", e.g. `"cat > dog"`.
    ///
    /// Each of the best matches is shown with its surrounding items.
    pub fn temporal_search(
        &self,
        query: &str,
        session: &SessionId,
    ) -> Result<Vec<ItemId>, EngineError> {
        let (first, then) = temporal::split_clauses(query)?;
        let first = self.corpus.distances(&self.encode(first)?);
        let then = self.corpus.distances(&self.encode(then)?);

        let options = &self.options.temporal;
        let combined = temporal::followed_by(&first, &then, options.window);
        let top = combined.top(self.options.showing);
        let anchors: Vec<ItemId> = top.iter().map(|(id, _)| *id).collect();
        let shown = temporal::expand(
            &anchors,
            self.corpus.len(),
            options,
            self.videos.as_ref(),
            self.options.showing,
        );

        let baseline = self.baseline();
        self.sessions.with_session(session, true, |state| {
            state.reset(baseline);
            state.remember(top, shown.clone());
            Ok(())
        })?;

        log::debug!("session {session}: temporal query {query:?}");
        Ok(shown)
    }

    /// Rank the corpus against one of its own items.
    pub fn image_search(
        &self,
        item: ItemId,
        session: &SessionId,
    ) -> Result<Vec<ItemId>, EngineError> {
        let query = self
            .corpus
            .get(item)
            .ok_or(EngineError::CorpusIndexOutOfRange {
                id: item,
                len: self.corpus.len(),
            })?;

        let scores = self.corpus.distances(query);
        let order = scores.argsort();
        let showing = self.options.showing;
        let shown: Vec<ItemId> = order.iter().take(showing).copied().collect();

        let baseline = self.baseline();
        let target = self.sessions.with_session(session, true, |state| {
            state.reset(baseline);
            state.remember(
                shown.iter().map(|&id| (id, scores.as_slice()[id])).collect(),
                shown.clone(),
            );
            Ok(self.targets.get(state.target_index))
        })?;

        let rank = rank_of(&order, target);
        log::debug!("session {session}: image query {item}, target rank {rank}");
        if let Err(err) = self.logger.append_image_query(item, target, session, rank) {
            log::error!("failed to log image query: {err}");
        }

        Ok(shown)
    }

    /// Re-rank the items last shown to `session` given one relevant item.
    ///
    /// The result is a permutation of the shown items; nothing new is
    /// introduced.
    pub fn bayes_update(
        &self,
        positive: ItemId,
        session: &SessionId,
    ) -> Result<Vec<ItemId>, EngineError> {
        let showing = self.options.showing;

        self.sessions.with_session(session, false, |state| {
            let candidates = state
                .candidates
                .clone()
                .ok_or_else(|| EngineError::NoCandidates(session.to_string()))?;

            let scored = feedback::bayes_rerank(
                &self.corpus,
                &candidates,
                positive,
                |id| state.last_score(id),
                &self.options.feedback,
            )?;

            let scored: Vec<(ItemId, f32)> = scored.into_iter().take(showing).collect();
            let shown: Vec<ItemId> = scored.iter().map(|(id, _)| *id).collect();
            state.remember(scored, shown.clone());

            log::debug!("session {session}: feedback on {positive}");
            Ok(shown)
        })
    }

    fn baseline(&self) -> ScoreVector {
        self.options.fusion.baseline(self.corpus.len())
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        let embedding = self.provider.encode_text(text)?;
        if embedding.len() != self.corpus.dimensions() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.corpus.dimensions(),
                got: embedding.len(),
            }
            .into());
        }
        Ok(embedding)
    }
}
