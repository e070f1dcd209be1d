//! Bayesian relevance feedback over the displayed candidates.
//!
//! The user marks one displayed item as relevant; every other displayed item
//! serves as an implicit negative. For a candidate `c`:
//!
//!   PF(c)        = exp(-d(c, positive) / α)
//!   PN_j(c)      = exp(-d(c, negative_j) / α)
//!   posterior(c) = PF(c) / (Σ_j PN_j(c) + PF(c))
//!   prior(c)     = (1 + last_score(c))^β
//!
//! The final score starts at the prior and is multiplied by the posterior
//! once per negative. Higher is better, unlike the distances used elsewhere.

use serde::{Deserialize, Serialize};

use crate::corpus::Corpus;
use crate::engine::errors::EngineError;
use crate::engine::scores::{distance, ItemId};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeedbackParams {
    /// Temperature of the likelihoods.
    #[serde(default = "default_alpha")]
    pub alpha: f32,
    /// Exponent of the prior.
    #[serde(default = "default_beta")]
    pub beta: f32,
}

fn default_alpha() -> f32 {
    0.1
}

fn default_beta() -> f32 {
    1.0
}

impl Default for FeedbackParams {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            beta: default_beta(),
        }
    }
}

/// Re-rank `candidates` given one positive example.
///
/// Returns every candidate exactly once, best first, with its final score.
pub fn bayes_rerank(
    corpus: &Corpus,
    candidates: &[ItemId],
    positive: ItemId,
    last_score: impl Fn(ItemId) -> Option<f32>,
    params: &FeedbackParams,
) -> Result<Vec<(ItemId, f32)>, EngineError> {
    if !candidates.contains(&positive) {
        return Err(EngineError::InvalidCandidateReference(positive));
    }

    let vector = |id: ItemId| {
        corpus.get(id).ok_or(EngineError::CorpusIndexOutOfRange {
            id,
            len: corpus.len(),
        })
    };

    let positive_vec = vector(positive)?;
    let vectors = candidates
        .iter()
        .map(|&id| vector(id))
        .collect::<Result<Vec<_>, _>>()?;
    let negatives: Vec<&[f32]> = candidates
        .iter()
        .zip(vectors.iter())
        .filter(|(id, _)| **id != positive)
        .map(|(_, &v)| v)
        .collect();

    let alpha = params.alpha as f64;
    let beta = params.beta as f64;
    let likelihood = |a: &[f32], b: &[f32]| (-(distance(a, b) as f64) / alpha).exp();

    let mut scored: Vec<(ItemId, f64)> = candidates
        .iter()
        .zip(vectors.iter())
        .map(|(&id, &v)| {
            let pf = likelihood(v, positive_vec);
            let pn: f64 = negatives.iter().map(|&n| likelihood(v, n)).sum();
            let posterior = pf / (pn + pf);
            let prior = (1.0 + last_score(id).unwrap_or(0.0) as f64).powf(beta);

            // accumulated in log space, the plain product underflows for a full screen
            let log_score = negatives
                .iter()
                .fold(prior.ln(), |acc, _| acc + posterior.ln());
            (id, log_score)
        })
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1));

    Ok(scored
        .into_iter()
        .map(|(id, log_score)| (id, log_score.exp() as f32))
        .collect())
}
