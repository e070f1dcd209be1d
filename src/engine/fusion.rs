//! Score fusion across consecutive text queries of one session.
//!
//! Each policy combines the new raw distances with the raw distances of the
//! previous query. A session with no previous query starts from the policy's
//! baseline, chosen so the first fused search ranks exactly like the raw one.

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::engine::scores::{ScoreVector, MAX_DISTANCE};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionPolicy {
    /// Ignore the previous query.
    None,
    /// `raw + last`: matches of earlier queries reinforce.
    #[default]
    Sum,
    /// `min(raw, last)`: an item is good if either query matched it.
    Min,
    /// `max(raw, last)`: an item is good only if both queries matched it.
    Max,
    /// `raw * last`
    Product,
    /// `2 * raw + last`: the newest query counts double.
    Weighted,
}

impl FusionPolicy {
    pub const ALL: [FusionPolicy; 6] = [
        FusionPolicy::None,
        FusionPolicy::Sum,
        FusionPolicy::Min,
        FusionPolicy::Max,
        FusionPolicy::Product,
        FusionPolicy::Weighted,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FusionPolicy::None => "none",
            FusionPolicy::Sum => "sum",
            FusionPolicy::Min => "min",
            FusionPolicy::Max => "max",
            FusionPolicy::Product => "product",
            FusionPolicy::Weighted => "weighted",
        }
    }

    /// Memory a session starts from.
    pub fn baseline(&self, len: usize) -> ScoreVector {
        match self {
            FusionPolicy::Min => ScoreVector::filled(len, MAX_DISTANCE),
            FusionPolicy::Product => ScoreVector::filled(len, 1.0),
            FusionPolicy::None | FusionPolicy::Sum | FusionPolicy::Max | FusionPolicy::Weighted => {
                ScoreVector::zeros(len)
            }
        }
    }

    pub fn fuse(&self, raw: &ScoreVector, last: &ScoreVector) -> ScoreVector {
        match self {
            FusionPolicy::None => raw.clone(),
            FusionPolicy::Sum => raw.add(last),
            FusionPolicy::Min => raw.min(last),
            FusionPolicy::Max => raw.max(last),
            FusionPolicy::Product => raw.mul(last),
            FusionPolicy::Weighted => raw.scale(2.0).add(last),
        }
    }
}

impl Display for FusionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FusionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FusionPolicy::ALL
            .into_iter()
            .find(|policy| policy.name() == s.to_lowercase())
            .ok_or_else(|| {
                format!(
                    "unknown fusion policy {s:?}, expected one of: {}",
                    FusionPolicy::ALL.map(|p| p.name()).join(", ")
                )
            })
    }
}
