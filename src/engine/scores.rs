//! Dense score vectors and the distance primitives behind every ranking.
//!
//! A score is a cosine distance `1 - cos(a, b)`. For unit vectors it lies in
//! `[0, 2]` and lower means more similar.

/// 0-based position of an item in the corpus.
pub type ItemId = usize;

/// Largest possible distance between two unit vectors.
pub const MAX_DISTANCE: f32 = 2.0;

/// One score per corpus item, indexed by [`ItemId`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreVector(Vec<f32>);

impl ScoreVector {
    pub fn from_vec(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn filled(len: usize, value: f32) -> Self {
        Self(vec![value; len])
    }

    pub fn zeros(len: usize) -> Self {
        Self::filled(len, 0.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Elementwise `self + other`.
    pub fn add(&self, other: &ScoreVector) -> ScoreVector {
        self.zip_with(other, |a, b| a + b)
    }

    /// Elementwise minimum.
    pub fn min(&self, other: &ScoreVector) -> ScoreVector {
        self.zip_with(other, f32::min)
    }

    /// Elementwise maximum.
    pub fn max(&self, other: &ScoreVector) -> ScoreVector {
        self.zip_with(other, f32::max)
    }

    /// Elementwise product.
    pub fn mul(&self, other: &ScoreVector) -> ScoreVector {
        self.zip_with(other, |a, b| a * b)
    }

    /// Multiply every score by `factor`.
    pub fn scale(&self, factor: f32) -> ScoreVector {
        ScoreVector(self.0.iter().map(|v| v * factor).collect())
    }

    fn zip_with(&self, other: &ScoreVector, f: impl Fn(f32, f32) -> f32) -> ScoreVector {
        debug_assert_eq!(self.len(), other.len(), "score vectors must cover the same corpus");
        ScoreVector(
            self.0
                .iter()
                .zip(other.0.iter())
                .map(|(&a, &b)| f(a, b))
                .collect(),
        )
    }

    /// Item ids ordered by ascending score.
    ///
    /// The sort is stable, so equal scores keep their index order.
    pub fn argsort(&self) -> Vec<ItemId> {
        let mut order: Vec<ItemId> = (0..self.0.len()).collect();
        order.sort_by(|&a, &b| self.0[a].total_cmp(&self.0[b]));
        order
    }

    /// The `limit` best items with their scores, best first.
    pub fn top(&self, limit: usize) -> Vec<(ItemId, f32)> {
        self.argsort()
            .into_iter()
            .take(limit)
            .map(|id| (id, self.0[id]))
            .collect()
    }
}

/// 1-based rank of `item` within `order`, or -1 when it is absent.
pub fn rank_of(order: &[ItemId], item: Option<ItemId>) -> i64 {
    item.and_then(|item| order.iter().position(|&id| id == item))
        .map(|pos| pos as i64 + 1)
        .unwrap_or(-1)
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine distance between two unit vectors.
pub fn distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - dot(a, b)
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(v: &[f32]) -> Vec<f32> {
        let norm = l2_norm(v);
        v.iter().map(|x| x / norm).collect()
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let u = unit(&[0.3, -0.4, 0.5, 0.1]);
        assert!(distance(&u, &u).abs() < 1e-6);
    }

    #[test]
    fn test_distance_to_opposite_is_two() {
        let u = unit(&[0.3, -0.4, 0.5, 0.1]);
        let neg: Vec<f32> = u.iter().map(|x| -x).collect();
        assert!((distance(&u, &neg) - MAX_DISTANCE).abs() < 1e-6);
    }

    #[test]
    fn test_argsort_is_stable_on_ties() {
        let scores = ScoreVector::from_vec(vec![0.5, 0.1, 0.5, 0.1, 0.0]);
        assert_eq!(scores.argsort(), vec![4, 1, 3, 0, 2]);
    }

    #[test]
    fn test_top_truncates_and_keeps_scores() {
        let scores = ScoreVector::from_vec(vec![0.9, 0.2, 0.4]);
        assert_eq!(scores.top(2), vec![(1, 0.2), (2, 0.4)]);
        assert_eq!(scores.top(10).len(), 3);
    }

    #[test]
    fn test_elementwise_ops() {
        let a = ScoreVector::from_vec(vec![1.0, 0.5, 2.0]);
        let b = ScoreVector::from_vec(vec![0.5, 1.0, 1.0]);

        assert_eq!(a.add(&b).as_slice(), &[1.5, 1.5, 3.0]);
        assert_eq!(a.min(&b).as_slice(), &[0.5, 0.5, 1.0]);
        assert_eq!(a.max(&b).as_slice(), &[1.0, 1.0, 2.0]);
        assert_eq!(a.mul(&b).as_slice(), &[0.5, 0.5, 2.0]);
        assert_eq!(a.scale(2.0).as_slice(), &[2.0, 1.0, 4.0]);
    }

    #[test]
    fn test_rank_of() {
        let order = vec![3, 0, 2, 1];
        assert_eq!(rank_of(&order, Some(3)), 1);
        assert_eq!(rank_of(&order, Some(1)), 4);
        assert_eq!(rank_of(&order, Some(7)), -1);
        assert_eq!(rank_of(&order, None), -1);
    }
}
