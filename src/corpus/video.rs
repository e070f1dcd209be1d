//! Video boundaries of a keyframe corpus.
//!
//! The corpus is a concatenation of keyframes from several videos. The bounds
//! file lists, one per line, the 1-based id of the last keyframe of each
//! video. Items after the last listed end belong to a final open video.

use std::ops::RangeInclusive;
use std::path::Path;

use super::CorpusError;
use crate::engine::scores::ItemId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoBounds {
    /// 0-based inclusive end of each video, strictly increasing.
    ends: Vec<ItemId>,
}

impl VideoBounds {
    pub fn from_ends(ends: Vec<ItemId>) -> Result<Self, CorpusError> {
        if ends.windows(2).any(|w| w[0] >= w[1]) {
            return Err(CorpusError::InvalidVideoBounds(
                "video ends must be strictly increasing".to_string(),
            ));
        }
        Ok(Self { ends })
    }

    pub fn parse(content: &str) -> Result<Self, CorpusError> {
        let ends = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .enumerate()
            .map(|(idx, line)| match line.parse::<usize>() {
                Ok(end) if end > 0 => Ok(end - 1),
                _ => Err(CorpusError::InvalidVideoBounds(format!(
                    "line {}: expected a positive frame number, got {line:?}",
                    idx + 1
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_ends(ends)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CorpusError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn video_count(&self) -> usize {
        self.ends.len()
    }

    /// Ids of the video containing `id`. The final open video is unbounded.
    pub fn video_of(&self, id: ItemId) -> RangeInclusive<ItemId> {
        let idx = self.ends.partition_point(|&end| end < id);
        let start = if idx == 0 { 0 } else { self.ends[idx - 1] + 1 };
        let end = self.ends.get(idx).copied().unwrap_or(ItemId::MAX);
        start..=end
    }

    pub fn same_video(&self, a: ItemId, b: ItemId) -> bool {
        self.video_of(a).contains(&b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_one_based_ends() {
        let bounds = VideoBounds::parse("3\n7\n\n10\n").unwrap();
        assert_eq!(bounds.video_count(), 3);
        assert_eq!(bounds.video_of(0), 0..=2);
        assert_eq!(bounds.video_of(2), 0..=2);
        assert_eq!(bounds.video_of(3), 3..=6);
        assert_eq!(bounds.video_of(9), 7..=9);
    }

    #[test]
    fn test_items_after_last_end_form_open_video() {
        let bounds = VideoBounds::parse("3").unwrap();
        assert_eq!(bounds.video_of(5), 3..=ItemId::MAX);
    }

    #[test]
    fn test_same_video() {
        let bounds = VideoBounds::parse("3\n7").unwrap();
        assert!(bounds.same_video(1, 2));
        assert!(!bounds.same_video(2, 3));
        assert!(bounds.same_video(4, 6));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            VideoBounds::parse("3\nabc"),
            Err(CorpusError::InvalidVideoBounds(_))
        ));
        assert!(matches!(
            VideoBounds::parse("0"),
            Err(CorpusError::InvalidVideoBounds(_))
        ));
        assert!(matches!(
            VideoBounds::parse("5\n5"),
            Err(CorpusError::InvalidVideoBounds(_))
        ));
    }

    #[test]
    fn test_empty_bounds_is_single_video() {
        let bounds = VideoBounds::parse("").unwrap();
        assert_eq!(bounds.video_count(), 0);
        assert!(bounds.same_video(0, 1000));
    }
}
