//! Noun-class labels of corpus items.
//!
//! Labels come from an offline classification pass and are read from two
//! files:
//! - a noun list, one `name : frequency` line per class, where the line
//!   number is the class index and the frequency is the percentage of items
//!   carrying the class
//! - a `;` separated classification table with an `id;top` header, where `id`
//!   is the 1-based item number and `top` a bracketed list of class indices,
//!   best first

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use super::CorpusError;
use crate::engine::scores::ItemId;

/// Classes reported per result screen.
pub const TOP_CLASSES: usize = 5;
/// A class must occur more often than this on a screen to be reported.
pub const MIN_CLASS_OCCURRENCES: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct NounClass {
    pub name: String,
    pub frequency: f32,
}

#[derive(Debug, Deserialize)]
struct ClassificationRow {
    id: String,
    top: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassLabels {
    classes: Vec<NounClass>,
    items: HashMap<ItemId, Vec<usize>>,
}

impl ClassLabels {
    pub fn load(
        classification: impl AsRef<Path>,
        nounlist: impl AsRef<Path>,
    ) -> Result<Self, CorpusError> {
        let classification = std::fs::read_to_string(classification)?;
        let nounlist = std::fs::read_to_string(nounlist)?;
        Self::parse(&classification, &nounlist)
    }

    pub fn parse(classification: &str, nounlist: &str) -> Result<Self, CorpusError> {
        let classes = parse_nounlist(nounlist)?;

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(true)
            .from_reader(classification.as_bytes());

        let mut items = HashMap::new();
        for (line, row) in reader.deserialize::<ClassificationRow>().enumerate() {
            let invalid =
                |msg: String| CorpusError::InvalidLabels(format!("row {}: {msg}", line + 2));

            let row = row.map_err(|e| invalid(e.to_string()))?;
            let id = match row.id.trim().parse::<usize>() {
                Ok(id) if id > 0 => id - 1,
                _ => return Err(invalid(format!("bad item number {:?}", row.id))),
            };
            let labels = parse_class_list(&row.top)
                .ok_or_else(|| invalid(format!("bad class list {:?}", row.top)))?;
            if let Some(class) = labels.iter().find(|&&c| c >= classes.len()) {
                return Err(invalid(format!("unknown class {class}")));
            }

            items.insert(id, labels);
        }

        Ok(Self { classes, items })
    }

    pub fn classes(&self) -> &[NounClass] {
        &self.classes
    }

    pub fn name(&self, class: usize) -> Option<&str> {
        self.classes.get(class).map(|c| c.name.as_str())
    }

    /// Class indices of `id`, best first. Unclassified items have none.
    pub fn labels_of(&self, id: ItemId) -> &[usize] {
        self.items.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The most common classes among `items`.
    ///
    /// At most [`TOP_CLASSES`] classes occurring more than
    /// [`MIN_CLASS_OCCURRENCES`] times, least common first. Equal counts
    /// keep the order in which the classes were first seen.
    pub fn top_classes(&self, items: &[ItemId]) -> Vec<usize> {
        let mut counts: Vec<(usize, usize)> = Vec::new();
        let mut slot: HashMap<usize, usize> = HashMap::new();

        for &class in items.iter().flat_map(|&id| self.labels_of(id)) {
            let idx = *slot.entry(class).or_insert_with(|| {
                counts.push((class, 0));
                counts.len() - 1
            });
            counts[idx].1 += 1;
        }

        counts.sort_by(|a, b| b.1.cmp(&a.1));

        let mut top: Vec<usize> = counts
            .into_iter()
            .take(TOP_CLASSES)
            .filter(|&(_, count)| count > MIN_CLASS_OCCURRENCES)
            .map(|(class, _)| class)
            .collect();
        top.reverse();
        top
    }
}

fn parse_nounlist(content: &str) -> Result<Vec<NounClass>, CorpusError> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(idx, line)| {
            let parsed = line.rsplit_once(':').and_then(|(name, frequency)| {
                Some(NounClass {
                    name: name.trim().to_string(),
                    frequency: frequency.trim().parse().ok()?,
                })
            });
            parsed.ok_or_else(|| {
                CorpusError::InvalidLabels(format!(
                    "noun list line {}: expected 'name : frequency', got {line:?}",
                    idx + 1
                ))
            })
        })
        .collect()
}

/// `"[3, 17, 5]"` → `[3, 17, 5]`
fn parse_class_list(value: &str) -> Option<Vec<usize>> {
    let inner = value.trim().strip_prefix('[')?.strip_suffix(']')?;
    if inner.trim().is_empty() {
        return Some(Vec::new());
    }
    inner.split(',').map(|c| c.trim().parse().ok()).collect()
}
