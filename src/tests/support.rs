//! Test doubles shared by the scenario suites.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::corpus::Corpus;
use crate::embeddings::{normalize, EmbeddingError, EmbeddingProvider};
use crate::engine::{EngineOptions, ItemId, RankingEngine, SessionId};
use crate::query_log::{QueryKind, QueryLogError, QueryLogger};
use crate::targets::TargetPlan;

/// Provider with a fixed text → vector table that records every call.
pub struct StubProvider {
    dimensions: usize,
    texts: HashMap<String, Vec<f32>>,
    calls: Mutex<Vec<String>>,
}

impl StubProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            texts: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.texts.insert(text.to_string(), vector);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl EmbeddingProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn encode_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.lock().unwrap().push(text.to_string());

        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyText);
        }

        let vector = self
            .texts
            .get(text)
            .cloned()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed(format!("no vector for {text:?}")))?;
        normalize(vector)
    }

    /// The first `dimensions` bytes, zero padded, are the vector.
    fn encode_image(&self, bytes: &[u8]) -> Result<Vec<f32>, EmbeddingError> {
        if bytes.is_empty() {
            return Err(EmbeddingError::InvalidImage("empty file".to_string()));
        }

        let mut vector = vec![0.0; self.dimensions];
        for (slot, byte) in vector.iter_mut().zip(bytes) {
            *slot = *byte as f32;
        }
        normalize(vector)
    }
}

/// One axis per animal, so every item matches exactly one word.
pub fn animals() -> StubProvider {
    StubProvider::new(3)
        .with("cat", vec![1.0, 0.0, 0.0])
        .with("dog", vec![0.0, 1.0, 0.0])
        .with("bird", vec![0.0, 0.0, 1.0])
        .with("cat ", vec![1.0, 0.0, 0.0])
        .with(" dog", vec![0.0, 1.0, 0.0])
        .with("cat or dog", vec![1.0, 1.0, 0.0])
}

/// Items 0, 1, 2 are a cat, a dog and a bird.
pub fn animal_corpus() -> Corpus {
    Corpus::from_vectors(vec![
        vec![1.0, 0.0, 0.0],
        vec![0.0, 1.0, 0.0],
        vec![0.0, 0.0, 1.0],
    ])
    .unwrap()
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggedRow {
    pub kind: QueryKind,
    pub query: String,
    pub target: Option<ItemId>,
    pub session: String,
    pub rank: i64,
    pub activity: String,
}

#[derive(Default)]
pub struct MemoryQueryLog {
    rows: Mutex<Vec<LoggedRow>>,
}

impl MemoryQueryLog {
    pub fn rows(&self) -> Vec<LoggedRow> {
        self.rows.lock().unwrap().clone()
    }
}

impl QueryLogger for MemoryQueryLog {
    fn append_text_query(
        &self,
        query: &str,
        target: Option<ItemId>,
        session: &SessionId,
        rank: i64,
        activity: &str,
    ) -> Result<(), QueryLogError> {
        self.rows.lock().unwrap().push(LoggedRow {
            kind: QueryKind::Text,
            query: query.to_string(),
            target,
            session: session.to_string(),
            rank,
            activity: activity.to_string(),
        });
        Ok(())
    }

    fn append_image_query(
        &self,
        item: ItemId,
        target: Option<ItemId>,
        session: &SessionId,
        rank: i64,
    ) -> Result<(), QueryLogError> {
        self.rows.lock().unwrap().push(LoggedRow {
            kind: QueryKind::Image,
            query: item.to_string(),
            target,
            session: session.to_string(),
            rank,
            activity: String::new(),
        });
        Ok(())
    }
}

/// Logger whose every write fails.
pub struct FailingQueryLog;

impl QueryLogger for FailingQueryLog {
    fn append_text_query(
        &self,
        _query: &str,
        _target: Option<ItemId>,
        _session: &SessionId,
        _rank: i64,
        _activity: &str,
    ) -> Result<(), QueryLogError> {
        Err(QueryLogError::Closed)
    }

    fn append_image_query(
        &self,
        _item: ItemId,
        _target: Option<ItemId>,
        _session: &SessionId,
        _rank: i64,
    ) -> Result<(), QueryLogError> {
        Err(QueryLogError::Closed)
    }
}

pub struct Fixture {
    pub engine: RankingEngine,
    pub provider: Arc<StubProvider>,
    pub log: Arc<MemoryQueryLog>,
}

pub fn fixture(options: EngineOptions, targets: Vec<ItemId>) -> Fixture {
    let provider = Arc::new(animals());
    let log = Arc::new(MemoryQueryLog::default());
    let engine = RankingEngine::new(
        Arc::new(animal_corpus()),
        provider.clone(),
        log.clone(),
        options,
    )
    .with_targets(TargetPlan::new(targets));

    Fixture {
        engine,
        provider,
        log,
    }
}
