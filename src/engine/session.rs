use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::str::FromStr;
use std::sync::{Arc, Mutex, RwLock};
use std::{fmt::Display, ops::Deref};

use crate::engine::errors::EngineError;
use crate::engine::scores::{ItemId, ScoreVector};

/// Opaque session token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(transparent)]
pub struct SessionId(String);

impl Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(SessionId(s.to_string()))
    }
}

impl Deref for SessionId {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(fr: &str) -> Self {
        SessionId(fr.to_string())
    }
}

impl From<String> for SessionId {
    fn from(fr: String) -> Self {
        SessionId(fr)
    }
}

impl SessionId {
    #[inline]
    pub fn new() -> SessionId {
        SessionId(rusty_ulid::generate_ulid_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Ranking memory of one session.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// Raw distances of the last fused text query.
    pub last_raw: Option<ScoreVector>,
    /// Top-K scores of the last search or feedback round, in rank order.
    pub last_scores: Vec<(ItemId, f32)>,
    /// Ids last shown to the user, in display order.
    pub candidates: Option<Vec<ItemId>>,
    /// Position in the target plan.
    pub target_index: usize,
}

impl SessionState {
    /// Score of `id` from the last round, if it was in the top-K.
    pub fn last_score(&self, id: ItemId) -> Option<f32> {
        self.last_scores
            .iter()
            .find(|(item, _)| *item == id)
            .map(|(_, score)| *score)
    }

    /// Forget everything except the target position.
    pub fn reset(&mut self, baseline: ScoreVector) {
        self.last_raw = Some(baseline);
        self.last_scores.clear();
        self.candidates = None;
    }

    pub fn remember(&mut self, scores: Vec<(ItemId, f32)>, candidates: Vec<ItemId>) {
        self.last_scores = scores;
        self.candidates = Some(candidates);
    }
}

/// All live sessions.
///
/// The map lock is only held for lookup and insertion; each session has its
/// own mutex so different sessions never wait on each other.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<SessionState>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn get(&self, id: &SessionId) -> Result<Arc<Mutex<SessionState>>, EngineError> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| EngineError::Internal(format!("Lock poisoned: {}", e)))?;

        sessions
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownSession(id.to_string()))
    }

    pub fn get_or_create(&self, id: &SessionId) -> Result<Arc<Mutex<SessionState>>, EngineError> {
        if let Ok(session) = self.get(id) {
            return Ok(session);
        }

        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| EngineError::Internal(format!("Lock poisoned: {}", e)))?;

        Ok(sessions
            .entry(id.clone())
            .or_insert_with(|| {
                log::debug!("new session {id}");
                Arc::new(Mutex::new(SessionState::default()))
            })
            .clone())
    }

    /// Run `f` with exclusive access to the session state.
    pub fn with_session<F, R>(&self, id: &SessionId, create: bool, f: F) -> Result<R, EngineError>
    where
        F: FnOnce(&mut SessionState) -> Result<R, EngineError>,
    {
        let session = if create {
            self.get_or_create(id)?
        } else {
            self.get(id)?
        };

        let mut state = session
            .lock()
            .map_err(|e| EngineError::Internal(format!("Lock poisoned: {}", e)))?;

        f(&mut state)
    }
}
