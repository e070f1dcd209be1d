use crate::engine::{EngineError, FusionPolicy, ItemId, RankingEngine, SessionId};
use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;

#[derive(Clone)]
pub struct SharedState {
    engine: Arc<RankingEngine>,
}

impl SharedState {
    pub fn new(engine: Arc<RankingEngine>) -> Self {
        Self { engine }
    }
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/session/start", post(start_session))
        .route("/api/session/reset", post(reset_session))
        .route("/api/session/next_target", post(next_target))
        .route("/api/search/text", post(text_search))
        .route("/api/search/temporal", post(temporal_search))
        .route("/api/search/image", post(image_search))
        .route("/api/feedback", post(feedback))
        .route("/api/classes", get(classes))
        .route("/api/status", get(status))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(Arc::new(state))
}

async fn start_app(engine: Arc<RankingEngine>, bind: &str) -> anyhow::Result<()> {
    async fn shutdown_signal() {
        let ctrl_c = async {
            if let Err(err) = signal::ctrl_c().await {
                log::error!("failed to install Ctrl+C handler: {err}");
            }
        };

        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(err) => {
                    log::error!("failed to install signal handler: {err}");
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        log::warn!("shutting down");
    }

    let app = router(SharedState::new(engine));

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    log::info!("listening on {bind}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

pub fn start_daemon(engine: Arc<RankingEngine>, bind: &str) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async { start_app(engine, bind).await })
}

#[derive(Debug)]
struct HttpError(EngineError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            EngineError::Encoding(_) | EngineError::MalformedTemporalQuery(_) => {
                StatusCode::BAD_REQUEST
            }
            EngineError::UnknownSession(_) | EngineError::NoCandidates(_) => StatusCode::NOT_FOUND,
            EngineError::InvalidCandidateReference(_) | EngineError::CorpusIndexOutOfRange { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            EngineError::Internal(_) => {
                log::error!("{self:?}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<EngineError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

/// Run an engine call off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, HttpError>
where
    F: FnOnce() -> Result<T, EngineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| EngineError::Internal(err.to_string()))?
        .map_err(Into::into)
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SessionRequest {
    pub session: SessionId,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SessionResponse {
    pub session: SessionId,
    /// Image the user should look for, absent once every target was shown
    pub target: Option<ItemId>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SearchResponse {
    pub items: Vec<ItemId>,
    /// Class names of each item, best first, empty without labels
    pub labels: Vec<Vec<String>>,
    /// Most common classes on this screen, least common first
    pub top_classes: Vec<String>,
}

fn search_response(engine: &RankingEngine, items: Vec<ItemId>) -> SearchResponse {
    let Some(classes) = engine.labels() else {
        return SearchResponse {
            labels: vec![Vec::new(); items.len()],
            items,
            top_classes: Vec::new(),
        };
    };

    let names = |ids: &[usize]| -> Vec<String> {
        ids.iter()
            .filter_map(|&class| classes.name(class))
            .map(str::to_string)
            .collect()
    };

    SearchResponse {
        labels: items.iter().map(|&id| names(classes.labels_of(id))).collect(),
        top_classes: names(&classes.top_classes(&items)),
        items,
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ClassEntry {
    pub name: String,
    /// Percentage of corpus items carrying the class
    pub frequency: f32,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ClassesResponse {
    pub classes: Vec<ClassEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TextSearchRequest {
    pub session: SessionId,
    pub query: String,

    /// Combine with the previous text query of the session.
    ///
    /// *Defaults to on unless the configured policy is `none`*
    #[serde(default)]
    pub fusion: Option<bool>,

    /// Free-form description of what the user was doing
    #[serde(default)]
    pub activity: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TemporalSearchRequest {
    pub session: SessionId,
    /// Two clauses separated by '>'
    pub query: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ImageSearchRequest {
    pub session: SessionId,
    pub item: ItemId,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct FeedbackRequest {
    pub session: SessionId,
    /// A currently displayed item the user marked as relevant
    pub positive: ItemId,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StatusResponse {
    pub items: usize,
    pub dimensions: usize,
    pub model: String,
    pub showing: usize,
    pub fusion: FusionPolicy,
    pub targets: usize,
    pub sessions: usize,
}

async fn start_session(
    State(state): State<Arc<SharedState>>,
) -> Result<Json<SessionResponse>, HttpError> {
    let engine = state.engine.clone();

    blocking(move || {
        let session = engine.start_session()?;
        let target = engine.current_target(&session)?;
        Ok(Json(SessionResponse { session, target }))
    })
    .await
}

async fn reset_session(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SessionRequest>,
) -> Result<Json<SessionResponse>, HttpError> {
    log::debug!("payload: {payload:?}");
    let engine = state.engine.clone();

    blocking(move || {
        engine.reset_session(&payload.session)?;
        let target = engine.current_target(&payload.session)?;
        Ok(Json(SessionResponse {
            session: payload.session,
            target,
        }))
    })
    .await
}

async fn next_target(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SessionRequest>,
) -> Result<Json<SessionResponse>, HttpError> {
    log::debug!("payload: {payload:?}");
    let engine = state.engine.clone();

    blocking(move || {
        let target = engine.advance_target(&payload.session)?;
        Ok(Json(SessionResponse {
            session: payload.session,
            target,
        }))
    })
    .await
}

async fn text_search(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<TextSearchRequest>,
) -> Result<Json<SearchResponse>, HttpError> {
    log::debug!("payload: {payload:?}");
    let engine = state.engine.clone();
    let fusion = payload
        .fusion
        .unwrap_or(engine.options().fusion != FusionPolicy::None);

    blocking(move || {
        engine
            .text_search(&payload.query, &payload.session, fusion, &payload.activity)
            .map(|items| Json(search_response(&engine, items)))
    })
    .await
}

async fn temporal_search(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<TemporalSearchRequest>,
) -> Result<Json<SearchResponse>, HttpError> {
    log::debug!("payload: {payload:?}");
    let engine = state.engine.clone();

    blocking(move || {
        engine
            .temporal_search(&payload.query, &payload.session)
            .map(|items| Json(search_response(&engine, items)))
    })
    .await
}

async fn image_search(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<ImageSearchRequest>,
) -> Result<Json<SearchResponse>, HttpError> {
    log::debug!("payload: {payload:?}");
    let engine = state.engine.clone();

    blocking(move || {
        engine
            .image_search(payload.item, &payload.session)
            .map(|items| Json(search_response(&engine, items)))
    })
    .await
}

async fn feedback(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<FeedbackRequest>,
) -> Result<Json<SearchResponse>, HttpError> {
    log::debug!("payload: {payload:?}");
    let engine = state.engine.clone();

    blocking(move || {
        engine
            .bayes_update(payload.positive, &payload.session)
            .map(|items| Json(search_response(&engine, items)))
    })
    .await
}

async fn classes(State(state): State<Arc<SharedState>>) -> Json<ClassesResponse> {
    let classes = state
        .engine
        .labels()
        .map(|labels| {
            labels
                .classes()
                .iter()
                .map(|class| ClassEntry {
                    name: class.name.clone(),
                    frequency: class.frequency,
                })
                .collect()
        })
        .unwrap_or_default();

    Json(ClassesResponse { classes })
}

async fn status(State(state): State<Arc<SharedState>>) -> Json<StatusResponse> {
    let engine = &state.engine;

    Json(StatusResponse {
        items: engine.corpus().len(),
        dimensions: engine.corpus().dimensions(),
        model: engine.provider_name().to_string(),
        showing: engine.options().showing,
        fusion: engine.options().fusion,
        targets: engine.targets().len(),
        sessions: engine.session_count(),
    })
}
