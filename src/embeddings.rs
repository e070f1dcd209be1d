//! Embedding providers.
//!
//! The ranking engine only sees the [`EmbeddingProvider`] trait. The
//! production provider, [`ClipEmbedder`], wraps fastembed's CLIP text and
//! vision towers so text queries and images land in the same space:
//! - Lazy model download with configurable cache directory
//! - Unit normalisation of every returned vector
//! - Image bytes are validated before they reach the model

use fastembed::{ImageEmbedding, ImageEmbeddingModel, ImageInitOptions, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::{mpsc, Mutex};
use std::time::Duration;

use crate::engine::scores::l2_norm;

/// Default model name (CLIP ViT-B/32, 512 dimensions)
pub const DEFAULT_MODEL: &str = "clip-vit-b-32";

/// Default download timeout for model files (5 minutes)
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Cannot embed empty text")]
    EmptyText,

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Model returned a zero-norm vector")]
    ZeroNorm,

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Invalid model name: {0}")]
    InvalidModel(String),
}

/// Maps text and images into a shared unit-normalised vector space.
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    fn dimensions(&self) -> usize;

    fn encode_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    fn encode_image(&self, bytes: &[u8]) -> Result<Vec<f32>, EmbeddingError>;

    /// SHA256 of the model name, stamped into corpus files.
    fn model_id_hash(&self) -> [u8; 32] {
        model_id_hash(self.name())
    }
}

pub fn model_id_hash(model_name: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(model_name.as_bytes());
    hasher.finalize().into()
}

/// Scale `v` to unit length.
pub fn normalize(mut v: Vec<f32>) -> Result<Vec<f32>, EmbeddingError> {
    let norm = l2_norm(&v);
    if norm < f32::EPSILON {
        return Err(EmbeddingError::ZeroNorm);
    }
    v.iter_mut().for_each(|x| *x /= norm);
    Ok(v)
}

/// Run `load` on its own thread and give up after `timeout`.
///
/// The loader thread is left to finish on its own when it times out.
fn run_with_timeout<T, F>(timeout: Duration, load: F) -> Result<T, EmbeddingError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, EmbeddingError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("model-load".to_string())
        .spawn(move || {
            let _ = tx.send(load());
        })
        .map_err(|e| EmbeddingError::InitFailed(format!("Failed to start model loader: {}", e)))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(EmbeddingError::InitFailed(format!(
            "Model was not ready after {}s",
            timeout.as_secs()
        ))),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(EmbeddingError::InitFailed(
            "Model loader stopped without a result".to_string(),
        )),
    }
}

/// CLIP text + vision models from fastembed.
/// Uses a Mutex per tower because fastembed's embed() requires &mut self.
pub struct ClipEmbedder {
    text: Mutex<TextEmbedding>,
    image: Mutex<ImageEmbedding>,
    model_name: String,
    dimensions: usize,
}

impl ClipEmbedder {
    /// Load both towers of the named model.
    ///
    /// Models are downloaded on first use and cached in the `models/`
    /// subdirectory of `cache_dir`. Loading fails with
    /// [`EmbeddingError::InitFailed`] when it takes longer than
    /// `download_timeout`.
    pub fn new(
        model_name: &str,
        cache_dir: PathBuf,
        download_timeout: Option<Duration>,
    ) -> Result<Self, EmbeddingError> {
        let (text_model, image_model) = Self::parse_model_name(model_name)?;
        let timeout = download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT);

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        log::info!("loading embedding model '{}'", model_name);

        let (text, image, dimensions) = run_with_timeout(timeout, move || {
            let mut text = TextEmbedding::try_new(
                InitOptions::new(text_model)
                    .with_cache_dir(models_dir.clone())
                    .with_show_download_progress(true),
            )
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

            let image = ImageEmbedding::try_new(
                ImageInitOptions::new(image_model)
                    .with_cache_dir(models_dir)
                    .with_show_download_progress(true),
            )
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

            let dimensions = Self::probe_dimensions(&mut text)?;
            Ok((text, image, dimensions))
        })?;

        Ok(Self {
            text: Mutex::new(text),
            image: Mutex::new(image),
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    fn parse_model_name(
        name: &str,
    ) -> Result<(fastembed::EmbeddingModel, ImageEmbeddingModel), EmbeddingError> {
        match name.to_lowercase().as_str() {
            "clip-vit-b-32" | "clipvitb32" | "vit-b/32" => Ok((
                fastembed::EmbeddingModel::ClipVitB32,
                ImageEmbeddingModel::ClipVitB32,
            )),
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported models: clip-vit-b-32",
                name
            ))),
        }
    }

    fn probe_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
        let test_embeddings = model
            .embed(vec!["test"], None)
            .map_err(|e| EmbeddingError::InitFailed(format!("Failed to probe dimensions: {}", e)))?;

        test_embeddings
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))
    }
}

impl EmbeddingProvider for ClipEmbedder {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn encode_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyText);
        }

        let mut model = self.text.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        let embedding = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))?;

        normalize(embedding)
    }

    fn encode_image(&self, bytes: &[u8]) -> Result<Vec<f32>, EmbeddingError> {
        image::load_from_memory(bytes).map_err(|e| EmbeddingError::InvalidImage(e.to_string()))?;

        let mut model = self.image.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        let embedding = model
            .embed_bytes(&[bytes], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))?;

        normalize(embedding)
    }
}
