use anyhow::{Context, Result};
use homedir::my_home;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    config::Config,
    corpus::{ClassLabels, Corpus, VideoBounds},
    embeddings::{ClipEmbedder, EmbeddingProvider},
    engine::RankingEngine,
    query_log::QueryLogger,
    targets::TargetPlan,
};

/// Builds the engine and its dependencies from the configuration
pub struct AppFactory;

impl AppFactory {
    /// Get application paths, creating the base directory
    pub fn get_paths() -> Result<AppPaths> {
        let base_path = Self::get_base_path()?;

        std::fs::create_dir_all(&base_path)
            .context("Failed to create application base directory")?;

        Ok(AppPaths { base_path })
    }

    pub fn create_config(paths: &AppPaths) -> Result<Config> {
        Config::load_with(&paths.base_path)
            .with_context(|| format!("Failed to load config from {}", paths.base_path))
    }

    /// Load the embedding model; downloads it on first use.
    pub fn create_embedder(config: &Config, paths: &AppPaths) -> Result<Arc<ClipEmbedder>> {
        let embedder = ClipEmbedder::new(
            &config.model.name,
            PathBuf::from(&paths.base_path),
            Some(Duration::from_secs(config.model.download_timeout_secs)),
        )
        .context("Failed to load embedding model")?;

        Ok(Arc::new(embedder))
    }

    /// Load the corpus and wire up a ready-to-serve engine.
    pub fn create_engine(
        config: &Config,
        provider: Arc<dyn EmbeddingProvider>,
        logger: Arc<dyn QueryLogger>,
    ) -> Result<RankingEngine> {
        let corpus_dir = config.resolve(&config.corpus_dir);
        let corpus = Corpus::load(&corpus_dir, &provider.model_id_hash())
            .with_context(|| format!("Failed to load corpus from {}", corpus_dir.display()))?;

        if corpus.dimensions() != provider.dimensions() {
            anyhow::bail!(
                "Corpus has {} dimensions but model '{}' produces {}",
                corpus.dimensions(),
                provider.name(),
                provider.dimensions()
            );
        }

        let targets = TargetPlan::random(corpus.len(), config.targets.count, &mut rand::rng());
        log::info!("drew {} targets: {:?}", targets.len(), targets.as_slice());

        let mut engine = RankingEngine::new(Arc::new(corpus), provider, logger, config.engine_options())
            .with_targets(targets);

        if let Some(videos_end) = &config.videos_end {
            let path = config.resolve(videos_end);
            let videos = VideoBounds::load(&path)
                .with_context(|| format!("Failed to load video bounds from {}", path.display()))?;
            log::info!("loaded {} video boundaries", videos.video_count());
            engine = engine.with_videos(videos);
        }

        if let Some(labels) = &config.labels {
            let classification = config.resolve(&labels.classification);
            let nounlist = config.resolve(&labels.nounlist);
            let labels = ClassLabels::load(&classification, &nounlist).with_context(|| {
                format!(
                    "Failed to load class labels from {} and {}",
                    classification.display(),
                    nounlist.display()
                )
            })?;
            log::info!("loaded {} noun classes", labels.classes().len());
            engine = engine.with_labels(labels);
        }

        Ok(engine)
    }

    /// Get the base path for the application
    fn get_base_path() -> Result<String> {
        if let Ok(base_path) = std::env::var("GAS_BASE_PATH") {
            return Ok(base_path);
        }

        let home = my_home()
            .context("Could not determine home directory")?
            .context("Home directory path is empty")?;

        Ok(format!("{}/.local/share/gas", home.to_string_lossy()))
    }
}

/// Application paths structure
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_path: String,
}
