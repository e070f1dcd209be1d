use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::{
    embeddings::DEFAULT_MODEL,
    engine::{EngineOptions, FeedbackParams, FusionPolicy, TemporalOptions, DEFAULT_SHOWING},
    storage::{self, StorageManager},
};

pub const CONFIG_FILE: &str = "config.yaml";

/// Default number of images each session is asked to find
const DEFAULT_TARGET_COUNT: usize = 5;
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const DEFAULT_BIND: &str = "0.0.0.0:8080";
/// Upper bound of `temporal.window`, in keyframes
const MAX_TEMPORAL_WINDOW: usize = 1000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Embedding model name (e.g., "clip-vit-b-32")
    #[serde(default = "default_model")]
    pub name: String,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetsConfig {
    /// How many random targets are drawn at start-up
    #[serde(default = "default_target_count")]
    pub count: usize,
}

impl Default for TargetsConfig {
    fn default() -> Self {
        Self {
            count: DEFAULT_TARGET_COUNT,
        }
    }
}

fn default_target_count() -> usize {
    DEFAULT_TARGET_COUNT
}

/// Files of the offline noun classification, relative to the base path
/// unless absolute
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabelsConfig {
    /// `id;top` table of class indices per item
    #[serde(default = "default_classification")]
    pub classification: String,

    /// One `name : frequency` line per class
    #[serde(default = "default_nounlist")]
    pub nounlist: String,
}

impl Default for LabelsConfig {
    fn default() -> Self {
        Self {
            classification: default_classification(),
            nounlist: default_nounlist(),
        }
    }
}

fn default_classification() -> String {
    "result.csv".to_string()
}

fn default_nounlist() -> String {
    "nounlist.txt".to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Items returned per search
    #[serde(default = "default_showing")]
    pub showing: usize,

    /// How consecutive text queries are combined
    #[serde(default)]
    pub fusion: FusionPolicy,

    /// Feedback likelihood temperature
    #[serde(default = "default_alpha")]
    pub alpha: f32,

    /// Feedback prior exponent
    #[serde(default = "default_beta")]
    pub beta: f32,

    #[serde(default)]
    pub temporal: TemporalOptions,

    #[serde(default)]
    pub targets: TargetsConfig,

    #[serde(default)]
    pub model: ModelConfig,

    /// Directory of `*.vec` files, relative to the base path unless absolute
    #[serde(default = "default_corpus_dir")]
    pub corpus_dir: String,

    /// Optional file of video end positions, one per line
    #[serde(default)]
    pub videos_end: Option<String>,

    /// Noun-class labels shown with every result screen
    #[serde(default)]
    pub labels: Option<LabelsConfig>,

    /// Directory for the query logs
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            showing: DEFAULT_SHOWING,
            fusion: FusionPolicy::default(),
            alpha: default_alpha(),
            beta: default_beta(),
            temporal: TemporalOptions::default(),
            targets: TargetsConfig::default(),
            model: ModelConfig::default(),
            corpus_dir: default_corpus_dir(),
            videos_end: None,
            labels: None,
            log_dir: default_log_dir(),
            bind: default_bind(),
            base_path: String::new(),
        }
    }
}

fn default_showing() -> usize {
    DEFAULT_SHOWING
}

fn default_alpha() -> f32 {
    FeedbackParams::default().alpha
}

fn default_beta() -> f32 {
    FeedbackParams::default().beta
}

fn default_corpus_dir() -> String {
    "corpus".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        if self.showing == 0 {
            bail!("showing must be greater than 0");
        }

        if !(self.alpha.is_finite() && self.alpha > 0.0) {
            bail!("alpha must be a positive number, got {}", self.alpha);
        }

        if !self.beta.is_finite() {
            bail!("beta must be a finite number, got {}", self.beta);
        }

        if self.temporal.window == 0 {
            bail!("temporal.window must be greater than 0");
        }

        if self.temporal.window > MAX_TEMPORAL_WINDOW {
            bail!(
                "temporal.window must be at most {MAX_TEMPORAL_WINDOW}, got {}",
                self.temporal.window
            );
        }

        if self.model.download_timeout_secs == 0 {
            bail!("model.download_timeout_secs must be greater than 0");
        }

        if self.bind.parse::<std::net::SocketAddr>().is_err() {
            bail!("bind must be an address like {DEFAULT_BIND}, got '{}'", self.bind);
        }

        Ok(())
    }

    pub fn load_with(base_path: &str) -> anyhow::Result<Self> {
        let store = storage::BackendLocal::new(base_path)?;

        // create new if does not exist
        if !store.exists(CONFIG_FILE) {
            store.write(
                CONFIG_FILE,
                serde_yml::to_string(&Self::default())?.as_bytes(),
            )?;
        }

        let config_str = String::from_utf8(store.read(CONFIG_FILE)?)
            .context("config file is not valid utf8")?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_string();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let store = storage::BackendLocal::new(&self.base_path)?;

        let config_str = serde_yml::to_string(&self)?;
        store.write(CONFIG_FILE, config_str.as_bytes())?;
        Ok(())
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            showing: self.showing,
            fusion: self.fusion,
            feedback: FeedbackParams {
                alpha: self.alpha,
                beta: self.beta,
            },
            temporal: self.temporal,
        }
    }

    /// `path` relative to the base path, unless it is absolute.
    pub fn resolve(&self, path: &str) -> std::path::PathBuf {
        let path = std::path::Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::path::Path::new(&self.base_path).join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_default_config() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().to_str().unwrap();

        let config = Config::load_with(base).unwrap();

        assert!(tmp.path().join(CONFIG_FILE).exists());
        assert_eq!(config.showing, 60);
        assert_eq!(config.fusion, FusionPolicy::Sum);
        assert_eq!(config.targets.count, 5);
        assert_eq!(config.model.name, DEFAULT_MODEL);
    }

    #[test]
    fn test_missing_fields_get_defaults_and_are_saved() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "showing: 12\nfusion: min\n").unwrap();

        let config = Config::load_with(tmp.path().to_str().unwrap()).unwrap();
        assert_eq!(config.showing, 12);
        assert_eq!(config.fusion, FusionPolicy::Min);
        assert_eq!(config.temporal, TemporalOptions::default());

        let saved = std::fs::read_to_string(tmp.path().join(CONFIG_FILE)).unwrap();
        assert!(saved.contains("log_dir"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "alpha: 0.0\n").unwrap();

        let err = Config::load_with(tmp.path().to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("alpha"));
    }

    #[test]
    fn test_huge_temporal_window_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            "temporal:\n  window: 18446744073709551615\n",
        )
        .unwrap();

        let err = Config::load_with(tmp.path().to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("temporal.window"));
    }

    #[test]
    fn test_labels_section_gets_default_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "labels: {}\n").unwrap();

        let config = Config::load_with(tmp.path().to_str().unwrap()).unwrap();
        let labels = config.labels.unwrap();
        assert_eq!(labels.classification, "result.csv");
        assert_eq!(labels.nounlist, "nounlist.txt");
        assert_eq!(Config::default().labels, None);
    }

    #[test]
    fn test_unknown_fusion_policy_is_malformed() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "fusion: average\n").unwrap();

        assert!(Config::load_with(tmp.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_resolve_relative_to_base() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load_with(tmp.path().to_str().unwrap()).unwrap();

        assert_eq!(config.resolve("corpus"), tmp.path().join("corpus"));
        assert_eq!(
            config.resolve("/data/corpus"),
            std::path::PathBuf::from("/data/corpus")
        );
    }

    #[test]
    fn test_engine_options() {
        let config = Config {
            alpha: 0.2,
            ..Default::default()
        };
        let options = config.engine_options();
        assert_eq!(options.feedback.alpha, 0.2);
        assert_eq!(options.showing, config.showing);
    }
}
