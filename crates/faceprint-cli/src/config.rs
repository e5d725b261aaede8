use anyhow::{Context, Result};
use faceprint_core::{BlobParams, EncoderOptions};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default cosine distance at or below which two faces are the same person.
pub const DEFAULT_THRESHOLD: f32 = 0.6;

/// CLI configuration, loaded from TOML with `FACEPRINT_*` overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the recognition ONNX model.
    pub model_path: PathBuf,
    /// Cosine distance threshold for a positive match.
    pub threshold: f32,
    /// ONNX Runtime intra-op threads.
    pub intra_threads: usize,
    /// Expected embedding length, if the model should be checked.
    pub embedding_dim: Option<usize>,
    pub blob: BlobParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_path: faceprint_core::default_model_path(),
            threshold: DEFAULT_THRESHOLD,
            intra_threads: 2,
            embedding_dim: None,
            blob: BlobParams::default(),
        }
    }
}

impl Config {
    /// Load from `path` (or the default location) and apply environment overrides.
    ///
    /// A missing file at the default location is not an error; an explicit
    /// path that does not exist is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let p = default_config_path();
                if p.exists() {
                    Self::from_file(&p)?
                } else {
                    tracing::debug!(path = %p.display(), "no config file, using defaults");
                    Self::default()
                }
            }
        };
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config at {}", path.display()))?;
        let cfg = toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Ok(p) = std::env::var("FACEPRINT_MODEL_PATH") {
            self.model_path = PathBuf::from(p);
        }
        self.threshold = env_f32("FACEPRINT_THRESHOLD", self.threshold);
        self.intra_threads = env_usize("FACEPRINT_INTRA_THREADS", self.intra_threads);
    }

    pub fn encoder_options(&self) -> EncoderOptions {
        EncoderOptions {
            intra_threads: self.intra_threads,
            blob: self.blob.clone(),
            expected_dim: self.embedding_dim,
        }
    }
}

/// `FACEPRINT_CONFIG`, else `$XDG_CONFIG_HOME/faceprint/config.toml`.
pub fn default_config_path() -> PathBuf {
    if let Ok(p) = std::env::var("FACEPRINT_CONFIG") {
        return PathBuf::from(p);
    }
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        })
        .join("faceprint")
        .join("config.toml")
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
