//! faceprint-core — Face embedding extraction and comparison.
//!
//! Wraps an ArcFace-style ONNX network running on ONNX Runtime: builds the
//! input blob, optionally aligns the face to canonical keypoints, runs the
//! forward pass and scores embeddings by cosine distance.

pub mod alignment;
pub mod blob;
pub mod encoder;
pub mod types;

use std::path::PathBuf;

pub use blob::{blob_from_image, BlobError, BlobParams};
pub use encoder::{EncoderError, EncoderOptions, FaceEncoder};
pub use types::{Comparison, Embedding, Landmarks};

/// File name of the default recognition model inside the model directory.
pub const DEFAULT_MODEL_FILE: &str = "w600k_r50.onnx";

/// Directory holding ONNX models.
///
/// `FACEPRINT_MODEL_DIR` wins, then `$XDG_DATA_HOME/faceprint/models`, then
/// `~/.local/share/faceprint/models`.
pub fn default_model_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FACEPRINT_MODEL_DIR") {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("faceprint")
        .join("models")
}

/// Default path of the recognition model.
pub fn default_model_path() -> PathBuf {
    default_model_dir().join(DEFAULT_MODEL_FILE)
}
