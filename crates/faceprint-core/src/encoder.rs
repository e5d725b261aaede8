//! Face encoder via ONNX Runtime.
//!
//! Loads an ArcFace/SFace-style embedding network, turns images into its
//! 112×112 NCHW input, runs the forward pass over the model's output layers
//! and compares the resulting embeddings by cosine distance.

use crate::alignment;
use crate::blob::{self, BlobError, BlobParams};
use crate::types::{Comparison, Embedding, Landmarks};
use image::DynamicImage;
use ndarray::{Array4, ArrayView2};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_INTRA_THREADS: usize = 2;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("model exposes no output layers: {0}")]
    NoOutputs(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("embedding dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("preprocess: {0}")]
    Blob(#[from] BlobError),
    #[error("tensor shape: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Session and preprocessing options for [`FaceEncoder`].
#[derive(Debug, Clone)]
pub struct EncoderOptions {
    /// ONNX Runtime intra-op thread count.
    pub intra_threads: usize,
    pub blob: BlobParams,
    /// Reject outputs whose length differs from this.
    pub expected_dim: Option<usize>,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            intra_threads: DEFAULT_INTRA_THREADS,
            blob: BlobParams::default(),
            expected_dim: None,
        }
    }
}

/// Embedding network bound to one ONNX session.
pub struct FaceEncoder {
    session: Session,
    model_path: PathBuf,
    model_version: Option<String>,
    /// Outputs requested from every forward pass; the first one is the embedding.
    layer_names: Vec<String>,
    keypoints: Landmarks,
    options: EncoderOptions,
}

impl FaceEncoder {
    /// Load the ONNX model from `model_path` and prepare it for CPU inference.
    pub fn load(model_path: impl AsRef<Path>, options: &EncoderOptions) -> Result<Self, EncoderError> {
        let model_path = model_path.as_ref();
        let session = build_session(model_path, options)?;
        let layer_names = output_layer_names(&session, model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?layer_names,
            "loaded encoder model"
        );

        Ok(Self {
            session,
            model_path: model_path.to_path_buf(),
            model_version: model_version(model_path),
            layer_names,
            keypoints: alignment::canonical_keypoints_in(options.blob.width, options.blob.height),
            options: options.clone(),
        })
    }

    /// Swap in a different model file, keeping the current options.
    ///
    /// On failure the encoder keeps serving the previous model.
    pub fn reload(&mut self, model_path: impl AsRef<Path>) -> Result<(), EncoderError> {
        let model_path = model_path.as_ref();
        let session = build_session(model_path, &self.options)?;
        let layer_names = output_layer_names(&session, model_path)?;

        tracing::info!(
            from = %self.model_path.display(),
            to = %model_path.display(),
            outputs = ?layer_names,
            "reloaded encoder model"
        );

        self.session = session;
        self.layer_names = layer_names;
        self.model_path = model_path.to_path_buf();
        self.model_version = model_version(model_path);
        Ok(())
    }

    /// Build the network input tensor for `img`.
    pub fn preprocess(&self, img: &DynamicImage) -> Result<Array4<f32>, EncoderError> {
        Ok(blob::blob_from_image(img, &self.options.blob)?)
    }

    /// Run the forward pass on `img` and return its embedding.
    ///
    /// The image is expected to already be a face crop; use
    /// [`predict_aligned`](Self::predict_aligned) when landmarks are known.
    pub fn predict(&mut self, img: &DynamicImage) -> Result<Embedding, EncoderError> {
        let input = self.preprocess(img)?;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let first = &self.layer_names[0];
        let (_, output) = outputs
            .iter()
            .find(|(name, _)| *name == first.as_str())
            .ok_or_else(|| EncoderError::InferenceFailed(format!("output `{first}` missing")))?;

        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| EncoderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let values = embedding_from_output(&shape[..], data, self.options.expected_dim)?;

        tracing::debug!(dim = values.len(), shape = ?&shape[..], "encoded face");

        Ok(Embedding {
            values,
            model_version: self.model_version.clone(),
        })
    }

    /// Align the face to the canonical keypoints at the blob's input size,
    /// then encode it.
    pub fn predict_aligned(
        &mut self,
        img: &DynamicImage,
        landmarks: &Landmarks,
    ) -> Result<Embedding, EncoderError> {
        if !alignment::landmarks_within(img, landmarks) {
            tracing::warn!(?landmarks, "landmarks fall outside the image; aligned crop will be padded");
        }
        let (width, height) = (self.options.blob.width, self.options.blob.height);
        let aligned = alignment::align_face_to(img, landmarks, width, height);
        self.predict(&DynamicImage::ImageRgb8(aligned))
    }

    /// Cosine distance between two embeddings, in [0, 2].
    pub fn compare(a: &Embedding, b: &Embedding) -> Result<f32, EncoderError> {
        if a.dim() != b.dim() {
            return Err(EncoderError::DimensionMismatch {
                left: a.dim(),
                right: b.dim(),
            });
        }
        let distance = a.cosine_distance(b);
        tracing::debug!(cos_dist = distance, "compared embeddings");
        Ok(distance)
    }

    /// Compare and decide: the faces match when the distance is at most `threshold`.
    pub fn verify(a: &Embedding, b: &Embedding, threshold: f32) -> Result<Comparison, EncoderError> {
        let distance = Self::compare(a, b)?;
        Ok(Comparison {
            distance,
            similarity: 1.0 - distance,
            threshold,
            same: distance <= threshold,
        })
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn input_names(&self) -> Vec<String> {
        self.session.inputs().iter().map(|i| i.name().to_string()).collect()
    }

    pub fn output_names(&self) -> &[String] {
        &self.layer_names
    }

    /// Canonical keypoints in the encoder's input space.
    pub fn keypoints(&self) -> &Landmarks {
        &self.keypoints
    }

    pub fn blob_params(&self) -> &BlobParams {
        &self.options.blob
    }
}

fn build_session(model_path: &Path, options: &EncoderOptions) -> Result<Session, EncoderError> {
    if !model_path.exists() {
        return Err(EncoderError::ModelNotFound(model_path.display().to_string()));
    }

    Ok(Session::builder()?
        .with_intra_threads(options.intra_threads.max(1))?
        .commit_from_file(model_path)?)
}

/// Names of the graph outputs nothing else consumes, i.e. every model output.
fn output_layer_names(session: &Session, model_path: &Path) -> Result<Vec<String>, EncoderError> {
    let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
    if names.is_empty() {
        return Err(EncoderError::NoOutputs(model_path.display().to_string()));
    }
    Ok(names)
}

/// Turn the first output tensor into an embedding vector.
///
/// The output is (batch, dim); the embedding is the first column of its
/// transpose, i.e. the first row. Rank 0/1 outputs are a single row.
fn embedding_from_output(
    shape: &[i64],
    data: &[f32],
    expected_dim: Option<usize>,
) -> Result<Vec<f32>, EncoderError> {
    if data.is_empty() {
        return Err(EncoderError::InferenceFailed("empty output tensor".into()));
    }

    let rows = match shape.len() {
        0 | 1 => 1,
        _ => shape[0].max(1) as usize,
    };
    let matrix = ArrayView2::from_shape((rows, data.len() / rows), data)?;
    let values: Vec<f32> = matrix.t().column(0).to_vec();

    if let Some(expected) = expected_dim {
        if values.len() != expected {
            return Err(EncoderError::InferenceFailed(format!(
                "expected {expected}-dim embedding, got {}",
                values.len()
            )));
        }
    }

    Ok(values)
}

fn model_version(model_path: &Path) -> Option<String> {
    model_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_model() {
        let err = FaceEncoder::load("/nonexistent/w600k_r50.onnx", &EncoderOptions::default())
            .err()
            .expect("load should fail");
        assert!(matches!(err, EncoderError::ModelNotFound(p) if p.contains("w600k_r50")));
    }

    #[test]
    fn test_model_version_from_stem() {
        assert_eq!(
            model_version(Path::new("/models/w600k_r50.onnx")).as_deref(),
            Some("w600k_r50")
        );
    }

    #[test]
    fn test_output_single_row() {
        let data: Vec<f32> = (0..512).map(|i| i as f32).collect();
        let values = embedding_from_output(&[1, 512], &data, Some(512)).unwrap();
        assert_eq!(values, data);
    }

    #[test]
    fn test_output_batch_takes_first_row() {
        let data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let values = embedding_from_output(&[2, 4], &data, None).unwrap();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_output_rank_one() {
        let data = vec![0.5f32; 512];
        let values = embedding_from_output(&[512], &data, None).unwrap();
        assert_eq!(values.len(), 512);
    }

    #[test]
    fn test_output_higher_rank_flattens_trailing_dims() {
        let data = [1.0, 2.0, 3.0, 4.0];
        let values = embedding_from_output(&[1, 4, 1, 1], &data, None).unwrap();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_output_empty_is_inference_failure() {
        let err = embedding_from_output(&[1, 0], &[], None).unwrap_err();
        assert!(matches!(err, EncoderError::InferenceFailed(msg) if msg.contains("empty")));
    }

    #[test]
    fn test_output_expected_dim_mismatch() {
        let data = vec![0.1f32; 128];
        let err = embedding_from_output(&[1, 128], &data, Some(512)).unwrap_err();
        assert!(matches!(err, EncoderError::InferenceFailed(msg) if msg.contains("512")));
    }

    #[test]
    fn test_output_shape_not_divisible() {
        let data = [1.0, 2.0, 3.0];
        let err = embedding_from_output(&[2, 2], &data, None).unwrap_err();
        assert!(matches!(err, EncoderError::Shape(_)));
    }

    #[test]
    fn test_compare_dimension_mismatch() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        let err = FaceEncoder::compare(&a, &b).unwrap_err();
        assert!(matches!(err, EncoderError::DimensionMismatch { left: 2, right: 3 }));
    }

    #[test]
    fn test_compare_identical() {
        let a = Embedding::new(vec![0.2, 0.4, -0.1]);
        let d = FaceEncoder::compare(&a, &a).unwrap();
        assert!(d.abs() < 1e-6);
    }

    #[test]
    fn test_verify_threshold() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![1.0, 1.0]);
        // cos = 1/sqrt(2), distance ≈ 0.293
        let close = FaceEncoder::verify(&a, &b, 0.3).unwrap();
        assert!(close.same);
        assert!((close.similarity - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-5);

        let strict = FaceEncoder::verify(&a, &b, 0.2).unwrap();
        assert!(!strict.same);
        assert_eq!(strict.threshold, 0.2);
    }

    #[test]
    fn test_keypoints_follow_blob_size() {
        // Loading needs a model, so check the keypoint table the encoder stores.
        let blob = BlobParams {
            width: 96,
            height: 112,
            ..Default::default()
        };
        let k = alignment::canonical_keypoints_in(blob.width, blob.height);
        assert!(k.iter().all(|&(x, y)| x < 96.0 && y < 112.0));
    }

    #[test]
    fn test_default_options() {
        let opts = EncoderOptions::default();
        assert_eq!(opts.intra_threads, 2);
        assert_eq!(opts.blob, BlobParams::default());
        assert!(opts.expected_dim.is_none());
    }
}
