use serde::{Deserialize, Serialize};

/// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
pub type Landmarks = [(f32, f32); 5];

/// Face embedding vector produced by the encoder's forward pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model that produced this embedding (file stem, e.g. "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Number of dimensions.
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// L2 norm of the vector.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. A zero vector on
    /// either side yields 0.0. Always processes every dimension of both
    /// vectors: when the lengths differ the shorter one is treated as
    /// zero-padded, so extra dimensions lower the score instead of being
    /// dropped.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.padded_pairs(other) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            (dot / denom).clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }

    /// Cosine distance, `1 - similarity`, in [0, 2]. Lower = more similar.
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        1.0 - self.similarity(other)
    }

    /// Compute Euclidean distance between two embeddings, zero-padding the
    /// shorter one.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.padded_pairs(other)
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Pairs of components over the longer of the two vectors, with 0.0 past
    /// the end of the shorter one.
    fn padded_pairs<'a>(&'a self, other: &'a Embedding) -> impl Iterator<Item = (f32, f32)> + 'a {
        let len = self.dim().max(other.dim());
        (0..len).map(move |i| {
            (
                self.values.get(i).copied().unwrap_or(0.0),
                other.values.get(i).copied().unwrap_or(0.0),
            )
        })
    }
}

/// Outcome of comparing two embeddings against a distance threshold.
#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    /// Cosine distance [0, 2].
    pub distance: f32,
    /// Cosine similarity [-1, 1].
    pub similarity: f32,
    pub threshold: f32,
    /// `distance <= threshold`.
    pub same: bool,
}
