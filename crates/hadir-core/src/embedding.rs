use serde::{Deserialize, Serialize};

/// Face embedding vector.
///
/// Serializes as a bare JSON array so roster snapshots stay a plain
/// sequence of `{name, embedding}` records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. Defined as 0.0
    /// when either vector has zero norm, so it never divides by zero.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }

    /// Element-wise mean of a set of embeddings, used when building a
    /// reference embedding from several enrollment samples.
    ///
    /// Returns `None` for an empty set or mismatched dimensions.
    pub fn mean(samples: &[Embedding]) -> Option<Embedding> {
        let first = samples.first()?;
        let dim = first.values.len();
        if dim == 0 || samples.iter().any(|s| s.values.len() != dim) {
            return None;
        }

        let mut acc = vec![0.0f32; dim];
        for sample in samples {
            for (slot, v) in acc.iter_mut().zip(sample.values.iter()) {
                *slot += v;
            }
        }
        let n = samples.len() as f32;
        for slot in acc.iter_mut() {
            *slot /= n;
        }
        Some(Embedding::new(acc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_identical() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_orthogonal() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_opposite() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![-1.0, 0.0]);
        assert!((a.similarity(&b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_zero_vector() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
        assert_eq!(b.similarity(&a), 0.0);
    }

    #[test]
    fn test_similarity_symmetric() {
        let a = Embedding::new(vec![0.3, -0.7, 0.2]);
        let b = Embedding::new(vec![0.9, 0.1, -0.4]);
        assert_eq!(a.similarity(&b), b.similarity(&a));
    }

    #[test]
    fn test_similarity_bounded_for_normalized_inputs() {
        let a = Embedding::new(vec![0.6, 0.8]);
        let b = Embedding::new(vec![-0.8, 0.6]);
        let sim = a.similarity(&b);
        assert!((-1.0..=1.0).contains(&sim));
    }

    #[test]
    fn test_mean_averages_elementwise() {
        let samples = vec![
            Embedding::new(vec![1.0, 0.0]),
            Embedding::new(vec![3.0, 2.0]),
        ];
        let mean = Embedding::mean(&samples).unwrap();
        assert_eq!(mean.values, vec![2.0, 1.0]);
    }

    #[test]
    fn test_mean_rejects_empty_and_mismatched() {
        assert!(Embedding::mean(&[]).is_none());
        let samples = vec![
            Embedding::new(vec![1.0, 0.0]),
            Embedding::new(vec![1.0, 0.0, 0.0]),
        ];
        assert!(Embedding::mean(&samples).is_none());
    }

    #[test]
    fn test_serializes_as_bare_array() {
        let e = Embedding::new(vec![1.0, 2.0]);
        assert_eq!(serde_json::to_string(&e).unwrap(), "[1.0,2.0]");
    }
}
