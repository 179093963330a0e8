//! Embedding computation
//!
//! Deterministic feature-hashed bag-of-words vectors. The cluster stage
//! only relies on the contract (fixed dimension, unit norm, similar texts
//! land close), so a deployment with a real embedding model swaps the
//! version tag and the function.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Fixed embedding dimension.
pub const EMBEDDING_DIM: usize = 256;

/// Version tag stamped onto upserted vectors.
pub const EMBEDDING_VERSION: &str = "hashed-bow-v1";

fn bucket(token: &str) -> (usize, f32) {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    let h = hasher.finish();
    // Low bits pick the bucket, one spare bit picks the sign
    let index = (h % EMBEDDING_DIM as u64) as usize;
    let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
    (index, sign)
}

/// Embed normalised text into a unit vector. Returns the zero vector for
/// empty input.
pub fn embed(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; EMBEDDING_DIM];

    for token in text.split_whitespace() {
        let token = token.trim_matches(|c: char| !c.is_alphanumeric());
        if token.len() < 2 {
            continue;
        }
        let (index, sign) = bucket(token);
        vector[index] += sign;
    }

    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_common::vector::cosine_similarity;

    #[test]
    fn test_embedding_is_deterministic() {
        assert_eq!(embed("slow checkout page"), embed("slow checkout page"));
    }

    #[test]
    fn test_embedding_is_unit_norm() {
        let v = embed("the app crashes on startup");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let v = embed("");
        assert!(v.iter().all(|x| *x == 0.0));
        assert_eq!(v.len(), EMBEDDING_DIM);
    }

    #[test]
    fn test_similar_texts_are_closer_than_unrelated() {
        let a = embed("checkout page is slow and broken");
        let b = embed("the checkout page loads slow");
        let c = embed("delivery courier arrived early yesterday");

        let sim_ab = cosine_similarity(&a, &b);
        let sim_ac = cosine_similarity(&a, &c);
        assert!(sim_ab > sim_ac);
    }
}
