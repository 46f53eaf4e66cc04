// ── Embedding column helpers ───────────────────────────────────────────
//
// Embeddings live in the `embedding` BLOB column as little-endian f32 and
// are unit-norm everywhere past the client boundary: the embedding client
// refuses to hand out anything else, and the write pipeline re-checks the
// norm before a row lands. That invariant is what lets similarity be a
// plain inner product here instead of a full cosine.

/// Decode an `embedding` column BLOB back into its vector.
/// Trailing bytes that do not fill a whole f32 are ignored.
pub(crate) fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    let mut vec = Vec::with_capacity(blob.len() / 4);
    for chunk in blob.chunks_exact(4) {
        vec.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    vec
}

/// Encode an embedding for the BLOB column (little-endian f32).
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Similarity between two unit-norm embeddings: the inner product, clamped
/// against f32 rounding drift. A dimension mismatch (a row embedded under
/// a different model) scores 0.0 rather than comparing garbage.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| *x as f64 * *y as f64)
        .sum();
    dot.clamp(-1.0, 1.0)
}

/// Scale a fresh model vector to unit norm. Returns None when there is no
/// magnitude to normalize (an all-zero or empty embedder response); the
/// caller turns that into an embedding error before anything is stored.
pub fn normalize_embedding(mut vec: Vec<f32>) -> Option<Vec<f32>> {
    let norm = l2_norm(&vec);
    if norm <= 1e-8 {
        return None;
    }
    let inv = (1.0 / norm) as f32;
    for x in vec.iter_mut() {
        *x *= inv;
    }
    Some(vec)
}

/// Euclidean norm, used to enforce the unit-embedding invariant on writes.
pub fn l2_norm(vec: &[f32]) -> f64 {
    vec.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Unit vector at a known angle in the xy plane.
    fn unit_at(cos: f32) -> Vec<f32> {
        vec![cos, (1.0 - cos * cos).sqrt(), 0.0]
    }

    #[test]
    fn inner_product_of_unit_vectors_is_cosine() {
        let axis = vec![1.0f32, 0.0, 0.0];
        for expected in [0.9f32, 0.5, 0.0, -0.7] {
            let sim = cosine_similarity(&axis, &unit_at(expected));
            assert!(
                (sim - expected as f64).abs() < 1e-6,
                "expected {expected}, got {sim}"
            );
        }
    }

    #[test]
    fn rounding_drift_is_clamped() {
        // A vector a hair over unit length must not score above 1.0.
        let slightly_long = vec![1.0000001f32, 0.0, 0.0];
        let sim = cosine_similarity(&slightly_long, &slightly_long);
        assert!(sim <= 1.0);
        assert!(sim > 0.999);
    }

    #[test]
    fn dimension_mismatch_scores_zero() {
        // A row embedded under a 2-dim model never matches a 3-dim query.
        let query = vec![1.0f32, 0.0, 0.0];
        let stale_row = vec![1.0f32, 0.0];
        assert_eq!(cosine_similarity(&query, &stale_row), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn blob_roundtrip_preserves_embedding() {
        let original = unit_at(0.6);
        let blob = embedding_to_blob(&original);
        assert_eq!(blob.len(), original.len() * 4);
        assert_eq!(blob_to_embedding(&blob), original);
    }

    #[test]
    fn truncated_blob_drops_partial_floats() {
        let mut blob = embedding_to_blob(&[1.0f32, 2.0]);
        blob.pop(); // corrupt the trailing float
        assert_eq!(blob_to_embedding(&blob), vec![1.0f32]);
    }

    #[test]
    fn normalize_yields_unit_norm() {
        let vec = normalize_embedding(vec![3.0f32, 4.0]).unwrap();
        assert!((l2_norm(&vec) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&vec, &[0.6, 0.8]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_and_empty_vectors_are_rejected() {
        assert!(normalize_embedding(vec![0.0f32, 0.0, 0.0]).is_none());
        assert!(normalize_embedding(Vec::new()).is_none());
    }
}
