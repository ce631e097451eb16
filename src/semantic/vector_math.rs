/// Compute L2 norm of a vector.
fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity between two vectors of the same length.
///
/// Returns `0.0` when either vector has zero magnitude. Vectors of different
/// lengths are compared over their common prefix; callers are expected to
/// check dimensions first.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot_product / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    #[test]
    fn test_identical_vectors() {
        let v = vec![0.3, -1.2, 4.0, 0.0, 2.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < EPS);
    }

    #[test]
    fn test_opposite_vectors() {
        let v = vec![0.3, -1.2, 4.0, 0.0, 2.5];
        let neg: Vec<f32> = v.iter().map(|x| -x).collect();
        assert!((cosine_similarity(&v, &neg) + 1.0).abs() < EPS);
    }

    #[test]
    fn test_orthogonal_vectors() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 3.0]).abs() < EPS);
    }

    #[test]
    fn test_zero_vector() {
        let zero = vec![0.0; 4];
        let other = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(cosine_similarity(&zero, &other), 0.0);
        assert_eq!(cosine_similarity(&other, &zero), 0.0);
        assert_eq!(cosine_similarity(&zero, &zero), 0.0);
    }

    #[test]
    fn test_symmetric() {
        let a = vec![0.9, 0.1, -0.4];
        let b = vec![0.2, 0.7, 0.5];
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
    }

    #[test]
    fn test_magnitude_independent() {
        let a = vec![1.0, 2.0, 3.0];
        let scaled: Vec<f32> = a.iter().map(|x| x * 10.0).collect();
        let b = vec![3.0, 2.0, 1.0];
        assert!((cosine_similarity(&a, &b) - cosine_similarity(&scaled, &b)).abs() < EPS);
    }
}
