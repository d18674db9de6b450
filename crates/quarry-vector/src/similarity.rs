//! Cosine similarity helpers shared by the store and the clustering engine.

/// Cosine similarity in `[-1, 1]`.
///
/// Mismatched lengths and zero vectors score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a = norm(a);
    let mag_b = norm(b);

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    (dot / (mag_a * mag_b)).clamp(-1.0, 1.0)
}

pub fn norm(v: &[f32]) -> f64 {
    v.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt()
}

/// Unit-length copy of `v`. Zero vectors come back unchanged.
pub fn normalized(v: &[f32]) -> Vec<f32> {
    let n = norm(v);
    if n == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| ((*x as f64) / n) as f32).collect()
}

/// Normalized mean direction of `vectors`, or `None` when empty.
pub fn mean_direction<'a, I>(vectors: I) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut iter = vectors.into_iter();
    let first = iter.next()?;
    let mut sum: Vec<f64> = first.iter().map(|x| *x as f64).collect();
    for v in iter {
        for (s, x) in sum.iter_mut().zip(v) {
            *s += *x as f64;
        }
    }
    let n = sum.iter().map(|x| x * x).sum::<f64>().sqrt();
    if n == 0.0 {
        return Some(sum.into_iter().map(|x| x as f32).collect());
    }
    Some(sum.into_iter().map(|x| (x / n) as f32).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_vectors() {
        let v = vec![0.3, 0.4, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_orthogonal_and_opposite() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_inputs_score_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_normalized_has_unit_length() {
        let v = normalized(&[3.0, 4.0]);
        assert!((norm(&v) - 1.0).abs() < 1e-6);
        assert_eq!(normalized(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_mean_direction() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        let m = mean_direction([&a[..], &b[..]]).unwrap();
        assert!((m[0] - m[1]).abs() < 1e-6);
        assert!((norm(&m) - 1.0).abs() < 1e-6);
        assert!(mean_direction(std::iter::empty::<&[f32]>()).is_none());
    }
}
