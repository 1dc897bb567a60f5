/// Euclidean norm, accumulated in f64.
pub fn norm(v: &[f32]) -> f64 {
    v.iter().map(|&x| f64::from(x) * f64::from(x)).sum::<f64>().sqrt()
}

/// Cosine similarity given precomputed norms. A zero-norm operand scores 0.
///
/// `-0.0` is folded into `0.0` so that equal scores compare equal under
/// `total_cmp`.
pub fn cosine(a: &[f32], a_norm: f64, b: &[f32], b_norm: f64) -> f32 {
    let denom = a_norm * b_norm;
    if denom <= f64::EPSILON {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(&x, &y)| f64::from(x) * f64::from(y)).sum();
    let score = (dot / denom).clamp(-1.0, 1.0) as f32;
    if score == 0.0 {
        0.0
    } else {
        score
    }
}

pub fn validate(v: &[f32]) -> Result<(), String> {
    if v.is_empty() {
        return Err("vector is empty".to_string());
    }
    if v.iter().any(|x| !x.is_finite()) {
        return Err("vector contains non-finite values".to_string());
    }
    Ok(())
}
