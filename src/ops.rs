// ============================================================================
// SIMD-FRIENDLY VECTOR OPERATIONS
// Tight loops that auto-vectorize with opt-level=3 + LTO
// ============================================================================

#[inline]
pub fn vec_add_inplace(a: &mut [f32], b: &[f32]) {
    debug_assert_eq!(a.len(), b.len());
    for (x, y) in a.iter_mut().zip(b.iter()) { *x += y; }
}

#[inline]
pub fn vec_scale_inplace(a: &mut [f32], s: f32) {
    for x in a.iter_mut() { *x *= s; }
}

#[inline]
pub fn vec_max(a: &[f32]) -> f32 {
    a.iter().cloned().fold(f32::NEG_INFINITY, f32::max)
}

#[inline]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[inline]
pub fn all_finite(a: &[f32]) -> bool {
    a.iter().all(|x| x.is_finite())
}

/// Numerically stable softmax of `logits` into `out`.
pub fn softmax_into(logits: &[f32], out: &mut [f32]) {
    debug_assert_eq!(logits.len(), out.len());
    let mx = vec_max(logits);
    let mut sum = 0.0f32;
    for (o, &l) in out.iter_mut().zip(logits.iter()) {
        *o = (l - mx).exp();
        sum += *o;
    }
    vec_scale_inplace(out, 1.0 / sum);
}

/// Writes a one-hot encoding of `index` into `out`.
#[inline]
pub fn one_hot_into(index: usize, out: &mut [f32]) {
    out.iter_mut().for_each(|x| *x = 0.0);
    out[index] = 1.0;
}
