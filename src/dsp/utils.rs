use std::f32::consts::PI;

/// Floor for spectral magnitudes so gain ratios never divide by zero.
pub const MAG_FLOOR: f32 = 1e-9;

/// Additive epsilon for energy ratios (ERLE, coherence).
pub const ENERGY_EPS: f32 = 1e-9;

/// Periodic sqrt-Hann window. Used for both analysis and synthesis, so the
/// squared window sums to 1 at 50% overlap and overlap-add needs no extra
/// normalization.
pub fn make_sqrt_hann_window(len: usize) -> Vec<f32> {
    if len == 0 {
        return Vec::new();
    }
    (0..len)
        .map(|i| {
            let hann = 0.5 - 0.5 * (2.0 * PI * i as f32 / len as f32).cos();
            hann.max(0.0).sqrt()
        })
        .collect()
}

/// `10·log10(ratio)`, with the ratio clamped away from zero.
#[inline]
pub fn power_ratio_db(num: f32, den: f32) -> f32 {
    10.0 * (num / (den + ENERGY_EPS) + ENERGY_EPS).log10()
}

#[inline]
pub fn frame_energy(x: &[f32]) -> f32 {
    let mut s = 0.0f32;
    for &v in x {
        s += v * v;
    }
    s
}

/// Next power of two `>= n`, at least 1.
pub fn next_pow2(n: usize) -> usize {
    n.max(1).next_power_of_two()
}
