//! Radix-2 FFT Primitive
//!
//! Iterative Cooley-Tukey transform for power-of-two lengths, in place.
//! Both adaptive filters and the noise suppressor use it for every frame.
//!
//! ## Contract
//! - `data.len()` must be a power of two (1 is allowed and is a no-op).
//! - `fft` is unnormalized, `ifft` scales by `1/N`.
//! - No shared state: safe to call from any thread, any number of times.
//!
//! Twiddles are generated by recurrence in `f64` so that 4096-point frames
//! stay well inside `1e-4` relative round-trip error without a table.

use rustfft::num_complex::Complex;
use std::f64::consts::PI;

/// Forward transform, in place. `X[k] = Σ x[n]·e^{-j2πkn/N}`.
pub fn fft(data: &mut [Complex<f32>]) {
    let n = data.len();
    if n <= 1 {
        return;
    }
    debug_assert!(n.is_power_of_two(), "fft length must be a power of two");

    bit_reverse_permute(data);

    let mut len = 2;
    while len <= n {
        let ang = -2.0 * PI / len as f64;
        let (wl_im, wl_re) = ang.sin_cos();
        let half = len / 2;

        let mut start = 0;
        while start < n {
            // w = e^{-j2πk/len}
            let mut w_re = 1.0f64;
            let mut w_im = 0.0f64;
            for k in 0..half {
                let w = Complex::new(w_re as f32, w_im as f32);
                let u = data[start + k];
                let v = data[start + k + half] * w;
                data[start + k] = u + v;
                data[start + k + half] = u - v;

                let next_re = w_re * wl_re - w_im * wl_im;
                w_im = w_re * wl_im + w_im * wl_re;
                w_re = next_re;
            }
            start += len;
        }
        len <<= 1;
    }
}

/// Inverse transform, in place, normalized by `1/N`.
///
/// Implemented as conjugate → forward → conjugate → scale.
pub fn ifft(data: &mut [Complex<f32>]) {
    let n = data.len();
    if n == 0 {
        return;
    }

    for c in data.iter_mut() {
        *c = c.conj();
    }
    fft(data);

    let scale = 1.0 / n as f32;
    for c in data.iter_mut() {
        *c = c.conj() * scale;
    }
}

#[inline]
fn bit_reverse_permute(data: &mut [Complex<f32>]) {
    let n = data.len();
    let mut j = 0usize;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j ^= bit;
        if i < j {
            data.swap(i, j);
        }
    }
}
