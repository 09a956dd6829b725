//! Partitioned-Block Frequency-Domain Adaptive Filter
//!
//! Long echo paths are split into `P` partitions of `M` taps. Each partition
//! is a frequency-domain weight vector of `N = 2M` bins, convolved with the
//! reference spectrum from `p` blocks ago using overlap-save.
//!
//! ## Per block
//! 1. Frame the reference as `[previous block, current block]`, FFT, store
//!    as the newest slot of the spectrum history (oldest slot is dropped).
//! 2. Smooth the normalization PSD (summed over partitions) and the
//!    auto/cross PSDs used for the coherence diagnostic.
//! 3. `Y = Σ X[p]·W[p]`, IFFT, second half is the echo estimate.
//! 4. (caller) residual `e = mic − y`, DTD, freeze decision.
//! 5. If adapting: `E = FFT([0, e])`,
//!    `W[p] += mu·E·conj(X[p]) / (PSD + eps)`, then constrain one
//!    partition round-robin (IFFT, zero `[M, N)`, FFT).
//!
//! The spectrum history is an index ring: slot `newest` is logical
//! partition 0 and logical `p` lives at `(newest + p) % P`. No spectra move.

use crate::dsp::fft::{fft, ifft};
use rustfft::num_complex::Complex;

// =============================================================================
// Constants
// =============================================================================

// EMA for every per-bin PSD
const PSD_SMOOTHING: f32 = 0.95;

// Normalization PSD starts high so the first blocks take small steps
const PSD_INIT: f32 = 100.0;

// Auto PSD floor for the coherence estimate
const AUTO_PSD_INIT: f32 = 1e-9;

// Coherence denominator epsilon
const COHERENCE_EPS: f32 = 1e-9;

// =============================================================================
// Partitioned Filter
// =============================================================================

pub struct PartitionedFilter {
    block_size: usize,
    fft_size: usize,
    partitions: usize,

    // Input spectrum ring (physical slots)
    spectra: Vec<Vec<Complex<f32>>>,
    newest: usize,

    // Weights, logical partition order
    weights: Vec<Vec<Complex<f32>>>,

    psd: Vec<f32>,
    psd_mic: Vec<f32>,
    psd_ref: Vec<f32>,
    psd_cross: Vec<Complex<f32>>,
    coherence: f32,

    // Previous halves of the overlap-save frames
    prev_ref: Vec<f32>,
    prev_mic: Vec<f32>,

    // Scratch
    scratch: Vec<Complex<f32>>,
    mic_spectrum: Vec<Complex<f32>>,
    error_spectrum: Vec<Complex<f32>>,

    constraint_idx: usize,
}

impl PartitionedFilter {
    pub fn new(block_size: usize, partitions: usize) -> Self {
        let block_size = block_size.max(1);
        let partitions = partitions.max(1);
        let fft_size = block_size * 2;
        let zero = Complex::new(0.0f32, 0.0);

        Self {
            block_size,
            fft_size,
            partitions,

            spectra: vec![vec![zero; fft_size]; partitions],
            newest: 0,

            weights: vec![vec![zero; fft_size]; partitions],

            psd: vec![PSD_INIT; fft_size],
            psd_mic: vec![AUTO_PSD_INIT; fft_size],
            psd_ref: vec![AUTO_PSD_INIT; fft_size],
            psd_cross: vec![zero; fft_size],
            coherence: 0.0,

            prev_ref: vec![0.0; block_size],
            prev_mic: vec![0.0; block_size],

            scratch: vec![zero; fft_size],
            mic_spectrum: vec![zero; fft_size],
            error_spectrum: vec![zero; fft_size],

            constraint_idx: 0,
        }
    }

    /// Back to the freshly constructed state.
    pub fn reset(&mut self) {
        let zero = Complex::new(0.0f32, 0.0);
        for w in &mut self.weights {
            w.fill(zero);
        }
        self.psd.fill(PSD_INIT);
        self.psd_mic.fill(AUTO_PSD_INIT);
        self.psd_ref.fill(AUTO_PSD_INIT);
        self.psd_cross.fill(zero);
        self.coherence = 0.0;
        self.constraint_idx = 0;
        self.clear_history();
    }

    /// Drop the reference history (spectra and previous frame halves) but
    /// keep the learned weights. Used when the bulk delay jumps.
    pub fn clear_history(&mut self) {
        let zero = Complex::new(0.0f32, 0.0);
        for s in &mut self.spectra {
            s.fill(zero);
        }
        self.newest = 0;
        self.prev_ref.fill(0.0);
        self.prev_mic.fill(0.0);
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    #[inline]
    pub fn partitions(&self) -> usize {
        self.partitions
    }

    #[inline]
    pub fn coherence(&self) -> f32 {
        self.coherence
    }

    /// Input spectrum of logical partition `p` (0 = newest).
    pub fn spectrum(&self, p: usize) -> &[Complex<f32>] {
        &self.spectra[self.slot(p)]
    }

    pub fn weights(&self, p: usize) -> &[Complex<f32>] {
        &self.weights[p]
    }

    /// Normalization PSD per bin.
    pub fn psd(&self) -> &[f32] {
        &self.psd
    }

    /// Time-domain view of one partition's weights (length `fft_size`).
    /// Allocates; diagnostics only.
    pub fn impulse_response(&self, p: usize) -> Vec<f32> {
        let mut buf = self.weights[p].clone();
        ifft(&mut buf);
        buf.iter().map(|c| c.re).collect()
    }

    #[inline]
    fn slot(&self, p: usize) -> usize {
        (self.newest + p) % self.partitions
    }

    // =========================================================================
    // Block steps
    // =========================================================================

    /// Ingest one block of delayed reference and microphone samples. The
    /// reference frame becomes the newest history slot and the smoothed
    /// normalization, auto and cross PSDs move one block forward.
    pub fn push_blocks(&mut self, reference: &[f32], mic: &[f32]) {
        let m = self.block_size;
        let n = self.fft_size;
        debug_assert!(reference.len() >= m && mic.len() >= m);

        // Reference frame -> newest slot
        self.newest = (self.newest + self.partitions - 1) % self.partitions;
        {
            let slot = &mut self.spectra[self.newest];
            for i in 0..m {
                slot[i] = Complex::new(self.prev_ref[i], 0.0);
                slot[m + i] = Complex::new(reference[i], 0.0);
            }
            fft(slot);
        }
        self.prev_ref.copy_from_slice(&reference[..m]);

        // Microphone frame (diagnostics only)
        for i in 0..m {
            self.mic_spectrum[i] = Complex::new(self.prev_mic[i], 0.0);
            self.mic_spectrum[m + i] = Complex::new(mic[i], 0.0);
        }
        fft(&mut self.mic_spectrum);
        self.prev_mic.copy_from_slice(&mic[..m]);

        let a = PSD_SMOOTHING;
        let newest = self.newest;
        let mut coh_sum = 0.0f32;
        for k in 0..n {
            let x0 = self.spectra[newest][k];
            let d = self.mic_spectrum[k];

            self.psd_mic[k] = a * self.psd_mic[k] + (1.0 - a) * d.norm_sqr();
            self.psd_ref[k] = a * self.psd_ref[k] + (1.0 - a) * x0.norm_sqr();
            self.psd_cross[k] = self.psd_cross[k] * a + d * x0.conj() * (1.0 - a);

            let mut power = 0.0f32;
            for s in &self.spectra {
                power += s[k].norm_sqr();
            }
            self.psd[k] = a * self.psd[k] + (1.0 - a) * power;

            let num = self.psd_cross[k].norm_sqr();
            let den = self.psd_ref[k] * self.psd_mic[k] + COHERENCE_EPS;
            coh_sum += num / den;
        }
        self.coherence = coh_sum / n as f32;
    }

    /// Echo estimate for the block just pushed: every partition's weights
    /// applied to its history slot, summed and transformed back. Writes
    /// `block_size` samples into `echo`.
    pub fn estimate_echo(&mut self, echo: &mut [f32]) {
        let m = self.block_size;
        let zero = Complex::new(0.0f32, 0.0);

        self.scratch.fill(zero);
        for p in 0..self.partitions {
            let x = &self.spectra[(self.newest + p) % self.partitions];
            let w = &self.weights[p];
            for ((y, xk), wk) in self.scratch.iter_mut().zip(x.iter()).zip(w.iter()) {
                *y += xk * wk;
            }
        }
        ifft(&mut self.scratch);

        for (e, y) in echo.iter_mut().take(m).zip(self.scratch[m..].iter()) {
            *e = y.re;
        }
    }

    /// Normalized frequency-domain LMS update from the residual block,
    /// followed by the round-robin gradient constraint. Only called for
    /// blocks that are allowed to adapt.
    pub fn adapt(&mut self, error: &[f32], mu: f32, epsilon: f32, leak: f32) {
        let m = self.block_size;
        let zero = Complex::new(0.0f32, 0.0);

        // E = FFT([0, e])
        self.error_spectrum.fill(zero);
        for (dst, &e) in self.error_spectrum[m..].iter_mut().zip(error.iter().take(m)) {
            *dst = Complex::new(e, 0.0);
        }
        fft(&mut self.error_spectrum);

        let retain = 1.0 - leak;
        for p in 0..self.partitions {
            let x = &self.spectra[(self.newest + p) % self.partitions];
            let w = &mut self.weights[p];
            for k in 0..self.fft_size {
                let step = mu / (self.psd[k] + epsilon);
                let grad = self.error_spectrum[k] * x[k].conj();
                w[k] = w[k] * retain + grad * step;
            }
        }

        self.constrain_next();
    }

    /// Enforce the linear-convolution constraint on the next partition in
    /// round-robin order.
    pub fn constrain_next(&mut self) {
        let p = self.constraint_idx;
        self.constraint_idx = (self.constraint_idx + 1) % self.partitions;

        let m = self.block_size;
        let zero = Complex::new(0.0f32, 0.0);

        self.scratch.copy_from_slice(&self.weights[p]);
        ifft(&mut self.scratch);
        for v in &mut self.scratch[m..] {
            *v = zero;
        }
        fft(&mut self.scratch);
        self.weights[p].copy_from_slice(&self.scratch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noise(u64);

    impl Noise {
        fn next(&mut self) -> f32 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            ((self.0 >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
        }
    }

    /// Runs the filter against `mic[n] = Σ h[j]·x[n−j]` for `blocks` blocks.
    fn identify(filter: &mut PartitionedFilter, taps: &[(usize, f32)], blocks: usize, mu: f32) {
        let m = filter.block_size();
        let history = taps.iter().map(|t| t.0).max().unwrap_or(0) + 1;
        let mut noise = Noise(0xdead_beef);
        let mut x_hist = vec![0.0f32; history + m];
        let mut ref_block = vec![0.0f32; m];
        let mut mic_block = vec![0.0f32; m];
        let mut echo = vec![0.0f32; m];
        let mut error = vec![0.0f32; m];

        for _ in 0..blocks {
            x_hist.copy_within(m.., 0);
            for i in 0..m {
                let s = noise.next();
                x_hist[history + i] = s;
                ref_block[i] = s;
            }
            for i in 0..m {
                let n = history + i;
                mic_block[i] = taps.iter().map(|&(d, g)| g * x_hist[n - d]).sum();
            }

            filter.push_blocks(&ref_block, &mic_block);
            filter.estimate_echo(&mut echo);
            for i in 0..m {
                error[i] = mic_block[i] - echo[i];
            }
            filter.adapt(&error, mu, 1e-6, 0.0);
        }
    }

    fn upper_half_ratio(filter: &PartitionedFilter, p: usize) -> f32 {
        let h = filter.impulse_response(p);
        let m = filter.block_size();
        let lower: f32 = h[..m].iter().map(|v| v * v).sum();
        let upper: f32 = h[m..].iter().map(|v| v * v).sum();
        upper / (lower + 1e-20)
    }

    #[test]
    fn test_history_is_newest_first() {
        let m = 8;
        let mut f = PartitionedFilter::new(m, 2);
        let zeros = vec![0.0f32; m];

        f.push_blocks(&vec![1.0; m], &zeros);
        f.push_blocks(&vec![2.0; m], &zeros);
        // DC bin = sum of the [prev, cur] frame
        assert!((f.spectrum(0)[0].re - 3.0 * m as f32).abs() < 1e-4);
        assert!((f.spectrum(1)[0].re - m as f32).abs() < 1e-4);

        f.push_blocks(&vec![3.0; m], &zeros);
        assert!((f.spectrum(0)[0].re - 5.0 * m as f32).abs() < 1e-4);
        assert!((f.spectrum(1)[0].re - 3.0 * m as f32).abs() < 1e-4);
    }

    #[test]
    fn test_identifies_two_partition_path() {
        let m = 64;
        let mut f = PartitionedFilter::new(m, 2);
        identify(&mut f, &[(3, 0.5), (70, -0.3)], 1500, 0.5);

        let h0 = f.impulse_response(0);
        let h1 = f.impulse_response(1);
        assert!((h0[3] - 0.5).abs() < 0.02, "h0[3] = {}", h0[3]);
        assert!((h1[70 - m] + 0.3).abs() < 0.02, "h1[6] = {}", h1[6]);
        assert!(h0[10].abs() < 0.02);
    }

    #[test]
    fn test_constraint_cycle_clears_upper_half() {
        let m = 32;
        let partitions = 3;
        let mut f = PartitionedFilter::new(m, partitions);
        identify(&mut f, &[(5, 0.4), (40, 0.2), (77, -0.1)], 50, 0.5);

        // A full cycle with a zero step only runs the constraint
        identify(&mut f, &[(5, 0.4)], partitions, 0.0);
        for p in 0..partitions {
            assert!(upper_half_ratio(&f, p) < 1e-8, "partition {}", p);
        }
    }

    #[test]
    fn test_coherence_tracks_correlation() {
        let m = 64;
        let mut f = PartitionedFilter::new(m, 1);
        let mut noise = Noise(17);
        let mut block = vec![0.0f32; m];
        for _ in 0..200 {
            for s in block.iter_mut() {
                *s = noise.next();
            }
            f.push_blocks(&block, &block);
        }
        assert!(f.coherence() > 0.95, "coherence = {}", f.coherence());

        let mut g = PartitionedFilter::new(m, 1);
        let mut other = vec![0.0f32; m];
        for _ in 0..400 {
            for i in 0..m {
                block[i] = noise.next();
                other[i] = noise.next();
            }
            g.push_blocks(&block, &other);
        }
        assert!(g.coherence() < 0.3, "coherence = {}", g.coherence());
    }

    #[test]
    fn test_silence_keeps_everything_finite() {
        let m = 16;
        let mut f = PartitionedFilter::new(m, 2);
        let zeros = vec![0.0f32; m];
        let mut echo = vec![1.0f32; m];
        for _ in 0..20 {
            f.push_blocks(&zeros, &zeros);
            f.estimate_echo(&mut echo);
            f.adapt(&zeros, 0.5, 1e-6, 1e-4);
        }
        assert!(echo.iter().all(|&v| v == 0.0));
        assert_eq!(f.coherence(), 0.0);
        assert!(f.psd().iter().all(|v| v.is_finite()));
    }
}
