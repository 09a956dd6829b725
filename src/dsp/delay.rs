//! Delay Line & Delay Estimator
//!
//! The far-end reference usually reaches the microphone several milliseconds
//! after it was handed to the renderer. The estimator tracks that bulk delay
//! so the adaptive filter only has to model the room, not the transport.
//!
//! ## How it works
//! - Every reference sample goes into a circular `DelayLine`.
//! - Microphone samples are collected into a correlation block of
//!   `corr_block` samples while the reference energy accumulates.
//! - On a full block, a two-stage search picks the lag of maximum absolute
//!   cross-correlation: a coarse pass (stride 4 in lag and in time) over
//!   `0..max_lag`, then a full-resolution pass over `best ± 4`.
//! - The caller decides whether a search is allowed (it is not while the
//!   adaptive filter is frozen) and reacts to lag changes.
//!
//! Everything is sized at construction; `push` never allocates.

// =============================================================================
// Constants
// =============================================================================

/// Lag and time stride of the coarse correlation pass.
const COARSE_STRIDE: usize = 4;

/// Half-width of the refine window around the coarse winner.
const REFINE_RADIUS: usize = 4;

/// Reference energy below this skips the search (nothing to correlate with).
const REF_POWER_FLOOR: f32 = 1e-6;

// =============================================================================
// Delay Line
// =============================================================================

/// Fixed-capacity circular buffer of raw reference samples.
///
/// The write index advances by exactly one per pushed sample. `read(lag)`
/// returns the sample pushed `lag` samples before the newest one.
pub struct DelayLine {
    buf: Vec<f32>,
    write: usize,
}

impl DelayLine {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0.0; capacity.max(1)],
            write: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn push(&mut self, sample: f32) {
        self.buf[self.write] = sample;
        self.write += 1;
        if self.write == self.buf.len() {
            self.write = 0;
        }
    }

    /// Sample written `lag` pushes ago (0 = newest). Lags beyond the
    /// capacity wrap.
    #[inline]
    pub fn read(&self, lag: usize) -> f32 {
        let cap = self.buf.len();
        let back = (lag % cap) + 1;
        self.buf[(self.write + cap - back) % cap]
    }

    pub fn clear(&mut self) {
        self.buf.fill(0.0);
        self.write = 0;
    }
}

// =============================================================================
// Delay Estimator
// =============================================================================

pub struct DelayEstimator {
    line: DelayLine,

    // Correlation block
    mic_block: Vec<f32>,
    fill: usize,
    ref_power: f32,

    max_lag: usize,
    current_lag: usize,
}

impl DelayEstimator {
    /// `capacity` must cover `max_lag + corr_block` plus whatever history the
    /// consumer of `delayed_reference` needs; the engine derives it from the
    /// config layout.
    pub fn new(capacity: usize, corr_block: usize, max_lag: usize) -> Self {
        let corr_block = corr_block.max(1);
        let capacity = capacity.max(max_lag + corr_block + 1);
        Self {
            line: DelayLine::new(capacity),
            mic_block: vec![0.0; corr_block],
            fill: 0,
            ref_power: 0.0,
            max_lag,
            current_lag: 0,
        }
    }

    pub fn reset(&mut self) {
        self.line.clear();
        self.mic_block.fill(0.0);
        self.fill = 0;
        self.ref_power = 0.0;
        self.current_lag = 0;
    }

    #[inline]
    pub fn current_lag(&self) -> usize {
        self.current_lag
    }

    #[inline]
    pub fn max_lag(&self) -> usize {
        self.max_lag
    }

    #[inline]
    pub fn corr_block(&self) -> usize {
        self.mic_block.len()
    }

    /// Reference sample aligned to the microphone by the current lag.
    /// Call after `push` for the same sample index.
    #[inline]
    pub fn delayed_reference(&self) -> f32 {
        self.line.read(self.current_lag)
    }

    /// Feed one sample pair. Returns `Some(new_lag)` when a completed
    /// correlation block moved the lag.
    #[inline]
    pub fn push(&mut self, mic: f32, reference: f32, search_allowed: bool) -> Option<usize> {
        self.line.push(reference);

        self.mic_block[self.fill] = mic;
        self.ref_power += reference * reference;
        self.fill += 1;

        if self.fill < self.mic_block.len() {
            return None;
        }

        let previous = self.current_lag;
        if search_allowed && self.ref_power > REF_POWER_FLOOR {
            self.current_lag = self.search();
        }

        self.fill = 0;
        self.ref_power = 0.0;

        if self.current_lag != previous {
            Some(self.current_lag)
        } else {
            None
        }
    }

    fn search(&self) -> usize {
        if self.max_lag == 0 {
            return self.current_lag;
        }

        let mut best_lag = self.current_lag;
        let mut best = 0.0f32;

        let mut lag = 0;
        while lag < self.max_lag {
            let c = self.correlate(lag, COARSE_STRIDE).abs();
            if c > best {
                best = c;
                best_lag = lag;
            }
            lag += COARSE_STRIDE;
        }

        let start = best_lag.saturating_sub(REFINE_RADIUS);
        let end = (best_lag + REFINE_RADIUS).min(self.max_lag);
        best = 0.0;
        for lag in start..=end {
            let c = self.correlate(lag, 1).abs();
            if c > best {
                best = c;
                best_lag = lag;
            }
        }

        best_lag
    }

    /// Σ mic[i]·ref[i − lag] over the current block, sampling every `stride`.
    fn correlate(&self, lag: usize, stride: usize) -> f32 {
        let n = self.mic_block.len();
        let mut acc = 0.0f32;
        let mut i = 0;
        while i < n {
            // mic_block[i] was pushed (n - 1 - i) samples before the newest
            acc += self.mic_block[i] * self.line.read(n - 1 - i + lag);
            i += stride;
        }
        acc
    }
}
