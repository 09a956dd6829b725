//! Time-domain NLMS echo path.
//!
//! Sample-by-sample alternative to the partitioned filter, selected with
//! `Algorithm::TimeDomainNlms`. It has no block latency but costs two dot
//! products of `filter_len` per sample, so it suits short tails.
//!
//! The tap history is stored twice (`hist[i] == hist[i + L]`) so the newest
//! `L` samples are always one contiguous slice starting at `pos`.

pub struct TimeDomainNlms {
    weights: Vec<f32>,
    hist: Vec<f32>,
    pos: usize,
    power: f32,
}

impl TimeDomainNlms {
    pub fn new(taps: usize) -> Self {
        let taps = taps.max(1);
        Self {
            weights: vec![0.0; taps],
            hist: vec![0.0; taps * 2],
            pos: 0,
            power: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.weights.fill(0.0);
        self.clear_history();
    }

    /// Forget the reference history, keep the weights.
    pub fn clear_history(&mut self) {
        self.hist.fill(0.0);
        self.pos = 0;
        self.power = 0.0;
    }

    #[inline]
    pub fn taps(&self) -> usize {
        self.weights.len()
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Push one delayed reference sample and return the echo estimate.
    #[inline]
    pub fn filter(&mut self, x: f32) -> f32 {
        let l = self.weights.len();
        self.pos = (self.pos + l - 1) % l;

        let oldest = self.hist[self.pos];
        self.power = (self.power + x * x - oldest * oldest).max(0.0);

        self.hist[self.pos] = x;
        self.hist[self.pos + l] = x;

        let window = &self.hist[self.pos..self.pos + l];
        let mut y = 0.0f32;
        for (w, s) in self.weights.iter().zip(window.iter()) {
            y += w * s;
        }
        y
    }

    /// NLMS step for the sample most recently passed to `filter`.
    #[inline]
    pub fn adapt(&mut self, error: f32, mu: f32, epsilon: f32, leak: f32) {
        let l = self.weights.len();
        let g = mu * error / (self.power + epsilon);
        let retain = 1.0 - leak;
        let window = &self.hist[self.pos..self.pos + l];
        for (w, s) in self.weights.iter_mut().zip(window.iter()) {
            *w = *w * retain + g * s;
        }
    }
}
