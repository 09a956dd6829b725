//! Lock-free tunable parameters.
//!
//! Floats are stored as `AtomicU32` bit patterns so any thread can retune a
//! running engine without locks. The processing thread takes one relaxed
//! `snapshot()` per block; a change lands on the next block boundary.

use crate::config::AecConfig;
use std::sync::atomic::{AtomicU32, Ordering};

// Upper end of the default mu range
const MU_RANGE_MAX_DEFAULT: f32 = 1.0;

/// Values the processing thread reads once per block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSnapshot {
    /// mu after clamping into the configured range.
    pub mu: f32,
    pub dtd_alpha: f32,
    pub dtd_beta: f32,
    pub freeze_blocks: u32,
}

pub struct ParameterStore {
    mu: AtomicU32,
    mu_min: AtomicU32,
    mu_max: AtomicU32,
    dtd_alpha: AtomicU32,
    dtd_beta: AtomicU32,
    freeze_blocks: AtomicU32,
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::from_config(&AecConfig::default())
    }
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(cfg: &AecConfig) -> Self {
        let store = Self {
            mu: AtomicU32::new(0),
            mu_min: AtomicU32::new(0),
            mu_max: AtomicU32::new(0),
            dtd_alpha: AtomicU32::new(0),
            dtd_beta: AtomicU32::new(0),
            freeze_blocks: AtomicU32::new(0),
        };
        store.reset_from(cfg);
        store
    }

    /// Back to the values implied by `cfg`: mu from the config, range
    /// `[0, max(1, mu)]`.
    pub fn reset_from(&self, cfg: &AecConfig) {
        let d = AecConfig::default();
        let mu = sanitize(cfg.mu, d.mu);
        store_f32(&self.mu, mu);
        store_f32(&self.mu_min, 0.0);
        store_f32(&self.mu_max, mu.max(MU_RANGE_MAX_DEFAULT));
        store_f32(&self.dtd_alpha, positive_or(cfg.dtd_alpha, d.dtd_alpha));
        store_f32(&self.dtd_beta, positive_or(cfg.dtd_beta, d.dtd_beta));
        self.freeze_blocks
            .store(cfg.freeze_blocks, Ordering::Relaxed);
    }

    /// Non-finite values are ignored, negatives become 0.
    pub fn set_mu(&self, mu: f32) {
        if mu.is_finite() {
            store_f32(&self.mu, mu.max(0.0));
        }
    }

    /// Order of the bounds does not matter.
    pub fn set_mu_range(&self, min: f32, max: f32) {
        if !(min.is_finite() && max.is_finite()) {
            return;
        }
        let lo = min.min(max).max(0.0);
        let hi = min.max(max).max(0.0);
        store_f32(&self.mu_min, lo);
        store_f32(&self.mu_max, hi);
    }

    pub fn set_dtd_alpha(&self, alpha: f32) {
        if alpha.is_finite() && alpha > 0.0 {
            store_f32(&self.dtd_alpha, alpha);
        }
    }

    pub fn set_dtd_beta(&self, beta: f32) {
        if beta.is_finite() && beta > 0.0 {
            store_f32(&self.dtd_beta, beta);
        }
    }

    pub fn set_dtd_thresholds(&self, alpha: f32, beta: f32) {
        self.set_dtd_alpha(alpha);
        self.set_dtd_beta(beta);
    }

    pub fn set_freeze_blocks(&self, blocks: u32) {
        self.freeze_blocks.store(blocks, Ordering::Relaxed);
    }

    pub fn get_mu(&self) -> f32 {
        load_f32(&self.mu)
    }

    pub fn get_mu_range(&self) -> (f32, f32) {
        (load_f32(&self.mu_min), load_f32(&self.mu_max))
    }

    pub fn get_dtd_alpha(&self) -> f32 {
        load_f32(&self.dtd_alpha)
    }

    pub fn get_dtd_beta(&self) -> f32 {
        load_f32(&self.dtd_beta)
    }

    pub fn get_freeze_blocks(&self) -> u32 {
        self.freeze_blocks.load(Ordering::Relaxed)
    }

    /// One relaxed read of everything. The range bounds are read separately,
    /// so a half-applied range update is tolerated by using min/max instead
    /// of `clamp` (which would panic on an inverted range).
    #[inline]
    pub fn snapshot(&self) -> ParamSnapshot {
        let (lo, hi) = self.get_mu_range();
        ParamSnapshot {
            mu: self.get_mu().max(lo).min(hi),
            dtd_alpha: self.get_dtd_alpha(),
            dtd_beta: self.get_dtd_beta(),
            freeze_blocks: self.get_freeze_blocks(),
        }
    }
}

#[inline]
fn store_f32(a: &AtomicU32, v: f32) {
    a.store(v.to_bits(), Ordering::Relaxed);
}

#[inline]
fn load_f32(a: &AtomicU32) -> f32 {
    f32::from_bits(a.load(Ordering::Relaxed))
}

fn sanitize(v: f32, fallback: f32) -> f32 {
    if v.is_finite() {
        v.max(0.0)
    } else {
        fallback
    }
}

fn positive_or(v: f32, fallback: f32) -> f32 {
    if v.is_finite() && v > 0.0 {
        v
    } else {
        fallback
    }
}
