//! Echo return loss enhancement bookkeeping.
//!
//! Consumes per-block power sums (echo estimate, residual, reference) and
//! keeps the smoothed energies the DTD and the stats snapshot read. The
//! gated average only moves during far-end single talk, after warm-up.

use crate::dsp::utils::power_ratio_db;

// EMA for block energies
const ENERGY_SMOOTHING: f32 = 0.95;

// EMA for the gated average ERLE
const AVG_ERLE_SMOOTHING: f32 = 0.99;

// Blocks that must pass before the average starts moving
pub const WARMUP_BLOCKS: u64 = 50;

// Average ERLE that counts as converged
const CONVERGED_ERLE_DB: f32 = 10.0;

// Smoothed reference energy needed for the average to move
const REF_ENERGY_FLOOR: f32 = 1e-6;

#[derive(Debug, Clone, Copy, Default)]
pub struct ErleTracker {
    /// Smoothed (echo + error) power, the microphone power proxy.
    pub input_energy: f32,
    pub error_energy: f32,
    pub ref_energy: f32,

    pub instant_db: f32,
    pub average_db: f32,
    pub max_db: f32,
    pub converged_ms: Option<f32>,

    pub blocks: u64,
}

impl ErleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Fold in one block's power sums. Returns the instantaneous ERLE (dB),
    /// floored at 0.
    #[inline]
    pub fn update_energies(&mut self, echo_power: f32, error_power: f32, ref_power: f32) -> f32 {
        let input = echo_power + error_power;
        self.input_energy = ENERGY_SMOOTHING * self.input_energy + (1.0 - ENERGY_SMOOTHING) * input;
        self.error_energy =
            ENERGY_SMOOTHING * self.error_energy + (1.0 - ENERGY_SMOOTHING) * error_power;
        self.ref_energy = ENERGY_SMOOTHING * self.ref_energy + (1.0 - ENERGY_SMOOTHING) * ref_power;

        self.instant_db = power_ratio_db(input, error_power).max(0.0);
        self.blocks += 1;
        self.instant_db
    }

    /// Gated average update. `elapsed_ms` is the stream time at the end of
    /// this block, recorded on the first crossing of the converged threshold.
    #[inline]
    pub fn update_average(&mut self, frozen: bool, elapsed_ms: f32) {
        if frozen || self.ref_energy <= REF_ENERGY_FLOOR || self.blocks <= WARMUP_BLOCKS {
            return;
        }

        self.average_db =
            AVG_ERLE_SMOOTHING * self.average_db + (1.0 - AVG_ERLE_SMOOTHING) * self.instant_db;
        if self.average_db > self.max_db {
            self.max_db = self.average_db;
        }
        if self.converged_ms.is_none() && self.average_db > CONVERGED_ERLE_DB {
            self.converged_ms = Some(elapsed_ms);
        }
    }
}
