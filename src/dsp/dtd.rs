//! Double-Talk Detector
//!
//! Energy-ratio gate. When the smoothed microphone-side energy exceeds what
//! the far end alone can explain (`alpha × reference`), a near-end talker is
//! assumed and adaptation is held off for `DTD_HOLD_BLOCKS` blocks.
//!
//! `beta` is the release threshold: while the hold is running, energy above
//! `beta × reference` re-arms it. With `beta < alpha` this gives hysteresis so
//! the gate does not chatter at the edge of a burst.

/// Blocks the gate stays closed after the last trigger.
pub const DTD_HOLD_BLOCKS: u32 = 10;

/// Reference energy at or below this is treated as far-end silence.
const REF_ENERGY_FLOOR: f32 = 1e-5;

#[derive(Debug, Clone, Copy, Default)]
pub struct DoubleTalkDetector {
    hold: u32,
}

impl DoubleTalkDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.hold = 0;
    }

    /// Evaluate one block. `input_energy` is the smoothed echo+error power
    /// (a proxy for microphone power), `ref_energy` the smoothed reference
    /// power. Returns whether double talk is active after this block.
    #[inline]
    pub fn update(&mut self, input_energy: f32, ref_energy: f32, alpha: f32, beta: f32) -> bool {
        let threshold = if self.hold > 0 { beta.min(alpha) } else { alpha };

        if ref_energy > REF_ENERGY_FLOOR && input_energy > threshold * ref_energy {
            self.hold = DTD_HOLD_BLOCKS;
        } else if self.hold > 0 {
            self.hold -= 1;
        }

        self.hold > 0
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.hold > 0
    }

    #[inline]
    pub fn hold_remaining(&self) -> u32 {
        self.hold
    }
}
