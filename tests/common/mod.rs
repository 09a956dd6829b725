#![allow(dead_code)]

use duplex_aec::AecConfig;

pub const SAMPLE_RATE: u32 = 48_000;
pub const BLOCK: usize = 256;

/// Short synthetic room: direct path plus three reflections.
pub const ECHO_PATH: [(usize, f32); 4] = [(0, 0.5), (7, 0.3), (19, -0.2), (40, 0.1)];

/// Deterministic xorshift noise, uniform in [-1, 1).
pub struct Noise(u64);

impl Noise {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next(&mut self) -> f32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        ((self.0 >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
    }
}

pub fn white_noise(len: usize, amp: f32, seed: u64) -> Vec<f32> {
    let mut n = Noise::new(seed);
    (0..len).map(|_| amp * n.next()).collect()
}

/// One-pole lowpassed noise. Strong autocorrelation near lag 0, which is
/// what makes the delay search unambiguous.
pub fn lowpassed_noise(len: usize, amp: f32, seed: u64) -> Vec<f32> {
    let mut n = Noise::new(seed);
    let mut y = 0.0f32;
    (0..len)
        .map(|_| {
            y = 0.9 * y + 0.1 * n.next();
            amp * y
        })
        .collect()
}

/// Sparse FIR: `taps` is a list of `(delay, gain)`.
pub fn convolve(x: &[f32], taps: &[(usize, f32)]) -> Vec<f32> {
    (0..x.len())
        .map(|n| {
            taps.iter()
                .filter(|(d, _)| *d <= n)
                .map(|(d, g)| g * x[n - d])
                .sum()
        })
        .collect()
}

pub fn delayed(x: &[f32], delay: usize, gain: f32) -> Vec<f32> {
    convolve(x, &[(delay, gain)])
}

pub use duplex_aec::dsp::utils::frame_energy as energy;

/// Small, fast config: two partitions, 10 ms delay search, no leak.
///
/// On white noise through `ECHO_PATH` this is the config that takes the
/// average ERLE past 20 dB within 200 blocks.
pub fn test_config() -> AecConfig {
    AecConfig {
        sample_rate: SAMPLE_RATE,
        filter_len: 512,
        block_size: BLOCK,
        mu: 0.5,
        leak: 0.0,
        max_delay_ms: 10,
        ..AecConfig::default()
    }
}
