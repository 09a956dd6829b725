// noise_suppressor.rs
//! Spectral-Subtraction Noise Suppressor (post filter)
//!
//! Removes the stationary noise floor left in the echo-cancelled residual.
//! Runs on its own STFT cadence, independent of the echo canceller's block
//! size: callers hand it chunks of any length and get the same number of
//! samples back, delayed by one analysis frame.
//!
//! Design goals
//! - Stationary noise only (fans, hiss, room tone). Transients pass.
//! - Never amplifies: per-bin gain is in `[floor_gain, 1]`.
//! - Deterministic, real-time safe (no alloc in process).
//!
//! Model
//! - sqrt-Hann analysis + synthesis at 50% overlap (unity overlap-add).
//! - Noise floor per bin: drops fast toward quieter frames, creeps up
//!   slowly (multiplicative `noise_rise` per frame, capped at the frame
//!   magnitude). The first `startup_frames` frames seed it directly.
//! - Gain: `g = floor + (1 − floor)·mag²/(mag² + noise²)`, computed with the
//!   estimate from before the current frame's update.

use crate::dsp::fft::{fft, ifft};
use crate::dsp::utils::{make_sqrt_hann_window, next_pow2, MAG_FLOOR};
use log::warn;
use ringbuf::{Consumer, Producer, RingBuffer};
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------------
// Constants
// -----------------------------------------------------------------------------

const RINGBUF_CAP_MULT: usize = 4;

// Smallest analysis frame accepted
const FRAME_SIZE_MIN: usize = 16;

// Symmetric blend used while seeding the noise floor
const STARTUP_BLEND: f32 = 0.5;

// Wiener denominator epsilon
const GAIN_EPS: f32 = 1e-12;

// -----------------------------------------------------------------------------
// Public Config & API
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NoiseSuppressorConfig {
    /// Analysis frame in samples (power of two). Hop is half of it.
    pub frame_size: usize,
    /// Minimum per-bin gain.
    pub floor_gain: f32,
    /// Blend toward a quieter frame (0..1, higher = faster down).
    pub noise_adapt: f32,
    /// Per-frame multiplicative rise allowed when the frame is louder.
    pub noise_rise: f32,
    /// Noise floor before the first frame.
    pub initial_noise: f32,
    /// Frames that seed the floor before the asymmetric rule takes over.
    pub startup_frames: u32,
}

impl Default for NoiseSuppressorConfig {
    fn default() -> Self {
        Self {
            frame_size: 512,
            floor_gain: 0.1,
            noise_adapt: 0.1,
            noise_rise: 1.002,
            initial_noise: 1e-3,
            startup_frames: 8,
        }
    }
}

impl NoiseSuppressorConfig {
    /// Best-effort normalization; every adjustment is logged.
    pub fn normalized(&self) -> Self {
        let d = Self::default();
        let mut c = *self;

        let frame = next_pow2(c.frame_size.max(FRAME_SIZE_MIN));
        if frame != c.frame_size {
            warn!(
                "noise suppressor frame_size {} adjusted to {}",
                c.frame_size, frame
            );
            c.frame_size = frame;
        }
        if !(0.0..=1.0).contains(&c.floor_gain) {
            warn!("noise suppressor floor_gain {} out of range", c.floor_gain);
            c.floor_gain = if c.floor_gain.is_finite() {
                c.floor_gain.clamp(0.0, 1.0)
            } else {
                d.floor_gain
            };
        }
        if !(c.noise_adapt > 0.0 && c.noise_adapt <= 1.0) {
            warn!("noise suppressor noise_adapt {} out of range", c.noise_adapt);
            c.noise_adapt = d.noise_adapt;
        }
        if !(c.noise_rise >= 1.0 && c.noise_rise.is_finite()) {
            warn!("noise suppressor noise_rise {} out of range", c.noise_rise);
            c.noise_rise = d.noise_rise;
        }
        if !(c.initial_noise > 0.0 && c.initial_noise.is_finite()) {
            c.initial_noise = d.initial_noise;
        }
        c
    }
}

pub struct NoiseSuppressor {
    input_prod: Producer<f32>,
    input_cons: Consumer<f32>,
    output_prod: Producer<f32>,
    output_cons: Consumer<f32>,

    // Scratch
    scratch: Vec<Complex<f32>>,
    window: Vec<f32>,
    overlap: Vec<f32>,

    // Per-bin state (nyq+1)
    noise: Vec<f32>,
    gains: Vec<f32>,

    frames: u64,
    cfg: NoiseSuppressorConfig,
    frame_size: usize,
    hop_size: usize,
}

impl NoiseSuppressor {
    pub fn new(cfg: NoiseSuppressorConfig) -> Self {
        let cfg = cfg.normalized();
        let win = cfg.frame_size;
        let hop = win / 2;
        let nyq = win / 2;
        let buf_size = (win * RINGBUF_CAP_MULT).max(win + hop + 16);

        let (ip, ic) = RingBuffer::new(buf_size).split();
        let (op, oc) = RingBuffer::new(buf_size).split();

        let mut ns = Self {
            input_prod: ip,
            input_cons: ic,
            output_prod: op,
            output_cons: oc,

            scratch: vec![Complex::default(); win],
            window: make_sqrt_hann_window(win),
            overlap: vec![0.0; win],

            noise: vec![cfg.initial_noise; nyq + 1],
            gains: vec![1.0; nyq + 1],

            frames: 0,
            cfg,
            frame_size: win,
            hop_size: hop,
        };

        ns.prime_output();
        ns
    }

    pub fn reset(&mut self) {
        while self.input_cons.pop().is_some() {}
        while self.output_cons.pop().is_some() {}

        self.overlap.fill(0.0);
        self.noise.fill(self.cfg.initial_noise);
        self.gains.fill(1.0);
        self.frames = 0;

        self.prime_output();
    }

    // Prime output with zeros so initial pops are deterministic
    fn prime_output(&mut self) {
        for _ in 0..self.frame_size {
            let _ = self.output_prod.push(0.0);
        }
    }

    pub fn config(&self) -> &NoiseSuppressorConfig {
        &self.cfg
    }

    /// Input-to-output delay in samples.
    pub fn latency(&self) -> usize {
        self.frame_size
    }

    /// Gains applied in the most recent frame (bins `0..=frame_size/2`).
    pub fn last_gains(&self) -> &[f32] {
        &self.gains
    }

    pub fn noise_estimate(&self) -> &[f32] {
        &self.noise
    }

    /// In-place transform of an arbitrary-length chunk.
    pub fn process(&mut self, buf: &mut [f32]) {
        for s in buf.iter_mut() {
            let _ = self.input_prod.push(*s);

            if self.input_cons.len() >= self.frame_size {
                self.process_frame();
                for _ in 0..self.hop_size {
                    let _ = self.input_cons.pop();
                }
            }

            *s = self.output_cons.pop().unwrap_or(0.0);
        }
    }

    fn process_frame(&mut self) {
        let win = self.frame_size;
        let nyq = win / 2;

        // 1) Windowed frame
        for (i, &s) in self.input_cons.iter().take(win).enumerate() {
            self.scratch[i] = Complex::new(s * self.window[i], 0.0);
        }

        // 2) FFT
        fft(&mut self.scratch);

        // 3) Gains from the previous noise estimate, then update it
        let floor = self.cfg.floor_gain;
        let seeding = self.frames < self.cfg.startup_frames as u64;
        for k in 0..=nyq {
            let mag = self.scratch[k].norm().max(MAG_FLOOR);
            let nf = self.noise[k];

            let s2 = mag * mag;
            let n2 = nf * nf;
            self.gains[k] = floor + (1.0 - floor) * (s2 / (s2 + n2 + GAIN_EPS));

            self.noise[k] = if seeding {
                if self.frames == 0 {
                    mag
                } else {
                    nf * (1.0 - STARTUP_BLEND) + mag * STARTUP_BLEND
                }
            } else if mag < nf {
                nf * (1.0 - self.cfg.noise_adapt) + mag * self.cfg.noise_adapt
            } else {
                (nf * self.cfg.noise_rise).min(mag)
            };
        }
        self.frames += 1;

        // 4) Apply gains, restore conjugate symmetry for real iFFT
        for k in 0..=nyq {
            self.scratch[k] *= self.gains[k];
        }
        for k in 1..nyq {
            self.scratch[win - k] = self.scratch[k].conj();
        }

        // 5) iFFT (normalized)
        ifft(&mut self.scratch);

        // 6) Synthesis window + overlap-add
        for i in 0..win {
            self.overlap[i] += self.scratch[i].re * self.window[i];
        }

        // 7) Emit one hop
        for i in 0..self.hop_size {
            let _ = self.output_prod.push(self.overlap[i]);
        }

        // 8) Shift overlap buffer left by hop
        self.overlap.copy_within(self.hop_size..win, 0);
        for v in &mut self.overlap[win - self.hop_size..] {
            *v = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    const SR: f32 = 48_000.0;

    struct Noise(u64);

    impl Noise {
        fn next(&mut self) -> f32 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            ((self.0 >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
        }
    }

    fn energy(x: &[f32]) -> f32 {
        x.iter().map(|v| v * v).sum()
    }

    #[test]
    fn test_silence_stays_silent() {
        let mut ns = NoiseSuppressor::new(NoiseSuppressorConfig::default());
        let mut buf = vec![0.0f32; 4800];
        ns.process(&mut buf);
        assert!(buf.iter().all(|&v| v == 0.0));
        assert!(ns.last_gains().iter().all(|g| g.is_finite()));
    }

    #[test]
    fn test_noise_attenuated_tone_passes() {
        let cfg = NoiseSuppressorConfig::default();
        let mut ns = NoiseSuppressor::new(cfg);
        let latency = ns.latency();
        let mut noise = Noise(0x5eed);

        // 2 s noise, then 0.5 s noise + tone centred on bin 32
        let noise_len = 96_000;
        let tone_len = 24_000;
        let tone_hz = 32.0 * SR / cfg.frame_size as f32;
        let input: Vec<f32> = (0..noise_len + tone_len)
            .map(|n| {
                let mut s = 0.01 * noise.next();
                if n >= noise_len {
                    s += 0.5 * (2.0 * PI * tone_hz * n as f32 / SR).sin();
                }
                s
            })
            .collect();

        let mut output = input.clone();
        ns.process(&mut output);

        // Noise-only stretch, aligned for latency
        let a = 24_000;
        let b = noise_len - 1_000;
        let e_in = energy(&input[a..b]);
        let e_out = energy(&output[a + latency..b + latency]);
        assert!(e_out < e_in, "noise in {} out {}", e_in, e_out);

        // Tone bin passes almost unchanged
        assert!(ns.last_gains()[32] > 0.95, "gain {}", ns.last_gains()[32]);

        let t0 = noise_len + 4_800;
        let t1 = noise_len + tone_len - latency;
        let tone_in = energy(&input[t0..t1]);
        let tone_out = energy(&output[t0 + latency..t1 + latency]);
        assert!(tone_out > 0.9 * tone_in);
    }

    #[test]
    fn test_chunking_does_not_change_output() {
        let mut noise = Noise(3);
        let input: Vec<f32> = (0..10_000).map(|_| 0.1 * noise.next()).collect();

        let mut whole = input.clone();
        NoiseSuppressor::new(NoiseSuppressorConfig::default()).process(&mut whole);

        let mut chunked = input.clone();
        let mut ns = NoiseSuppressor::new(NoiseSuppressorConfig::default());
        for chunk in chunked.chunks_mut(37) {
            ns.process(chunk);
        }

        assert_eq!(whole, chunked);
    }

    #[test]
    fn test_reconstruction_with_unity_gain() {
        // floor 1.0 => every gain is exactly 1
        let cfg = NoiseSuppressorConfig {
            floor_gain: 1.0,
            ..NoiseSuppressorConfig::default()
        };
        let mut ns = NoiseSuppressor::new(cfg);
        let latency = ns.latency();
        let mut noise = Noise(11);
        let input: Vec<f32> = (0..8_192).map(|_| 0.3 * noise.next()).collect();
        let mut out = input.clone();
        ns.process(&mut out);

        // Skip the first frame where only one window has contributed
        for n in latency + 512..input.len() {
            assert!((out[n] - input[n - latency]).abs() < 1e-4);
        }
    }

    #[test]
    fn test_config_normalization() {
        let cfg = NoiseSuppressorConfig {
            frame_size: 300,
            floor_gain: 2.0,
            noise_adapt: 0.0,
            noise_rise: 0.5,
            ..NoiseSuppressorConfig::default()
        }
        .normalized();
        assert_eq!(cfg.frame_size, 512);
        assert_eq!(cfg.floor_gain, 1.0);
        assert_eq!(cfg.noise_adapt, 0.1);
        assert_eq!(cfg.noise_rise, 1.002);
    }
}
