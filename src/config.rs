//! Engine and pipeline configuration.
//!
//! `AecConfig` is immutable per initialization. Every buffer size the engine
//! uses comes from `AecConfig::layout`, which is tolerant: nonsensical values
//! are normalized (and logged) instead of rejected. Callers who prefer hard
//! failures call `validate` first, or use `EchoCanceller::try_new`.

use crate::dsp::noise_suppressor::NoiseSuppressorConfig;
use crate::dsp::utils::next_pow2;
use crate::error::ConfigError;
use anyhow::Context;
use log::warn;
use serde::{Deserialize, Serialize};

// =============================================================================
// Constants
// =============================================================================

pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;
pub const DEFAULT_BLOCK_SIZE: usize = 256;

// Extra delay-line slack beyond lag + filter + correlation block
const DELAY_LINE_MARGIN: usize = 4096;

// Output FIFO never smaller than this
const OUTPUT_FIFO_MIN: usize = 4096;

// Above this the filter forgets faster than it can learn
pub const MAX_LEAK: f32 = 0.5;

// =============================================================================
// Algorithm
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Algorithm {
    /// Partitioned-block frequency-domain adaptive filter.
    #[default]
    #[serde(rename = "pbfdaf")]
    Pbfdaf,
    /// Per-sample time-domain NLMS. Same delay tracking and DTD.
    #[serde(rename = "nlms")]
    TimeDomainNlms,
}

impl Algorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Pbfdaf => "PBFDAF",
            Algorithm::TimeDomainNlms => "Time-domain NLMS",
        }
    }
}

// =============================================================================
// AecConfig
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AecConfig {
    pub sample_rate: u32,
    /// Always 1 internally; multi-channel input is pre-summed by the host.
    pub channels: u16,
    /// Adaptive filter length in taps.
    pub filter_len: usize,
    pub mu: f32,
    pub epsilon: f32,
    pub leak: f32,
    /// Upper bound of the delay search.
    pub max_delay_ms: u32,
    /// Samples per delay-search block.
    pub corr_block: usize,
    pub dtd_alpha: f32,
    pub dtd_beta: f32,
    /// Adaptive filter block; FFT size is twice this.
    pub block_size: usize,
    /// Blocks adaptation stays frozen after a delay change.
    pub freeze_blocks: u32,
    pub algorithm: Algorithm,
}

impl Default for AecConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 1,
            filter_len: 1024,
            mu: 0.1,
            epsilon: 1e-6,
            leak: 1e-4,
            max_delay_ms: 80,
            corr_block: 1024,
            dtd_alpha: 2.0,
            dtd_beta: 1.5,
            block_size: DEFAULT_BLOCK_SIZE,
            freeze_blocks: 5,
            algorithm: Algorithm::Pbfdaf,
        }
    }
}

/// Buffer sizes derived from an `AecConfig`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AecLayout {
    pub sample_rate: u32,
    pub block_size: usize,
    pub fft_size: usize,
    pub partitions: usize,
    /// Effective filter length (`partitions × block_size` for PBFDAF).
    pub filter_len: usize,
    pub max_lag: usize,
    pub corr_block: usize,
    pub delay_capacity: usize,
    pub output_capacity: usize,
    pub mu: f32,
    pub epsilon: f32,
    pub leak: f32,
}

impl AecConfig {
    /// Strict check. Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::InvalidSampleRate(self.sample_rate));
        }
        if self.channels != 1 {
            return Err(ConfigError::InvalidChannels(self.channels));
        }
        if self.block_size == 0 || !self.block_size.is_power_of_two() {
            return Err(ConfigError::BlockSizeNotPowerOfTwo(self.block_size));
        }
        if self.filter_len < self.block_size {
            return Err(ConfigError::FilterTooShort {
                filter_len: self.filter_len,
                block_size: self.block_size,
            });
        }
        if !(self.mu.is_finite() && self.mu >= 0.0) {
            return Err(ConfigError::InvalidStepSize(self.mu));
        }
        if !(self.leak >= 0.0 && self.leak <= MAX_LEAK) {
            return Err(ConfigError::InvalidLeak(self.leak));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(ConfigError::InvalidEpsilon(self.epsilon));
        }
        if self.corr_block == 0 {
            return Err(ConfigError::InvalidCorrelationBlock(self.corr_block));
        }
        let thresholds_ok = self.dtd_alpha.is_finite()
            && self.dtd_beta.is_finite()
            && self.dtd_alpha > 0.0
            && self.dtd_beta > 0.0;
        if !thresholds_ok {
            return Err(ConfigError::InvalidDtdThreshold {
                alpha: self.dtd_alpha,
                beta: self.dtd_beta,
            });
        }
        Ok(())
    }

    /// Best-effort derived layout. Never fails; each normalization is logged.
    pub fn layout(&self) -> AecLayout {
        let d = AecConfig::default();

        let sample_rate = if self.sample_rate == 0 {
            warn!("sample rate 0, using {}", DEFAULT_SAMPLE_RATE);
            DEFAULT_SAMPLE_RATE
        } else {
            self.sample_rate
        };

        if self.channels != 1 {
            warn!(
                "{} channels configured; input must be pre-summed to mono",
                self.channels
            );
        }

        let block_size = next_pow2(self.block_size);
        if block_size != self.block_size {
            warn!("block size {} rounded to {}", self.block_size, block_size);
        }

        let partitions = self.filter_len.div_ceil(block_size).max(1);
        if self.filter_len < block_size {
            warn!(
                "filter length {} shorter than block {}, using one partition",
                self.filter_len, block_size
            );
        }
        let filter_len = match self.algorithm {
            Algorithm::Pbfdaf => partitions * block_size,
            Algorithm::TimeDomainNlms => self.filter_len.max(1),
        };

        let corr_block = if self.corr_block == 0 {
            warn!("correlation block 0, using {}", d.corr_block);
            d.corr_block
        } else {
            self.corr_block
        };

        let mu = if self.mu.is_finite() && self.mu >= 0.0 {
            self.mu
        } else {
            warn!("step size {} invalid, using {}", self.mu, d.mu);
            d.mu
        };

        let epsilon = if self.epsilon.is_finite() && self.epsilon > 0.0 {
            self.epsilon
        } else {
            warn!("epsilon {} invalid, using {}", self.epsilon, d.epsilon);
            d.epsilon
        };

        let leak = if self.leak.is_finite() {
            self.leak.clamp(0.0, MAX_LEAK)
        } else {
            0.0
        };
        if leak != self.leak {
            warn!("leak {} clamped to {}", self.leak, leak);
        }

        let max_lag = (self.max_delay_ms as u64 * sample_rate as u64 / 1000) as usize;

        AecLayout {
            sample_rate,
            block_size,
            fft_size: block_size * 2,
            partitions,
            filter_len,
            max_lag,
            corr_block,
            delay_capacity: max_lag + filter_len + corr_block + DELAY_LINE_MARGIN,
            output_capacity: OUTPUT_FIFO_MIN.max(block_size * 4),
            mu,
            epsilon,
            leak,
        }
    }
}

// =============================================================================
// PipelineConfig
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub aec: AecConfig,
    /// `None` disables the post filter.
    pub noise_suppressor: Option<NoiseSuppressorConfig>,
    /// One-pole DC blocker on the microphone before the echo canceller.
    pub dc_block: bool,
    pub dc_alpha: f32,
    /// Final hard clamp (linear); `None` disables it.
    pub output_ceiling: Option<f32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            aec: AecConfig::default(),
            noise_suppressor: Some(NoiseSuppressorConfig::default()),
            dc_block: true,
            dc_alpha: 0.995,
            output_ceiling: Some(0.99),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("failed to parse pipeline config JSON")
    }

    pub fn to_json_string(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize pipeline config")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.aec.validate()?;
        if let Some(ns) = &self.noise_suppressor {
            if ns.frame_size < 16 || !ns.frame_size.is_power_of_two() {
                return Err(ConfigError::InvalidNoiseFrame(ns.frame_size));
            }
        }
        if let Some(c) = self.output_ceiling {
            if !c.is_finite() || c <= 0.0 {
                return Err(ConfigError::InvalidOutputCeiling(c));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        assert!(AecConfig::default().validate().is_ok());
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_output_ceiling_must_be_positive_and_finite() {
        for bad in [f32::NAN, f32::INFINITY, 0.0, -0.5] {
            let cfg = PipelineConfig {
                output_ceiling: Some(bad),
                ..PipelineConfig::default()
            };
            assert!(matches!(
                cfg.validate(),
                Err(ConfigError::InvalidOutputCeiling(_))
            ));
        }
        let off = PipelineConfig {
            output_ceiling: None,
            ..PipelineConfig::default()
        };
        assert!(off.validate().is_ok());
    }

    #[test]
    fn test_default_layout() {
        let l = AecConfig::default().layout();
        assert_eq!(l.block_size, 256);
        assert_eq!(l.fft_size, 512);
        assert_eq!(l.partitions, 4);
        assert_eq!(l.max_lag, 3840);
        assert_eq!(l.delay_capacity, 3840 + 1024 + 1024 + 4096);
    }

    #[test]
    fn test_short_filter_normalized_to_one_partition() {
        let cfg = AecConfig {
            filter_len: 10,
            ..AecConfig::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::FilterTooShort {
                filter_len: 10,
                block_size: 256
            })
        );
        assert_eq!(cfg.layout().partitions, 1);

        let zero = AecConfig {
            filter_len: 0,
            ..AecConfig::default()
        };
        assert_eq!(zero.layout().partitions, 1);
    }

    #[test]
    fn test_partial_partition_rounds_up() {
        let cfg = AecConfig {
            filter_len: 300,
            ..AecConfig::default()
        };
        assert_eq!(cfg.layout().partitions, 2);
        assert_eq!(cfg.layout().filter_len, 512);
    }

    #[test]
    fn test_nonsense_is_tolerated() {
        let cfg = AecConfig {
            sample_rate: 0,
            block_size: 200,
            corr_block: 0,
            mu: f32::NAN,
            leak: 3.0,
            ..AecConfig::default()
        };
        assert!(cfg.validate().is_err());
        let l = cfg.layout();
        assert_eq!(l.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(l.block_size, 256);
        assert_eq!(l.corr_block, 1024);
        assert_eq!(l.mu, 0.1);
        assert_eq!(l.leak, MAX_LEAK);
    }

    #[test]
    fn test_json_partial_uses_defaults() {
        let cfg =
            PipelineConfig::from_json_str(r#"{ "aec": { "filter_len": 2048, "algorithm": "nlms" } }"#)
                .expect("valid json");
        assert_eq!(cfg.aec.filter_len, 2048);
        assert_eq!(cfg.aec.algorithm, Algorithm::TimeDomainNlms);
        assert_eq!(cfg.aec.mu, 0.1);
        assert!(cfg.noise_suppressor.is_some());
    }

    #[test]
    fn test_json_rejects_unknown_fields() {
        assert!(PipelineConfig::from_json_str(r#"{ "aec": { "filterLen": 10 } }"#).is_err());
    }

    #[test]
    fn test_json_round_trip_disabled_stages() {
        let cfg = PipelineConfig {
            noise_suppressor: None,
            output_ceiling: None,
            ..PipelineConfig::default()
        };
        let json = cfg.to_json_string().expect("serializes");
        let back = PipelineConfig::from_json_str(&json).expect("parses");
        assert_eq!(back, cfg);
    }
}
