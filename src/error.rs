//! Configuration errors.
//!
//! Only strict construction (`EchoCanceller::try_new`,
//! `AecConfig::validate`) reports these. The processing path never fails.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Sample rate must be positive.
    InvalidSampleRate(u32),
    /// The engine is mono; channels must be pre-summed upstream.
    InvalidChannels(u16),
    /// The filter must cover at least one block.
    FilterTooShort { filter_len: usize, block_size: usize },
    BlockSizeNotPowerOfTwo(usize),
    /// mu must be finite and non-negative.
    InvalidStepSize(f32),
    /// leak must lie in `[0, 0.5]`.
    InvalidLeak(f32),
    InvalidEpsilon(f32),
    InvalidCorrelationBlock(usize),
    /// DTD thresholds must be positive and finite.
    InvalidDtdThreshold { alpha: f32, beta: f32 },
    InvalidNoiseFrame(usize),
    /// The output ceiling must be finite and positive.
    InvalidOutputCeiling(f32),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidSampleRate(sr) => write!(f, "invalid sample rate: {} Hz", sr),
            ConfigError::InvalidChannels(ch) => {
                write!(f, "expected a mono stream, got {} channels", ch)
            }
            ConfigError::FilterTooShort {
                filter_len,
                block_size,
            } => write!(
                f,
                "filter length {} is shorter than the block size {}",
                filter_len, block_size
            ),
            ConfigError::BlockSizeNotPowerOfTwo(n) => {
                write!(f, "block size {} is not a power of two", n)
            }
            ConfigError::InvalidStepSize(mu) => write!(f, "invalid step size mu: {}", mu),
            ConfigError::InvalidLeak(leak) => write!(f, "leak factor {} outside [0, 0.5]", leak),
            ConfigError::InvalidEpsilon(eps) => write!(f, "invalid regularization: {}", eps),
            ConfigError::InvalidCorrelationBlock(n) => {
                write!(f, "invalid correlation block size: {}", n)
            }
            ConfigError::InvalidDtdThreshold { alpha, beta } => write!(
                f,
                "invalid double-talk thresholds: alpha {}, beta {}",
                alpha, beta
            ),
            ConfigError::InvalidNoiseFrame(n) => {
                write!(f, "noise suppressor frame size {} is not a power of two", n)
            }
            ConfigError::InvalidOutputCeiling(c) => write!(f, "invalid output ceiling: {}", c),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_mentions_values() {
        let e = ConfigError::FilterTooShort {
            filter_len: 100,
            block_size: 256,
        };
        let msg = e.to_string();
        assert!(msg.contains("100"));
        assert!(msg.contains("256"));
    }

    #[test]
    fn test_converts_into_anyhow() {
        let e: anyhow::Error = ConfigError::InvalidSampleRate(0).into();
        assert!(e.to_string().contains("sample rate"));
    }
}
