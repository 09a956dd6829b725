//! Full-duplex acoustic echo cancellation and noise suppression.
//!
//! Mono float frames in, echo-cancelled and denoised frames out.
//!
//! # Components
//! - [`EchoCanceller`]: partitioned-block frequency-domain adaptive filter
//!   with delay tracking and a double-talk gate (or a time-domain NLMS
//!   path, see [`Algorithm`]).
//! - [`NoiseSuppressor`]: STFT spectral-subtraction post filter.
//! - [`EchoSuppressionPipeline`]: DC block, canceller, suppressor and output
//!   ceiling in one call.
//! - [`ParameterStore`]: lock-free tunables, shared across threads.
//! - [`StatsReader`]: seqlock snapshots of ERLE, energies, lag and freeze
//!   state, readable from any thread.
//!
//! # Real-time contract
//! `process` never allocates, locks or panics. Everything is sized by
//! `new`/`initialize`, which must not run concurrently with `process`.
//!
//! ```no_run
//! use duplex_aec::{EchoSuppressionPipeline, PipelineConfig};
//!
//! let mut pipeline = EchoSuppressionPipeline::new(PipelineConfig::default());
//! let stats = pipeline.stats_reader();
//!
//! let mic = vec![0.0f32; 480];
//! let reference = vec![0.0f32; 480];
//! let mut out = vec![0.0f32; 480];
//! pipeline.process(&mic, &reference, &mut out);
//!
//! println!("ERLE {:.1} dB", stats.snapshot().avg_erle_db);
//! ```

pub mod config;
pub mod debug;
pub mod dsp;
pub mod error;
pub mod params;
pub mod pipeline;
pub mod presets;
pub mod processor;
pub mod stats;

pub use config::{AecConfig, AecLayout, Algorithm, PipelineConfig};
pub use dsp::noise_suppressor::{NoiseSuppressor, NoiseSuppressorConfig};
pub use error::ConfigError;
pub use params::{ParamSnapshot, ParameterStore};
pub use pipeline::EchoSuppressionPipeline;
pub use presets::{AecPreset, PresetManager};
pub use processor::EchoCanceller;
pub use stats::{stats_channel, AecStats, SeqLock, StatsReader, StatsWriter};
