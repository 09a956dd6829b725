//! Full capture chain: DC block → echo canceller → noise suppressor → ceiling.

use crate::config::PipelineConfig;
use crate::dsp::dc_blocker::DcBlocker;
use crate::dsp::noise_suppressor::NoiseSuppressor;
use crate::error::ConfigError;
use crate::params::ParameterStore;
use crate::processor::EchoCanceller;
use crate::stats::StatsReader;
use log::warn;
use std::sync::Arc;

// Microphone pre-stage scratch; longer host buffers are processed in slices
const MIC_SCRATCH_LEN: usize = 4096;

/// Usable clamp level. A non-finite ceiling disables the clamp, a negative
/// one is mirrored.
fn output_ceiling(ceiling: Option<f32>) -> Option<f32> {
    match ceiling {
        Some(c) if !c.is_finite() => {
            warn!("output ceiling {} is not finite, clamp disabled", c);
            None
        }
        Some(c) if c < 0.0 => {
            warn!("negative output ceiling {}, using {}", c, -c);
            Some(-c)
        }
        other => other,
    }
}

pub struct EchoSuppressionPipeline {
    config: PipelineConfig,
    aec: EchoCanceller,
    noise: Option<NoiseSuppressor>,
    dc: Option<DcBlocker>,
    ceiling: Option<f32>,
    mic_scratch: Vec<f32>,
}

impl EchoSuppressionPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            aec: EchoCanceller::new(config.aec),
            noise: config.noise_suppressor.map(NoiseSuppressor::new),
            dc: config.dc_block.then(|| DcBlocker::new(config.dc_alpha)),
            ceiling: output_ceiling(config.output_ceiling),
            mic_scratch: vec![0.0; MIC_SCRATCH_LEN],
            config,
        }
    }

    pub fn try_new(config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(config))
    }

    /// Rebuild all stages. Not real-time safe.
    pub fn initialize(&mut self, config: PipelineConfig) {
        self.aec.initialize(config.aec);
        self.noise = config.noise_suppressor.map(NoiseSuppressor::new);
        self.dc = config.dc_block.then(|| DcBlocker::new(config.dc_alpha));
        self.ceiling = output_ceiling(config.output_ceiling);
        self.config = config;
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn echo_canceller(&self) -> &EchoCanceller {
        &self.aec
    }

    pub fn noise_suppressor(&self) -> Option<&NoiseSuppressor> {
        self.noise.as_ref()
    }

    pub fn parameters(&self) -> Arc<ParameterStore> {
        self.aec.parameters()
    }

    pub fn stats_reader(&self) -> StatsReader {
        self.aec.stats_reader()
    }

    /// Total input-to-output delay in samples.
    pub fn latency(&self) -> usize {
        self.aec.latency() + self.noise.as_ref().map_or(0, |ns| ns.latency())
    }

    pub fn process(&mut self, mic: &[f32], reference: &[f32], out: &mut [f32]) {
        let frames = mic.len().min(reference.len()).min(out.len());
        if frames == 0 {
            return;
        }

        let mut done = 0;
        while done < frames {
            let n = (frames - done).min(self.mic_scratch.len());
            let range = done..done + n;

            let scratch = &mut self.mic_scratch[..n];
            scratch.copy_from_slice(&mic[range.clone()]);
            if let Some(dc) = self.dc.as_mut() {
                dc.process_in_place(scratch);
            }

            self.aec
                .process(&self.mic_scratch[..n], &reference[range.clone()], &mut out[range]);
            done += n;
        }

        let out = &mut out[..frames];
        if let Some(ns) = self.noise.as_mut() {
            ns.process(out);
        }
        if let Some(c) = self.ceiling {
            for s in out.iter_mut() {
                *s = s.clamp(-c, c);
            }
        }
    }
}
