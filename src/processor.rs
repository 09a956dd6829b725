//! Echo Canceller engine.
//!
//! Ties the delay estimator, adaptive filter, double-talk detector and ERLE
//! bookkeeping into one per-sample/per-block state machine.
//!
//! ## Per sample
//! 1. Feed the raw reference into the delay estimator (which may move the
//!    lag when a correlation block completes).
//! 2. Read the reference delayed by the current lag.
//! 3. Hand `(mic, delayed ref)` to the selected adaptive path.
//!
//! ## Per block (`block_size` samples)
//! Powers → ERLE → DTD → freeze decision → gated average → adaptation →
//! stats publish. Tunables are snapshotted once, at the start of the block.
//!
//! ## Threading
//! `process` runs on exactly one thread and never allocates or locks.
//! Tunables go through the shared `ParameterStore`; stats come out through
//! the seqlock `StatsReader`. `initialize` reallocates and must not race
//! with `process` (it takes `&mut self`, so the borrow checker enforces it
//! for in-process callers).

use crate::aec_log;
use crate::config::{AecConfig, AecLayout, Algorithm};
use crate::dsp::delay::DelayEstimator;
use crate::dsp::dtd::DoubleTalkDetector;
use crate::dsp::erle::ErleTracker;
use crate::dsp::nlms::TimeDomainNlms;
use crate::dsp::pbfdaf::PartitionedFilter;
use crate::error::ConfigError;
use crate::params::{ParamSnapshot, ParameterStore};
use crate::stats::{stats_channel, AecStats, StatsReader, StatsWriter};
use log::info;
use ringbuf::{Consumer, Producer, RingBuffer};
use std::sync::Arc;

// =============================================================================
// Block bookkeeping
// =============================================================================

/// Power sums of one block.
#[derive(Debug, Clone, Copy, Default)]
struct BlockPowers {
    echo: f32,
    error: f32,
    reference: f32,
}

/// What the block decision lets the adaptive path do.
#[derive(Debug, Clone, Copy)]
struct BlockDecision {
    adapt: bool,
    mu: f32,
}

/// Shared by both adaptive paths: everything that happens once per block
/// regardless of how the echo estimate was produced.
struct BlockControl {
    params: Arc<ParameterStore>,
    current: ParamSnapshot,

    dtd: DoubleTalkDetector,
    erle: ErleTracker,

    delay_hold: u32,
    /// Hold state for the samples of the next block.
    frozen: bool,
    delay_updates: u64,
    last_delay_change_ms: Option<f32>,

    sample_rate: f32,
    block_size: usize,

    writer: StatsWriter,
    stats: AecStats,
}

impl BlockControl {
    fn reset(&mut self) {
        self.current = self.params.snapshot();
        self.dtd.reset();
        self.erle.reset();
        self.delay_hold = 0;
        self.frozen = false;
        self.delay_updates = 0;
        self.last_delay_change_ms = None;
        self.stats = AecStats {
            mu: self.current.mu,
            ..AecStats::default()
        };
        self.writer.publish(&self.stats);
    }

    fn on_delay_change(&mut self, now_ms: f32) {
        self.delay_hold = self.params.get_freeze_blocks();
        self.frozen = self.frozen || self.delay_hold > 0;
        self.delay_updates += 1;
        self.last_delay_change_ms = Some(now_ms);
    }

    /// Close a block: smooth the energies, run the double-talk gate, decide
    /// whether the filter may adapt and move the gated ERLE average. Also
    /// counts down the delay hold so the next block's samples see it.
    fn finish_block(&mut self, powers: BlockPowers) -> BlockDecision {
        self.current = self.params.snapshot();
        let p = self.current;

        self.erle
            .update_energies(powers.echo, powers.error, powers.reference);

        let was_dtd = self.dtd.is_active();
        let dtd = self.dtd.update(
            self.erle.input_energy,
            self.erle.ref_energy,
            p.dtd_alpha,
            p.dtd_beta,
        );
        if dtd != was_dtd {
            aec_log!("double talk {}", if dtd { "start" } else { "end" });
        }

        let delay_frozen = self.delay_hold > 0;
        let freeze = dtd || delay_frozen;

        let elapsed_ms = self.elapsed_ms(self.erle.blocks * self.block_size as u64);
        self.erle.update_average(freeze, elapsed_ms);

        if self.delay_hold > 0 {
            self.delay_hold -= 1;
        }
        self.frozen = self.dtd.is_active() || self.delay_hold > 0;

        self.stats.dtd = dtd;
        self.stats.dtd_freeze_active = dtd;
        self.stats.delay_freeze_active = delay_frozen;
        self.stats.freeze = freeze;
        self.stats.mu = p.mu;

        BlockDecision {
            adapt: !freeze,
            mu: p.mu,
        }
    }

    /// Copy the block's measurements into the stats record and publish it
    /// through the seqlock.
    fn publish(&mut self, lag: usize, coherence: f32) {
        let s = &mut self.stats;
        s.instant_erle_db = self.erle.instant_db;
        s.avg_erle_db = self.erle.average_db;
        s.max_erle_db = self.erle.max_db;
        s.converged_time_ms = self.erle.converged_ms;
        s.mic_energy = self.erle.input_energy;
        s.ref_energy = self.erle.ref_energy;
        s.err_energy = self.erle.error_energy;
        s.current_lag = lag;
        s.current_lag_ms = lag as f32 * 1000.0 / self.sample_rate;
        s.coherence = coherence;
        s.delay_update_count = self.delay_updates;
        s.last_delay_change_ms = self.last_delay_change_ms;
        s.blocks_processed = self.erle.blocks;

        self.writer.publish(&self.stats);
    }

    #[inline]
    fn elapsed_ms(&self, samples: u64) -> f32 {
        (samples as f64 * 1000.0 / self.sample_rate as f64) as f32
    }
}

// =============================================================================
// Adaptive paths
// =============================================================================

/// PBFDAF: block-granular filtering, output through a FIFO.
struct BlockPath {
    filter: PartitionedFilter,
    ref_block: Vec<f32>,
    mic_block: Vec<f32>,
    echo: Vec<f32>,
    error: Vec<f32>,
    fill: usize,

    out_prod: Producer<f32>,
    out_cons: Consumer<f32>,
}

impl BlockPath {
    fn new(layout: &AecLayout) -> Self {
        let m = layout.block_size;
        let (out_prod, out_cons) = RingBuffer::new(layout.output_capacity).split();
        Self {
            filter: PartitionedFilter::new(m, layout.partitions),
            ref_block: vec![0.0; m],
            mic_block: vec![0.0; m],
            echo: vec![0.0; m],
            error: vec![0.0; m],
            fill: 0,
            out_prod,
            out_cons,
        }
    }

    /// Returns true when the block is full.
    #[inline]
    fn push(&mut self, mic: f32, reference: f32) -> bool {
        self.mic_block[self.fill] = mic;
        self.ref_block[self.fill] = reference;
        self.fill += 1;
        self.fill == self.mic_block.len()
    }

    /// Run the partitioned filter over the collected block and form the
    /// residual, which goes straight into the output FIFO.
    fn filter_block(&mut self) -> BlockPowers {
        self.filter.push_blocks(&self.ref_block, &self.mic_block);
        self.filter.estimate_echo(&mut self.echo);

        let mut powers = BlockPowers::default();
        for i in 0..self.mic_block.len() {
            let y = self.echo[i];
            let e = self.mic_block[i] - y;
            self.error[i] = e;

            powers.echo += y * y;
            powers.error += e * e;
            powers.reference += self.ref_block[i] * self.ref_block[i];

            // Full FIFO drops the sample rather than corrupting indices
            let _ = self.out_prod.push(e);
        }
        self.fill = 0;
        powers
    }

    #[inline]
    fn pop_output(&mut self) -> f32 {
        self.out_cons.pop().unwrap_or(0.0)
    }

    fn reset(&mut self) {
        self.filter.reset();
        self.fill = 0;
        while self.out_cons.pop().is_some() {}
    }
}

/// Time-domain NLMS: per-sample filtering, block-granular control.
struct SamplePath {
    filter: TimeDomainNlms,
    powers: BlockPowers,
    fill: usize,
    block_size: usize,
}

impl SamplePath {
    fn new(layout: &AecLayout) -> Self {
        Self {
            filter: TimeDomainNlms::new(layout.filter_len),
            powers: BlockPowers::default(),
            fill: 0,
            block_size: layout.block_size,
        }
    }

    /// Returns the residual sample and, at a block boundary, the block's
    /// power sums.
    #[inline]
    fn process(
        &mut self,
        mic: f32,
        reference: f32,
        adapt: bool,
        mu: f32,
        epsilon: f32,
        leak: f32,
    ) -> (f32, Option<BlockPowers>) {
        let y = self.filter.filter(reference);
        let e = mic - y;
        if adapt {
            self.filter.adapt(e, mu, epsilon, leak);
        }

        self.powers.echo += y * y;
        self.powers.error += e * e;
        self.powers.reference += reference * reference;
        self.fill += 1;

        if self.fill == self.block_size {
            let powers = self.powers;
            self.powers = BlockPowers::default();
            self.fill = 0;
            (e, Some(powers))
        } else {
            (e, None)
        }
    }

    fn reset(&mut self) {
        self.filter.reset();
        self.powers = BlockPowers::default();
        self.fill = 0;
    }
}

enum Canceller {
    Block(Box<BlockPath>),
    Sample(Box<SamplePath>),
}

impl Canceller {
    fn new(algorithm: Algorithm, layout: &AecLayout) -> Self {
        match algorithm {
            Algorithm::Pbfdaf => Canceller::Block(Box::new(BlockPath::new(layout))),
            Algorithm::TimeDomainNlms => Canceller::Sample(Box::new(SamplePath::new(layout))),
        }
    }

    fn clear_history(&mut self) {
        match self {
            Canceller::Block(path) => path.filter.clear_history(),
            Canceller::Sample(path) => path.filter.clear_history(),
        }
    }

    fn reset(&mut self) {
        match self {
            Canceller::Block(path) => path.reset(),
            Canceller::Sample(path) => path.reset(),
        }
    }
}

// =============================================================================
// EchoCanceller
// =============================================================================

pub struct EchoCanceller {
    config: AecConfig,
    layout: AecLayout,

    delay: DelayEstimator,
    canceller: Canceller,
    control: BlockControl,

    samples: u64,
}

impl EchoCanceller {
    /// Tolerant construction: odd configs are normalized, never rejected.
    pub fn new(config: AecConfig) -> Self {
        crate::debug::init();
        let layout = config.layout();
        let params = Arc::new(ParameterStore::from_config(&config));
        let (writer, _) = stats_channel();

        let mut aec = Self {
            config,
            layout,
            delay: DelayEstimator::new(layout.delay_capacity, layout.corr_block, layout.max_lag),
            canceller: Canceller::new(config.algorithm, &layout),
            control: BlockControl {
                current: params.snapshot(),
                params,
                dtd: DoubleTalkDetector::new(),
                erle: ErleTracker::new(),
                delay_hold: 0,
                frozen: false,
                delay_updates: 0,
                last_delay_change_ms: None,
                sample_rate: layout.sample_rate as f32,
                block_size: layout.block_size,
                writer,
                stats: AecStats::default(),
            },
            samples: 0,
        };
        aec.control.reset();
        aec.log_layout();
        aec
    }

    /// Strict construction: the config must pass `AecConfig::validate`.
    pub fn try_new(config: AecConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(config))
    }

    /// Rebuild every buffer from `config` and discard all adaptation
    /// history. Not real-time safe. Existing `ParameterStore` and
    /// `StatsReader` handles stay connected; tunables are reset to the
    /// config values.
    pub fn initialize(&mut self, config: AecConfig) {
        let layout = config.layout();
        self.config = config;
        self.layout = layout;
        self.delay = DelayEstimator::new(layout.delay_capacity, layout.corr_block, layout.max_lag);
        self.canceller = Canceller::new(config.algorithm, &layout);
        self.control.params.reset_from(&config);
        self.control.sample_rate = layout.sample_rate as f32;
        self.control.block_size = layout.block_size;
        self.control.reset();
        self.samples = 0;
        self.log_layout();
    }

    /// Discard all adaptation state and return to lag zero, keeping the
    /// current config and every buffer. Tunables go back to the config
    /// values. Nothing is allocated, so this may run between `process`
    /// calls on the audio thread.
    pub fn reset(&mut self) {
        self.control.params.reset_from(&self.config);
        self.delay.reset();
        self.canceller.reset();
        self.control.reset();
        self.samples = 0;
        aec_log!("echo canceller reset");
    }

    fn log_layout(&self) {
        let l = &self.layout;
        info!(
            "echo canceller ready: {}, {} Hz, {} partitions x {} (fft {}), {} taps, max lag {} samples",
            self.config.algorithm.name(),
            l.sample_rate,
            l.partitions,
            l.block_size,
            l.fft_size,
            l.filter_len,
            l.max_lag
        );
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &AecConfig {
        &self.config
    }

    pub fn layout(&self) -> &AecLayout {
        &self.layout
    }

    /// Shared handle for retuning from other threads.
    pub fn parameters(&self) -> Arc<ParameterStore> {
        Arc::clone(&self.control.params)
    }

    pub fn stats_reader(&self) -> StatsReader {
        self.control.writer.reader()
    }

    /// Last published stats, read on the owning thread.
    pub fn stats(&self) -> AecStats {
        self.control.stats
    }

    pub fn current_lag(&self) -> usize {
        self.delay.current_lag()
    }

    /// Samples between an input sample and its residual on the output.
    pub fn latency(&self) -> usize {
        match &self.canceller {
            Canceller::Block(_) => self.layout.block_size - 1,
            Canceller::Sample(_) => 0,
        }
    }

    pub fn filter(&self) -> Option<&PartitionedFilter> {
        match &self.canceller {
            Canceller::Block(path) => Some(&path.filter),
            Canceller::Sample(_) => None,
        }
    }

    pub fn nlms_weights(&self) -> Option<&[f32]> {
        match &self.canceller {
            Canceller::Block(_) => None,
            Canceller::Sample(path) => Some(path.filter.weights()),
        }
    }

    // =========================================================================
    // Runtime setters (real-time safe, take effect next block)
    // =========================================================================

    pub fn set_mu(&self, mu: f32) {
        self.control.params.set_mu(mu);
    }

    pub fn set_mu_range(&self, min: f32, max: f32) {
        self.control.params.set_mu_range(min, max);
    }

    pub fn set_dtd_alpha(&self, alpha: f32) {
        self.control.params.set_dtd_alpha(alpha);
    }

    pub fn set_dtd_beta(&self, beta: f32) {
        self.control.params.set_dtd_beta(beta);
    }

    pub fn set_freeze_blocks(&self, blocks: u32) {
        self.control.params.set_freeze_blocks(blocks);
    }

    // =========================================================================
    // Processing
    // =========================================================================

    /// Cancel echo from `mic` using `reference`, writing the residual to
    /// `out`. Processes `min(len)` frames; zero frames is a no-op.
    pub fn process(&mut self, mic: &[f32], reference: &[f32], out: &mut [f32]) {
        let frames = mic.len().min(reference.len()).min(out.len());
        if frames == 0 {
            return;
        }

        #[cfg(feature = "assert_process_allocs")]
        assert_no_alloc::assert_no_alloc(|| {
            self.process_frames(&mic[..frames], &reference[..frames], &mut out[..frames])
        });

        #[cfg(not(feature = "assert_process_allocs"))]
        self.process_frames(&mic[..frames], &reference[..frames], &mut out[..frames]);
    }

    fn process_frames(&mut self, mic: &[f32], reference: &[f32], out: &mut [f32]) {
        let epsilon = self.layout.epsilon;
        let leak = self.layout.leak;

        for ((&m, &r), o) in mic.iter().zip(reference.iter()).zip(out.iter_mut()) {
            // Delay tracking
            let search_allowed = !self.control.frozen;
            if let Some(lag) = self.delay.push(m, r, search_allowed) {
                let now_ms = self.control.elapsed_ms(self.samples);
                self.control.on_delay_change(now_ms);
                self.canceller.clear_history();
                aec_log!("delay changed to {} samples at {:.1} ms", lag, now_ms);
            }
            let x = self.delay.delayed_reference();
            self.samples += 1;

            match &mut self.canceller {
                Canceller::Block(path) => {
                    if path.push(m, x) {
                        let powers = path.filter_block();
                        let decision = self.control.finish_block(powers);
                        if decision.adapt {
                            path.filter.adapt(&path.error, decision.mu, epsilon, leak);
                        }
                        self.control
                            .publish(self.delay.current_lag(), path.filter.coherence());
                    }
                    *o = path.pop_output();
                }
                Canceller::Sample(path) => {
                    let adapt = !self.control.frozen;
                    let mu = self.control.current.mu;
                    let (e, block) = path.process(m, x, adapt, mu, epsilon, leak);
                    if let Some(powers) = block {
                        self.control.finish_block(powers);
                        self.control.publish(self.delay.current_lag(), 0.0);
                    }
                    *o = e;
                }
            }
        }
    }
}
