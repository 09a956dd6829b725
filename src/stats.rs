//! Statistics snapshot and its seqlock publisher.
//!
//! The processing thread publishes one `AecStats` per block; any number of
//! readers copy it out without ever blocking the writer.
//!
//! ## Protocol
//! - Writer: `seq` → odd, write the value, `seq` → even (release).
//! - Reader: load `seq` (acquire); if odd, retry. Copy the value, acquire
//!   fence, reload `seq`; if it moved, retry.
//!
//! `stats_channel()` hands out exactly one `StatsWriter` (not `Clone`, and
//! `publish` takes `&mut self`), which is what makes the single-writer
//! requirement hold by construction.

use serde::{Deserialize, Serialize};
use std::cell::UnsafeCell;
use std::hint;
use std::ptr;
use std::sync::atomic::{fence, AtomicUsize, Ordering};
use std::sync::Arc;

// =============================================================================
// Stats record
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AecStats {
    /// ERLE of the last block (dB, ≥ 0).
    pub instant_erle_db: f32,
    /// Gated average ERLE (dB).
    pub avg_erle_db: f32,
    pub max_erle_db: f32,
    /// Stream time when the average first crossed 10 dB.
    pub converged_time_ms: Option<f32>,

    pub mic_energy: f32,
    pub ref_energy: f32,
    pub err_energy: f32,

    pub current_lag: usize,
    pub current_lag_ms: f32,

    /// Double-talk detector hold is running.
    pub dtd: bool,
    pub dtd_freeze_active: bool,
    pub delay_freeze_active: bool,
    /// Adaptation skipped this block.
    pub freeze: bool,

    /// Effective step size used this block.
    pub mu: f32,
    pub coherence: f32,

    pub delay_update_count: u64,
    pub last_delay_change_ms: Option<f32>,
    pub blocks_processed: u64,
}

// =============================================================================
// SeqLock
// =============================================================================

/// Single-writer / multi-reader versioned cell for `Copy` data.
pub struct SeqLock<T> {
    seq: AtomicUsize,
    value: UnsafeCell<T>,
}

// SAFETY: readers only ever obtain validated copies; writes are restricted to
// a single writer by the owning API (`StatsWriter`).
unsafe impl<T: Copy + Send> Sync for SeqLock<T> {}

impl<T: Copy> SeqLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            seq: AtomicUsize::new(0),
            value: UnsafeCell::new(value),
        }
    }

    /// Caller must guarantee there is only one writer.
    fn write(&self, value: T) {
        let s = self.seq.load(Ordering::Relaxed);
        self.seq.store(s.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        // SAFETY: single writer; concurrent readers may race on these bytes
        // but discard any copy taken while `seq` was odd or changed.
        unsafe { ptr::write_volatile(self.value.get(), value) };

        self.seq.store(s.wrapping_add(2), Ordering::Release);
    }

    /// Consistent copy plus the (even) sequence it was taken at.
    pub fn read(&self) -> (usize, T) {
        loop {
            let s1 = self.seq.load(Ordering::Acquire);
            if s1 & 1 == 1 {
                hint::spin_loop();
                continue;
            }

            // SAFETY: T is Copy; a torn copy is detected below and thrown away.
            let value = unsafe { ptr::read_volatile(self.value.get()) };
            fence(Ordering::Acquire);

            let s2 = self.seq.load(Ordering::Relaxed);
            if s1 == s2 {
                return (s1, value);
            }
            hint::spin_loop();
        }
    }

    pub fn sequence(&self) -> usize {
        self.seq.load(Ordering::Acquire)
    }
}

// =============================================================================
// Publisher handles
// =============================================================================

/// Create a connected writer/reader pair.
pub fn stats_channel() -> (StatsWriter, StatsReader) {
    let shared = Arc::new(SeqLock::new(AecStats::default()));
    (
        StatsWriter {
            shared: Arc::clone(&shared),
        },
        StatsReader { shared },
    )
}

/// The one writing end. Owned by the processing thread.
pub struct StatsWriter {
    shared: Arc<SeqLock<AecStats>>,
}

impl StatsWriter {
    #[inline]
    pub fn publish(&mut self, stats: &AecStats) {
        self.shared.write(*stats);
    }

    pub fn reader(&self) -> StatsReader {
        StatsReader {
            shared: Arc::clone(&self.shared),
        }
    }
}

#[derive(Clone)]
pub struct StatsReader {
    shared: Arc<SeqLock<AecStats>>,
}

impl StatsReader {
    pub fn snapshot(&self) -> AecStats {
        self.shared.read().1
    }

    /// Snapshot with the sequence number it was validated against.
    pub fn snapshot_versioned(&self) -> (usize, AecStats) {
        self.shared.read()
    }

    /// Number of completed publishes so far (sequence / 2).
    pub fn publish_count(&self) -> usize {
        self.shared.sequence() / 2
    }
}
