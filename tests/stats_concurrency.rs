mod common;

use common::*;
use duplex_aec::{AecStats, EchoCanceller};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

const BLOCKS: usize = 1500;
const READERS: usize = 4;

fn check_consistent(s: &AecStats) {
    assert_eq!(s.freeze, s.dtd_freeze_active || s.delay_freeze_active);
    assert_eq!(s.dtd, s.dtd_freeze_active);
    assert!(s.instant_erle_db.is_finite() && s.instant_erle_db >= 0.0);
    assert!(s.avg_erle_db.is_finite());
    assert!(s.max_erle_db >= s.avg_erle_db);
    assert!(s.mic_energy.is_finite() && s.ref_energy.is_finite() && s.err_energy.is_finite());
    let lag_ms = s.current_lag as f32 * 1000.0 / SAMPLE_RATE as f32;
    assert!((s.current_lag_ms - lag_ms).abs() < 1e-3, "torn lag fields");
}

#[test]
fn readers_never_see_torn_snapshots() {
    let n = BLOCKS * BLOCK;
    let reference = lowpassed_noise(n, 1.0, 31337);
    let mut mic = convolve(&reference, &[(60, 0.4), (75, 0.2)]);
    // Near-end bursts so freeze flags flip while readers watch
    let talker = white_noise(n, 0.5, 4242);
    for b in (300..BLOCKS).step_by(400) {
        for i in b * BLOCK..(b + 20) * BLOCK {
            mic[i] += talker[i];
        }
    }

    let mut aec = EchoCanceller::new(test_config());
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let reader = aec.stats_reader();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut last_blocks = 0u64;
                let mut reads = 0usize;
                while !done.load(Ordering::Acquire) {
                    let (seq, s) = reader.snapshot_versioned();
                    assert_eq!(seq % 2, 0, "odd sequence returned");
                    check_consistent(&s);
                    assert!(s.blocks_processed >= last_blocks, "stats went backwards");
                    last_blocks = s.blocks_processed;
                    reads += 1;
                }
                reads
            })
        })
        .collect();

    let engine = thread::spawn(move || {
        let mut out = vec![0.0f32; BLOCK];
        for (m, r) in mic.chunks(BLOCK).zip(reference.chunks(BLOCK)) {
            aec.process(m, r, &mut out);
        }
        aec
    });

    let aec = engine.join().expect("engine thread panicked");
    done.store(true, Ordering::Release);
    for r in readers {
        assert!(r.join().expect("reader thread panicked") > 0);
    }

    let last = aec.stats_reader().snapshot();
    assert_eq!(last.blocks_processed, BLOCKS as u64);
    assert_eq!(last, aec.stats());
    check_consistent(&last);
}

#[test]
fn parameters_can_be_retuned_from_another_thread() {
    let aec = EchoCanceller::new(test_config());
    let params = aec.parameters();

    let tuner = thread::spawn(move || {
        for i in 0..1000 {
            params.set_mu(0.01 * (i % 50) as f32);
            params.set_dtd_thresholds(2.0 + (i % 3) as f32, 1.5);
            params.set_freeze_blocks(i % 8);
        }
        params.set_mu(0.2);
    });
    tuner.join().expect("tuner panicked");

    let snap = aec.parameters().snapshot();
    assert_eq!(snap.mu, 0.2);
    assert_eq!(snap.dtd_beta, 1.5);
    assert_eq!(snap.freeze_blocks, 999 % 8);
}

#[cfg(feature = "debug")]
#[test]
fn engines_on_separate_threads_share_event_log() {
    let engines: Vec<_> = (0..4u64)
        .map(|t| {
            thread::spawn(move || {
                let n = BLOCK * 40;
                let reference = lowpassed_noise(n, 1.0, 500 + t);
                let mic = delayed(&reference, 37 + 20 * t as usize, 0.5);
                let mut aec = EchoCanceller::new(test_config());
                let mut out = vec![0.0f32; BLOCK];
                for (m, r) in mic.chunks(BLOCK).zip(reference.chunks(BLOCK)) {
                    aec.process(m, r, &mut out);
                }
                aec.stats().delay_update_count
            })
        })
        .collect();

    let changes: u64 = engines
        .into_iter()
        .map(|h| h.join().expect("engine thread panicked"))
        .sum();
    assert!(changes >= 4);
    assert!(duplex_aec::debug::drain() >= 1);
}
