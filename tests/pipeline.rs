mod common;

use common::*;
use duplex_aec::presets::builtin;
use duplex_aec::{AecPreset, EchoSuppressionPipeline, NoiseSuppressorConfig, PipelineConfig};

fn quiet_room() -> PipelineConfig {
    PipelineConfig {
        aec: test_config(),
        noise_suppressor: Some(NoiseSuppressorConfig::default()),
        dc_block: false,
        output_ceiling: None,
        ..PipelineConfig::default()
    }
}

#[test]
fn echo_and_noise_are_both_reduced() {
    let n = BLOCK * 800;
    let reference = white_noise(n, 0.1, 1);
    let hiss = white_noise(n, 0.002, 2);
    let mic: Vec<f32> = convolve(&reference, &ECHO_PATH)
        .iter()
        .zip(hiss.iter())
        .map(|(e, h)| e + h)
        .collect();

    let mut p = EchoSuppressionPipeline::new(quiet_room());
    let reader = p.stats_reader();
    let mut out = vec![0.0f32; n];
    for ((m, r), o) in mic
        .chunks(480)
        .zip(reference.chunks(480))
        .zip(out.chunks_mut(480))
    {
        p.process(m, r, o);
    }

    assert!(reader.snapshot().avg_erle_db > 15.0);
    let tail = n - BLOCK * 100;
    let mic_tail = energy(&mic[tail..]);
    let out_tail = energy(&out[tail..]);
    assert!(
        out_tail < mic_tail * 0.01,
        "residual {} vs mic {}",
        out_tail,
        mic_tail
    );
    assert!(out.iter().all(|v| v.is_finite()));
}

#[test]
fn near_end_speech_survives() {
    // No far end, so the canceller is transparent and only the suppressor
    // acts. Half a second of hiss lets it learn the floor before the tone.
    let n = 48_000;
    let onset = n / 2;
    let hiss = white_noise(n, 1e-3, 17);
    let tone_hz = 32.0 * SAMPLE_RATE as f32 / 512.0;
    let mic: Vec<f32> = (0..n)
        .map(|i| {
            let t = if i >= onset {
                0.3 * (2.0 * std::f32::consts::PI * tone_hz * i as f32 / SAMPLE_RATE as f32).sin()
            } else {
                0.0
            };
            t + hiss[i]
        })
        .collect();
    let reference = vec![0.0f32; n];

    let mut p = EchoSuppressionPipeline::new(quiet_room());
    let mut out = vec![0.0f32; n];
    p.process(&mic, &reference, &mut out);

    let latency = p.latency();
    let start = onset + latency + 2048;
    let kept = energy(&out[start..]);
    let sent = energy(&mic[start - latency..n - latency]);
    assert!(kept > sent * 0.8, "tone lost: {} of {}", kept, sent);
}

#[test]
fn dc_offset_is_removed() {
    let cfg = PipelineConfig {
        noise_suppressor: None,
        dc_block: true,
        ..quiet_room()
    };
    let mut p = EchoSuppressionPipeline::new(cfg);
    let n = 48_000;
    let mic = vec![0.25f32; n];
    let reference = vec![0.0f32; n];
    let mut out = vec![0.0f32; n];
    p.process(&mic, &reference, &mut out);
    assert!(out[n - 100..].iter().all(|v| v.abs() < 1e-3));
}

#[test]
fn initialize_switches_presets_and_keeps_handles() {
    let mut p = EchoSuppressionPipeline::new(PipelineConfig::default());
    let reader = p.stats_reader();
    let params = p.parameters();

    let headset = builtin().config_for(AecPreset::Headset);
    p.initialize(headset);
    assert!(p.noise_suppressor().is_none());
    assert_eq!(p.latency(), p.echo_canceller().latency());
    assert_eq!(p.config().aec.filter_len, headset.aec.filter_len);
    assert_eq!(params.get_mu(), headset.aec.mu);

    let sig = white_noise(4096, 0.1, 3);
    let mut out = vec![0.0f32; sig.len()];
    p.process(&sig, &sig, &mut out);
    assert_eq!(reader.snapshot().blocks_processed, 16);
}

#[test]
fn config_json_round_trips_through_pipeline() {
    let json = r#"{
        "aec": { "filter_len": 512, "mu": 0.2, "max_delay_ms": 20 },
        "noise_suppressor": { "floor_gain": 0.2 },
        "output_ceiling": 0.9
    }"#;
    let cfg = PipelineConfig::from_json_str(json).expect("valid config");
    assert!(cfg.validate().is_ok());
    let p = EchoSuppressionPipeline::try_new(cfg).expect("validated config");
    assert_eq!(p.config().aec.mu, 0.2);
    assert_eq!(p.noise_suppressor().map(|n| n.config().floor_gain), Some(0.2));

    let back = PipelineConfig::from_json_str(&cfg.to_json_string().expect("serializes"))
        .expect("parses back");
    assert_eq!(back, cfg);
}

#[test]
fn try_new_rejects_bad_noise_frame() {
    let cfg = PipelineConfig {
        noise_suppressor: Some(NoiseSuppressorConfig {
            frame_size: 300,
            ..NoiseSuppressorConfig::default()
        }),
        ..PipelineConfig::default()
    };
    assert!(EchoSuppressionPipeline::try_new(cfg).is_err());
}
