//! Quantified analyzer invariants exercised through the public API:
//! determinism, chunking invariance, score ranges, and signal-level
//! properties on synthetic audio.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use rand::{Rng, SeedableRng};
use wildcall::analyzers::cadence::CadenceAnalyzer;
use wildcall::analyzers::harmonic::HarmonicAnalyzer;
use wildcall::analyzers::pitch::PitchAnalyzer;
use wildcall::config::{
    CadenceConfig, EngineConfig, HarmonicConfig, MfccConfig, PitchConfig, SessionOptions,
    StreamConfig,
};
use wildcall::dsp::mfcc::MfccExtractor;
use wildcall::engine::AnalysisEngine;

const SAMPLE_RATE: f32 = 44_100.0;

fn sine(freq: f32, secs: f32) -> Vec<f32> {
    let n = (secs * SAMPLE_RATE) as usize;
    (0..n)
        .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / SAMPLE_RATE).sin() * 0.5)
        .collect()
}

fn white_noise(secs: f32, seed: u64) -> Vec<f32> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let n = (secs * SAMPLE_RATE) as usize;
    (0..n).map(|_| rng.r#gen::<f32>() - 0.5).collect()
}

#[test]
fn mfcc_is_bit_deterministic_across_extractors() {
    let frame = sine(523.25, 0.1);
    let config = MfccConfig::default();

    let mut first = MfccExtractor::new(SAMPLE_RATE, 2048, &config).unwrap();
    let mut second = MfccExtractor::new(SAMPLE_RATE, 2048, &config).unwrap();

    let a = first.extract(&frame[..2048]).unwrap();
    let b = second.extract(&frame[..2048]).unwrap();
    assert_eq!(a, b, "two extractors with one configuration must agree bit-for-bit");

    let again = first.extract(&frame[..2048]).unwrap();
    assert_eq!(a, again, "re-extraction must be bit-identical");
}

#[test]
fn feature_history_is_chunking_invariant_end_to_end() {
    let audio = sine(440.0, 1.0);
    let engine = AnalysisEngine::with_defaults().unwrap();

    let whole = engine
        .create_session(SAMPLE_RATE, SessionOptions::default())
        .unwrap();
    engine.process_audio_chunk(whole, &audio).unwrap();

    let pieces = engine
        .create_session(SAMPLE_RATE, SessionOptions::default())
        .unwrap();
    let mut offset = 0;
    let mut step = 1usize;
    while offset < audio.len() {
        let end = (offset + step).min(audio.len());
        engine.process_audio_chunk(pieces, &audio[offset..end]).unwrap();
        offset = end;
        step = step % 4999 + 37; // irregular chunk sizes
    }

    assert_eq!(
        engine.get_feature_count(whole).unwrap(),
        engine.get_feature_count(pieces).unwrap(),
        "chunking must not change frame boundaries"
    );
}

#[test]
fn similarity_score_fields_stay_in_range() {
    let dir = tempfile::tempdir().unwrap();
    let engine = AnalysisEngine::new(EngineConfig {
        master_call_dir: dir.path().to_path_buf(),
        ..EngineConfig::default()
    })
    .unwrap();

    // Reference: a tone. Query: noise — the farthest realistic input.
    let reference = sine(440.0, 1.0);
    let stream = StreamConfig::default();
    let mut extractor =
        MfccExtractor::new(SAMPLE_RATE, stream.frame_size, &MfccConfig::default()).unwrap();
    let mut features = Vec::new();
    let mut offset = 0;
    while offset + stream.frame_size <= reference.len() {
        features.push(
            extractor
                .extract(&reference[offset..offset + stream.frame_size])
                .unwrap(),
        );
        offset += stream.hop_size;
    }
    wildcall::engine::MasterCall::write(&dir.path().join("tone.mfc"), &features).unwrap();

    let id = engine
        .create_session(SAMPLE_RATE, SessionOptions::default())
        .unwrap();
    engine.load_master_call(id, "tone").unwrap();
    engine
        .process_audio_chunk(id, &white_noise(1.0, 42))
        .unwrap();

    let score = engine.get_similarity_score(id).unwrap();
    for (name, value) in [
        ("overall", score.overall),
        ("mfcc", score.mfcc),
        ("volume", score.volume),
        ("timing", score.timing),
        ("pitch", score.pitch),
        ("confidence", score.confidence),
    ] {
        assert!(
            (0.0..=1.0).contains(&value),
            "{name} out of range: {value}"
        );
    }
    // Noise against a tone must not look like a match.
    assert!(score.mfcc < 0.5, "noise scored {} against a tone", score.mfcc);
}

#[test]
fn pitch_tracks_a_pure_tone_within_five_percent() {
    let mut pitch = PitchAnalyzer::new(SAMPLE_RATE, &PitchConfig::default()).unwrap();
    pitch.process_chunk(&sine(440.0, 0.3)).unwrap();

    let result = pitch.current_pitch().unwrap();
    assert!(
        (result.frequency_hz - 440.0).abs() <= 440.0 * 0.05,
        "estimated {} Hz for a 440 Hz tone",
        result.frequency_hz
    );
    assert!(result.confidence >= 0.5, "confidence {}", result.confidence);
}

#[test]
fn hnr_orders_tone_harmonics_noise() {
    let mut harmonic = HarmonicAnalyzer::new(SAMPLE_RATE, &HarmonicConfig::default()).unwrap();

    let tone = sine(440.0, 0.2);
    let tone_hnr = harmonic.analyze(&tone[..4096]).unwrap().hnr_db;

    // Harmonic content buried in noise.
    let noisy: Vec<f32> = sine(440.0, 0.2)
        .iter()
        .zip(white_noise(0.2, 7).iter())
        .map(|(s, n)| s + n * 0.4)
        .collect();
    harmonic.reset();
    let noisy_hnr = harmonic.analyze(&noisy[..4096]).unwrap().hnr_db;

    let noise = white_noise(0.2, 9);
    harmonic.reset();
    let noise_hnr = harmonic.analyze(&noise[..4096]).unwrap().hnr_db;

    assert!(
        tone_hnr > noisy_hnr && noisy_hnr > noise_hnr,
        "HNR ordering violated: {tone_hnr} / {noisy_hnr} / {noise_hnr}"
    );
}

#[test]
fn cadence_recovers_pulse_train_tempo() {
    let mut cadence = CadenceAnalyzer::new(SAMPLE_RATE, &CadenceConfig::default()).unwrap();

    // 0.4 s period → 150 BPM, inside the configured range.
    let period = 0.4f32;
    let n = (4.0 * SAMPLE_RATE) as usize;
    let period_samples = (period * SAMPLE_RATE) as usize;
    let click_samples = (0.02 * SAMPLE_RATE) as usize;
    let train: Vec<f32> = (0..n)
        .map(|i| {
            if i % period_samples < click_samples {
                let t = i as f32 / SAMPLE_RATE;
                (2.0 * std::f32::consts::PI * 1000.0 * t).sin() * 0.8
            } else {
                0.0
            }
        })
        .collect();

    let profile = cadence.analyze_cadence(&train).unwrap();
    let expected = 60.0 / period;
    assert!(
        (profile.estimated_tempo_bpm - expected).abs() <= 5.0,
        "estimated {} BPM, expected {expected}",
        profile.estimated_tempo_bpm
    );
}

#[test]
fn session_ids_never_repeat_across_churn() {
    let engine = AnalysisEngine::with_defaults().unwrap();
    let mut seen = std::collections::HashSet::new();

    for round in 0..10 {
        let ids: Vec<_> = (0..5)
            .map(|_| {
                engine
                    .create_session(SAMPLE_RATE, SessionOptions::default())
                    .unwrap()
            })
            .collect();
        for id in &ids {
            assert!(seen.insert(*id), "round {round}: id {id} repeated");
        }
        for id in ids {
            engine.destroy_session(id).unwrap();
        }
    }
}
