//! `wildcall-mfc`: pack a mono WAV recording into a master-call feature
//! file (`.mfc`) consumable by `load_master_call`.
//!
//! Usage: `wildcall-mfc <input.wav> <output.mfc>`

use anyhow::{bail, Context};
use std::path::PathBuf;
use tracing::info;
use wildcall::audio::wav::load_wav_mono;
use wildcall::config::{MfccConfig, StreamConfig};
use wildcall::dsp::mfcc::MfccExtractor;
use wildcall::engine::MasterCall;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args_os().skip(1);
    let (Some(input), Some(output)) = (args.next(), args.next()) else {
        bail!("usage: wildcall-mfc <input.wav> <output.mfc>");
    };
    let input = PathBuf::from(input);
    let output = PathBuf::from(output);

    let audio = load_wav_mono(&input)
        .with_context(|| format!("cannot load {}", input.display()))?;
    info!(
        "loaded {}: {} samples at {} Hz",
        input.display(),
        audio.samples.len(),
        audio.sample_rate
    );

    let stream = StreamConfig::default();
    let mut extractor = MfccExtractor::new(
        audio.sample_rate as f32,
        stream.frame_size,
        &MfccConfig::default(),
    )
    .context("cannot build MFCC extractor")?;

    if audio.samples.len() < stream.frame_size {
        bail!(
            "recording too short: {} samples, need at least {}",
            audio.samples.len(),
            stream.frame_size
        );
    }

    let mut features = Vec::new();
    let mut offset = 0usize;
    while offset + stream.frame_size <= audio.samples.len() {
        let frame = &audio.samples[offset..offset + stream.frame_size];
        features.push(extractor.extract(frame).context("MFCC extraction failed")?);
        offset += stream.hop_size;
    }

    MasterCall::write(&output, &features)
        .with_context(|| format!("cannot write {}", output.display()))?;
    info!(
        "wrote {}: {} frames x {} coefficients",
        output.display(),
        features.len(),
        extractor.coefficients()
    );
    Ok(())
}
