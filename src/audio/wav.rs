//! WAV loading for the feature-pack tool and test fixtures.
//!
//! The engine core only ever consumes `&[f32]` spans; this module exists so
//! the shipped tooling can turn recordings into reference feature files.

use crate::error::{EngineError, Result};
use std::path::Path;

/// Decoded mono audio plus its declared sample rate.
#[derive(Debug)]
pub struct MonoAudio {
    /// Mono samples in `[-1, 1]`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

/// Load a WAV file as mono f32 samples, mixing channels down if needed.
///
/// # Errors
///
/// Returns `FileNotFound` if the file cannot be opened and `InvalidParams`
/// if the WAV data cannot be decoded.
pub fn load_wav_mono(path: &Path) -> Result<MonoAudio> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|_| EngineError::FileNotFound(path.display().to_string()))?;

    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| {
                    s.map_err(|e| EngineError::InvalidParams(format!("WAV read error: {e}")))
                        .map(|v| v as f32 / max)
                })
                .collect::<Result<Vec<f32>>>()?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map_err(|e| EngineError::InvalidParams(format!("WAV read error: {e}"))))
            .collect::<Result<Vec<f32>>>()?,
    };

    let samples = if spec.channels > 1 {
        let ch = spec.channels as usize;
        samples
            .chunks(ch)
            .map(|frame| frame.iter().sum::<f32>() / ch as f32)
            .collect()
    } else {
        samples
    };

    Ok(MonoAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn write_wav(path: &Path, channels: u16, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn loads_mono_int_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        write_wav(&path, 1, &[0, 16_384, -16_384]);

        let audio = load_wav_mono(&path).unwrap();
        assert_eq!(audio.sample_rate, 44_100);
        assert_eq!(audio.samples.len(), 3);
        assert!((audio.samples[1] - 0.5).abs() < 1e-3);
        assert!((audio.samples[2] + 0.5).abs() < 1e-3);
    }

    #[test]
    fn downmixes_stereo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        // One frame: L = 1.0, R = 0.0 → mono 0.5.
        write_wav(&path, 2, &[i16::MAX, 0]);

        let audio = load_wav_mono(&path).unwrap();
        assert_eq!(audio.samples.len(), 1);
        assert!((audio.samples[0] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn missing_file_is_file_not_found() {
        let err = load_wav_mono(Path::new("/nonexistent/clip.wav")).unwrap_err();
        assert_eq!(err.status(), "FILE_NOT_FOUND");
    }
}
