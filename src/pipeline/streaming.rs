//! Hop-aligned streaming frame machine.
//!
//! Consumes arbitrary-length chunks through the session ring buffer, emits
//! one MFCC vector per hop, tracks window levels, and fans audio out to the
//! enhanced analyzer ensemble. Frame boundaries depend only on the sample
//! indices delivered, never on how the caller chunked them.

use crate::analyzers::enhanced::EnhancedCoordinator;
use crate::audio::ring_buffer::RingBuffer;
use crate::config::{EnhancedConfig, MfccConfig, StreamConfig};
use crate::dsp::mfcc::MfccExtractor;
use crate::error::{EngineError, Result};
use serde::Serialize;

/// Observable pipeline counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    /// MFCC frames emitted since creation/reset.
    pub frames_emitted: u64,
    /// Samples accepted since creation/reset.
    pub samples_consumed: u64,
}

/// Window-level loudness tracking.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelStats {
    /// RMS of the most recent frame.
    pub last_rms: f32,
    /// Largest absolute sample seen in any frame.
    pub peak: f32,
    /// Running mean of per-frame RMS values.
    pub mean_rms: f32,
}

/// Per-session streaming pipeline.
pub struct StreamingPipeline {
    frame_size: usize,
    hop_size: usize,
    sample_rate: f32,
    ring: RingBuffer,
    mfcc: MfccExtractor,
    coordinator: Option<EnhancedCoordinator>,
    feature_history: Vec<Vec<f32>>,
    /// Per-frame RMS values, parallel to `feature_history`.
    frame_rms: Vec<f32>,
    frame_scratch: Vec<f32>,
    levels: LevelStats,
    stats: PipelineStats,
}

impl StreamingPipeline {
    /// Build a pipeline for one session.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` on bad frame geometry and `InitFailed` if the
    /// enhanced ensemble rejects its configuration.
    pub fn new(
        sample_rate: f32,
        stream: &StreamConfig,
        mfcc: &MfccConfig,
        enhanced: Option<&EnhancedConfig>,
    ) -> Result<Self> {
        stream.validate()?;
        if sample_rate <= 0.0 {
            return Err(EngineError::InvalidParams(format!(
                "sample rate must be positive, got {sample_rate}"
            )));
        }

        let extractor = MfccExtractor::new(sample_rate, stream.frame_size, mfcc)?;
        let coordinator = match enhanced {
            Some(config) => Some(EnhancedCoordinator::new(sample_rate, config)?),
            None => None,
        };

        Ok(Self {
            frame_size: stream.frame_size,
            hop_size: stream.hop_size,
            sample_rate,
            ring: RingBuffer::new(stream.ring_capacity),
            mfcc: extractor,
            coordinator,
            feature_history: Vec::new(),
            frame_rms: Vec::new(),
            frame_scratch: vec![0.0; stream.frame_size],
            levels: LevelStats::default(),
            stats: PipelineStats::default(),
        })
    }

    /// Feed a chunk of samples. Emits one MFCC frame per hop as long as a
    /// full frame is buffered; returns how many frames were emitted.
    ///
    /// An empty chunk is an accepted no-op.
    ///
    /// # Errors
    ///
    /// Propagates extraction/analyzer errors; the ring buffer is not
    /// advanced past a failed frame.
    pub fn process_audio_chunk(&mut self, samples: &[f32]) -> Result<usize> {
        let mut emitted = 0usize;
        let mut remaining = samples;

        loop {
            let written = self.ring.write(remaining);
            remaining = &remaining[written..];
            self.stats.samples_consumed += written as u64;

            emitted += self.drain_ready_frames()?;

            if remaining.is_empty() {
                break;
            }
            if written == 0 {
                // Cannot happen with a validated ring (draining always frees
                // hop-sized space), but guard against livelock regardless.
                return Err(EngineError::ProcessingError(
                    "ring buffer made no progress".into(),
                ));
            }
        }

        Ok(emitted)
    }

    fn drain_ready_frames(&mut self) -> Result<usize> {
        let mut emitted = 0usize;
        while self.ring.available_read() >= self.frame_size {
            // Copy without advancing; the hop advance happens only after the
            // whole frame has been processed successfully.
            self.ring.peek(&mut self.frame_scratch);

            let features = self.mfcc.extract(&self.frame_scratch)?;

            if let Some(coordinator) = &mut self.coordinator {
                // Each frame overlaps the previous by frame−hop samples; the
                // ensemble gets each sample exactly once via the hop span.
                coordinator.process_chunk(&self.frame_scratch[..self.hop_size])?;
            }

            let rms = frame_rms(&self.frame_scratch);
            let peak = self
                .frame_scratch
                .iter()
                .fold(0.0f32, |acc, &s| acc.max(s.abs()));

            self.feature_history.push(features);
            self.frame_rms.push(rms);
            self.levels.last_rms = rms;
            self.levels.peak = self.levels.peak.max(peak);
            self.stats.frames_emitted += 1;
            let n = self.frame_rms.len() as f32;
            self.levels.mean_rms = self.levels.mean_rms + (rms - self.levels.mean_rms) / n;

            self.ring.advance(self.hop_size);
            emitted += 1;
        }
        Ok(emitted)
    }

    /// All feature vectors emitted so far, oldest first.
    #[must_use]
    pub fn feature_history(&self) -> &[Vec<f32>] {
        &self.feature_history
    }

    /// Number of feature vectors emitted so far.
    #[must_use]
    pub fn feature_count(&self) -> usize {
        self.feature_history.len()
    }

    /// Per-frame RMS values, parallel to the feature history.
    #[must_use]
    pub fn frame_rms_history(&self) -> &[f32] {
        &self.frame_rms
    }

    /// Seconds of audio represented by the feature history.
    #[must_use]
    pub fn processed_duration_secs(&self) -> f32 {
        self.feature_history.len() as f32 * self.hop_size as f32 / self.sample_rate
    }

    /// Hop size in samples.
    #[must_use]
    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    /// Coefficients per emitted feature vector.
    #[must_use]
    pub fn mfcc_coefficients(&self) -> usize {
        self.mfcc.coefficients()
    }

    /// Window-level loudness tracking.
    #[must_use]
    pub fn levels(&self) -> LevelStats {
        self.levels
    }

    /// Observable counters.
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// The enhanced ensemble, when enabled.
    #[must_use]
    pub fn enhanced(&self) -> Option<&EnhancedCoordinator> {
        self.coordinator.as_ref()
    }

    /// Clear buffered samples, history, levels, and the ensemble state.
    /// Allocations (ring storage, FFT plans) are kept.
    pub fn reset(&mut self) {
        self.ring.clear();
        self.feature_history.clear();
        self.frame_rms.clear();
        self.levels = LevelStats::default();
        self.stats = PipelineStats::default();
        if let Some(coordinator) = &mut self.coordinator {
            coordinator.reset();
        }
    }
}

fn frame_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}
