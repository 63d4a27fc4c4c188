//! Per-session state: the streaming pipeline, realtime scorer, and the
//! loaded master reference.
//!
//! A session is the unit of isolation. It owns all mutable analyzer state;
//! the master reference is shared immutably and survives resets.

use crate::analyzers::enhanced::EnhancedAnalysisProfile;
use crate::config::{EngineConfig, SessionOptions};
use crate::engine::master_call::MasterCall;
use crate::engine::SessionId;
use crate::error::{EngineError, Result};
use crate::pipeline::scorer::{RealtimeFeedback, RealtimeScorer, ScoreInputs, SimilarityScore};
use crate::pipeline::streaming::{LevelStats, PipelineStats, StreamingPipeline};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Fraction of the session's peak frame RMS that counts as "active" when the
/// finalize pass selects the call segment.
const SEGMENT_GATE_RATIO: f32 = 0.1;

/// Aggregate summary produced by `finalize_session`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// DTW similarity of the energy-gated active segment against the full
    /// reference (falls back to the full history when gating finds nothing).
    pub similarity_at_finalize: f32,
    /// Latest pitch estimate, Hz.
    pub pitch_hz: f32,
    /// Latest pitch confidence.
    pub pitch_confidence: f32,
    /// Latest harmonic fundamental, Hz.
    pub harmonic_fundamental_hz: f32,
    /// Latest spectral centroid, Hz.
    pub spectral_centroid_hz: f32,
    /// Latest harmonic confidence.
    pub harmonic_confidence: f32,
    /// Latest tempo estimate, BPM.
    pub tempo_bpm: f32,
    /// Latest tempo confidence.
    pub tempo_confidence: f32,
    /// Latest periodicity strength.
    pub rhythm_strength: f32,
    /// Start of the active segment, milliseconds from session start.
    pub segment_start_ms: f32,
    /// Duration of the active segment, milliseconds.
    pub segment_duration_ms: f32,
    /// Mean per-frame RMS over the session.
    pub rms_level: f32,
    /// Peak absolute sample over the session.
    pub peak_level: f32,
    /// Gain that would normalize the session peak to full scale.
    pub normalization_scalar: f32,
    /// Coefficient of variation of the per-frame RMS series.
    pub loudness_deviation: f32,
    /// Samples consumed by the pipeline.
    pub samples_analyzed: u64,
    /// Whether any audio was analyzed.
    pub valid: bool,
    /// Always true for a summary produced by finalize.
    pub finalized: bool,
}

impl SessionSummary {
    /// Serialize to JSON (non-authoritative convenience form).
    ///
    /// # Errors
    ///
    /// Returns `ProcessingError` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| EngineError::ProcessingError(format!("JSON export failed: {e}")))
    }
}

/// One isolated analysis context.
pub struct Session {
    id: SessionId,
    sample_rate: f32,
    dtw_config: crate::config::DtwConfig,
    pipeline: StreamingPipeline,
    scorer: RealtimeScorer,
    master: Option<Arc<MasterCall>>,
}

impl Session {
    /// Build a session from the engine configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` for a non-positive sample rate or bad
    /// configuration and `InitFailed` if a component cannot be built.
    pub fn new(
        id: SessionId,
        sample_rate: f32,
        config: &EngineConfig,
        options: &SessionOptions,
    ) -> Result<Self> {
        if sample_rate <= 0.0 {
            return Err(EngineError::InvalidParams(format!(
                "sample rate must be positive, got {sample_rate}"
            )));
        }

        let enhanced = options.enable_enhanced_analysis.then_some(&config.enhanced);
        let pipeline =
            StreamingPipeline::new(sample_rate, &config.stream, &config.mfcc, enhanced)?;
        let scorer = RealtimeScorer::new(sample_rate, &config.scorer, &config.dtw)?;

        Ok(Self {
            id,
            sample_rate,
            dtw_config: config.dtw.clone(),
            pipeline,
            scorer,
            master: None,
        })
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Attach a loaded master reference. Its coefficient count must match
    /// the session's MFCC configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` on a coefficient-count mismatch; the session
    /// is left unchanged in that case.
    pub fn set_master(&mut self, master: Arc<MasterCall>) -> Result<()> {
        let expected = self.pipeline.mfcc_coefficients();
        if master.num_coeffs() != expected {
            return Err(EngineError::InvalidParams(format!(
                "master call '{}' has {} coefficients, session expects {expected}",
                master.name(),
                master.num_coeffs()
            )));
        }
        self.scorer
            .set_master(Arc::clone(&master), self.pipeline.hop_size());
        self.master = Some(master);
        Ok(())
    }

    /// Whether a master reference is loaded.
    #[must_use]
    pub fn has_master(&self) -> bool {
        self.master.is_some()
    }

    /// Feed audio. An empty chunk is an accepted no-op. When a master is
    /// loaded and new frames were emitted, the scorer ticks.
    ///
    /// # Errors
    ///
    /// Propagates pipeline and scorer errors; on error the ring buffer is
    /// not advanced past the failure point.
    pub fn process_audio_chunk(&mut self, samples: &[f32]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let emitted = self.pipeline.process_audio_chunk(samples)?;

        if emitted > 0 && self.scorer.has_master() {
            let pitch_confidence = self
                .pipeline
                .enhanced()
                .and_then(|c| c.current_analysis().ok())
                .and_then(|profile| profile.pitch.map(|p| p.confidence));
            let inputs = ScoreInputs {
                features: self.pipeline.feature_history(),
                samples_analyzed: self.pipeline.stats().samples_consumed,
                pitch_confidence,
            };
            self.scorer.update(&inputs)?;
        }
        Ok(())
    }

    /// Most recent similarity score.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientData` when no master is loaded or no score has
    /// been computed.
    pub fn similarity_score(&self) -> Result<SimilarityScore> {
        if !self.scorer.has_master() {
            return Err(EngineError::InsufficientData("no master call loaded"));
        }
        self.scorer.current_score()
    }

    /// Realtime feedback for display.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientData` before any score exists.
    pub fn realtime_feedback(&self) -> Result<RealtimeFeedback> {
        self.scorer.feedback()
    }

    /// Bounded score history, newest first.
    #[must_use]
    pub fn scoring_history(&self, n: usize) -> Vec<SimilarityScore> {
        self.scorer.scoring_history(n)
    }

    /// Latest fused enhanced-analysis profile.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientData` when enhanced analysis is disabled or has
    /// not produced a result yet.
    pub fn enhanced_analysis(&self) -> Result<EnhancedAnalysisProfile> {
        let coordinator = self
            .pipeline
            .enhanced()
            .ok_or(EngineError::InsufficientData("enhanced analysis disabled"))?;
        coordinator.current_analysis()
    }

    /// Number of feature vectors emitted.
    #[must_use]
    pub fn feature_count(&self) -> usize {
        self.pipeline.feature_count()
    }

    /// Pipeline counters.
    #[must_use]
    pub fn pipeline_stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    /// Window-level loudness tracking.
    #[must_use]
    pub fn levels(&self) -> LevelStats {
        self.pipeline.levels()
    }

    /// End-of-stream pass: selects the energy-gated active segment, runs one
    /// refined DTW against the full reference, and gathers the analyzer
    /// summaries and level metrics.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientData` when no master is loaded or nothing has
    /// been processed.
    pub fn finalize(&mut self) -> Result<SessionSummary> {
        let master = self
            .master
            .clone()
            .ok_or(EngineError::InsufficientData("no master call loaded"))?;
        let features = self.pipeline.feature_history();
        if features.is_empty() {
            return Err(EngineError::InsufficientData("no audio processed"));
        }

        let hop_secs = self.pipeline.hop_size() as f32 / self.sample_rate;
        let rms = self.pipeline.frame_rms_history();

        // Active segment: first to last frame whose RMS clears the gate.
        let gate = rms.iter().fold(0.0f32, |acc, &v| acc.max(v)) * SEGMENT_GATE_RATIO;
        let first = rms.iter().position(|&v| v >= gate);
        let last = rms.iter().rposition(|&v| v >= gate);
        let (segment, start_frame) = match (first, last) {
            (Some(a), Some(b)) if b >= a => (&features[a..=b], a),
            _ => (features, 0),
        };

        let mut summary = SessionSummary {
            segment_start_ms: start_frame as f32 * hop_secs * 1000.0,
            segment_duration_ms: segment.len() as f32 * hop_secs * 1000.0,
            samples_analyzed: self.pipeline.stats().samples_consumed,
            valid: true,
            finalized: true,
            ..SessionSummary::default()
        };

        // Refined alignment: unbanded DTW over the active segment, keeping
        // the configured sensitivity.
        let mut dtw = crate::dsp::dtw::DtwComparator::new(crate::config::DtwConfig {
            band_radius: None,
            ..self.dtw_config.clone()
        });
        summary.similarity_at_finalize = dtw.compare(segment, master.features())?.similarity;

        if let Some(coordinator) = self.pipeline.enhanced() {
            if let Ok(profile) = coordinator.current_analysis() {
                if let Some(pitch) = &profile.pitch {
                    summary.pitch_hz = pitch.frequency_hz;
                    summary.pitch_confidence = pitch.confidence;
                }
                if let Some(harmonic) = &profile.harmonic {
                    summary.harmonic_fundamental_hz = harmonic.fundamental_hz;
                    summary.spectral_centroid_hz = harmonic.spectral_centroid_hz;
                    summary.harmonic_confidence = harmonic.confidence;
                }
                if let Some(cadence) = &profile.cadence {
                    summary.tempo_bpm = cadence.estimated_tempo_bpm;
                    summary.tempo_confidence = cadence.tempo_confidence;
                    summary.rhythm_strength = cadence.periodicity.periodicity_strength;
                }
            }
        }

        let levels = self.pipeline.levels();
        summary.rms_level = levels.mean_rms;
        summary.peak_level = levels.peak;
        summary.normalization_scalar = if levels.peak > 0.0 {
            1.0 / levels.peak
        } else {
            0.0
        };
        summary.loudness_deviation = coefficient_of_variation(rms);

        debug!(
            session = %self.id,
            similarity = summary.similarity_at_finalize,
            "session finalized"
        );
        Ok(summary)
    }

    /// Clear all analysis state. The master reference and configuration are
    /// preserved; buffers keep their allocations.
    pub fn reset(&mut self) {
        self.pipeline.reset();
        self.scorer.reset();
        debug!(session = %self.id, "session reset");
    }
}

fn coefficient_of_variation(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = values
        .iter()
        .map(|v| {
            let d = v - mean;
            d * d
        })
        .sum::<f32>()
        / values.len() as f32;
    variance.sqrt() / mean
}
