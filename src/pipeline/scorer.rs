//! Realtime multi-dimensional similarity scoring against the master call.
//!
//! Each update tick compares the recent feature tail against the reference
//! with DTW, folds in volume and timing descriptors (and optionally pitch),
//! and emits a weighted [`SimilarityScore`]. Ticks are paced by *sample
//! time*, not wall clock, so identical input produces identical scores.

use crate::config::{DtwConfig, ScorerConfig};
use crate::dsp::dtw::DtwComparator;
use crate::engine::master_call::MasterCall;
use crate::error::{EngineError, Result};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;

/// Quality-band cutoffs on the overall distance, best band first. A larger
/// distance maps to the better label; below the last cutoff the floor
/// applies.
const QUALITY_BANDS: [(f32, &str); 4] = [
    (0.025, "Excellent"),
    (0.015, "Very good"),
    (0.007, "Good"),
    (0.003, "Fair"),
];
const QUALITY_FLOOR: &str = "Needs improvement";

/// Scale on the log-energy difference for the volume sub-score.
const VOLUME_SCALE: f32 = 2.0;
/// History window used for the trending score.
const TREND_WINDOW: usize = 5;

/// Multi-dimensional similarity snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityScore {
    /// Weighted combination of the sub-scores, `[0, 1]`.
    pub overall: f32,
    /// DTW similarity of the MFCC tail, `[0, 1]`.
    pub mfcc: f32,
    /// Loudness agreement with the reference, `[0, 1]`.
    pub volume: f32,
    /// Temporal-extent agreement with the reference, `[0, 1]`.
    pub timing: f32,
    /// Pitch stability score, `[0, 1]` (0 when the pitch path is disabled).
    pub pitch: f32,
    /// Confidence in the snapshot, `[0, 1]`.
    pub confidence: f32,
    /// Samples consumed when this snapshot was taken.
    pub samples_analyzed: u64,
    /// Whether `confidence` met the configured threshold.
    pub is_reliable: bool,
    /// Whether `overall` met the configured match threshold.
    pub is_match: bool,
}

impl SimilarityScore {
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

/// User-facing scoring feedback.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeFeedback {
    /// Most recent score.
    pub current: SimilarityScore,
    /// Field-wise mean over the last few scores.
    pub trending: SimilarityScore,
    /// Best score seen so far (by `overall`).
    pub peak: SimilarityScore,
    /// Quality band derived from the current DTW distance.
    pub quality_assessment: String,
    /// One-line coaching hint derived from the weakest sub-score.
    pub recommendation: String,
    /// Processed duration over reference duration, clamped to `[0, 1]`.
    pub progress_ratio: f32,
}

impl RealtimeFeedback {
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

/// Inputs for one scoring tick, gathered by the session. The volume
/// descriptor rides along in coefficient 0 of the feature vectors.
pub struct ScoreInputs<'a> {
    /// Full feature history, oldest first.
    pub features: &'a [Vec<f32>],
    /// Samples consumed by the pipeline so far.
    pub samples_analyzed: u64,
    /// Current pitch confidence, when the pitch path is running.
    pub pitch_confidence: Option<f32>,
}

/// Streaming scorer bound to one session.
pub struct RealtimeScorer {
    config: ScorerConfig,
    sample_rate: f32,
    dtw: DtwComparator,
    master: Option<Arc<MasterCall>>,
    /// Reference duration in samples (frames × hop), set with the master.
    reference_samples: u64,
    /// Newest-first bounded score history.
    history: VecDeque<SimilarityScore>,
    last_update_samples: u64,
    /// Normalized DTW distance behind the latest score.
    last_distance: f32,
}

impl RealtimeScorer {
    /// Create a scorer.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` if the scorer configuration fails validation.
    pub fn new(sample_rate: f32, config: &ScorerConfig, dtw: &DtwConfig) -> Result<Self> {
        config.validate()?;
        if sample_rate <= 0.0 {
            return Err(EngineError::InvalidParams(format!(
                "sample rate must be positive, got {sample_rate}"
            )));
        }
        Ok(Self {
            config: config.clone(),
            sample_rate,
            dtw: DtwComparator::new(dtw.clone()),
            master: None,
            reference_samples: 0,
            history: VecDeque::new(),
            last_update_samples: 0,
            last_distance: 0.0,
        })
    }

    /// Attach the master reference. `hop_size` converts its frame count to a
    /// duration for the timing/progress metrics.
    pub fn set_master(&mut self, master: Arc<MasterCall>, hop_size: usize) {
        self.reference_samples = master.num_frames() as u64 * hop_size as u64;
        self.master = Some(master);
    }

    /// Whether a master reference is loaded.
    #[must_use]
    pub fn has_master(&self) -> bool {
        self.master.is_some()
    }

    /// Run one scoring tick if at least `update_rate_ms` of sample time has
    /// passed since the previous tick.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientData` when no master is loaded or the feature
    /// history is empty; DTW errors propagate as-is.
    pub fn update(&mut self, inputs: &ScoreInputs<'_>) -> Result<()> {
        let master = self
            .master
            .clone()
            .ok_or(EngineError::InsufficientData("no master call loaded"))?;
        if inputs.features.is_empty() {
            return Err(EngineError::InsufficientData("no features extracted yet"));
        }

        let tick_samples = (self.config.update_rate_ms / 1000.0 * self.sample_rate) as u64;
        if !self.history.is_empty()
            && inputs.samples_analyzed < self.last_update_samples + tick_samples
        {
            return Ok(());
        }
        self.last_update_samples = inputs.samples_analyzed;

        // MFCC: DTW over the feature tail, capped at the reference length.
        let tail_len = inputs.features.len().min(master.num_frames());
        let tail = &inputs.features[inputs.features.len() - tail_len..];
        let dtw = self.dtw.compare(tail, master.features())?;
        self.last_distance = dtw.normalized_cost;
        let mfcc = dtw.similarity.clamp(0.0, 1.0);

        // Volume: agreement of mean log-energy (coefficient 0).
        let query_energy =
            tail.iter().map(|row| row[0]).sum::<f32>() / tail_len as f32;
        let volume =
            (-(query_energy - master.mean_energy()).abs() / VOLUME_SCALE).exp().clamp(0.0, 1.0);

        // Timing: temporal-extent ratio of processed vs reference duration.
        let timing = if self.reference_samples > 0 && inputs.samples_analyzed > 0 {
            let processed = inputs.samples_analyzed as f32;
            let reference = self.reference_samples as f32;
            (processed.min(reference) / processed.max(reference)).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let pitch = inputs.pitch_confidence.unwrap_or(0.0).clamp(0.0, 1.0);
        // The pitch dimension participates only when it carries weight and a
        // descriptor was supplied; it is still reported either way.
        let use_pitch = inputs.pitch_confidence.is_some() && self.config.pitch_weight > 0.0;

        let mut weighted = self.config.mfcc_weight * mfcc
            + self.config.volume_weight * volume
            + self.config.timing_weight * timing;
        let mut weight_sum =
            self.config.mfcc_weight + self.config.volume_weight + self.config.timing_weight;
        if use_pitch {
            weighted += self.config.pitch_weight * pitch;
            weight_sum += self.config.pitch_weight;
        }
        let overall = if weight_sum > 0.0 {
            (weighted / weight_sum).clamp(0.0, 1.0)
        } else {
            0.0
        };

        // Confidence: coverage grows monotonically with samples until
        // saturation, then the sub-score agreement dominates.
        let saturation = (self.config.saturation_secs * self.sample_rate).max(1.0);
        let coverage = (inputs.samples_analyzed as f32 / saturation).min(1.0);
        let mut included = vec![mfcc, volume, timing];
        if use_pitch {
            included.push(pitch);
        }
        let spread = included.iter().fold(0.0f32, |acc, &s| acc.max(s))
            - included.iter().fold(1.0f32, |acc, &s| acc.min(s));
        let agreement = (1.0 - spread).clamp(0.0, 1.0);
        let confidence = (coverage * (0.5 + 0.5 * agreement)).clamp(0.0, 1.0);

        let score = SimilarityScore {
            overall,
            mfcc,
            volume,
            timing,
            pitch,
            confidence,
            samples_analyzed: inputs.samples_analyzed,
            is_reliable: confidence >= self.config.confidence_threshold,
            is_match: overall >= self.config.match_threshold,
        };

        self.history.push_front(score);
        self.history.truncate(self.config.history_depth);
        Ok(())
    }

    /// Most recent score.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientData` before the first tick.
    pub fn current_score(&self) -> Result<SimilarityScore> {
        self.history
            .front()
            .copied()
            .ok_or(EngineError::InsufficientData("no score computed yet"))
    }

    /// Up to `n` historical scores, newest first.
    #[must_use]
    pub fn scoring_history(&self, n: usize) -> Vec<SimilarityScore> {
        self.history.iter().take(n).copied().collect()
    }

    /// Build user-facing feedback from the scoring state.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientData` before the first tick.
    pub fn feedback(&self) -> Result<RealtimeFeedback> {
        let current = self.current_score()?;

        let trending = mean_score(
            self.history.iter().take(TREND_WINDOW),
            &self.config,
        )
        .unwrap_or(current);
        let peak = self
            .history
            .iter()
            .copied()
            .max_by(|a, b| a.overall.total_cmp(&b.overall))
            .unwrap_or(current);

        let quality_assessment = quality_description(self.last_distance).to_owned();

        let progress_ratio = if self.reference_samples > 0 {
            (current.samples_analyzed as f32 / self.reference_samples as f32).clamp(0.0, 1.0)
        } else {
            0.0
        };

        Ok(RealtimeFeedback {
            recommendation: recommend(&current),
            current,
            trending,
            peak,
            quality_assessment,
            progress_ratio,
        })
    }

    /// Clear the score history. The master reference and configuration are
    /// preserved.
    pub fn reset(&mut self) {
        self.history.clear();
        self.last_update_samples = 0;
        self.last_distance = 0.0;
    }
}

/// Map an overall distance onto its fixed quality band.
fn quality_description(distance: f32) -> &'static str {
    QUALITY_BANDS
        .iter()
        .find(|&&(cutoff, _)| distance >= cutoff)
        .map_or(QUALITY_FLOOR, |&(_, label)| label)
}

/// Field-wise mean over a score window; thresholds re-derived from config.
fn mean_score<'a>(
    scores: impl Iterator<Item = &'a SimilarityScore>,
    config: &ScorerConfig,
) -> Option<SimilarityScore> {
    let scores: Vec<&SimilarityScore> = scores.collect();
    if scores.is_empty() {
        return None;
    }
    let n = scores.len() as f32;
    let mut mean = SimilarityScore {
        samples_analyzed: scores[0].samples_analyzed,
        ..SimilarityScore::default()
    };
    for s in &scores {
        mean.overall += s.overall / n;
        mean.mfcc += s.mfcc / n;
        mean.volume += s.volume / n;
        mean.timing += s.timing / n;
        mean.pitch += s.pitch / n;
        mean.confidence += s.confidence / n;
    }
    mean.is_reliable = mean.confidence >= config.confidence_threshold;
    mean.is_match = mean.overall >= config.match_threshold;
    Some(mean)
}

fn recommend(score: &SimilarityScore) -> String {
    if score.is_match {
        return "Strong match. Keep this delivery consistent.".to_owned();
    }
    // Coach the weakest dimension.
    let dims = [
        (score.mfcc, "Work on the tone shape; try matching the call's timbre more closely."),
        (score.volume, "Match the reference loudness; your level drifts from the master call."),
        (score.timing, "Watch the call length; stay closer to the reference duration."),
    ];
    let weakest = dims
        .iter()
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map_or(dims[0].1, |d| d.1);
    weakest.to_owned()
}
