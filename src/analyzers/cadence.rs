//! Rhythm analysis over second-scale horizons: onset detection, tempo
//! estimation, periodicity, and call-sequence/syllable descriptors.
//!
//! Onset detection runs in one of two flavors: full spectral flux, or a fast
//! energy-difference path for short clips and real-time use. Autocorrelation
//! effort is governed by [`AutocorrMode`]; the lag caps and stride
//! decimation keep worst-case latency bounded on short clips.

use crate::config::{AutocorrMode, CadenceConfig};
use crate::error::{EngineError, Result};
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Floor on the derived frame size in samples.
const MIN_FRAME_SAMPLES: usize = 384;
/// Floor on the derived hop size in samples.
const MIN_HOP_SAMPLES: usize = 192;
/// Inter-onset-interval histogram bin width in seconds.
const IOI_BIN_SECS: f32 = 0.05;

/// Autocorrelation-derived periodicity descriptors.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodicityMeasures {
    /// Strongest autocorrelation period, seconds.
    pub dominant_period_secs: f32,
    /// Strength of the dominant period in `[0, 1]`.
    pub periodicity_strength: f32,
    /// Raw height of the best autocorrelation peak.
    pub autocorrelation_peak: f32,
    /// Periods within the configured range, strongest first.
    pub periods_secs: Vec<f32>,
    /// Strengths matching `periods_secs`.
    pub period_strengths: Vec<f32>,
}

/// Interval-statistics descriptors of the onset train.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RhythmicFeatures {
    /// `1 / (1 + interval variance)` — higher is steadier.
    pub regularity: f32,
    /// Unique 10 ms-quantized intervals over total intervals.
    pub complexity: f32,
    /// `1 - regularity`.
    pub syncopation: f32,
    /// Complexity when it exceeds 0.5, else 0.
    pub polyrhythm: f32,
    /// `regularity × complexity`.
    pub groove: f32,
}

/// Call-sequence descriptors derived from onsets.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSequence {
    /// Onset times, seconds from window start.
    pub call_onsets_secs: Vec<f32>,
    /// Number of detected calls.
    pub num_calls: usize,
    /// Calls per second over the sequence span.
    pub call_rate_hz: f32,
    /// First-to-last onset span, seconds.
    pub sequence_duration_secs: f32,
    /// Estimated call durations (70% of the following interval, capped at
    /// 2 s; 0.5 s for the final call).
    pub call_durations_secs: Vec<f32>,
    /// Silence between the end of one call and the next onset.
    pub inter_call_intervals_secs: Vec<f32>,
}

/// Syllable-level descriptors (onsets re-read as syllable boundaries).
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyllableAnalysis {
    /// Syllable onset times, seconds.
    pub syllable_onsets_secs: Vec<f32>,
    /// Estimated durations (80% of the following interval; 0.3 s default
    /// for the final syllable).
    pub syllable_durations_secs: Vec<f32>,
    /// Mean syllable duration, seconds.
    pub avg_syllable_duration_secs: f32,
    /// Syllables per second over the sequence span.
    pub syllable_rate_hz: f32,
    /// `1 / (1 + 10 × duration variance)` — higher is more speech-like.
    pub speech_rhythm: f32,
}

/// Full per-window cadence analysis result.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CadenceProfile {
    /// Seconds of audio processed before this window.
    pub timestamp_secs: f32,
    /// Estimated tempo in BPM, clamped to the configured range; 0 when no
    /// estimate was possible.
    pub estimated_tempo_bpm: f32,
    /// Confidence of the tempo estimate in `[0, 1]`.
    pub tempo_confidence: f32,
    /// Beat times (onset-derived), seconds.
    pub beat_times_secs: Vec<f32>,
    /// Per-beat strengths (uniform in this implementation).
    pub beat_strengths: Vec<f32>,
    /// Intervals between successive beats, seconds.
    pub inter_beat_intervals_secs: Vec<f32>,
    /// Call-sequence descriptors.
    pub sequence: CallSequence,
    /// Periodicity descriptors.
    pub periodicity: PeriodicityMeasures,
    /// Rhythmic interval statistics.
    pub rhythm: RhythmicFeatures,
    /// Syllable descriptors, present only when syllable analysis is enabled.
    pub syllables: Option<SyllableAnalysis>,
    /// Weighted overall rhythm score in `[0, 1]`.
    pub overall_rhythm_score: f32,
    /// Composite confidence in `[0, 1]`.
    pub confidence: f32,
    /// Whether the overall rhythm score exceeds 0.6.
    pub has_strong_rhythm: bool,
}

/// Observable processing counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CadenceStats {
    /// One-shot analysis windows completed.
    pub analysis_calls: u64,
    /// Hop-advanced frames consumed via streaming.
    pub streaming_frames: u64,
    /// Flux frames computed in the last detection pass.
    pub spectral_flux_frames: usize,
    /// Peak-picking loop iterations in the last pass.
    pub onset_loop_iterations: usize,
    /// Onsets produced by the last pass.
    pub onsets_detected: usize,
    /// Maximum lag evaluated by the last autocorrelation.
    pub autocorr_max_lag: usize,
    /// Autocorrelation peaks found in the last pass.
    pub autocorr_peaks: usize,
    /// Sample count of the last analysis window.
    pub last_audio_samples: usize,
    /// Derived frame size, samples.
    pub frame_size: usize,
    /// Derived hop size, samples.
    pub hop_size: usize,
}

/// Sliding-window rhythm analyzer.
pub struct CadenceAnalyzer {
    config: CadenceConfig,
    sample_rate: f32,
    frame_size: usize,
    hop_size: usize,
    buffer: Vec<f32>,
    /// Normalized onset-detection function from the last pass.
    flux: Vec<f32>,
    prev_spectrum: Vec<f32>,
    /// Raw frame energies (for the energy-based onset fallback).
    frame_energies: Vec<f32>,
    beat_state: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    fft_buf: Vec<Complex32>,
    spectrum_scratch: Vec<f32>,
    current: Option<CadenceProfile>,
    stats: CadenceStats,
}

impl CadenceAnalyzer {
    /// Create an analyzer for the given sample rate.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` on non-positive rates, frame/hop durations,
    /// or an inverted tempo range.
    pub fn new(sample_rate: f32, config: &CadenceConfig) -> Result<Self> {
        if sample_rate <= 0.0 {
            return Err(EngineError::InvalidParams(format!(
                "sample rate must be positive, got {sample_rate}"
            )));
        }
        if config.frame_secs <= 0.0 || config.hop_secs <= 0.0 {
            return Err(EngineError::InvalidParams(format!(
                "cadence frame/hop {}/{} s must be positive",
                config.frame_secs, config.hop_secs
            )));
        }
        if config.min_tempo_bpm <= 0.0 || config.max_tempo_bpm <= config.min_tempo_bpm {
            return Err(EngineError::InvalidParams(format!(
                "tempo range [{}, {}] BPM is empty",
                config.min_tempo_bpm, config.max_tempo_bpm
            )));
        }

        let frame_size =
            ((config.frame_secs * sample_rate) as usize).max(MIN_FRAME_SAMPLES);
        let hop_size = ((config.hop_secs * sample_rate) as usize)
            .max(MIN_HOP_SAMPLES)
            .min(frame_size / 2);

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(frame_size);

        Ok(Self {
            config: config.clone(),
            sample_rate,
            frame_size,
            hop_size,
            buffer: Vec::with_capacity(frame_size * 2),
            flux: Vec::new(),
            prev_spectrum: vec![0.0; frame_size / 2 + 1],
            frame_energies: Vec::new(),
            beat_state: Vec::new(),
            fft,
            fft_buf: vec![Complex32::new(0.0, 0.0); frame_size],
            spectrum_scratch: Vec::new(),
            current: None,
            stats: CadenceStats {
                frame_size,
                hop_size,
                ..CadenceStats::default()
            },
        })
    }

    /// One-shot analysis of a clip.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientData` if the clip is shorter than one frame.
    pub fn analyze_cadence(&mut self, audio: &[f32]) -> Result<CadenceProfile> {
        if audio.len() < self.frame_size {
            return Err(EngineError::InsufficientData(
                "cadence clip shorter than one analysis frame",
            ));
        }

        let mut profile = CadenceProfile {
            timestamp_secs: (self.stats.analysis_calls + self.stats.streaming_frames) as f32
                * self.hop_size as f32
                / self.sample_rate,
            ..CadenceProfile::default()
        };

        let onsets = if self.config.enable_onset_detection {
            self.detect_onsets_internal(audio)
        } else {
            Vec::new()
        };

        analyze_call_sequence(&mut profile.sequence, &onsets);

        if self.config.enable_beat_tracking {
            let (tempo, confidence) = self.estimate_tempo_internal(audio, &onsets);
            profile.estimated_tempo_bpm = tempo;
            profile.tempo_confidence = confidence;
            self.extract_beats(&mut profile, &onsets);
        }

        profile.periodicity = self.analyze_periodicity_internal(audio);

        if onsets.len() >= 3 {
            profile.rhythm = rhythmic_features(&onsets);
        }

        if self.config.enable_syllable_analysis {
            profile.syllables = Some(analyze_syllables(&onsets));
        }

        profile.overall_rhythm_score = overall_rhythm_score(&profile);
        profile.confidence = profile_confidence(&profile);
        profile.has_strong_rhythm = profile.overall_rhythm_score > 0.6;

        self.stats.last_audio_samples = audio.len();
        self.stats.analysis_calls += 1;
        self.current = Some(profile.clone());
        Ok(profile)
    }

    /// Streaming entry point: buffers audio and analyzes frame by frame,
    /// advancing by the hop.
    ///
    /// # Errors
    ///
    /// Propagates analysis errors.
    pub fn process_audio_chunk(&mut self, chunk: &[f32]) -> Result<()> {
        self.buffer.extend_from_slice(chunk);
        while self.buffer.len() >= self.frame_size {
            let frame: Vec<f32> = self.buffer[..self.frame_size].to_vec();
            self.analyze_cadence(&frame)?;
            self.buffer.drain(..self.hop_size);
            self.stats.streaming_frames += 1;
        }
        Ok(())
    }

    /// Most recent profile.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientData` before the first analyzed frame.
    pub fn current_analysis(&self) -> Result<CadenceProfile> {
        self.current
            .clone()
            .ok_or(EngineError::InsufficientData("no cadence frame processed yet"))
    }

    /// Normalized onset-detection function from the last pass.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientData` if no pass has run.
    pub fn onset_detection_function(&self) -> Result<&[f32]> {
        if self.flux.is_empty() {
            return Err(EngineError::InsufficientData("no onset function computed yet"));
        }
        Ok(&self.flux)
    }

    /// Beat-tracking state (per-beat strengths) from the last pass.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientData` if no beats have been extracted.
    pub fn beat_tracking_state(&self) -> Result<&[f32]> {
        if self.beat_state.is_empty() {
            return Err(EngineError::InsufficientData("no beats extracted yet"));
        }
        Ok(&self.beat_state)
    }

    /// Observable processing counters.
    #[must_use]
    pub fn stats(&self) -> CadenceStats {
        self.stats
    }

    /// Whether at least one frame has been analyzed since creation/reset.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    /// Return to the initialized state: all buffers and counters cleared.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.flux.clear();
        self.prev_spectrum.iter_mut().for_each(|v| *v = 0.0);
        self.frame_energies.clear();
        self.beat_state.clear();
        self.current = None;
        self.stats = CadenceStats {
            frame_size: self.frame_size,
            hop_size: self.hop_size,
            ..CadenceStats::default()
        };
    }

    fn fast_path(&self) -> bool {
        self.config.autocorr_mode == AutocorrMode::Fast
    }

    // ── Onset detection ──────────────────────────────────────────

    fn detect_onsets_internal(&mut self, audio: &[f32]) -> Vec<f32> {
        self.compute_flux(audio);
        self.peak_pick_onsets()
    }

    /// Per-frame onset flux. Full path: positive spectral flux. Fast path:
    /// positive frame-energy difference. Frame energies are always kept for
    /// the energy-based onset fallback.
    fn compute_flux(&mut self, audio: &[f32]) {
        let num_frames = (audio.len() - self.frame_size) / self.hop_size + 1;
        self.flux.clear();
        self.flux.resize(num_frames, 0.0);
        self.frame_energies.clear();
        self.frame_energies.resize(num_frames, 0.0);
        self.stats.spectral_flux_frames = num_frames;

        let mut prev_energy = 0.0f32;
        for frame in 0..num_frames {
            let start = frame * self.hop_size;
            let slice = &audio[start..start + self.frame_size];

            let energy: f32 = slice.iter().map(|s| s * s).sum();
            self.frame_energies[frame] = energy;

            if self.fast_path() {
                let diff = if frame == 0 { 0.0 } else { energy - prev_energy };
                self.flux[frame] = diff.max(0.0);
            } else {
                self.magnitude_spectrum(slice);
                let mut flux = 0.0f32;
                for (bin, &mag) in self.spectrum_scratch.iter().enumerate() {
                    let diff = mag - self.prev_spectrum[bin];
                    if diff > 0.0 {
                        flux += diff;
                    }
                }
                self.flux[frame] = flux;
                std::mem::swap(&mut self.prev_spectrum, &mut self.spectrum_scratch);
            }
            prev_energy = energy;
        }

        if self.fast_path() {
            normalize_in_place(&mut self.flux);
        }
        smooth_moving_average(&mut self.flux);
        normalize_in_place(&mut self.flux);
    }

    fn magnitude_spectrum(&mut self, frame: &[f32]) {
        for (slot, &s) in self.fft_buf.iter_mut().zip(frame.iter()) {
            *slot = Complex32::new(s, 0.0);
        }
        for slot in self.fft_buf.iter_mut().skip(frame.len()) {
            *slot = Complex32::new(0.0, 0.0);
        }
        self.fft.process(&mut self.fft_buf);

        let bins = self.frame_size / 2 + 1;
        self.spectrum_scratch.resize(bins, 0.0);
        for (slot, c) in self.spectrum_scratch.iter_mut().zip(self.fft_buf.iter()) {
            *slot = (c.re * c.re + c.im * c.im).sqrt();
        }
    }

    /// Local maxima above `base + α·median(recent flux)`; the threshold is
    /// halved in fast mode. Fallback ladder when nothing crosses:
    /// top-three peaks above 1.2× median, then the single global maximum,
    /// then high-energy frames (minimum separation of one hop).
    fn peak_pick_onsets(&mut self) -> Vec<f32> {
        let mut onsets = Vec::new();
        if self.flux.len() < 3 {
            self.stats.onsets_detected = 0;
            self.stats.onset_loop_iterations = 0;
            return onsets;
        }

        let recent = &self.flux[self.flux.len().saturating_sub(100)..];
        let adaptive = median(recent) * self.config.adaptive_factor;
        let mut threshold = self.config.onset_threshold + adaptive;
        if self.fast_path() {
            threshold *= 0.5;
        }

        let hop_secs = self.hop_size as f32 / self.sample_rate;
        let mut iterations = 0usize;
        for i in 1..self.flux.len() - 1 {
            if self.flux[i] > self.flux[i - 1]
                && self.flux[i] > self.flux[i + 1]
                && self.flux[i] > threshold
            {
                onsets.push(i as f32 * hop_secs);
            }
            iterations += 1;
        }
        self.stats.onset_loop_iterations = iterations;

        if onsets.is_empty() {
            // Fallback 1: top three local maxima above 1.2× median.
            let med = median(&self.flux);
            let mut candidates: Vec<(usize, f32)> = (1..self.flux.len() - 1)
                .filter(|&i| {
                    self.flux[i] > self.flux[i - 1]
                        && self.flux[i] > self.flux[i + 1]
                        && self.flux[i] > med * 1.2
                })
                .map(|i| (i, self.flux[i]))
                .collect();
            candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
            for &(idx, _) in candidates.iter().take(3) {
                onsets.push(idx as f32 * hop_secs);
            }
            onsets.sort_by(f32::total_cmp);

            // Fallback 2: single global maximum (non-edge).
            if onsets.is_empty() {
                let mut best = (0usize, 0.0f32);
                for i in 1..self.flux.len() - 1 {
                    if self.flux[i] > best.1 {
                        best = (i, self.flux[i]);
                    }
                }
                if best.1 > 0.0 {
                    onsets.push(best.0 as f32 * hop_secs);
                }
            }
        }

        // Fallback 3: high-energy frames where the flux peaks were too few
        // for tempo estimation.
        if onsets.len() < 3 && self.frame_energies.len() == self.flux.len() {
            let energy_median = median(&self.frame_energies);
            let energy_threshold = energy_median * 1.3;
            let mut peaks: Vec<(usize, f32)> = self
                .frame_energies
                .iter()
                .enumerate()
                .filter(|&(_, &e)| e > energy_threshold)
                .map(|(i, &e)| (i, e))
                .collect();
            peaks.sort_by(|a, b| b.1.total_cmp(&a.1));
            for &(idx, _) in &peaks {
                let t = idx as f32 * hop_secs;
                if onsets.iter().any(|&existing| (existing - t).abs() < hop_secs) {
                    continue;
                }
                onsets.push(t);
                if onsets.len() >= 4 {
                    break;
                }
            }
            onsets.sort_by(f32::total_cmp);
        }

        self.stats.onsets_detected = onsets.len();
        onsets
    }

    // ── Tempo ────────────────────────────────────────────────────

    /// Inter-onset-interval histogram tempo; fast-mode fallbacks when there
    /// are too few onsets.
    fn estimate_tempo_internal(&mut self, audio: &[f32], onsets: &[f32]) -> (f32, f32) {
        if onsets.len() < 3 {
            if self.fast_path() {
                let autocorr = self.compute_autocorrelation(audio);
                if !autocorr.is_empty() {
                    let min_period = 60.0 / self.config.max_tempo_bpm;
                    let max_period = 60.0 / self.config.min_tempo_bpm;
                    let mut min_lag = (min_period * self.sample_rate).ceil() as usize;
                    let mut max_lag = (max_period * self.sample_rate).floor() as usize;
                    min_lag = min_lag.clamp(1, autocorr.len() - 1);
                    max_lag = max_lag.clamp(min_lag, autocorr.len() - 1);

                    let mut best = (0usize, 0.0f32);
                    for (lag, &v) in autocorr.iter().enumerate().take(max_lag + 1).skip(min_lag)
                    {
                        if v > best.1 {
                            best = (lag, v);
                        }
                    }
                    if best.0 > 0 && best.1 > 0.1 {
                        let period = best.0 as f32 / self.sample_rate;
                        let bpm = (60.0 / period)
                            .clamp(self.config.min_tempo_bpm, self.config.max_tempo_bpm);
                        return (bpm, best.1);
                    }
                }
                // Last resort: a window-duration heuristic.
                let duration = audio.len() as f32 / self.sample_rate;
                if duration > 0.1 {
                    let bpm = (60.0 / duration.clamp(0.25, 1.0))
                        .clamp(self.config.min_tempo_bpm, self.config.max_tempo_bpm);
                    return (bpm, 0.15);
                }
            }
            return (0.0, 0.0);
        }

        let intervals: Vec<f32> = onsets
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .filter(|&i| i > 0.0)
            .collect();
        if intervals.is_empty() {
            return (0.0, 0.0);
        }

        // 50 ms histogram; the mode bin wins, and the tempo comes from the
        // mean interval inside that bin so quantization does not skew it.
        let mut histogram: BTreeMap<i32, Vec<f32>> = BTreeMap::new();
        for &interval in &intervals {
            histogram
                .entry((interval / IOI_BIN_SECS) as i32)
                .or_default()
                .push(interval);
        }

        let (mode_intervals, count) = histogram
            .values()
            .map(|v| (v, v.len()))
            .max_by_key(|&(_, len)| len)
            .map(|(v, len)| (v.clone(), len))
            .unwrap_or_default();
        if count == 0 {
            return (0.0, 0.0);
        }

        let mean_interval = mode_intervals.iter().sum::<f32>() / count as f32;
        if mean_interval <= 0.0 {
            return (0.0, 0.0);
        }
        let tempo =
            (60.0 / mean_interval).clamp(self.config.min_tempo_bpm, self.config.max_tempo_bpm);
        let confidence = count as f32 / intervals.len() as f32;
        (tempo, confidence)
    }

    fn extract_beats(&mut self, profile: &mut CadenceProfile, onsets: &[f32]) {
        profile.beat_times_secs = onsets.to_vec();
        profile.beat_strengths = vec![1.0; onsets.len()];
        profile.inter_beat_intervals_secs =
            onsets.windows(2).map(|pair| pair[1] - pair[0]).collect();
        self.beat_state = profile.beat_strengths.clone();
    }

    // ── Periodicity ──────────────────────────────────────────────

    fn analyze_periodicity_internal(&mut self, audio: &[f32]) -> PeriodicityMeasures {
        let mut measures = PeriodicityMeasures::default();

        // Flat energy envelope means no rhythmic structure; skip the
        // autocorrelation entirely.
        if !audio.is_empty() {
            let mean = audio.iter().map(|v| v.abs()).sum::<f32>() / audio.len() as f32;
            if mean > 1e-6 {
                let var = audio
                    .iter()
                    .map(|v| {
                        let d = v.abs() - mean;
                        d * d
                    })
                    .sum::<f32>()
                    / audio.len() as f32;
                if var.sqrt() / mean < 0.05 {
                    return measures;
                }
            }
        }

        let autocorr = self.compute_autocorrelation(audio);
        if autocorr.is_empty() {
            return measures;
        }

        let peaks = self.find_autocorrelation_peaks(&autocorr);
        if let Some(&(best_lag, best_val)) = peaks.first() {
            measures.autocorrelation_peak = best_val;
            measures.dominant_period_secs = best_lag as f32 / self.sample_rate;
            measures.periodicity_strength = best_val;

            for &(lag, strength) in &peaks {
                let period = lag as f32 / self.sample_rate;
                if period >= self.config.min_period_secs && period <= self.config.max_period_secs
                {
                    measures.periods_secs.push(period);
                    measures.period_strengths.push(strength);
                }
            }
        }
        measures
    }

    /// Raw-audio autocorrelation with regime-dependent lag caps and stride
    /// decimation. Clips shorter than five frames return empty — they carry
    /// too little periodicity to justify the cost.
    fn compute_autocorrelation(&mut self, audio: &[f32]) -> Vec<f32> {
        if audio.len() < self.frame_size * 5 {
            self.stats.autocorr_max_lag = 0;
            return Vec::new();
        }

        let seconds = audio.len() as f32 / self.sample_rate;
        let mut target_lags = self.config.autocorrelation_lags;
        let mut stride = 1usize;
        match self.config.autocorr_mode {
            AutocorrMode::Fast => {
                target_lags = (target_lags / 4 + 1).min(256);
            }
            AutocorrMode::Default => {
                if seconds < 0.75 {
                    target_lags = target_lags.min(384);
                } else if seconds < 1.25 {
                    target_lags = target_lags.min(512);
                } else {
                    target_lags = target_lags.min(1000);
                }
                if seconds < 1.0 {
                    stride = 4;
                } else if seconds < 2.0 {
                    stride = 2;
                }
            }
            AutocorrMode::ForcedFull => {}
        }

        let max_lag = target_lags.min(audio.len() / 2);
        self.stats.autocorr_max_lag = max_lag;
        if max_lag < 2 {
            return Vec::new();
        }
        let mut autocorr = vec![0.0f32; max_lag];

        for lag in 1..max_lag {
            let limit = audio.len() - lag;
            let mut sum = 0.0f32;
            let count;

            if stride == 1 {
                // Unrolled accumulation.
                let (mut a0, mut a1, mut a2, mut a3) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
                let mut i = 0usize;
                while i + 4 <= limit {
                    a0 += audio[i] * audio[i + lag];
                    a1 += audio[i + 1] * audio[i + 1 + lag];
                    a2 += audio[i + 2] * audio[i + 2 + lag];
                    a3 += audio[i + 3] * audio[i + 3 + lag];
                    i += 4;
                }
                sum = a0 + a1 + a2 + a3;
                while i < limit {
                    sum += audio[i] * audio[i + lag];
                    i += 1;
                }
                count = limit;
            } else {
                let mut i = 0usize;
                while i < limit {
                    sum += audio[i] * audio[i + lag];
                    i += stride;
                }
                count = limit.div_ceil(stride);
            }

            autocorr[lag] = if count > 0 { sum / count as f32 } else { 0.0 };

            if self.fast_path() && lag > 64 && lag > max_lag / 2 {
                break;
            }
        }

        normalize_in_place(&mut autocorr);
        autocorr
    }

    fn find_autocorrelation_peaks(&mut self, autocorr: &[f32]) -> Vec<(usize, f32)> {
        let mut peaks = Vec::new();
        for i in 1..autocorr.len().saturating_sub(1) {
            if autocorr[i] > autocorr[i - 1]
                && autocorr[i] > autocorr[i + 1]
                && autocorr[i] > 0.1
            {
                peaks.push((i, autocorr[i]));
            }
            if self.fast_path() && peaks.len() >= 5 {
                break;
            }
        }
        peaks.sort_by(|a, b| b.1.total_cmp(&a.1));
        peaks.truncate(10);
        self.stats.autocorr_peaks = peaks.len();
        peaks
    }
}

// ── Pure helpers ─────────────────────────────────────────────────

fn analyze_call_sequence(sequence: &mut CallSequence, onsets: &[f32]) {
    sequence.call_onsets_secs = onsets.to_vec();
    sequence.num_calls = onsets.len();
    if onsets.is_empty() {
        return;
    }

    sequence.sequence_duration_secs = onsets[onsets.len() - 1] - onsets[0];
    if sequence.sequence_duration_secs > 0.0 {
        sequence.call_rate_hz = sequence.num_calls as f32 / sequence.sequence_duration_secs;
    }

    sequence.call_durations_secs = vec![0.0; onsets.len()];
    sequence.inter_call_intervals_secs = vec![0.0; onsets.len().saturating_sub(1)];
    for i in 0..onsets.len() {
        if i + 1 < onsets.len() {
            let interval = onsets[i + 1] - onsets[i];
            let duration = (interval * 0.7).min(2.0);
            sequence.call_durations_secs[i] = duration;
            sequence.inter_call_intervals_secs[i] = interval - duration;
        } else {
            sequence.call_durations_secs[i] = 0.5;
        }
    }
}

fn rhythmic_features(onsets: &[f32]) -> RhythmicFeatures {
    let intervals: Vec<f32> = onsets.windows(2).map(|pair| pair[1] - pair[0]).collect();
    let mean = intervals.iter().sum::<f32>() / intervals.len() as f32;
    let variance = intervals
        .iter()
        .map(|i| {
            let d = i - mean;
            d * d
        })
        .sum::<f32>()
        / intervals.len() as f32;

    let regularity = 1.0 / (1.0 + variance);

    // 10 ms quantization.
    let mut unique: Vec<i32> = intervals.iter().map(|i| (i * 100.0) as i32).collect();
    unique.sort_unstable();
    unique.dedup();
    let complexity = unique.len() as f32 / intervals.len() as f32;

    let syncopation = 1.0 - regularity;
    let polyrhythm = if complexity > 0.5 { complexity } else { 0.0 };
    let groove = regularity * complexity;

    RhythmicFeatures {
        regularity,
        complexity,
        syncopation,
        polyrhythm,
        groove,
    }
}

fn analyze_syllables(onsets: &[f32]) -> SyllableAnalysis {
    let mut syllables = SyllableAnalysis {
        syllable_onsets_secs: onsets.to_vec(),
        ..SyllableAnalysis::default()
    };
    if onsets.len() < 2 {
        return syllables;
    }

    syllables.syllable_durations_secs = vec![0.0; onsets.len()];
    let mut total = 0.0f32;
    for i in 0..onsets.len() {
        let duration = if i + 1 < onsets.len() {
            (onsets[i + 1] - onsets[i]) * 0.8
        } else {
            0.3
        };
        syllables.syllable_durations_secs[i] = duration;
        total += duration;
    }
    syllables.avg_syllable_duration_secs = total / onsets.len() as f32;

    let span = onsets[onsets.len() - 1] - onsets[0];
    if span > 0.0 {
        syllables.syllable_rate_hz = onsets.len() as f32 / span;
    }

    let avg = syllables.avg_syllable_duration_secs;
    let variance = syllables
        .syllable_durations_secs
        .iter()
        .map(|d| {
            let diff = d - avg;
            diff * diff
        })
        .sum::<f32>()
        / syllables.syllable_durations_secs.len() as f32;
    syllables.speech_rhythm = 1.0 / (1.0 + variance * 10.0);

    syllables
}

fn overall_rhythm_score(profile: &CadenceProfile) -> f32 {
    let mut score = 0.0f32;
    score += profile.rhythm.regularity * 0.3;
    score += profile.rhythm.groove * 0.2;
    score += profile.periodicity.periodicity_strength * 0.3;
    if profile.tempo_confidence > 0.5 {
        score += 0.2;
    }
    score.min(1.0)
}

fn profile_confidence(profile: &CadenceProfile) -> f32 {
    let mut confidence = 0.0f32;
    confidence += profile.tempo_confidence * 0.3;
    confidence += profile.periodicity.periodicity_strength * 0.3;
    confidence += profile.rhythm.regularity * 0.2;
    if profile.sequence.num_calls > 2 {
        confidence += 0.2;
    }
    confidence.min(1.0)
}

fn normalize_in_place(values: &mut [f32]) {
    let max = values.iter().fold(0.0f32, |acc, &v| acc.max(v));
    if max > 0.0 {
        for v in values {
            *v /= max;
        }
    }
}

/// Three-point moving average.
fn smooth_moving_average(values: &mut Vec<f32>) {
    if values.len() < 2 {
        return;
    }
    let mut smoothed = vec![0.0f32; values.len()];
    for i in 0..values.len() {
        let start = i.saturating_sub(1);
        let end = (i + 2).min(values.len());
        let sum: f32 = values[start..end].iter().sum();
        smoothed[i] = sum / (end - start) as f32;
    }
    *values = smoothed;
}

fn median(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f32::total_cmp);
    sorted[sorted.len() / 2]
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    const SAMPLE_RATE: f32 = 44_100.0;

    fn analyzer() -> CadenceAnalyzer {
        CadenceAnalyzer::new(SAMPLE_RATE, &CadenceConfig::default()).unwrap()
    }

    /// Clicks of `click_secs` length every `period_secs`.
    fn pulse_train(period_secs: f32, total_secs: f32) -> Vec<f32> {
        let n = (total_secs * SAMPLE_RATE) as usize;
        let period = (period_secs * SAMPLE_RATE) as usize;
        let click = (0.02 * SAMPLE_RATE) as usize;
        (0..n)
            .map(|i| {
                if i % period < click {
                    let t = i as f32 / SAMPLE_RATE;
                    (2.0 * std::f32::consts::PI * 880.0 * t).sin() * 0.8
                } else {
                    0.0
                }
            })
            .collect()
    }

    #[test]
    fn tempo_recovered_from_pulse_train() {
        // 0.5 s period → 120 BPM.
        let mut cadence = analyzer();
        let profile = cadence.analyze_cadence(&pulse_train(0.5, 4.0)).unwrap();
        assert!(
            (profile.estimated_tempo_bpm - 120.0).abs() <= 5.0,
            "estimated {} BPM, expected near 120",
            profile.estimated_tempo_bpm
        );
        assert!(profile.tempo_confidence > 0.3);
    }

    #[test]
    fn slower_pulse_train_tempo() {
        // 0.75 s period → 80 BPM.
        let mut cadence = analyzer();
        let profile = cadence.analyze_cadence(&pulse_train(0.75, 6.0)).unwrap();
        assert!(
            (profile.estimated_tempo_bpm - 80.0).abs() <= 5.0,
            "estimated {} BPM, expected near 80",
            profile.estimated_tempo_bpm
        );
    }

    #[test]
    fn onsets_found_on_pulse_train() {
        let mut cadence = analyzer();
        let profile = cadence.analyze_cadence(&pulse_train(0.5, 3.0)).unwrap();
        assert!(
            profile.sequence.num_calls >= 4,
            "expected several onsets, got {}",
            profile.sequence.num_calls
        );
        assert!(profile.sequence.call_rate_hz > 0.0);
    }

    #[test]
    fn beats_mirror_onsets() {
        let mut cadence = analyzer();
        let profile = cadence.analyze_cadence(&pulse_train(0.5, 3.0)).unwrap();
        assert_eq!(
            profile.beat_times_secs.len(),
            profile.sequence.num_calls,
            "beats should mirror onsets"
        );
        assert_eq!(profile.beat_strengths.len(), profile.beat_times_secs.len());
        assert!(cadence.beat_tracking_state().is_ok());
    }

    #[test]
    fn regular_train_is_regular() {
        let mut cadence = analyzer();
        let profile = cadence.analyze_cadence(&pulse_train(0.4, 4.0)).unwrap();
        assert!(
            profile.rhythm.regularity > 0.8,
            "regularity {}",
            profile.rhythm.regularity
        );
        assert!(profile.rhythm.syncopation < 0.2);
    }

    #[test]
    fn flat_envelope_skips_periodicity() {
        // A constant signal has zero envelope variation (CoV < 0.05), so the
        // autocorrelation sweep is skipped entirely.
        let n = (3.0 * SAMPLE_RATE) as usize;
        let flat = vec![0.3f32; n];
        let mut cadence = analyzer();
        let profile = cadence.analyze_cadence(&flat).unwrap();
        assert_eq!(profile.periodicity.periodicity_strength, 0.0);
        assert_eq!(profile.periodicity.dominant_period_secs, 0.0);
        assert_eq!(cadence.stats().autocorr_max_lag, 0);
    }

    #[test]
    fn short_clip_skips_periodicity() {
        let mut cadence = analyzer();
        // One frame exactly: long enough to analyze, too short for
        // autocorrelation (< 5 frames).
        let clip = pulse_train(0.05, 0.11);
        let profile = cadence.analyze_cadence(&clip).unwrap();
        assert_eq!(profile.periodicity.autocorrelation_peak, 0.0);
        assert_eq!(cadence.stats().autocorr_max_lag, 0);
    }

    #[test]
    fn too_short_clip_is_insufficient_data() {
        let mut cadence = analyzer();
        let err = cadence.analyze_cadence(&[0.0; 100]).unwrap_err();
        assert_eq!(err.status(), "INSUFFICIENT_DATA");
    }

    #[test]
    fn syllables_present_only_when_enabled() {
        let audio = pulse_train(0.5, 3.0);

        let mut enabled = analyzer();
        let with = enabled.analyze_cadence(&audio).unwrap();
        assert!(with.syllables.is_some());

        let config = CadenceConfig {
            enable_syllable_analysis: false,
            ..CadenceConfig::default()
        };
        let mut disabled = CadenceAnalyzer::new(SAMPLE_RATE, &config).unwrap();
        let without = disabled.analyze_cadence(&audio).unwrap();
        assert!(without.syllables.is_none());
    }

    #[test]
    fn syllable_rate_tracks_pulse_rate() {
        let mut cadence = analyzer();
        let profile = cadence.analyze_cadence(&pulse_train(0.5, 4.0)).unwrap();
        let syllables = profile.syllables.unwrap();
        assert!(
            (syllables.syllable_rate_hz - 2.0).abs() < 0.8,
            "syllable rate {}",
            syllables.syllable_rate_hz
        );
    }

    #[test]
    fn fast_mode_still_finds_tempo() {
        let config = CadenceConfig {
            autocorr_mode: AutocorrMode::Fast,
            ..CadenceConfig::default()
        };
        let mut cadence = CadenceAnalyzer::new(SAMPLE_RATE, &config).unwrap();
        let profile = cadence.analyze_cadence(&pulse_train(0.5, 4.0)).unwrap();
        assert!(
            (profile.estimated_tempo_bpm - 120.0).abs() <= 10.0,
            "fast-mode tempo {}",
            profile.estimated_tempo_bpm
        );
    }

    #[test]
    fn forced_full_matches_default_on_long_clips() {
        let audio = pulse_train(0.5, 4.0);

        let mut default_mode = analyzer();
        let a = default_mode.analyze_cadence(&audio).unwrap();

        let config = CadenceConfig {
            autocorr_mode: AutocorrMode::ForcedFull,
            ..CadenceConfig::default()
        };
        let mut full = CadenceAnalyzer::new(SAMPLE_RATE, &config).unwrap();
        let b = full.analyze_cadence(&audio).unwrap();

        // Decimation may not change results beyond a small tolerance.
        assert!(
            (a.periodicity.dominant_period_secs - b.periodicity.dominant_period_secs).abs()
                < 1e-3,
            "default {} vs forced-full {}",
            a.periodicity.dominant_period_secs,
            b.periodicity.dominant_period_secs
        );
    }

    #[test]
    fn onset_function_query_after_analysis() {
        let mut cadence = analyzer();
        assert!(cadence.onset_detection_function().is_err());
        cadence.analyze_cadence(&pulse_train(0.5, 2.0)).unwrap();
        let flux = cadence.onset_detection_function().unwrap();
        assert!(!flux.is_empty());
        assert!(flux.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn streaming_advances_frame_counter() {
        let mut cadence = analyzer();
        cadence.process_audio_chunk(&pulse_train(0.5, 1.0)).unwrap();
        assert!(cadence.stats().streaming_frames > 0);
        assert!(cadence.is_active());
    }

    #[test]
    fn reset_returns_to_initialized() {
        let mut cadence = analyzer();
        cadence.analyze_cadence(&pulse_train(0.5, 2.0)).unwrap();
        assert!(cadence.is_active());

        cadence.reset();
        assert!(!cadence.is_active());
        assert!(cadence.current_analysis().is_err());
        assert!(cadence.onset_detection_function().is_err());
        let stats = cadence.stats();
        assert_eq!(stats.analysis_calls, 0);
        assert_eq!(stats.streaming_frames, 0);
        // Geometry survives reset.
        assert!(stats.frame_size >= MIN_FRAME_SAMPLES);
    }

    #[test]
    fn scores_and_confidence_in_unit_interval() {
        let mut cadence = analyzer();
        let profile = cadence.analyze_cadence(&pulse_train(0.33, 4.0)).unwrap();
        assert!((0.0..=1.0).contains(&profile.overall_rhythm_score));
        assert!((0.0..=1.0).contains(&profile.confidence));
        assert!((0.0..=1.0).contains(&profile.tempo_confidence));
    }

    #[test]
    fn rejects_inverted_tempo_range() {
        let config = CadenceConfig {
            min_tempo_bpm: 200.0,
            max_tempo_bpm: 100.0,
            ..CadenceConfig::default()
        };
        assert!(CadenceAnalyzer::new(SAMPLE_RATE, &config).is_err());
    }

    #[test]
    fn median_helper_handles_edges() {
        assert_eq!(median(&[]), 0.0);
        assert_eq!(median(&[3.0]), 3.0);
        assert_eq!(median(&[1.0, 5.0, 3.0]), 3.0);
    }
}
