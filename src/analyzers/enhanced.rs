//! Ensemble driver that runs the pitch, harmonic, and cadence analyzers
//! over the same audio and fuses their outputs into one profile.
//!
//! The coordinator owns its sub-analyzers; they never reference back.
//! A sub-profile is present in the output exactly when its analyzer ran
//! and produced a result.

use crate::analyzers::cadence::{CadenceAnalyzer, CadenceProfile};
use crate::analyzers::harmonic::{HarmonicAnalyzer, HarmonicProfile};
use crate::analyzers::pitch::{PitchAnalyzer, PitchResult};
use crate::config::EnhancedConfig;
use crate::error::{EngineError, Result};
use serde::Serialize;

/// Fused scalar features for downstream classification.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedFeatures {
    /// Fundamental frequency from the pitch analyzer, Hz.
    pub fundamental_frequency_hz: f32,
    /// Pitch stability (the pitch confidence).
    pub pitch_stability: f32,
    /// Spectral centroid from the harmonic analyzer, Hz.
    pub spectral_centroid_hz: f32,
    /// Harmonic-to-noise ratio, dB.
    pub harmonic_to_noise_ratio_db: f32,
    /// Tonal brightness in `[0, 1]`.
    pub brightness: f32,
    /// Tonal roughness in `[0, 1]`.
    pub roughness: f32,
    /// Tonal resonance in `[0, 1]`.
    pub resonance: f32,
    /// Estimated tempo, BPM.
    pub estimated_tempo_bpm: f32,
    /// Rhythm complexity in `[0, 1]`.
    pub rhythm_complexity: f32,
    /// Onset times, seconds.
    pub onset_times_secs: Vec<f32>,
}

/// Combined analysis profile from all enabled analyzers.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedAnalysisProfile {
    /// Seconds of audio processed before this analysis.
    pub timestamp_secs: f32,
    /// Duration of the audio analyzed, seconds.
    pub duration_secs: f32,
    /// Whether at least one analyzer produced a result.
    pub is_valid: bool,
    /// Mean of the available sub-confidences.
    pub overall_confidence: f32,
    /// Pitch result, when the pitch analyzer ran.
    pub pitch: Option<PitchResult>,
    /// Harmonic profile, when the harmonic analyzer ran.
    pub harmonic: Option<HarmonicProfile>,
    /// Cadence profile, when the cadence analyzer ran.
    pub cadence: Option<CadenceProfile>,
    /// Fused feature vector.
    pub combined: CombinedFeatures,
}

impl EnhancedAnalysisProfile {
    /// Serialize the profile to a JSON string. The in-memory structure is
    /// authoritative; JSON is a convenience for external consumers.
    ///
    /// # Errors
    ///
    /// Returns `ProcessingError` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| EngineError::ProcessingError(format!("JSON export failed: {e}")))
    }
}

/// Content characteristics detected from a profile, used to adapt the
/// analyzer configuration.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioCharacteristics {
    /// Fundamental in the 80–1000 Hz band with pitch confidence above 0.7.
    pub is_vocal: bool,
    /// Estimated tempo strictly inside (60, 200) BPM.
    pub is_rhythmic: bool,
    /// HNR above 10 dB.
    pub is_tonal: bool,
    /// Detected fundamental, Hz.
    pub dominant_frequency_hz: f32,
    /// HNR scaled to `[0, 1]` against a 30 dB ceiling.
    pub harmonicity: f32,
}

/// Coordinator owning the analyzer ensemble.
pub struct EnhancedCoordinator {
    config: EnhancedConfig,
    sample_rate: f32,
    pitch: Option<PitchAnalyzer>,
    harmonic: Option<HarmonicAnalyzer>,
    cadence: Option<CadenceAnalyzer>,
    current: Option<EnhancedAnalysisProfile>,
    samples_processed: u64,
}

impl EnhancedCoordinator {
    /// Create the ensemble with the enabled analyzers.
    ///
    /// # Errors
    ///
    /// Returns `InitFailed` if any enabled analyzer rejects its
    /// configuration.
    pub fn new(sample_rate: f32, config: &EnhancedConfig) -> Result<Self> {
        let pitch = if config.enable_pitch {
            Some(
                PitchAnalyzer::new(sample_rate, &config.pitch)
                    .map_err(|e| EngineError::InitFailed(format!("pitch analyzer: {e}")))?,
            )
        } else {
            None
        };
        let harmonic = if config.enable_harmonic {
            Some(
                HarmonicAnalyzer::new(sample_rate, &config.harmonic)
                    .map_err(|e| EngineError::InitFailed(format!("harmonic analyzer: {e}")))?,
            )
        } else {
            None
        };
        let cadence = if config.enable_cadence {
            Some(
                CadenceAnalyzer::new(sample_rate, &config.cadence)
                    .map_err(|e| EngineError::InitFailed(format!("cadence analyzer: {e}")))?,
            )
        } else {
            None
        };

        Ok(Self {
            config: config.clone(),
            sample_rate,
            pitch,
            harmonic,
            cadence,
            current: None,
            samples_processed: 0,
        })
    }

    /// One-shot analysis of a clip with every enabled analyzer. Analyzers
    /// that cannot run on this clip (too short for their window) simply
    /// leave their sub-profile absent.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` on empty audio and `InsufficientData` if no
    /// analyzer could produce a result.
    pub fn analyze(&mut self, audio: &[f32]) -> Result<EnhancedAnalysisProfile> {
        if audio.is_empty() {
            return Err(EngineError::InvalidParams(
                "cannot analyze an empty audio span".into(),
            ));
        }

        let timestamp_secs = self.samples_processed as f32 / self.sample_rate;
        let mut profile = EnhancedAnalysisProfile {
            timestamp_secs,
            duration_secs: audio.len() as f32 / self.sample_rate,
            ..EnhancedAnalysisProfile::default()
        };

        if let Some(pitch) = &mut self.pitch {
            profile.pitch = pitch.analyze(audio).ok();
        }
        if let Some(harmonic) = &mut self.harmonic {
            profile.harmonic = harmonic.analyze(audio).ok();
        }
        if let Some(cadence) = &mut self.cadence {
            profile.cadence = cadence.analyze_cadence(audio).ok();
        }

        if profile.pitch.is_none() && profile.harmonic.is_none() && profile.cadence.is_none() {
            return Err(EngineError::InsufficientData(
                "no analyzer could process this clip",
            ));
        }

        combine_features(&mut profile);
        profile.overall_confidence = overall_confidence(&profile);
        profile.is_valid = true;

        self.samples_processed += audio.len() as u64;
        self.current = Some(profile.clone());
        Ok(profile)
    }

    /// Streaming entry point: feeds each enabled analyzer's own hop-aligned
    /// buffer and refreshes the fused profile from their current results.
    ///
    /// # Errors
    ///
    /// Propagates analyzer errors.
    pub fn process_chunk(&mut self, chunk: &[f32]) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }

        if let Some(pitch) = &mut self.pitch {
            pitch.process_chunk(chunk)?;
        }
        if let Some(harmonic) = &mut self.harmonic {
            harmonic.process_chunk(chunk)?;
        }
        if let Some(cadence) = &mut self.cadence {
            cadence.process_audio_chunk(chunk)?;
        }
        self.samples_processed += chunk.len() as u64;
        self.refresh_current();
        Ok(())
    }

    /// Most recent fused profile.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientData` before any analyzer has produced a result.
    pub fn current_analysis(&self) -> Result<EnhancedAnalysisProfile> {
        self.current
            .clone()
            .ok_or(EngineError::InsufficientData("no enhanced analysis available yet"))
    }

    /// Reset every sub-analyzer and the fused state.
    pub fn reset(&mut self) {
        if let Some(pitch) = &mut self.pitch {
            pitch.reset();
        }
        if let Some(harmonic) = &mut self.harmonic {
            harmonic.reset();
        }
        if let Some(cadence) = &mut self.cadence {
            cadence.reset();
        }
        self.current = None;
        self.samples_processed = 0;
    }

    /// The configuration the coordinator was built with.
    #[must_use]
    pub fn config(&self) -> &EnhancedConfig {
        &self.config
    }

    fn refresh_current(&mut self) {
        let pitch = self
            .pitch
            .as_ref()
            .and_then(|p| p.current_pitch().ok());
        let harmonic = self
            .harmonic
            .as_ref()
            .and_then(|h| h.current_analysis().ok());
        let cadence = self
            .cadence
            .as_ref()
            .and_then(|c| c.current_analysis().ok());

        if pitch.is_none() && harmonic.is_none() && cadence.is_none() {
            return;
        }

        let mut profile = EnhancedAnalysisProfile {
            timestamp_secs: self.samples_processed as f32 / self.sample_rate,
            duration_secs: self.samples_processed as f32 / self.sample_rate,
            pitch,
            harmonic,
            cadence,
            ..EnhancedAnalysisProfile::default()
        };
        combine_features(&mut profile);
        profile.overall_confidence = overall_confidence(&profile);
        profile.is_valid = true;
        self.current = Some(profile);
    }
}

/// Detect content characteristics from a fused profile.
#[must_use]
pub fn detect_characteristics(profile: &EnhancedAnalysisProfile) -> AudioCharacteristics {
    let mut characteristics = AudioCharacteristics::default();

    if let (Some(pitch), Some(_)) = (&profile.pitch, &profile.harmonic) {
        characteristics.is_vocal = (80.0..=1000.0).contains(&pitch.frequency_hz)
            && pitch.confidence > 0.7;
        characteristics.dominant_frequency_hz = pitch.frequency_hz;
    }

    if let Some(cadence) = &profile.cadence {
        let tempo = cadence.estimated_tempo_bpm;
        characteristics.is_rhythmic = tempo > 60.0 && tempo < 200.0;
    }

    if let Some(harmonic) = &profile.harmonic {
        characteristics.is_tonal = harmonic.hnr_db > 10.0;
        characteristics.harmonicity = (harmonic.hnr_db / 30.0).clamp(0.0, 1.0);
    }

    characteristics
}

/// Derive an analyzer configuration adapted to the detected content.
#[must_use]
pub fn adapt_configuration(
    characteristics: &AudioCharacteristics,
    realtime_mode: bool,
) -> EnhancedConfig {
    let mut config = if realtime_mode {
        EnhancedConfig::realtime()
    } else {
        EnhancedConfig::high_quality()
    };

    if characteristics.is_vocal {
        config.harmonic.enable_formant_tracking = true;
        config.cadence.enable_syllable_analysis = true;
    }
    if characteristics.is_rhythmic {
        config.cadence.enable_beat_tracking = true;
        config.cadence.enable_onset_detection = true;
    }

    config
}

fn combine_features(profile: &mut EnhancedAnalysisProfile) {
    let features = &mut profile.combined;

    if let Some(pitch) = &profile.pitch {
        features.fundamental_frequency_hz = pitch.frequency_hz;
        features.pitch_stability = pitch.confidence;
    }

    if let Some(harmonic) = &profile.harmonic {
        features.spectral_centroid_hz = harmonic.spectral_centroid_hz;
        features.harmonic_to_noise_ratio_db = harmonic.hnr_db;
        if let Some(q) = &harmonic.qualities {
            features.brightness = q.brightness;
            features.roughness = q.roughness;
            features.resonance = q.resonance;
        }
    }

    if let Some(cadence) = &profile.cadence {
        features.estimated_tempo_bpm = cadence.estimated_tempo_bpm;
        features.rhythm_complexity = cadence.rhythm.complexity;
        features.onset_times_secs = cadence.beat_times_secs.clone();
    }
}

fn overall_confidence(profile: &EnhancedAnalysisProfile) -> f32 {
    let mut confidences = Vec::with_capacity(3);
    if let Some(pitch) = &profile.pitch {
        confidences.push(pitch.confidence);
    }
    if let Some(harmonic) = &profile.harmonic {
        confidences.push(harmonic.confidence);
    }
    if let Some(cadence) = &profile.cadence {
        confidences.push(cadence.confidence);
    }
    if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f32>() / confidences.len() as f32
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    const SAMPLE_RATE: f32 = 44_100.0;

    fn coordinator() -> EnhancedCoordinator {
        let config = EnhancedConfig {
            enable_pitch: true,
            enable_harmonic: true,
            enable_cadence: true,
            ..EnhancedConfig::default()
        };
        EnhancedCoordinator::new(SAMPLE_RATE, &config).unwrap()
    }

    fn harmonic_tone(f0: f32, secs: f32) -> Vec<f32> {
        let n = (secs * SAMPLE_RATE) as usize;
        (0..n)
            .map(|i| {
                let t = i as f32 / SAMPLE_RATE;
                let mut s = 0.0;
                for h in 1..=4 {
                    s += (2.0 * std::f32::consts::PI * f0 * h as f32 * t).sin() / h as f32;
                }
                s * 0.25
            })
            .collect()
    }

    #[test]
    fn analyze_fuses_all_three_profiles() {
        let mut coordinator = coordinator();
        let profile = coordinator.analyze(&harmonic_tone(220.0, 1.0)).unwrap();
        assert!(profile.is_valid);
        assert!(profile.pitch.is_some());
        assert!(profile.harmonic.is_some());
        assert!(profile.cadence.is_some());
        assert!((0.0..=1.0).contains(&profile.overall_confidence));
    }

    #[test]
    fn combined_features_carry_pitch_and_centroid() {
        let mut coordinator = coordinator();
        let profile = coordinator.analyze(&harmonic_tone(220.0, 1.0)).unwrap();
        assert!(
            (profile.combined.fundamental_frequency_hz - 220.0).abs() < 20.0,
            "combined f0 {}",
            profile.combined.fundamental_frequency_hz
        );
        assert!(profile.combined.spectral_centroid_hz > 0.0);
        assert_eq!(
            profile.combined.pitch_stability,
            profile.pitch.as_ref().unwrap().confidence
        );
    }

    #[test]
    fn empty_audio_is_invalid_params() {
        let mut coordinator = coordinator();
        let err = coordinator.analyze(&[]).unwrap_err();
        assert_eq!(err.status(), "INVALID_PARAMS");
    }

    #[test]
    fn disabled_analyzers_leave_profiles_absent() {
        let config = EnhancedConfig {
            enable_pitch: true,
            enable_harmonic: false,
            enable_cadence: false,
            ..EnhancedConfig::default()
        };
        let mut coordinator = EnhancedCoordinator::new(SAMPLE_RATE, &config).unwrap();
        let profile = coordinator.analyze(&harmonic_tone(220.0, 0.5)).unwrap();
        assert!(profile.pitch.is_some());
        assert!(profile.harmonic.is_none());
        assert!(profile.cadence.is_none());
    }

    #[test]
    fn streaming_builds_current_profile() {
        let mut coordinator = coordinator();
        assert!(coordinator.current_analysis().is_err());
        coordinator.process_chunk(&harmonic_tone(220.0, 1.5)).unwrap();
        let profile = coordinator.current_analysis().unwrap();
        assert!(profile.is_valid);
        assert!(profile.pitch.is_some());
    }

    #[test]
    fn reset_clears_everything() {
        let mut coordinator = coordinator();
        coordinator.process_chunk(&harmonic_tone(220.0, 1.0)).unwrap();
        coordinator.reset();
        assert!(coordinator.current_analysis().is_err());
        assert_eq!(coordinator.samples_processed, 0);
    }

    #[test]
    fn vocal_content_detected() {
        let mut coordinator = coordinator();
        let profile = coordinator.analyze(&harmonic_tone(220.0, 1.0)).unwrap();
        let characteristics = detect_characteristics(&profile);
        assert!(characteristics.is_vocal, "220 Hz harmonic tone should read as vocal");
        assert!(characteristics.is_tonal);
    }

    #[test]
    fn adaptation_enables_vocal_paths() {
        let characteristics = AudioCharacteristics {
            is_vocal: true,
            ..AudioCharacteristics::default()
        };
        let config = adapt_configuration(&characteristics, true);
        assert!(config.harmonic.enable_formant_tracking);
        assert!(config.cadence.enable_syllable_analysis);
        // Realtime base otherwise.
        assert_eq!(config.pitch.window_size, 512);
    }

    #[test]
    fn adaptation_enables_rhythmic_paths() {
        let characteristics = AudioCharacteristics {
            is_rhythmic: true,
            ..AudioCharacteristics::default()
        };
        let config = adapt_configuration(&characteristics, false);
        assert!(config.cadence.enable_beat_tracking);
        assert!(config.cadence.enable_onset_detection);
        // High-quality base otherwise.
        assert_eq!(config.harmonic.fft_size, 8192);
    }

    #[test]
    fn profile_serializes_to_json() {
        let mut coordinator = coordinator();
        let profile = coordinator.analyze(&harmonic_tone(220.0, 1.0)).unwrap();
        let json = profile.to_json().unwrap();
        assert!(json.contains("\"overallConfidence\""));
        assert!(json.contains("\"combined\""));
    }
}
