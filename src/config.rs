//! Configuration types for the call-analysis engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{EngineError, Result};

/// Top-level configuration for an engine instance.
///
/// Every session created by the engine starts from this configuration; the
/// per-session sample rate is supplied at `create_session` time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory searched when a master call is loaded by bare id
    /// (e.g. `"buck_grunt"` resolves to `<dir>/buck_grunt.mfc`).
    pub master_call_dir: PathBuf,
    /// Streaming frame machine settings.
    pub stream: StreamConfig,
    /// MFCC extraction settings.
    pub mfcc: MfccConfig,
    /// DTW comparison settings.
    pub dtw: DtwConfig,
    /// Realtime scoring settings.
    pub scorer: ScorerConfig,
    /// Enhanced analyzer ensemble settings.
    pub enhanced: EnhancedConfig,
}

/// Per-session options supplied at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Run the pitch/harmonic/cadence ensemble alongside MFCC scoring.
    pub enable_enhanced_analysis: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            enable_enhanced_analysis: true,
        }
    }
}

/// Streaming pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Analysis frame length in samples. Must be a power of two
    /// (it is also the MFCC FFT size). 2048 ≈ 46 ms at 44.1 kHz.
    pub frame_size: usize,
    /// Hop between successive frames in samples. Must be non-zero and
    /// strictly less than `frame_size`.
    pub hop_size: usize,
    /// Ring buffer capacity in samples. Must hold at least two frames.
    pub ring_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            frame_size: 2048,
            hop_size: 512,
            ring_capacity: 65_536,
        }
    }
}

impl StreamConfig {
    /// Validate the frame geometry.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` if the frame size is not a power of two, the
    /// hop does not divide the frame machine sensibly, or the ring is too
    /// small to hold a frame plus a hop.
    pub fn validate(&self) -> Result<()> {
        if self.frame_size == 0 || !self.frame_size.is_power_of_two() {
            return Err(EngineError::InvalidParams(format!(
                "frame_size must be a non-zero power of two, got {}",
                self.frame_size
            )));
        }
        if self.hop_size == 0 || self.hop_size >= self.frame_size {
            return Err(EngineError::InvalidParams(format!(
                "hop_size must be in 1..frame_size, got {}",
                self.hop_size
            )));
        }
        if self.ring_capacity < self.frame_size * 2 {
            return Err(EngineError::InvalidParams(format!(
                "ring_capacity {} too small for frame_size {}",
                self.ring_capacity, self.frame_size
            )));
        }
        Ok(())
    }
}

/// MFCC extractor configuration.
///
/// The FFT window size comes from [`StreamConfig::frame_size`]; this struct
/// carries the filterbank shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MfccConfig {
    /// Number of triangular mel filters.
    pub mel_filters: usize,
    /// Number of cepstral coefficients kept after the DCT.
    /// Coefficient 0 represents frame energy.
    pub coefficients: usize,
    /// Lower edge of the filterbank in Hz.
    pub min_freq_hz: f32,
    /// Upper edge of the filterbank in Hz. `0.0` means Nyquist.
    pub max_freq_hz: f32,
}

impl Default for MfccConfig {
    fn default() -> Self {
        Self {
            mel_filters: 26,
            coefficients: 13,
            min_freq_hz: 0.0,
            max_freq_hz: 0.0,
        }
    }
}

/// DTW comparator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DtwConfig {
    /// Sensitivity of the distance → similarity mapping
    /// (`similarity = exp(-cost / scale)`). The default puts a self-pair
    /// above 0.95 and a random pair near 0.1.
    pub scale: f32,
    /// Sakoe–Chiba band radius in frames. `None` = unconstrained.
    pub band_radius: Option<usize>,
}

impl Default for DtwConfig {
    fn default() -> Self {
        Self {
            scale: 0.35,
            band_radius: None,
        }
    }
}

/// Pitch analyzer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchConfig {
    /// Analysis window length in samples.
    pub window_size: usize,
    /// Streaming hop in samples.
    pub hop_size: usize,
    /// Lowest fundamental searched, Hz.
    pub min_freq_hz: f32,
    /// Highest fundamental searched, Hz.
    pub max_freq_hz: f32,
    /// YIN cumulative-difference threshold. Lower = stricter voicing.
    pub threshold: f32,
    /// Track vibrato rate over the recent pitch contour.
    pub enable_vibrato_detection: bool,
}

impl Default for PitchConfig {
    fn default() -> Self {
        Self {
            window_size: 2048,
            hop_size: 512,
            min_freq_hz: 60.0,
            max_freq_hz: 1200.0,
            threshold: 0.15,
            enable_vibrato_detection: true,
        }
    }
}

/// Harmonic analyzer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarmonicConfig {
    /// FFT size in samples. Must be a power of two.
    pub fft_size: usize,
    /// Streaming hop in samples.
    pub hop_size: usize,
    /// Lower bound of the analysis band, Hz.
    pub min_freq_hz: f32,
    /// Upper bound of the analysis band, Hz.
    pub max_freq_hz: f32,
    /// Maximum number of harmonics searched above the fundamental.
    pub max_harmonics: usize,
    /// Search tolerance around each expected harmonic, as a fraction of the
    /// fundamental.
    pub harmonic_tolerance: f32,
    /// Number of formant peaks reported.
    pub num_formants: usize,
    /// Extract formant peaks (200–4000 Hz band).
    pub enable_formant_tracking: bool,
    /// Compute the tonal-quality scalars.
    pub enable_tonal_analysis: bool,
}

impl Default for HarmonicConfig {
    fn default() -> Self {
        Self {
            fft_size: 4096,
            hop_size: 1024,
            min_freq_hz: 60.0,
            max_freq_hz: 8000.0,
            max_harmonics: 10,
            harmonic_tolerance: 0.1,
            num_formants: 4,
            enable_formant_tracking: true,
            enable_tonal_analysis: true,
        }
    }
}

/// Autocorrelation effort regime for the cadence analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutocorrMode {
    /// Energy-based onset flux, lag cap 256, early peak exit. For short
    /// clips and real-time use.
    Fast,
    /// Spectral-flux onsets; autocorrelation lag cap scales with clip
    /// length (384 below 0.75 s, 512 below 1.25 s, 1000 otherwise) and the
    /// inner loop decimates short clips (stride 4 below 1 s, 2 below 2 s).
    #[default]
    Default,
    /// Full configured lag range, stride 1, no caps.
    ForcedFull,
}

/// Cadence analyzer configuration.
///
/// Frame geometry is expressed in seconds because the analyzer operates on
/// second-scale horizons; sample counts are derived per session rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    /// Analysis frame length in seconds.
    pub frame_secs: f32,
    /// Hop between frames in seconds.
    pub hop_secs: f32,
    /// Lowest reportable tempo, BPM.
    pub min_tempo_bpm: f32,
    /// Highest reportable tempo, BPM.
    pub max_tempo_bpm: f32,
    /// Base onset-picking threshold applied to the normalized flux.
    pub onset_threshold: f32,
    /// Multiplier on the median of recent flux added to the base threshold.
    pub adaptive_factor: f32,
    /// Maximum autocorrelation lag count before regime caps apply.
    pub autocorrelation_lags: usize,
    /// Shortest periodicity reported, seconds.
    pub min_period_secs: f32,
    /// Longest periodicity reported, seconds.
    pub max_period_secs: f32,
    /// Autocorrelation effort regime.
    pub autocorr_mode: AutocorrMode,
    /// Run onset detection at all.
    pub enable_onset_detection: bool,
    /// Estimate tempo and extract beats.
    pub enable_beat_tracking: bool,
    /// Compute syllable descriptors.
    pub enable_syllable_analysis: bool,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            frame_secs: 0.1,
            hop_secs: 0.05,
            min_tempo_bpm: 30.0,
            max_tempo_bpm: 500.0,
            onset_threshold: 0.1,
            adaptive_factor: 1.5,
            autocorrelation_lags: 1000,
            min_period_secs: 0.05,
            max_period_secs: 2.0,
            autocorr_mode: AutocorrMode::Default,
            enable_onset_detection: true,
            enable_beat_tracking: true,
            enable_syllable_analysis: true,
        }
    }
}

/// Realtime scorer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// Weight of the MFCC/DTW sub-score. Weights must sum to 1.0 ± 1e-3.
    pub mfcc_weight: f32,
    /// Weight of the volume sub-score.
    pub volume_weight: f32,
    /// Weight of the timing sub-score.
    pub timing_weight: f32,
    /// Weight of the pitch sub-score. Disabled (0.0) by default.
    pub pitch_weight: f32,
    /// Minimum processed duration between score recomputations, in
    /// milliseconds of *sample time* (deterministic, not wall clock).
    pub update_rate_ms: f32,
    /// Bounded score-history depth, newest first. Must be ≥ 1.
    pub history_depth: usize,
    /// Confidence at or above which `is_reliable` is set.
    pub confidence_threshold: f32,
    /// Overall score at or above which `is_match` is set.
    pub match_threshold: f32,
    /// Processed duration after which confidence coverage saturates, seconds.
    pub saturation_secs: f32,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            mfcc_weight: 0.5,
            volume_weight: 0.3,
            timing_weight: 0.2,
            pitch_weight: 0.0,
            update_rate_ms: 100.0,
            history_depth: 64,
            confidence_threshold: 0.7,
            match_threshold: 0.85,
            saturation_secs: 0.25,
        }
    }
}

impl ScorerConfig {
    /// Validate weights and bounds.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` if the four weights do not sum to 1.0 within
    /// 1e-3, any weight is negative, the history depth is zero, or the
    /// update rate is non-positive.
    pub fn validate(&self) -> Result<()> {
        let weights = [
            self.mfcc_weight,
            self.volume_weight,
            self.timing_weight,
            self.pitch_weight,
        ];
        if weights.iter().any(|w| *w < 0.0) {
            return Err(EngineError::InvalidParams(
                "scorer weights must be non-negative".into(),
            ));
        }
        let sum: f32 = weights.iter().sum();
        if (sum - 1.0).abs() > 1e-3 {
            return Err(EngineError::InvalidParams(format!(
                "scorer weights must sum to 1.0 (±1e-3), got {sum}"
            )));
        }
        if self.history_depth == 0 {
            return Err(EngineError::InvalidParams(
                "scorer history_depth must be at least 1".into(),
            ));
        }
        if self.update_rate_ms <= 0.0 {
            return Err(EngineError::InvalidParams(format!(
                "scorer update_rate_ms must be positive, got {}",
                self.update_rate_ms
            )));
        }
        Ok(())
    }
}

/// Enhanced analyzer ensemble configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancedConfig {
    /// Run the pitch analyzer.
    pub enable_pitch: bool,
    /// Run the harmonic analyzer.
    pub enable_harmonic: bool,
    /// Run the cadence analyzer.
    pub enable_cadence: bool,
    /// Favor small windows and cheap paths over accuracy.
    pub realtime_mode: bool,
    /// Pitch analyzer settings.
    pub pitch: PitchConfig,
    /// Harmonic analyzer settings.
    pub harmonic: HarmonicConfig,
    /// Cadence analyzer settings.
    pub cadence: CadenceConfig,
}

impl Default for EnhancedConfig {
    fn default() -> Self {
        Self {
            enable_pitch: true,
            enable_harmonic: true,
            enable_cadence: true,
            realtime_mode: false,
            pitch: PitchConfig::default(),
            harmonic: HarmonicConfig::default(),
            cadence: CadenceConfig::default(),
        }
    }
}

impl EnhancedConfig {
    /// Preset tuned for low-latency streaming: small windows, vibrato,
    /// formant, tonal, and syllable analysis off, fast autocorrelation.
    #[must_use]
    pub fn realtime() -> Self {
        let mut config = Self::default();
        config.realtime_mode = true;
        config.pitch.window_size = 512;
        config.pitch.hop_size = 128;
        // A 512-sample window fits two periods only above ~200 Hz.
        config.pitch.min_freq_hz = 200.0;
        config.pitch.enable_vibrato_detection = false;
        config.harmonic.fft_size = 512;
        config.harmonic.hop_size = 128;
        config.harmonic.enable_formant_tracking = false;
        config.harmonic.enable_tonal_analysis = false;
        config.cadence.frame_secs = 0.1;
        config.cadence.hop_secs = 0.05;
        config.cadence.enable_syllable_analysis = false;
        config.cadence.autocorr_mode = AutocorrMode::Fast;
        config
    }

    /// Preset tuned for accuracy: large windows, every path enabled,
    /// full-range autocorrelation.
    #[must_use]
    pub fn high_quality() -> Self {
        let mut config = Self::default();
        config.pitch.window_size = 4096;
        config.pitch.hop_size = 1024;
        config.pitch.enable_vibrato_detection = true;
        config.harmonic.fft_size = 8192;
        config.harmonic.hop_size = 1024;
        config.harmonic.enable_formant_tracking = true;
        config.harmonic.enable_tonal_analysis = true;
        config.cadence.frame_secs = 0.025;
        config.cadence.hop_secs = 0.010;
        config.cadence.enable_syllable_analysis = true;
        config.cadence.autocorr_mode = AutocorrMode::ForcedFull;
        config
    }
}
