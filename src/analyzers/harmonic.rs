//! Harmonic-structure analysis: spectral descriptors, harmonic tracking,
//! HNR, formants, and tonal-quality scalars.

use crate::config::HarmonicConfig;
use crate::dsp::window::WindowedFft;
use crate::error::{EngineError, Result};
use serde::Serialize;

/// Closed-form tonal descriptors, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TonalQualities {
    /// High-frequency energy share (above 2 kHz), scaled.
    pub rasp: f32,
    /// Spectral centroid relative to 3 kHz.
    pub whine: f32,
    /// Inverse of inharmonicity.
    pub resonance: f32,
    /// Spectral centroid relative to three times the fundamental.
    pub brightness: f32,
    /// Inverse of spectral flatness.
    pub roughness: f32,
}

/// Per-window harmonic analysis result.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HarmonicProfile {
    /// Seconds of audio processed before this window.
    pub timestamp_secs: f32,
    /// Strongest in-band spectral peak, Hz; 0.0 when the window is empty.
    pub fundamental_hz: f32,
    /// Magnitude-weighted mean frequency over the analysis band, Hz.
    pub spectral_centroid_hz: f32,
    /// Magnitude-weighted standard deviation around the centroid, Hz.
    pub spectral_spread_hz: f32,
    /// Frequency below which 85% of the band energy lies, Hz.
    pub spectral_rolloff_hz: f32,
    /// Geometric over arithmetic mean of the band magnitudes, `[0, 1]`.
    pub spectral_flatness: f32,
    /// Harmonic-to-noise ratio in dB.
    pub hnr_db: f32,
    /// Mean relative deviation of harmonics from integer multiples.
    pub inharmonicity: f32,
    /// Detected harmonic peak frequencies, Hz.
    pub harmonic_freqs: Vec<f32>,
    /// Amplitudes of the detected harmonic peaks.
    pub harmonic_amps: Vec<f32>,
    /// Formant peaks in the 200–4000 Hz band, ascending, present only when
    /// formant tracking is enabled.
    pub formants_hz: Vec<f32>,
    /// Tonal-quality scalars, present only when tonal analysis is enabled.
    pub qualities: Option<TonalQualities>,
    /// Whether a usable fundamental was found.
    pub is_harmonic: bool,
    /// Composite confidence in `[0, 1]`.
    pub confidence: f32,
}

/// Per-window harmonic analyzer with a cached FFT plan.
pub struct HarmonicAnalyzer {
    config: HarmonicConfig,
    sample_rate: f32,
    max_freq: f32,
    fft: WindowedFft,
    spectrum: Vec<f32>,
    freq_bins: Vec<f32>,
    buffer: Vec<f32>,
    current: Option<HarmonicProfile>,
    processed_windows: u64,
}

impl HarmonicAnalyzer {
    /// Create an analyzer for the given sample rate.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` on a non-positive sample rate, a non-power-of-
    /// two FFT size, a bad hop, or an empty frequency band.
    pub fn new(sample_rate: f32, config: &HarmonicConfig) -> Result<Self> {
        if sample_rate <= 0.0 {
            return Err(EngineError::InvalidParams(format!(
                "sample rate must be positive, got {sample_rate}"
            )));
        }
        if config.hop_size == 0 || config.hop_size > config.fft_size {
            return Err(EngineError::InvalidParams(format!(
                "harmonic hop {} out of range for FFT size {}",
                config.hop_size, config.fft_size
            )));
        }
        let max_freq = config.max_freq_hz.min(sample_rate / 2.0);
        if config.min_freq_hz < 0.0 || max_freq <= config.min_freq_hz {
            return Err(EngineError::InvalidParams(format!(
                "harmonic band [{}, {}] Hz is empty",
                config.min_freq_hz, max_freq
            )));
        }

        let fft = WindowedFft::new(config.fft_size)?;
        let freq_bins = (0..fft.bins())
            .map(|i| i as f32 * sample_rate / config.fft_size as f32)
            .collect();

        Ok(Self {
            config: config.clone(),
            sample_rate,
            max_freq,
            fft,
            spectrum: Vec::new(),
            freq_bins,
            buffer: Vec::new(),
            current: None,
            processed_windows: 0,
        })
    }

    /// Analyze one window (at least one FFT frame of samples).
    ///
    /// # Errors
    ///
    /// Returns `InsufficientData` if the window is shorter than the FFT size.
    pub fn analyze(&mut self, window: &[f32]) -> Result<HarmonicProfile> {
        if window.len() < self.config.fft_size {
            return Err(EngineError::InsufficientData(
                "harmonic window shorter than the FFT size",
            ));
        }

        self.fft
            .magnitude_spectrum(&window[..self.config.fft_size], &mut self.spectrum)?;

        let mut profile = HarmonicProfile {
            timestamp_secs: self.processed_windows as f32 * self.config.hop_size as f32
                / self.sample_rate,
            ..HarmonicProfile::default()
        };
        self.processed_windows += 1;

        profile.spectral_centroid_hz = self.spectral_centroid();
        profile.spectral_spread_hz = self.spectral_spread(profile.spectral_centroid_hz);
        profile.spectral_rolloff_hz = self.spectral_rolloff();
        profile.spectral_flatness = self.spectral_flatness();
        profile.fundamental_hz = self.find_fundamental();

        if profile.fundamental_hz > 0.0 {
            self.analyze_harmonic_structure(&mut profile);
            if self.config.enable_formant_tracking {
                profile.formants_hz = self.extract_formants();
            }
            if self.config.enable_tonal_analysis {
                profile.qualities = Some(self.assess_tonal_qualities(&profile));
            }
            profile.is_harmonic = true;
            profile.confidence = confidence_for(&profile);
        }

        self.current = Some(profile.clone());
        Ok(profile)
    }

    /// Feed arbitrary-length audio; analyzes each full FFT frame and
    /// advances by the hop.
    ///
    /// # Errors
    ///
    /// Propagates analysis errors.
    pub fn process_chunk(&mut self, chunk: &[f32]) -> Result<()> {
        self.buffer.extend_from_slice(chunk);
        while self.buffer.len() >= self.config.fft_size {
            let frame: Vec<f32> = self.buffer[..self.config.fft_size].to_vec();
            self.analyze(&frame)?;
            self.buffer.drain(..self.config.hop_size);
        }
        Ok(())
    }

    /// Most recent profile.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientData` before the first full window.
    pub fn current_analysis(&self) -> Result<HarmonicProfile> {
        self.current
            .clone()
            .ok_or(EngineError::InsufficientData("no harmonic window processed yet"))
    }

    /// Clear buffered audio and the current profile.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.spectrum.clear();
        self.current = None;
        self.processed_windows = 0;
    }

    fn in_band(&self, bin: usize) -> bool {
        let f = self.freq_bins[bin];
        f >= self.config.min_freq_hz && f <= self.max_freq
    }

    fn spectral_centroid(&self) -> f32 {
        let mut weighted = 0.0f32;
        let mut total = 0.0f32;
        for i in 1..self.spectrum.len() {
            if self.in_band(i) {
                weighted += self.spectrum[i] * self.freq_bins[i];
                total += self.spectrum[i];
            }
        }
        if total > 0.0 { weighted / total } else { 0.0 }
    }

    fn spectral_spread(&self, centroid: f32) -> f32 {
        let mut weighted = 0.0f32;
        let mut total = 0.0f32;
        for i in 1..self.spectrum.len() {
            if self.in_band(i) {
                let diff = self.freq_bins[i] - centroid;
                weighted += self.spectrum[i] * diff * diff;
                total += self.spectrum[i];
            }
        }
        if total > 0.0 { (weighted / total).sqrt() } else { 0.0 }
    }

    fn spectral_rolloff(&self) -> f32 {
        let total: f32 = (1..self.spectrum.len())
            .filter(|&i| self.in_band(i))
            .map(|i| self.spectrum[i])
            .sum();
        let threshold = 0.85 * total;
        let mut cumulative = 0.0f32;
        for i in 1..self.spectrum.len() {
            if self.in_band(i) {
                cumulative += self.spectrum[i];
                if cumulative >= threshold {
                    return self.freq_bins[i];
                }
            }
        }
        self.max_freq
    }

    fn spectral_flatness(&self) -> f32 {
        let mut log_sum = 0.0f32;
        let mut sum = 0.0f32;
        let mut count = 0usize;
        for i in 1..self.spectrum.len() {
            if self.in_band(i) {
                let mag = self.spectrum[i].max(1e-10);
                log_sum += mag.ln();
                sum += mag;
                count += 1;
            }
        }
        if count == 0 {
            return 0.0;
        }
        let geometric = (log_sum / count as f32).exp();
        let arithmetic = sum / count as f32;
        if arithmetic > 0.0 {
            (geometric / arithmetic).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    fn find_fundamental(&self) -> f32 {
        let mut peak_bin = 0usize;
        let mut peak_mag = 0.0f32;
        for i in 1..self.spectrum.len() {
            if self.in_band(i) && self.spectrum[i] > peak_mag {
                peak_mag = self.spectrum[i];
                peak_bin = i;
            }
        }
        if peak_bin > 0 { self.freq_bins[peak_bin] } else { 0.0 }
    }

    fn analyze_harmonic_structure(&self, profile: &mut HarmonicProfile) {
        let fundamental = profile.fundamental_hz;
        let bin_hz = self.sample_rate / self.config.fft_size as f32;
        let mut harmonic_energy = 0.0f32;

        for h in 1..=self.config.max_harmonics {
            let expected = fundamental * h as f32;
            if expected > self.max_freq {
                break;
            }

            // Search a tolerance window around the expected harmonic.
            let tolerance = fundamental * self.config.harmonic_tolerance;
            let start = (((expected - tolerance) / bin_hz) as usize).max(1);
            let end = (((expected + tolerance) / bin_hz) as usize).min(self.spectrum.len() - 1);
            if start > end {
                continue;
            }

            let mut max_amp = 0.0f32;
            let mut max_bin = start;
            for i in start..=end {
                if self.spectrum[i] > max_amp {
                    max_amp = self.spectrum[i];
                    max_bin = i;
                }
            }

            if max_amp > 0.0 {
                profile.harmonic_freqs.push(self.freq_bins[max_bin]);
                profile.harmonic_amps.push(max_amp);
                harmonic_energy += max_amp * max_amp;
            }
        }

        let total_energy: f32 = (1..self.spectrum.len())
            .map(|i| self.spectrum[i] * self.spectrum[i])
            .sum();

        if total_energy > 0.0 && harmonic_energy > 0.0 {
            let noise_energy = (total_energy - harmonic_energy).max(1e-10);
            profile.hnr_db = 10.0 * (harmonic_energy / noise_energy).log10();
        }

        profile.inharmonicity = inharmonicity_of(profile);
    }

    fn extract_formants(&self) -> Vec<f32> {
        // Local maxima over a two-bin neighborhood within the formant band.
        let mut peaks: Vec<usize> = Vec::new();
        for i in 2..self.spectrum.len().saturating_sub(2) {
            let f = self.freq_bins[i];
            if !(200.0..=4000.0).contains(&f) {
                continue;
            }
            if self.spectrum[i] > self.spectrum[i - 1]
                && self.spectrum[i] > self.spectrum[i + 1]
                && self.spectrum[i] > self.spectrum[i - 2]
                && self.spectrum[i] > self.spectrum[i + 2]
            {
                peaks.push(i);
            }
        }

        peaks.sort_by(|&a, &b| self.spectrum[b].total_cmp(&self.spectrum[a]));
        peaks.truncate(self.config.num_formants);

        let mut formants: Vec<f32> = peaks.iter().map(|&i| self.freq_bins[i]).collect();
        formants.sort_by(f32::total_cmp);
        formants
    }

    fn assess_tonal_qualities(&self, profile: &HarmonicProfile) -> TonalQualities {
        let mut high_energy = 0.0f32;
        let mut total_energy = 0.0f32;
        for i in 1..self.spectrum.len() {
            let energy = self.spectrum[i] * self.spectrum[i];
            total_energy += energy;
            if self.freq_bins[i] > 2000.0 {
                high_energy += energy;
            }
        }

        let rasp = if total_energy > 0.0 {
            (high_energy / total_energy * 3.0).min(1.0)
        } else {
            0.0
        };
        let whine = (profile.spectral_centroid_hz / 3000.0).min(1.0);
        let resonance = 1.0 - (profile.inharmonicity * 10.0).min(1.0);
        let brightness = if profile.fundamental_hz > 0.0 {
            (profile.spectral_centroid_hz / (profile.fundamental_hz * 3.0)).min(1.0)
        } else {
            0.0
        };
        let roughness = 1.0 - profile.spectral_flatness;

        TonalQualities {
            rasp: rasp.clamp(0.0, 1.0),
            whine: whine.clamp(0.0, 1.0),
            resonance: resonance.clamp(0.0, 1.0),
            brightness: brightness.clamp(0.0, 1.0),
            roughness: roughness.clamp(0.0, 1.0),
        }
    }
}

fn inharmonicity_of(profile: &HarmonicProfile) -> f32 {
    if profile.harmonic_freqs.len() < 2 {
        return 0.0;
    }
    let mut total = 0.0f32;
    for (i, &actual) in profile.harmonic_freqs.iter().enumerate() {
        let expected = profile.fundamental_hz * (i + 1) as f32;
        total += (actual - expected).abs() / expected;
    }
    total / profile.harmonic_freqs.len() as f32
}

fn confidence_for(profile: &HarmonicProfile) -> f32 {
    let mut confidence = 0.0f32;

    // Harmonic strength relative to the fundamental's amplitude.
    if let Some(&first) = profile.harmonic_amps.first() {
        if first > 0.0 {
            let avg_ratio = profile.harmonic_amps.iter().map(|a| a / first).sum::<f32>()
                / profile.harmonic_amps.len() as f32;
            confidence += avg_ratio.min(1.0) * 0.4;
        }
    }

    if profile.hnr_db > 0.0 {
        confidence += (profile.hnr_db / 20.0).min(1.0) * 0.3;
    }

    confidence += (1.0 - (profile.inharmonicity * 5.0).min(1.0)) * 0.3;

    confidence.min(1.0)
}
