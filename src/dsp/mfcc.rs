//! Per-frame MFCC extraction: Hann window → power spectrum → mel filterbank
//! → log energies → DCT-II.
//!
//! The extractor is stateless across frames once configured; for identical
//! configuration and input the output is bit-identical between runs.

use crate::config::MfccConfig;
use crate::dsp::window::WindowedFft;
use crate::error::{EngineError, Result};

/// MFCC extractor bound to a sample rate and window size.
pub struct MfccExtractor {
    window_size: usize,
    coefficients: usize,
    filterbank: Vec<Vec<f32>>,
    fft: WindowedFft,
    power: Vec<f32>,
    mel_energies: Vec<f32>,
}

impl MfccExtractor {
    /// Build an extractor for `window_size`-sample frames at `sample_rate`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` if the sample rate is non-positive, the window
    /// is not a power of two, the coefficient count exceeds the filter
    /// count, or the frequency bounds are out of order.
    pub fn new(sample_rate: f32, window_size: usize, config: &MfccConfig) -> Result<Self> {
        if sample_rate <= 0.0 {
            return Err(EngineError::InvalidParams(format!(
                "sample rate must be positive, got {sample_rate}"
            )));
        }
        if config.mel_filters == 0 || config.coefficients == 0 {
            return Err(EngineError::InvalidParams(
                "mel_filters and coefficients must be non-zero".into(),
            ));
        }
        if config.coefficients > config.mel_filters {
            return Err(EngineError::InvalidParams(format!(
                "cannot keep {} coefficients from {} mel filters",
                config.coefficients, config.mel_filters
            )));
        }

        let nyquist = sample_rate / 2.0;
        let min_freq = config.min_freq_hz.max(0.0);
        let max_freq = if config.max_freq_hz > 0.0 {
            config.max_freq_hz.min(nyquist)
        } else {
            nyquist
        };
        if max_freq <= min_freq {
            return Err(EngineError::InvalidParams(format!(
                "mel band [{min_freq}, {max_freq}] Hz is empty"
            )));
        }

        let fft = WindowedFft::new(window_size)?;
        let filterbank = build_mel_filterbank(
            config.mel_filters,
            window_size,
            sample_rate,
            min_freq,
            max_freq,
        );

        Ok(Self {
            window_size,
            coefficients: config.coefficients,
            filterbank,
            fft,
            power: Vec::new(),
            mel_energies: vec![0.0; config.mel_filters],
        })
    }

    /// Frame length expected by [`extract`](Self::extract).
    #[must_use]
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Number of coefficients per output vector.
    #[must_use]
    pub fn coefficients(&self) -> usize {
        self.coefficients
    }

    /// Extract one MFCC vector from exactly one window of samples.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` unless `frame` is exactly
    /// [`window_size`](Self::window_size) samples.
    pub fn extract(&mut self, frame: &[f32]) -> Result<Vec<f32>> {
        if frame.len() != self.window_size {
            return Err(EngineError::InvalidParams(format!(
                "expected a frame of {} samples, got {}",
                self.window_size,
                frame.len()
            )));
        }

        self.fft.power_spectrum(frame, &mut self.power)?;

        for (energy, filter) in self.mel_energies.iter_mut().zip(self.filterbank.iter()) {
            let e: f32 = filter
                .iter()
                .zip(self.power.iter())
                .map(|(&f, &p)| f * p)
                .sum();
            // Log energy with a floor to avoid log(0).
            *energy = e.max(1e-10).ln();
        }

        Ok(dct_ii(&self.mel_energies, self.coefficients))
    }
}

/// Build a mel-spaced triangular filterbank over `[min_freq, max_freq]`.
fn build_mel_filterbank(
    num_filters: usize,
    fft_size: usize,
    sample_rate: f32,
    min_freq: f32,
    max_freq: f32,
) -> Vec<Vec<f32>> {
    let power_len = fft_size / 2 + 1;
    let low_mel = hz_to_mel(min_freq);
    let high_mel = hz_to_mel(max_freq);

    // Filter edges equally spaced on the mel scale.
    let num_points = num_filters + 2;
    let bin_points: Vec<usize> = (0..num_points)
        .map(|i| {
            let mel = low_mel + (high_mel - low_mel) * i as f32 / (num_points - 1) as f32;
            let hz = mel_to_hz(mel);
            ((fft_size as f32 + 1.0) * hz / sample_rate).floor() as usize
        })
        .collect();

    let mut filterbank = Vec::with_capacity(num_filters);
    for m in 0..num_filters {
        let mut filter = vec![0.0f32; power_len];
        let left = bin_points[m];
        let center = bin_points[m + 1];
        let right = bin_points[m + 2];

        if center > left {
            let denom = (center - left) as f32;
            for (i, val) in filter.iter_mut().enumerate().take(center).skip(left) {
                *val = (i - left) as f32 / denom;
            }
        }
        if right > center {
            let denom = (right - center) as f32;
            for (i, val) in filter
                .iter_mut()
                .enumerate()
                .take((right + 1).min(power_len))
                .skip(center)
            {
                *val = (right - i) as f32 / denom;
            }
        }

        filterbank.push(filter);
    }

    filterbank
}

/// DCT-II keeping the first `num_coeffs` coefficients.
fn dct_ii(input: &[f32], num_coeffs: usize) -> Vec<f32> {
    let n = input.len();
    let mut result = Vec::with_capacity(num_coeffs);
    for k in 0..num_coeffs {
        let mut sum = 0.0f32;
        for (i, &val) in input.iter().enumerate() {
            sum += val
                * (std::f32::consts::PI * k as f32 * (2 * i + 1) as f32 / (2 * n) as f32).cos();
        }
        result.push(sum);
    }
    result
}

/// Convert frequency in Hz to the mel scale.
fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

/// Convert mel scale to Hz.
fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0_f32.powf(mel / 2595.0) - 1.0)
}
