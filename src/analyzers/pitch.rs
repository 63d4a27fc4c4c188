//! Fundamental-frequency estimation via YIN-style autocorrelation.
//!
//! Per-window detection restricted to a configured frequency band, with a
//! confidence derived from the depth of the cumulative-mean-normalized
//! difference trough. Streaming operation advances an internal buffer by the
//! configured hop.

use crate::config::PitchConfig;
use crate::error::{EngineError, Result};
use serde::Serialize;

/// Minimum RMS below which a window is treated as silent.
const SILENCE_RMS: f32 = 1e-4;

/// Maximum number of contour points retained for vibrato tracking.
const CONTOUR_CAPACITY: usize = 128;

/// One pitch estimate.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PitchResult {
    /// Estimated fundamental in Hz; 0.0 when unvoiced or silent.
    pub frequency_hz: f32,
    /// Trough-depth confidence in `[0, 1]`.
    pub confidence: f32,
    /// Vibrato rate in Hz, when detection is enabled and a stable
    /// oscillation is present in the recent contour.
    pub vibrato_rate_hz: Option<f32>,
    /// Seconds of audio processed before this window.
    pub timestamp_secs: f32,
}

/// YIN-style pitch analyzer.
pub struct PitchAnalyzer {
    config: PitchConfig,
    sample_rate: f32,
    /// Streaming accumulation buffer, advanced by `hop_size`.
    buffer: Vec<f32>,
    /// Scratch for the cumulative-mean-normalized difference function.
    cmnd: Vec<f32>,
    /// Recent (timestamp, frequency) pairs of voiced windows.
    contour: Vec<(f32, f32)>,
    current: Option<PitchResult>,
    processed_windows: u64,
}

impl PitchAnalyzer {
    /// Create an analyzer for the given sample rate.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` if the sample rate, window geometry, or
    /// frequency band is out of range.
    pub fn new(sample_rate: f32, config: &PitchConfig) -> Result<Self> {
        if sample_rate <= 0.0 {
            return Err(EngineError::InvalidParams(format!(
                "sample rate must be positive, got {sample_rate}"
            )));
        }
        if config.window_size == 0 || config.hop_size == 0 || config.hop_size > config.window_size
        {
            return Err(EngineError::InvalidParams(format!(
                "pitch window/hop {}/{} out of range",
                config.window_size, config.hop_size
            )));
        }
        if config.min_freq_hz <= 0.0 || config.max_freq_hz <= config.min_freq_hz {
            return Err(EngineError::InvalidParams(format!(
                "pitch band [{}, {}] Hz is empty",
                config.min_freq_hz, config.max_freq_hz
            )));
        }
        if config.max_freq_hz >= sample_rate / 2.0 {
            return Err(EngineError::InvalidParams(format!(
                "pitch band upper edge {} Hz exceeds Nyquist",
                config.max_freq_hz
            )));
        }
        // The longest searched period must fit in half a window.
        let max_lag = (sample_rate / config.min_freq_hz) as usize;
        if max_lag * 2 > config.window_size {
            return Err(EngineError::InvalidParams(format!(
                "window of {} samples too short for a {} Hz floor at {} Hz",
                config.window_size, config.min_freq_hz, sample_rate
            )));
        }

        Ok(Self {
            config: config.clone(),
            sample_rate,
            buffer: Vec::with_capacity(config.window_size * 2),
            cmnd: Vec::new(),
            contour: Vec::with_capacity(CONTOUR_CAPACITY),
            current: None,
            processed_windows: 0,
        })
    }

    /// Estimate the fundamental of one analysis window.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientData` if `window` is shorter than the configured
    /// window size.
    pub fn analyze(&mut self, window: &[f32]) -> Result<PitchResult> {
        if window.len() < self.config.window_size {
            return Err(EngineError::InsufficientData(
                "pitch window shorter than configured window size",
            ));
        }

        let timestamp_secs =
            self.processed_windows as f32 * self.config.hop_size as f32 / self.sample_rate;
        self.processed_windows += 1;

        let rms = rms(window);
        if rms < SILENCE_RMS {
            let result = PitchResult {
                frequency_hz: 0.0,
                confidence: 0.0,
                vibrato_rate_hz: None,
                timestamp_secs,
            };
            self.current = Some(result);
            return Ok(result);
        }

        let (frequency_hz, confidence) = self.detect(window);

        if frequency_hz > 0.0 && confidence > 0.3 {
            if self.contour.len() == CONTOUR_CAPACITY {
                self.contour.remove(0);
            }
            self.contour.push((timestamp_secs, frequency_hz));
        }

        let vibrato_rate_hz = if self.config.enable_vibrato_detection {
            self.estimate_vibrato_rate()
        } else {
            None
        };

        let result = PitchResult {
            frequency_hz,
            confidence,
            vibrato_rate_hz,
            timestamp_secs,
        };
        self.current = Some(result);
        Ok(result)
    }

    /// Feed arbitrary-length audio; runs [`analyze`](Self::analyze) for each
    /// full window and advances by the hop.
    ///
    /// # Errors
    ///
    /// Propagates analysis errors.
    pub fn process_chunk(&mut self, chunk: &[f32]) -> Result<()> {
        self.buffer.extend_from_slice(chunk);
        while self.buffer.len() >= self.config.window_size {
            let window: Vec<f32> = self.buffer[..self.config.window_size].to_vec();
            self.analyze(&window)?;
            self.buffer.drain(..self.config.hop_size);
        }
        Ok(())
    }

    /// Most recent estimate.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientData` before the first full window.
    pub fn current_pitch(&self) -> Result<PitchResult> {
        self.current
            .ok_or(EngineError::InsufficientData("no pitch window processed yet"))
    }

    /// Clear buffered audio, contour, and the current estimate.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.contour.clear();
        self.current = None;
        self.processed_windows = 0;
    }

    /// YIN detection over `window`: cumulative-mean-normalized difference,
    /// absolute-threshold trough search, parabolic refinement.
    fn detect(&mut self, window: &[f32]) -> (f32, f32) {
        let lag_min = (self.sample_rate / self.config.max_freq_hz).floor().max(2.0) as usize;
        let lag_max = ((self.sample_rate / self.config.min_freq_hz) as usize)
            .min(window.len() / 2);
        if lag_min + 2 >= lag_max {
            return (0.0, 0.0);
        }

        // Difference function over a fixed integration span.
        let span = window.len() - lag_max;
        self.cmnd.clear();
        self.cmnd.resize(lag_max + 1, 0.0);
        let mut running_sum = 0.0f32;
        for lag in 1..=lag_max {
            let mut d = 0.0f32;
            for i in 0..span {
                let delta = window[i] - window[i + lag];
                d += delta * delta;
            }
            running_sum += d;
            // Cumulative mean normalization; d'(0) is defined as 1.
            self.cmnd[lag] = if running_sum > 0.0 {
                d * lag as f32 / running_sum
            } else {
                1.0
            };
        }
        self.cmnd[0] = 1.0;

        // First trough under the threshold wins; otherwise the global min.
        let mut best_lag = 0usize;
        let mut best_val = f32::MAX;
        let mut lag = lag_min;
        while lag < lag_max {
            let v = self.cmnd[lag];
            if v < self.config.threshold && self.cmnd[lag + 1] >= v {
                best_lag = lag;
                best_val = v;
                break;
            }
            if v < best_val {
                best_val = v;
                best_lag = lag;
            }
            lag += 1;
        }
        if best_lag == 0 {
            return (0.0, 0.0);
        }

        // Parabolic interpolation around the trough.
        let refined = if best_lag > lag_min && best_lag + 1 < lag_max {
            let left = self.cmnd[best_lag - 1];
            let mid = self.cmnd[best_lag];
            let right = self.cmnd[best_lag + 1];
            let denom = left - 2.0 * mid + right;
            if denom.abs() > 1e-12 {
                best_lag as f32 + 0.5 * (left - right) / denom
            } else {
                best_lag as f32
            }
        } else {
            best_lag as f32
        };

        let frequency = self.sample_rate / refined;
        if frequency < self.config.min_freq_hz || frequency > self.config.max_freq_hz {
            return (0.0, 0.0);
        }

        let confidence = (1.0 - best_val).clamp(0.0, 1.0);
        (frequency, confidence)
    }

    /// Vibrato rate from sign changes of the detrended recent contour.
    fn estimate_vibrato_rate(&self) -> Option<f32> {
        if self.contour.len() < 8 {
            return None;
        }
        let span = self.contour[self.contour.len() - 1].0 - self.contour[0].0;
        if span < 0.25 {
            return None;
        }

        let mean = self.contour.iter().map(|&(_, f)| f).sum::<f32>() / self.contour.len() as f32;
        if mean <= 0.0 {
            return None;
        }

        // Depth gate: a real vibrato modulates by more than ~0.3% of f0.
        let max_dev = self
            .contour
            .iter()
            .map(|&(_, f)| (f - mean).abs())
            .fold(0.0f32, f32::max);
        if max_dev / mean < 0.003 {
            return None;
        }

        let mut crossings = 0usize;
        let mut prev_sign = 0i32;
        for &(_, f) in &self.contour {
            let sign = if f > mean {
                1
            } else if f < mean {
                -1
            } else {
                0
            };
            if sign != 0 && prev_sign != 0 && sign != prev_sign {
                crossings += 1;
            }
            if sign != 0 {
                prev_sign = sign;
            }
        }

        let rate = crossings as f32 / (2.0 * span);
        (0.5..=20.0).contains(&rate).then_some(rate)
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    const SAMPLE_RATE: f32 = 44_100.0;

    fn analyzer() -> PitchAnalyzer {
        PitchAnalyzer::new(SAMPLE_RATE, &PitchConfig::default()).unwrap()
    }

    fn sine(freq: f32, secs: f32) -> Vec<f32> {
        let n = (secs * SAMPLE_RATE) as usize;
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / SAMPLE_RATE).sin() * 0.5)
            .collect()
    }

    #[test]
    fn pure_tone_within_five_percent() {
        let mut pitch = analyzer();
        let audio = sine(440.0, 0.3);
        let result = pitch.analyze(&audio[..2048]).unwrap();
        assert!(
            (result.frequency_hz - 440.0).abs() < 440.0 * 0.05,
            "estimated {} Hz",
            result.frequency_hz
        );
        assert!(result.confidence >= 0.5, "confidence {}", result.confidence);
    }

    #[test]
    fn low_tone_detected() {
        let mut pitch = analyzer();
        let audio = sine(110.0, 0.1);
        let result = pitch.analyze(&audio[..2048]).unwrap();
        assert!(
            (result.frequency_hz - 110.0).abs() < 110.0 * 0.05,
            "estimated {} Hz",
            result.frequency_hz
        );
    }

    #[test]
    fn silence_reports_zero_confidence() {
        let mut pitch = analyzer();
        let result = pitch.analyze(&vec![0.0; 2048]).unwrap();
        assert_eq!(result.frequency_hz, 0.0);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn noise_reports_low_confidence() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let noise: Vec<f32> = (0..2048).map(|_| rng.r#gen::<f32>() * 2.0 - 1.0).collect();

        let mut pitch = analyzer();
        let result = pitch.analyze(&noise).unwrap();
        assert!(result.confidence < 0.5, "noise confidence {}", result.confidence);
    }

    #[test]
    fn short_window_is_insufficient_data() {
        let mut pitch = analyzer();
        let err = pitch.analyze(&[0.1; 100]).unwrap_err();
        assert_eq!(err.status(), "INSUFFICIENT_DATA");
    }

    #[test]
    fn streaming_matches_hop_cadence() {
        let mut pitch = analyzer();
        let audio = sine(330.0, 0.5);
        pitch.process_chunk(&audio).unwrap();

        let result = pitch.current_pitch().unwrap();
        assert!(
            (result.frequency_hz - 330.0).abs() < 330.0 * 0.05,
            "estimated {} Hz",
            result.frequency_hz
        );
    }

    #[test]
    fn current_pitch_before_data_is_insufficient() {
        let pitch = analyzer();
        assert_eq!(
            pitch.current_pitch().unwrap_err().status(),
            "INSUFFICIENT_DATA"
        );
    }

    #[test]
    fn reset_clears_state() {
        let mut pitch = analyzer();
        pitch.process_chunk(&sine(440.0, 0.2)).unwrap();
        assert!(pitch.current_pitch().is_ok());

        pitch.reset();
        assert!(pitch.current_pitch().is_err());
        assert_eq!(pitch.processed_windows, 0);
    }

    #[test]
    fn vibrato_detected_on_modulated_tone() {
        // 440 Hz carrier with a 6 Hz, ±3% frequency modulation.
        let n = (1.5 * SAMPLE_RATE) as usize;
        let mut phase = 0.0f64;
        let audio: Vec<f32> = (0..n)
            .map(|i| {
                let t = i as f64 / SAMPLE_RATE as f64;
                let freq = 440.0 * (1.0 + 0.03 * (2.0 * std::f64::consts::PI * 6.0 * t).sin());
                phase += 2.0 * std::f64::consts::PI * freq / SAMPLE_RATE as f64;
                (phase.sin() * 0.5) as f32
            })
            .collect();

        let mut pitch = analyzer();
        pitch.process_chunk(&audio).unwrap();
        let result = pitch.current_pitch().unwrap();
        let rate = result.vibrato_rate_hz.expect("vibrato should be detected");
        assert!(
            (rate - 6.0).abs() < 2.5,
            "vibrato rate {rate} Hz, expected near 6"
        );
    }

    #[test]
    fn steady_tone_has_no_vibrato() {
        let mut pitch = analyzer();
        pitch.process_chunk(&sine(440.0, 1.0)).unwrap();
        let result = pitch.current_pitch().unwrap();
        assert!(result.vibrato_rate_hz.is_none());
    }

    #[test]
    fn rejects_band_above_nyquist() {
        let config = PitchConfig {
            max_freq_hz: 30_000.0,
            ..PitchConfig::default()
        };
        assert!(PitchAnalyzer::new(SAMPLE_RATE, &config).is_err());
    }

    #[test]
    fn rejects_window_too_short_for_floor() {
        let config = PitchConfig {
            window_size: 256,
            hop_size: 128,
            ..PitchConfig::default()
        };
        assert!(PitchAnalyzer::new(SAMPLE_RATE, &config).is_err());
    }
}
