//! Hann-windowed forward FFT with a cached plan.
//!
//! Plans are bound to an FFT size and reused for every frame; nothing is
//! reallocated in steady state.

use crate::error::{EngineError, Result};
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Forward FFT of a fixed power-of-two size plus its Hann window.
pub struct WindowedFft {
    size: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    buf: Vec<Complex32>,
}

impl WindowedFft {
    /// Plan an FFT of `size` samples.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` if `size` is zero or not a power of two.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 || !size.is_power_of_two() {
            return Err(EngineError::InvalidParams(format!(
                "FFT size must be a non-zero power of two, got {size}"
            )));
        }
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(size);
        Ok(Self {
            size,
            window: hann_window(size),
            fft,
            buf: vec![Complex32::new(0.0, 0.0); size],
        })
    }

    /// FFT size in samples.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of non-redundant spectrum bins (`size / 2 + 1`).
    #[must_use]
    pub fn bins(&self) -> usize {
        self.size / 2 + 1
    }

    /// Hann-window `frame`, transform it, and write the magnitude spectrum
    /// into `out` (resized to [`bins`](Self::bins)).
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` unless `frame` is exactly [`size`](Self::size)
    /// samples.
    pub fn magnitude_spectrum(&mut self, frame: &[f32], out: &mut Vec<f32>) -> Result<()> {
        self.transform(frame)?;
        let bins = self.bins();
        out.resize(bins, 0.0);
        for (slot, c) in out.iter_mut().zip(self.buf.iter()) {
            *slot = (c.re * c.re + c.im * c.im).sqrt();
        }
        Ok(())
    }

    /// Hann-window `frame`, transform it, and write the power spectrum
    /// (magnitude squared over the FFT size) into `out`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` unless `frame` is exactly [`size`](Self::size)
    /// samples.
    pub fn power_spectrum(&mut self, frame: &[f32], out: &mut Vec<f32>) -> Result<()> {
        self.transform(frame)?;
        let bins = self.bins();
        out.resize(bins, 0.0);
        let norm = self.size as f32;
        for (slot, c) in out.iter_mut().zip(self.buf.iter()) {
            *slot = (c.re * c.re + c.im * c.im) / norm;
        }
        Ok(())
    }

    fn transform(&mut self, frame: &[f32]) -> Result<()> {
        if frame.len() != self.size {
            return Err(EngineError::InvalidParams(format!(
                "expected a frame of {} samples, got {}",
                self.size,
                frame.len()
            )));
        }
        for ((slot, &s), &w) in self.buf.iter_mut().zip(frame.iter()).zip(self.window.iter()) {
            *slot = Complex32::new(s * w, 0.0);
        }
        self.fft.process(&mut self.buf);
        Ok(())
    }
}

/// Periodic-symmetric Hann window of length `n`.
#[must_use]
pub fn hann_window(n: usize) -> Vec<f32> {
    if n < 2 {
        return vec![1.0; n];
    }
    (0..n)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (n - 1) as f32).cos())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn rejects_non_power_of_two() {
        assert!(WindowedFft::new(1000).is_err());
        assert!(WindowedFft::new(0).is_err());
    }

    #[test]
    fn hann_window_endpoints_are_zero() {
        let w = hann_window(512);
        assert!(w[0].abs() < 1e-6);
        assert!(w[511].abs() < 1e-6);
        // Peak near the middle.
        assert!((w[255] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn sine_peak_lands_in_expected_bin() {
        let size = 1024;
        let sample_rate = 44_100.0f32;
        let freq = 1_000.0f32;
        let mut fft = WindowedFft::new(size).unwrap();

        let frame: Vec<f32> = (0..size)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin())
            .collect();

        let mut spectrum = Vec::new();
        fft.magnitude_spectrum(&frame, &mut spectrum).unwrap();
        assert_eq!(spectrum.len(), size / 2 + 1);

        let peak_bin = spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        let expected = (freq * size as f32 / sample_rate).round() as usize;
        assert!(
            peak_bin.abs_diff(expected) <= 1,
            "peak bin {peak_bin}, expected near {expected}"
        );
    }

    #[test]
    fn wrong_frame_length_is_invalid_params() {
        let mut fft = WindowedFft::new(512).unwrap();
        let mut out = Vec::new();
        let err = fft.magnitude_spectrum(&[0.0; 100], &mut out).unwrap_err();
        assert_eq!(err.status(), "INVALID_PARAMS");
    }

    #[test]
    fn repeated_transforms_are_bit_identical() {
        let mut fft = WindowedFft::new(1024).unwrap();
        let frame: Vec<f32> = (0..1024).map(|i| ((i * 37) % 101) as f32 * 0.01).collect();

        let mut a = Vec::new();
        let mut b = Vec::new();
        fft.magnitude_spectrum(&frame, &mut a).unwrap();
        fft.magnitude_spectrum(&frame, &mut b).unwrap();
        assert_eq!(a, b);
    }
}
