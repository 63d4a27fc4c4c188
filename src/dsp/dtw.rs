//! Dynamic time warping over feature-vector sequences.
//!
//! Cell cost is the squared Euclidean distance between vectors; the step set
//! {(−1,0), (0,−1), (−1,−1)} has equal weights, so a self-vs-self alignment
//! accumulates zero cost. The accumulated path cost is normalized by
//! `sqrt(m² + n²)` — the diagonal length — which keeps self-similarity from
//! being under-estimated on equal-length inputs the way `(m + n)`
//! normalization does.

use crate::config::DtwConfig;
use crate::error::{EngineError, Result};

/// Outcome of one DTW comparison.
#[derive(Debug, Clone, Copy)]
pub struct DtwResult {
    /// Path cost normalized by the diagonal length `sqrt(m² + n²)`.
    pub normalized_cost: f32,
    /// `exp(-normalized_cost / scale)`, clamped to `[0, 1]`.
    pub similarity: f32,
}

/// DTW comparator with an optional Sakoe–Chiba band.
pub struct DtwComparator {
    config: DtwConfig,
    /// Flat (m+1)×(n+1) cost matrix, reused across calls.
    cost: Vec<f32>,
}

impl DtwComparator {
    /// Create a comparator with the given sensitivity and band settings.
    #[must_use]
    pub fn new(config: DtwConfig) -> Self {
        Self {
            config,
            cost: Vec::new(),
        }
    }

    /// Compare a query sequence against a reference sequence.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientData` if either sequence is empty and
    /// `InvalidParams` if any two vectors disagree on dimension.
    pub fn compare(&mut self, query: &[Vec<f32>], reference: &[Vec<f32>]) -> Result<DtwResult> {
        let m = query.len();
        let n = reference.len();
        if m == 0 || n == 0 {
            return Err(EngineError::InsufficientData(
                "DTW needs non-empty query and reference sequences",
            ));
        }

        let dim = query[0].len();
        if dim == 0
            || query.iter().any(|v| v.len() != dim)
            || reference.iter().any(|v| v.len() != dim)
        {
            return Err(EngineError::InvalidParams(
                "feature sequences must share a non-zero dimension".into(),
            ));
        }

        // Flat cost matrix, (m+1)×(n+1), reused between calls.
        let stride = n + 1;
        self.cost.clear();
        self.cost.resize((m + 1) * stride, f32::INFINITY);
        self.cost[0] = 0.0;

        for i in 1..=m {
            let (j_lo, j_hi) = self.band_bounds(i, m, n);
            for j in j_lo..=j_hi {
                let d = squared_euclidean(&query[i - 1], &reference[j - 1]);
                let up = self.cost[(i - 1) * stride + j];
                let left = self.cost[i * stride + j - 1];
                let diag = self.cost[(i - 1) * stride + j - 1];
                let prev = up.min(left).min(diag);
                if prev.is_finite() {
                    self.cost[i * stride + j] = d + prev;
                }
            }
        }

        let accumulated = self.cost[m * stride + n];
        if !accumulated.is_finite() {
            // The band was too narrow to connect the corners.
            return Err(EngineError::InvalidParams(format!(
                "Sakoe-Chiba band radius {:?} admits no path for {m}x{n}",
                self.config.band_radius
            )));
        }

        let normalized_cost =
            accumulated / ((m * m + n * n) as f32).sqrt();
        let similarity = (-normalized_cost / self.config.scale).exp().clamp(0.0, 1.0);

        Ok(DtwResult {
            normalized_cost,
            similarity,
        })
    }

    /// Valid reference-index range for query row `i`, per the band radius.
    /// For unequal lengths the band is centered on the stretched diagonal.
    fn band_bounds(&self, i: usize, m: usize, n: usize) -> (usize, usize) {
        match self.config.band_radius {
            None => (1, n),
            Some(r) => {
                let center = (i as f32 * n as f32 / m as f32).round() as isize;
                let lo = (center - r as isize).max(1) as usize;
                let hi = ((center + r as isize) as usize).min(n).max(lo);
                (lo, hi)
            }
        }
    }
}

fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x - y) * (x - y))
        .sum()
}
