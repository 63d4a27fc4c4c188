//! Per-window acoustic analyzers and the ensemble coordinator.

pub mod cadence;
pub mod enhanced;
pub mod harmonic;
pub mod pitch;

pub use cadence::{CadenceAnalyzer, CadenceProfile};
pub use enhanced::{EnhancedAnalysisProfile, EnhancedCoordinator};
pub use harmonic::{HarmonicAnalyzer, HarmonicProfile};
pub use pitch::{PitchAnalyzer, PitchResult};
