//! Wildcall: real-time wildlife-call analysis engine.
//!
//! Compares a live or file-sourced audio stream against a pre-computed
//! master-call reference and emits multi-dimensional similarity scores plus
//! acoustic descriptors (pitch, harmonics, cadence).
//!
//! # Architecture
//!
//! Each session is an isolated streaming pipeline multiplexed by the
//! session manager:
//! - **Session manager**: create/lookup/reset/destroy keyed by opaque ids
//! - **Streaming pipeline**: hop-aligned frame machine emitting MFCC frames
//! - **Comparison core**: DTW similarity against the master reference
//! - **Analyzer ensemble**: pitch (YIN), harmonic (FFT + formants), and
//!   cadence (onsets + tempo + periodicity) analyzers with a fusing
//!   coordinator
//! - **Realtime scorer**: weighted multi-dimensional scores with feedback
//!
//! All calls are synchronous; sessions may be driven from different threads
//! but each individual session is single-threaded by contract.

pub mod analyzers;
pub mod audio;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod pipeline;

pub use analyzers::enhanced::EnhancedAnalysisProfile;
pub use config::{EngineConfig, SessionOptions};
pub use engine::{AnalysisEngine, MasterCall, SessionId, SessionSummary};
pub use error::{EngineError, Result};
pub use pipeline::{RealtimeFeedback, SimilarityScore};
