//! The per-session streaming pipeline and realtime scorer.

pub mod scorer;
pub mod streaming;

pub use scorer::{RealtimeFeedback, RealtimeScorer, SimilarityScore};
pub use streaming::{LevelStats, PipelineStats, StreamingPipeline};
