//! Signal-processing primitives shared by the analyzers.

pub mod dtw;
pub mod mfcc;
pub mod window;

pub use dtw::{DtwComparator, DtwResult};
pub use mfcc::MfccExtractor;
pub use window::WindowedFft;
