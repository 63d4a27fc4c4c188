//! Session management: the engine facade, per-session state, and the
//! master-call reference store.

pub mod manager;
pub mod master_call;
pub mod session;

pub use manager::AnalysisEngine;
pub use master_call::MasterCall;
pub use session::{Session, SessionSummary};

use serde::{Deserialize, Serialize};

/// Opaque non-zero session identifier. `0` is reserved for "no session";
/// ids are allocated monotonically and never reused within a process.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SessionId(u32);

impl SessionId {
    /// Wrap a raw id. Intended for bindings that round-trip ids as numbers.
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw 32-bit value.
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
