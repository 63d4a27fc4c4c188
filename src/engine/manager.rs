//! Thread-safe session management.
//!
//! The engine owns a map of id → session guarded by one mutex that is held
//! only for map lookup/insert/delete — never across DSP work. Each session
//! carries its own lock, so processing in one session never blocks reads of
//! another. Ids come from a monotonically increasing counter and are never
//! reused within a process.

use crate::analyzers::enhanced::EnhancedAnalysisProfile;
use crate::config::{EngineConfig, SessionOptions};
use crate::engine::master_call::{self, MasterCall};
use crate::engine::session::{Session, SessionSummary};
use crate::engine::SessionId;
use crate::error::{EngineError, Result};
use crate::pipeline::scorer::{RealtimeFeedback, SimilarityScore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

struct Registry {
    sessions: HashMap<SessionId, Arc<Mutex<Session>>>,
    /// Wider than the public id so the counter itself cannot wrap.
    next_id: u64,
}

/// The multi-session analysis engine.
pub struct AnalysisEngine {
    config: EngineConfig,
    registry: Mutex<Registry>,
}

impl AnalysisEngine {
    /// Create an engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` if the configuration fails validation.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.stream.validate()?;
        config.scorer.validate()?;
        Ok(Self {
            config,
            registry: Mutex::new(Registry {
                sessions: HashMap::new(),
                next_id: 1,
            }),
        })
    }

    /// Create an engine with default configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` if the defaults fail validation (they don't).
    pub fn with_defaults() -> Result<Self> {
        Self::new(EngineConfig::default())
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a new isolated session.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` for a non-positive sample rate,
    /// `ProcessingError` if the id space is exhausted, and `InitFailed` if a
    /// session component cannot be built.
    pub fn create_session(
        &self,
        sample_rate: f32,
        options: SessionOptions,
    ) -> Result<SessionId> {
        if sample_rate <= 0.0 {
            return Err(EngineError::InvalidParams(format!(
                "sample rate must be positive, got {sample_rate}"
            )));
        }

        let id = {
            let mut registry = self.lock_registry()?;
            if registry.next_id > u64::from(u32::MAX) {
                return Err(EngineError::ProcessingError(
                    "session id space exhausted".into(),
                ));
            }
            let id = SessionId::from_raw(registry.next_id as u32);
            registry.next_id += 1;
            id
        };

        // Session construction happens outside the registry lock.
        let session = Session::new(id, sample_rate, &self.config, &options)?;

        let mut registry = self.lock_registry()?;
        registry.sessions.insert(id, Arc::new(Mutex::new(session)));
        info!(session = %id, sample_rate, "session created");
        Ok(id)
    }

    /// Load a master reference into a session. The identifier may be a path
    /// or a bare id resolved against the configured master-call directory.
    ///
    /// # Errors
    ///
    /// `SESSION_NOT_FOUND`, `FILE_NOT_FOUND`, or `INVALID_PARAMS` (bad
    /// file); a failed load leaves the session as if none was attempted.
    pub fn load_master_call(&self, id: SessionId, reference: &str) -> Result<()> {
        let session = self.session(id)?;
        let path = master_call::resolve_reference(&self.config.master_call_dir, reference)?;
        let master = Arc::new(MasterCall::load(&path)?);
        self.lock_session(&session)?.set_master(master)
    }

    /// Feed audio into a session. An empty span is an accepted no-op.
    ///
    /// # Errors
    ///
    /// `SESSION_NOT_FOUND` or a processing error from the pipeline.
    pub fn process_audio_chunk(&self, id: SessionId, samples: &[f32]) -> Result<()> {
        let session = self.session(id)?;
        let result = self.lock_session(&session)?.process_audio_chunk(samples);
        result
    }

    /// Most recent similarity score for a session.
    ///
    /// # Errors
    ///
    /// `SESSION_NOT_FOUND` or `INSUFFICIENT_DATA`.
    pub fn get_similarity_score(&self, id: SessionId) -> Result<SimilarityScore> {
        let session = self.session(id)?;
        let score = self.lock_session(&session)?.similarity_score();
        score
    }

    /// Realtime feedback for a session.
    ///
    /// # Errors
    ///
    /// `SESSION_NOT_FOUND` or `INSUFFICIENT_DATA`.
    pub fn get_realtime_feedback(&self, id: SessionId) -> Result<RealtimeFeedback> {
        let session = self.session(id)?;
        let feedback = self.lock_session(&session)?.realtime_feedback();
        feedback
    }

    /// Latest fused enhanced-analysis profile for a session.
    ///
    /// # Errors
    ///
    /// `SESSION_NOT_FOUND` or `INSUFFICIENT_DATA`.
    pub fn get_enhanced_analysis(&self, id: SessionId) -> Result<EnhancedAnalysisProfile> {
        let session = self.session(id)?;
        let profile = self.lock_session(&session)?.enhanced_analysis();
        profile
    }

    /// Number of feature vectors a session has emitted.
    ///
    /// # Errors
    ///
    /// `SESSION_NOT_FOUND`.
    pub fn get_feature_count(&self, id: SessionId) -> Result<usize> {
        let session = self.session(id)?;
        let count = self.lock_session(&session)?.feature_count();
        Ok(count)
    }

    /// Run the end-of-stream pass and return the aggregate summary.
    ///
    /// # Errors
    ///
    /// `SESSION_NOT_FOUND` or `INSUFFICIENT_DATA`.
    pub fn finalize_session(&self, id: SessionId) -> Result<SessionSummary> {
        let session = self.session(id)?;
        let summary = self.lock_session(&session)?.finalize();
        summary
    }

    /// Clear a session's analysis state, preserving its master reference and
    /// configuration.
    ///
    /// # Errors
    ///
    /// `SESSION_NOT_FOUND`.
    pub fn reset_session(&self, id: SessionId) -> Result<()> {
        let session = self.session(id)?;
        self.lock_session(&session)?.reset();
        Ok(())
    }

    /// Destroy a session and release its resources.
    ///
    /// # Errors
    ///
    /// `SESSION_NOT_FOUND` if the id is not live (including double destroy).
    pub fn destroy_session(&self, id: SessionId) -> Result<()> {
        let removed = self.lock_registry()?.sessions.remove(&id);
        match removed {
            Some(_) => {
                info!(session = %id, "session destroyed");
                Ok(())
            }
            None => Err(EngineError::SessionNotFound(id)),
        }
    }

    /// Whether the id refers to a live session. Never fails.
    #[must_use]
    pub fn is_session_active(&self, id: SessionId) -> bool {
        self.lock_registry()
            .map(|registry| registry.sessions.contains_key(&id))
            .unwrap_or(false)
    }

    /// Ids of all live sessions.
    #[must_use]
    pub fn get_active_sessions(&self) -> Vec<SessionId> {
        self.lock_registry()
            .map(|registry| {
                let mut ids: Vec<SessionId> = registry.sessions.keys().copied().collect();
                ids.sort_unstable();
                ids
            })
            .unwrap_or_default()
    }

    /// Short-held registry lock.
    fn lock_registry(&self) -> Result<std::sync::MutexGuard<'_, Registry>> {
        self.registry
            .lock()
            .map_err(|_| EngineError::ProcessingError("session registry lock poisoned".into()))
    }

    fn lock_session<'a>(
        &self,
        session: &'a Arc<Mutex<Session>>,
    ) -> Result<std::sync::MutexGuard<'a, Session>> {
        session
            .lock()
            .map_err(|_| EngineError::ProcessingError("session lock poisoned".into()))
    }

    /// Look up a session handle under the short-held registry lock.
    fn session(&self, id: SessionId) -> Result<Arc<Mutex<Session>>> {
        self.lock_registry()?
            .sessions
            .get(&id)
            .cloned()
            .ok_or(EngineError::SessionNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    const SAMPLE_RATE: f32 = 44_100.0;

    fn engine() -> AnalysisEngine {
        AnalysisEngine::with_defaults().unwrap()
    }

    fn sine(freq: f32, secs: f32) -> Vec<f32> {
        let n = (secs * SAMPLE_RATE) as usize;
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / SAMPLE_RATE).sin() * 0.5)
            .collect()
    }

    #[test]
    fn create_and_destroy_lifecycle() {
        let engine = engine();
        let id = engine
            .create_session(SAMPLE_RATE, SessionOptions::default())
            .unwrap();
        assert!(id.as_u32() > 0);
        assert!(engine.is_session_active(id));

        engine.destroy_session(id).unwrap();
        assert!(!engine.is_session_active(id));

        let err = engine.destroy_session(id).unwrap_err();
        assert_eq!(err.status(), "SESSION_NOT_FOUND");
    }

    #[test]
    fn invalid_sample_rate_is_invalid_params() {
        let engine = engine();
        for bad in [0.0f32, -44_100.0] {
            let err = engine
                .create_session(bad, SessionOptions::default())
                .unwrap_err();
            assert_eq!(err.status(), "INVALID_PARAMS");
        }
    }

    #[test]
    fn session_ids_are_unique_and_monotonic() {
        let engine = engine();
        let mut seen = std::collections::HashSet::new();
        let mut previous = 0u32;
        for _ in 0..50 {
            let id = engine
                .create_session(SAMPLE_RATE, SessionOptions::default())
                .unwrap();
            assert!(seen.insert(id), "id {id} reused");
            assert!(id.as_u32() > previous);
            previous = id.as_u32();
        }
        // Destroyed ids are never handed out again.
        let ids = engine.get_active_sessions();
        for id in &ids {
            engine.destroy_session(*id).unwrap();
        }
        let fresh = engine
            .create_session(SAMPLE_RATE, SessionOptions::default())
            .unwrap();
        assert!(fresh.as_u32() > previous);
    }

    #[test]
    fn unknown_id_fails_every_operation() {
        let engine = engine();
        let bogus = SessionId::from_raw(99_999);

        assert!(!engine.is_session_active(bogus));
        assert_eq!(
            engine.load_master_call(bogus, "dummy").unwrap_err().status(),
            "SESSION_NOT_FOUND"
        );
        assert_eq!(
            engine
                .process_audio_chunk(bogus, &[0.0; 64])
                .unwrap_err()
                .status(),
            "SESSION_NOT_FOUND"
        );
        assert_eq!(
            engine.get_similarity_score(bogus).unwrap_err().status(),
            "SESSION_NOT_FOUND"
        );
        assert_eq!(
            engine.get_feature_count(bogus).unwrap_err().status(),
            "SESSION_NOT_FOUND"
        );
        assert_eq!(
            engine.reset_session(bogus).unwrap_err().status(),
            "SESSION_NOT_FOUND"
        );
    }

    #[test]
    fn missing_reference_is_file_not_found() {
        let engine = engine();
        let id = engine
            .create_session(SAMPLE_RATE, SessionOptions::default())
            .unwrap();
        let err = engine.load_master_call(id, "no_such_call").unwrap_err();
        assert_eq!(err.status(), "FILE_NOT_FOUND");
        // Processing still works; the session is unchanged.
        engine.process_audio_chunk(id, &sine(440.0, 0.2)).unwrap();
    }

    #[test]
    fn sessions_are_isolated() {
        let engine = engine();
        let a = engine
            .create_session(SAMPLE_RATE, SessionOptions::default())
            .unwrap();
        let b = engine
            .create_session(SAMPLE_RATE, SessionOptions::default())
            .unwrap();

        engine.process_audio_chunk(a, &sine(440.0, 0.5)).unwrap();
        assert!(engine.get_feature_count(a).unwrap() > 0);
        assert_eq!(engine.get_feature_count(b).unwrap(), 0);

        engine.process_audio_chunk(b, &sine(220.0, 0.25)).unwrap();
        let b_count = engine.get_feature_count(b).unwrap();
        assert!(b_count > 0);

        // Resetting A leaves B untouched.
        engine.reset_session(a).unwrap();
        assert_eq!(engine.get_feature_count(a).unwrap(), 0);
        assert_eq!(engine.get_feature_count(b).unwrap(), b_count);
    }

    #[test]
    fn active_sessions_lists_live_ids() {
        let engine = engine();
        let a = engine
            .create_session(SAMPLE_RATE, SessionOptions::default())
            .unwrap();
        let b = engine
            .create_session(SAMPLE_RATE, SessionOptions::default())
            .unwrap();

        let ids = engine.get_active_sessions();
        assert_eq!(ids, vec![a, b]);

        engine.destroy_session(a).unwrap();
        assert_eq!(engine.get_active_sessions(), vec![b]);
    }

    #[test]
    fn concurrent_creation_yields_unique_ids() {
        let engine = Arc::new(engine());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let engine = Arc::clone(&engine);
            handles.push(std::thread::spawn(move || {
                (0..25)
                    .map(|_| {
                        engine
                            .create_session(SAMPLE_RATE, SessionOptions::default())
                            .unwrap()
                    })
                    .collect::<Vec<SessionId>>()
            }));
        }

        let mut all: Vec<SessionId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), total, "duplicate session ids handed out");
    }

    #[test]
    fn concurrent_processing_keeps_sessions_independent() {
        let engine = Arc::new(engine());
        let a = engine
            .create_session(SAMPLE_RATE, SessionOptions::default())
            .unwrap();
        let b = engine
            .create_session(SAMPLE_RATE, SessionOptions::default())
            .unwrap();

        let audio_a = sine(440.0, 1.0);
        let audio_b = sine(220.0, 1.0);

        let engine_a = Arc::clone(&engine);
        let handle_a = std::thread::spawn(move || {
            for chunk in audio_a.chunks(1024) {
                engine_a.process_audio_chunk(a, chunk).unwrap();
            }
            engine_a.get_feature_count(a).unwrap()
        });
        let engine_b = Arc::clone(&engine);
        let handle_b = std::thread::spawn(move || {
            for chunk in audio_b.chunks(2048) {
                engine_b.process_audio_chunk(b, chunk).unwrap();
            }
            engine_b.get_feature_count(b).unwrap()
        });

        let count_a = handle_a.join().unwrap();
        let count_b = handle_b.join().unwrap();

        // Both saw 1 s of audio through the same frame geometry.
        assert_eq!(count_a, count_b);
        assert_eq!(engine.get_feature_count(a).unwrap(), count_a);
    }
}
