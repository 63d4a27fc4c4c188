//! Master-call reference feature files.
//!
//! A reference is a flat little-endian binary file: a `u32` frame count, a
//! `u32` coefficient count, then `num_frames × num_coeffs` 32-bit floats in
//! row-major order. Implausible headers are rejected before any allocation.

use crate::error::{EngineError, Result};
use std::path::{Path, PathBuf};
use tracing::info;

/// Upper bound on coefficients per frame a file may declare.
const MAX_COEFFS: u32 = 256;
/// Upper bound on frames a file may declare.
const MAX_FRAMES: u32 = 1 << 24;

/// An immutable pre-computed feature sequence loaded from disk.
///
/// Shared by reference between the scorer and finalize paths of a session;
/// never mutated after load.
#[derive(Debug)]
pub struct MasterCall {
    name: String,
    features: Vec<Vec<f32>>,
    num_coeffs: usize,
}

impl MasterCall {
    /// Load a reference feature file.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` if the file cannot be read and `InvalidParams`
    /// if the header is implausible or the payload is truncated.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|_| EngineError::FileNotFound(path.display().to_string()))?;
        let call = Self::from_bytes(&bytes, &display_name(path))?;
        info!(
            "loaded master call '{}': {} frames x {} coefficients",
            call.name,
            call.features.len(),
            call.num_coeffs
        );
        Ok(call)
    }

    /// Parse a reference from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` on a short buffer, implausible header, or
    /// size mismatch.
    pub fn from_bytes(bytes: &[u8], name: &str) -> Result<Self> {
        if bytes.len() < 8 {
            return Err(EngineError::InvalidParams(format!(
                "master call '{name}' shorter than its header"
            )));
        }
        let num_frames = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let num_coeffs = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);

        if num_frames == 0 || num_frames > MAX_FRAMES {
            return Err(EngineError::InvalidParams(format!(
                "master call '{name}' declares {num_frames} frames"
            )));
        }
        if num_coeffs == 0 || num_coeffs > MAX_COEFFS {
            return Err(EngineError::InvalidParams(format!(
                "master call '{name}' declares {num_coeffs} coefficients"
            )));
        }

        let expected = 8 + num_frames as usize * num_coeffs as usize * 4;
        if bytes.len() != expected {
            return Err(EngineError::InvalidParams(format!(
                "master call '{name}' is {} bytes, header implies {expected}",
                bytes.len()
            )));
        }

        let mut features = Vec::with_capacity(num_frames as usize);
        let mut offset = 8;
        for _ in 0..num_frames {
            let mut row = Vec::with_capacity(num_coeffs as usize);
            for _ in 0..num_coeffs {
                let raw = [
                    bytes[offset],
                    bytes[offset + 1],
                    bytes[offset + 2],
                    bytes[offset + 3],
                ];
                row.push(f32::from_le_bytes(raw));
                offset += 4;
            }
            features.push(row);
        }

        Ok(Self {
            name: name.to_owned(),
            features,
            num_coeffs: num_coeffs as usize,
        })
    }

    /// Write a reference feature file in the on-disk format.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` on an empty or ragged feature sequence and
    /// `ProcessingError` if the file cannot be written.
    pub fn write(path: &Path, features: &[Vec<f32>]) -> Result<()> {
        let Some(first) = features.first() else {
            return Err(EngineError::InvalidParams(
                "cannot write an empty master call".into(),
            ));
        };
        let num_coeffs = first.len();
        if num_coeffs == 0 || features.iter().any(|row| row.len() != num_coeffs) {
            return Err(EngineError::InvalidParams(
                "master call rows must share a non-zero length".into(),
            ));
        }

        let mut bytes = Vec::with_capacity(8 + features.len() * num_coeffs * 4);
        bytes.extend_from_slice(&(features.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&(num_coeffs as u32).to_le_bytes());
        for row in features {
            for &value in row {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }

        std::fs::write(path, bytes).map_err(|e| {
            EngineError::ProcessingError(format!("cannot write {}: {e}", path.display()))
        })
    }

    /// Reference identifier (file stem or caller-supplied name).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Feature rows, one per frame.
    #[must_use]
    pub fn features(&self) -> &[Vec<f32>] {
        &self.features
    }

    /// Number of frames.
    #[must_use]
    pub fn num_frames(&self) -> usize {
        self.features.len()
    }

    /// Coefficients per frame.
    #[must_use]
    pub fn num_coeffs(&self) -> usize {
        self.num_coeffs
    }

    /// Mean of coefficient 0 (the log-energy term) over all frames.
    #[must_use]
    pub fn mean_energy(&self) -> f32 {
        if self.features.is_empty() {
            return 0.0;
        }
        self.features.iter().map(|row| row[0]).sum::<f32>() / self.features.len() as f32
    }
}

/// Resolve a caller-supplied reference identifier to a concrete path:
/// a path that exists is used as-is, otherwise `<dir>/<id>.mfc` is tried.
///
/// # Errors
///
/// Returns `FileNotFound` if neither resolves.
pub fn resolve_reference(dir: &Path, id: &str) -> Result<PathBuf> {
    let direct = PathBuf::from(id);
    if direct.is_file() {
        return Ok(direct);
    }
    let named = dir.join(format!("{id}.mfc"));
    if named.is_file() {
        return Ok(named);
    }
    Err(EngineError::FileNotFound(id.to_owned()))
}

fn display_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("master_call")
        .to_owned()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn test_features(frames: usize, coeffs: usize) -> Vec<Vec<f32>> {
        (0..frames)
            .map(|f| (0..coeffs).map(|c| (f * coeffs + c) as f32 * 0.1).collect())
            .collect()
    }

    #[test]
    fn write_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grunt.mfc");
        let features = test_features(50, 13);

        MasterCall::write(&path, &features).unwrap();
        let call = MasterCall::load(&path).unwrap();

        assert_eq!(call.name(), "grunt");
        assert_eq!(call.num_frames(), 50);
        assert_eq!(call.num_coeffs(), 13);
        assert_eq!(call.features(), features.as_slice());
    }

    #[test]
    fn missing_file_is_file_not_found() {
        let err = MasterCall::load(Path::new("/nonexistent/call.mfc")).unwrap_err();
        assert_eq!(err.status(), "FILE_NOT_FOUND");
    }

    #[test]
    fn truncated_payload_is_invalid_params() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&10u32.to_le_bytes());
        bytes.extend_from_slice(&13u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 16]); // far too short
        let err = MasterCall::from_bytes(&bytes, "truncated").unwrap_err();
        assert_eq!(err.status(), "INVALID_PARAMS");
    }

    #[test]
    fn implausible_header_is_invalid_params() {
        // num_coeffs > 256.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1000u32.to_le_bytes());
        assert_eq!(
            MasterCall::from_bytes(&bytes, "bad").unwrap_err().status(),
            "INVALID_PARAMS"
        );

        // num_frames > 1<<24.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(1u32 << 25).to_le_bytes());
        bytes.extend_from_slice(&13u32.to_le_bytes());
        assert_eq!(
            MasterCall::from_bytes(&bytes, "bad").unwrap_err().status(),
            "INVALID_PARAMS"
        );

        // Zero frames.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&13u32.to_le_bytes());
        assert_eq!(
            MasterCall::from_bytes(&bytes, "bad").unwrap_err().status(),
            "INVALID_PARAMS"
        );
    }

    #[test]
    fn empty_write_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.mfc");
        assert!(MasterCall::write(&path, &[]).is_err());
    }

    #[test]
    fn ragged_write_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ragged.mfc");
        let ragged = vec![vec![1.0, 2.0], vec![1.0]];
        assert!(MasterCall::write(&path, &ragged).is_err());
    }

    #[test]
    fn resolves_bare_id_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buck_grunt.mfc");
        MasterCall::write(&path, &test_features(5, 13)).unwrap();

        let resolved = resolve_reference(dir.path(), "buck_grunt").unwrap();
        assert_eq!(resolved, path);
    }

    #[test]
    fn resolves_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("elsewhere.mfc");
        MasterCall::write(&path, &test_features(5, 13)).unwrap();

        let resolved = resolve_reference(Path::new("/unused"), path.to_str().unwrap()).unwrap();
        assert_eq!(resolved, path);
    }

    #[test]
    fn unresolvable_id_is_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_reference(dir.path(), "no_such_call").unwrap_err();
        assert_eq!(err.status(), "FILE_NOT_FOUND");
    }

    #[test]
    fn mean_energy_averages_first_coefficient() {
        let features = vec![vec![1.0, 9.0], vec![3.0, 9.0]];
        let call = MasterCall {
            name: "m".into(),
            features,
            num_coeffs: 2,
        };
        assert!((call.mean_energy() - 2.0).abs() < 1e-6);
    }
}
