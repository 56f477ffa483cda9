//! Seam to the external face embedding / search backend.

use crate::types::Candidate;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("No face detected. Use an image with a clear face.")]
    NoFaceDetected,
    #[error("Multiple faces ({0}). Use an image with exactly one face.")]
    MultipleFacesDetected(usize),
    #[error("search timed out after {0:?}")]
    Timeout(Duration),
    #[error("image preprocessing failed: {0}")]
    Preprocess(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// Search the photo archive with a single reference image.
///
/// Implementations preprocess the image, require exactly one face in it,
/// query the backend and return candidates already filtered to the
/// backend's similarity threshold, at most `limit` of them.
#[async_trait]
pub trait FaceSearch: Send + Sync {
    async fn search(&self, image: &[u8], limit: usize) -> Result<Vec<Candidate>, SearchError>;
}
