//! eventface-backend — Adapters for the external face search service.
//!
//! Reference photos are normalized locally (RGB, bounded size, JPEG) and
//! sent to an HTTP service that owns face detection, embeddings and the
//! vector index. Its loosely shaped JSON rows are mapped into typed
//! [`Candidate`](eventface_core::Candidate)s here, so nothing past this
//! crate sees the wire format.

pub mod client;
pub mod preprocess;

pub use client::{BackendConfig, ClientError, HttpFaceSearch};
pub use preprocess::{preprocess_image, PreprocessError};
