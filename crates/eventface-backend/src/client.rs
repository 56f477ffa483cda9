//! HTTP client for the face search service.
//!
//! Endpoints (relative to the configured base URL):
//!   `POST /search?limit=N`  multipart `file` → `{"faces": n, "results": [row, ...]}`
//!                           or `{"success": false, "error": ...}`
//!   `POST /register`        `{"photos_dir": ...}` → `{"success": bool, "count": n, "message": ...}`
//!   `POST /clear`           → `{"deleted": n}`
//!   `GET  /health`          → `{"status": "ok"}`

use crate::preprocess::{preprocess_image, DEFAULT_MAX_DIMENSION};
use async_trait::async_trait;
use eventface_core::{Candidate, FaceSearch, SearchError};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

// --- Named constants ---
const DEFAULT_THRESHOLD: f32 = 0.40;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Distance assumed for rows that omit one; maps to zero confidence.
const MISSING_DISTANCE: f64 = 1.0;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("backend rejected request: {0}")]
    Rejected(String),
}

/// Connection and matching parameters for [`HttpFaceSearch`].
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub url: String,
    /// Maximum distance for a row to count as a match.
    pub threshold: f32,
    pub timeout: Duration,
    /// Longest side of the preprocessed upload.
    pub max_dimension: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8000".to_string(),
            threshold: DEFAULT_THRESHOLD,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    success: Option<bool>,
    error: Option<String>,
    detail: Option<Value>,
    faces: Option<usize>,
    results: Option<Vec<Value>>,
}

impl SearchResponse {
    /// Result rows, or the reason the body carries none. A body without
    /// `results` is an error, never an empty match list.
    fn into_rows(self) -> Result<Vec<Value>, SearchError> {
        if self.success == Some(false) {
            let reason = self.error.unwrap_or_else(|| "search failed".to_string());
            return Err(SearchError::Backend(reason));
        }
        check_face_count(self.faces)?;
        match (self.results, self.detail) {
            (Some(rows), _) => Ok(rows),
            (None, Some(detail)) => Err(SearchError::Backend(format!(
                "response has no results: {detail}"
            ))),
            (None, None) => Err(SearchError::Backend("response has no results".to_string())),
        }
    }
}

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    photos_dir: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    count: usize,
    #[serde(default)]
    message: String,
}

fn default_success() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ClearResponse {
    #[serde(default)]
    deleted: usize,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

/// [`FaceSearch`] backed by the HTTP face search service.
pub struct HttpFaceSearch {
    http: reqwest::Client,
    base_url: String,
    threshold: f32,
    max_dimension: u32,
}

impl HttpFaceSearch {
    pub fn new(config: &BackendConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            threshold: config.threshold,
            max_dimension: config.max_dimension,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    /// Ask the service to index every photo under `photos_dir` (or its own default).
    pub async fn register(&self, photos_dir: Option<&Path>) -> Result<usize, ClientError> {
        let dir = photos_dir.map(|p| p.to_string_lossy().into_owned());
        let response = self
            .http
            .post(self.endpoint("register"))
            .json(&RegisterRequest {
                photos_dir: dir.as_deref(),
            })
            .send()
            .await?;
        let body: RegisterResponse = check_status(response).await?.json().await?;
        if !body.success {
            return Err(ClientError::Rejected(body.message));
        }
        tracing::info!(count = body.count, dir = ?dir, "photos registered");
        Ok(body.count)
    }

    /// Drop every stored embedding. Returns the number of deleted records.
    pub async fn clear(&self) -> Result<usize, ClientError> {
        let response = self.http.post(self.endpoint("clear")).send().await?;
        let body: ClearResponse = check_status(response).await?.json().await?;
        tracing::info!(deleted = body.deleted, "face index cleared");
        Ok(body.deleted)
    }

    pub async fn health(&self) -> Result<bool, ClientError> {
        let response = self.http.get(self.endpoint("health")).send().await?;
        let body: HealthResponse = check_status(response).await?.json().await?;
        Ok(body.status == "ok")
    }

    async fn post_search(&self, jpeg: Vec<u8>, limit: usize) -> Result<SearchResponse, ClientError> {
        let upload = Part::bytes(jpeg)
            .file_name(format!("{}.jpg", uuid::Uuid::new_v4()))
            .mime_str("image/jpeg")?;
        let response = self
            .http
            .post(self.endpoint("search"))
            .query(&[("limit", limit)])
            .multipart(Form::new().part("file", upload))
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }
}

#[async_trait]
impl FaceSearch for HttpFaceSearch {
    async fn search(&self, image: &[u8], limit: usize) -> Result<Vec<Candidate>, SearchError> {
        let owned = image.to_vec();
        let max_dimension = self.max_dimension;
        let jpeg = tokio::task::spawn_blocking(move || preprocess_image(&owned, max_dimension))
            .await
            .map_err(|e| SearchError::Preprocess(e.to_string()))?
            .map_err(|e| SearchError::Preprocess(e.to_string()))?;

        let response = self
            .post_search(jpeg, limit)
            .await
            .map_err(|e| SearchError::Backend(e.to_string()))?;

        let rows = response.into_rows()?;

        let candidates = candidates_from_rows(&rows, self.threshold, limit);
        tracing::debug!(
            rows = rows.len(),
            kept = candidates.len(),
            threshold = self.threshold,
            "backend search"
        );
        Ok(candidates)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        body,
    })
}

/// The reference must show exactly one face. A missing count is trusted.
fn check_face_count(faces: Option<usize>) -> Result<(), SearchError> {
    match faces {
        Some(0) => Err(SearchError::NoFaceDetected),
        Some(n) if n > 1 => Err(SearchError::MultipleFacesDetected(n)),
        _ => Ok(()),
    }
}

/// Map raw result rows to candidates within `threshold`, nearest first, at most `limit`.
fn candidates_from_rows(rows: &[Value], threshold: f32, limit: usize) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = rows
        .iter()
        .filter_map(candidate_from_row)
        .filter(|c| c.distance <= threshold)
        .collect();
    candidates.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(limit);
    candidates
}

/// Rows name the photo under `identity` (or `img_name` in older indexes).
fn candidate_from_row(row: &Value) -> Option<Candidate> {
    let identity = ["identity", "img_name"]
        .iter()
        .find_map(|key| row.get(key).and_then(Value::as_str))
        .filter(|s| !s.is_empty())?;

    let distance = row
        .get("distance")
        .and_then(Value::as_f64)
        .unwrap_or(MISSING_DISTANCE);
    if !distance.is_finite() {
        return None;
    }

    Some(Candidate::new(identity, distance.max(0.0) as f32))
}
