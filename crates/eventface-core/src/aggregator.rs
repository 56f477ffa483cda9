//! Multi-reference match aggregation.
//!
//! Each reference image is searched on its own task. Outcomes are folded in
//! reference order into a [`MatchSet`], which keeps one entry per identity
//! with the highest confidence seen for it.

use crate::search::{FaceSearch, SearchError};
use crate::types::{person_name_from_folder, AggregatedMatch, Candidate, PersonSearchResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

// --- Named constants ---
pub const MIN_LIMIT: usize = 1;
pub const MAX_LIMIT: usize = 1000;
const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 60;

/// Clamp a caller-supplied result limit into `[MIN_LIMIT, MAX_LIMIT]`.
pub fn clamp_limit(limit: usize) -> usize {
    limit.clamp(MIN_LIMIT, MAX_LIMIT)
}

/// Best-confidence-per-identity accumulator.
///
/// Entries keep the position at which their identity was first seen, so
/// ranking with a stable sort breaks confidence ties by first-seen order.
#[derive(Debug, Clone, Default)]
pub struct MatchSet {
    positions: HashMap<String, usize>,
    entries: Vec<AggregatedMatch>,
}

impl MatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a candidate. An existing identity is replaced only by a strictly
    /// higher confidence. Returns whether the set changed.
    pub fn insert(&mut self, candidate: Candidate) -> bool {
        self.insert_match(candidate.into())
    }

    /// Fold another set into this one, visiting its entries in their first-seen order.
    pub fn merge(&mut self, other: MatchSet) {
        for entry in other.entries {
            self.insert_match(entry);
        }
    }

    fn insert_match(&mut self, incoming: AggregatedMatch) -> bool {
        match self.positions.get(&incoming.identity) {
            Some(&pos) => {
                let current = &mut self.entries[pos];
                if incoming.confidence > current.confidence {
                    tracing::debug!(
                        identity = %incoming.identity,
                        old = current.confidence,
                        new = incoming.confidence,
                        "raising match confidence"
                    );
                    *current = incoming;
                    true
                } else {
                    false
                }
            }
            None => {
                self.positions
                    .insert(incoming.identity.clone(), self.entries.len());
                self.entries.push(incoming);
                true
            }
        }
    }

    /// Matches ordered by descending confidence, ties in first-seen order.
    pub fn into_ranked(self) -> Vec<AggregatedMatch> {
        let mut ranked = self.entries;
        ranked.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked
    }
}

impl FromIterator<Candidate> for MatchSet {
    fn from_iter<T: IntoIterator<Item = Candidate>>(iter: T) -> Self {
        let mut set = MatchSet::new();
        for candidate in iter {
            set.insert(candidate);
        }
        set
    }
}

impl Extend<Candidate> for MatchSet {
    fn extend<T: IntoIterator<Item = Candidate>>(&mut self, iter: T) {
        for candidate in iter {
            self.insert(candidate);
        }
    }
}

/// Tuning for [`MatchAggregator`].
#[derive(Debug, Clone)]
pub struct AggregatorOptions {
    /// Maximum reference searches in flight at once.
    pub concurrency: usize,
    /// Per-reference search deadline; expiry counts as a per-reference failure.
    pub search_timeout: Duration,
    /// References larger than this many megabytes are rejected without searching.
    pub max_image_mb: Option<u64>,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            search_timeout: Duration::from_secs(DEFAULT_SEARCH_TIMEOUT_SECS),
            max_image_mb: None,
        }
    }
}

/// Why a single reference produced no candidates.
#[derive(Error, Debug)]
enum ReferenceFailure {
    #[error("failed to read image: {0}")]
    Read(#[from] std::io::Error),
    #[error("file too large (max {max_mb} MB)")]
    TooLarge { max_mb: u64 },
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error("search task aborted")]
    Aborted,
}

type ReferenceOutcome = Result<Vec<Candidate>, ReferenceFailure>;

/// Runs one search per reference image and merges the results.
pub struct MatchAggregator {
    search: Arc<dyn FaceSearch>,
    options: AggregatorOptions,
}

impl MatchAggregator {
    pub fn new(search: Arc<dyn FaceSearch>, options: AggregatorOptions) -> Self {
        Self { search, options }
    }

    /// Search with every reference and merge the hits into one ranking.
    ///
    /// Never fails: unreadable images, faceless references, backend errors
    /// and timeouts are recorded in `search_errors` and the remaining
    /// references still count toward the result.
    pub async fn aggregate(
        &self,
        folder: &Path,
        references: &[PathBuf],
        limit: usize,
    ) -> PersonSearchResult {
        let person_name = person_name_from_folder(folder);
        let limit = clamp_limit(limit);

        if references.is_empty() {
            tracing::info!(person = %person_name, "no reference images found");
            return PersonSearchResult::no_references(person_name);
        }

        let outcomes = self.run_searches(references, limit).await;

        let mut matches = MatchSet::new();
        let mut search_errors = Vec::new();
        for (reference, outcome) in references.iter().zip(outcomes) {
            match outcome {
                Ok(candidates) => {
                    tracing::debug!(
                        reference = %reference.display(),
                        candidates = candidates.len(),
                        "reference searched"
                    );
                    matches.extend(candidates);
                }
                Err(failure) => {
                    let message = describe_failure(reference, &failure);
                    tracing::warn!(reference = %reference.display(), error = %failure, "reference search failed");
                    search_errors.push(message);
                }
            }
        }

        let matches = matches.into_ranked();
        tracing::info!(
            person = %person_name,
            references = references.len(),
            matches = matches.len(),
            errors = search_errors.len(),
            "person search complete"
        );

        PersonSearchResult {
            person_name,
            matches,
            reference_count: references.len(),
            search_errors,
        }
    }

    /// Run every reference search concurrently; outcomes come back in reference order.
    async fn run_searches(&self, references: &[PathBuf], limit: usize) -> Vec<ReferenceOutcome> {
        let permits = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (idx, reference) in references.iter().enumerate() {
            let search = Arc::clone(&self.search);
            let permits = Arc::clone(&permits);
            let reference = reference.clone();
            let options = self.options.clone();

            tasks.spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => search_reference(search.as_ref(), &reference, limit, &options).await,
                    Err(_) => Err(ReferenceFailure::Aborted),
                };
                (idx, outcome)
            });
        }

        let mut outcomes: Vec<Option<ReferenceOutcome>> =
            std::iter::repeat_with(|| None).take(references.len()).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, outcome)) => outcomes[idx] = Some(outcome),
                Err(e) => tracing::error!(error = %e, "reference search task panicked"),
            }
        }

        outcomes
            .into_iter()
            .map(|o| o.unwrap_or_else(|| Err(ReferenceFailure::Aborted)))
            .collect()
    }
}

async fn search_reference(
    search: &dyn FaceSearch,
    reference: &Path,
    limit: usize,
    options: &AggregatorOptions,
) -> ReferenceOutcome {
    if let Some(max_mb) = options.max_image_mb {
        let size = tokio::fs::metadata(reference).await?.len();
        if size > max_mb.saturating_mul(1024 * 1024) {
            return Err(ReferenceFailure::TooLarge { max_mb });
        }
    }

    let bytes = tokio::fs::read(reference).await?;

    match tokio::time::timeout(options.search_timeout, search.search(&bytes, limit)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(SearchError::Timeout(options.search_timeout).into()),
    }
}

fn describe_failure(reference: &Path, failure: &ReferenceFailure) -> String {
    let name = reference
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| reference.display().to_string());

    match failure {
        ReferenceFailure::Search(SearchError::NoFaceDetected) => format!("No face: {name}"),
        other => format!("{name}: {other}"),
    }
}
