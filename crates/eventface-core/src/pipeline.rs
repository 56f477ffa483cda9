//! Folder-in, ranking-out person search: guard, collect, aggregate.

use crate::aggregator::MatchAggregator;
use crate::collector::ReferenceCollector;
use crate::guard::{PathError, PathGuard};
use crate::types::PersonSearchResult;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("failed to list reference folder {path}: {source}")]
    Collect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Searches the archive for the person pictured in a reference folder.
pub struct PersonSearch {
    guard: PathGuard,
    collector: ReferenceCollector,
    aggregator: MatchAggregator,
    max_references: usize,
}

impl PersonSearch {
    pub fn new(
        guard: PathGuard,
        collector: ReferenceCollector,
        aggregator: MatchAggregator,
        max_references: usize,
    ) -> Self {
        Self {
            guard,
            collector,
            aggregator,
            max_references,
        }
    }

    /// Validate `folder`, gather its reference images and aggregate their searches.
    ///
    /// Fails only when the folder is rejected or cannot be listed; every
    /// per-reference problem ends up in the result's `search_errors`.
    pub async fn search_folder(
        &self,
        folder: &Path,
        limit: usize,
    ) -> Result<PersonSearchResult, PipelineError> {
        let resolved = self.guard.validate(folder)?;

        let references = self
            .collector
            .collect(&resolved, self.max_references)
            .map_err(|source| PipelineError::Collect {
                path: resolved.clone(),
                source,
            })?;

        tracing::info!(
            folder = %resolved.display(),
            references = references.len(),
            limit,
            "searching person folder"
        );

        // The person is named after the folder the caller chose, not a symlink target.
        let name_source = if folder.file_name().is_some() {
            folder
        } else {
            resolved.as_path()
        };

        Ok(self
            .aggregator
            .aggregate(name_source, &references, limit)
            .await)
    }
}
