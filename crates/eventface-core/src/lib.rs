//! eventface-core — Find every event photo that contains a given person.
//!
//! A person is described by a folder of reference photos. Each reference is
//! searched independently against the external face index, the per-reference
//! hits are merged into one best-confidence-wins ranking, and the winning
//! photos are exported into a per-person output directory.

pub mod aggregator;
pub mod collector;
pub mod guard;
pub mod materialize;
pub mod pipeline;
pub mod search;
pub mod types;

pub use aggregator::{AggregatorOptions, MatchAggregator, MatchSet};
pub use collector::ReferenceCollector;
pub use guard::{PathError, PathGuard};
pub use materialize::{ArchiveResolver, MaterializeError, OutputMaterializer};
pub use pipeline::{PersonSearch, PipelineError};
pub use search::{FaceSearch, SearchError};
pub use types::{AggregatedMatch, Candidate, OutputSummary, PersonSearchResult};
