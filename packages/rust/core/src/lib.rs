//! Enrichment orchestration for PostScout.
//!
//! [`EnrichmentRouter`] is the entry point: small runs go through the
//! [`LiveEnrichmentWorker`], larger ones become bulk jobs owned by the
//! [`BatchJobManager`]. Both paths reassemble chunk results with the
//! [`ResultMerger`].

pub mod batch;
pub mod live;
pub mod merge;
pub mod parse;
pub mod progress;
pub mod prompt;
pub mod router;

#[cfg(test)]
mod testing;

pub use batch::{
    BatchJobManager, CancelReport, ConsolidatedJob, FailedSubmission, PendingJob, PollReport,
    SubmissionReport, SubmittedJob,
};
pub use live::{LiveEnrichmentWorker, LiveReport};
pub use merge::{ChunkOutcome, ResultMerger};
pub use parse::parse_enrichment;
pub use progress::{EnrichmentProgress, SilentEnrichmentProgress};
pub use prompt::build_prompt;
pub use router::{EnrichmentMode, EnrichmentRouter, RunOutcome, select_mode};
