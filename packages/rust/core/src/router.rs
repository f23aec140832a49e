//! Entry point that picks live or bulk enrichment for a run.

use std::sync::Arc;

use tracing::info;

use postscout_gemini::EnrichmentApi;
use postscout_shared::{EnrichmentConfig, Post, Result};

use crate::batch::{BatchJobManager, CancelReport, PollReport, SubmissionReport};
use crate::live::{LiveEnrichmentWorker, LiveReport};
use crate::progress::EnrichmentProgress;

/// Which path a run takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentMode {
    Live,
    Batch,
}

impl std::fmt::Display for EnrichmentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Live => "live",
            Self::Batch => "batch",
        })
    }
}

/// Fewer than `threshold` posts go live; anything else goes to a bulk job.
pub fn select_mode(count: usize, threshold: usize) -> EnrichmentMode {
    if count < threshold {
        EnrichmentMode::Live
    } else {
        EnrichmentMode::Batch
    }
}

/// Result of [`EnrichmentRouter::enrich`].
#[derive(Debug)]
pub enum RunOutcome {
    /// Posts enriched in this call.
    Live(LiveReport),
    /// Posts handed to bulk jobs; results arrive through [`EnrichmentRouter::check`].
    Batch(SubmissionReport),
}

impl RunOutcome {
    pub fn mode(&self) -> EnrichmentMode {
        match self {
            Self::Live(_) => EnrichmentMode::Live,
            Self::Batch(_) => EnrichmentMode::Batch,
        }
    }
}

/// Dispatches enrichment runs.
///
/// Which posts to pass in is up to the caller; a previously failed post and
/// one never attempted are treated the same.
pub struct EnrichmentRouter {
    threshold: usize,
    live: LiveEnrichmentWorker,
    batch: BatchJobManager,
}

impl EnrichmentRouter {
    pub fn new(api: Arc<dyn EnrichmentApi>, config: EnrichmentConfig) -> Result<Self> {
        Ok(Self {
            threshold: config.batch_threshold,
            live: LiveEnrichmentWorker::new(api.clone(), config.clone())?,
            batch: BatchJobManager::new(api, config)?,
        })
    }

    pub fn mode_for(&self, count: usize) -> EnrichmentMode {
        select_mode(count, self.threshold)
    }

    /// Enrich `posts` through exactly one path.
    pub async fn enrich(
        &self,
        scope: &str,
        posts: Vec<Post>,
        progress: &dyn EnrichmentProgress,
    ) -> Result<RunOutcome> {
        let mode = self.mode_for(posts.len());
        info!(
            scope,
            posts = posts.len(),
            threshold = self.threshold,
            %mode,
            "routing enrichment run"
        );

        match mode {
            EnrichmentMode::Live => Ok(RunOutcome::Live(self.live.run(posts, progress).await)),
            EnrichmentMode::Batch => {
                let report = self.batch.submit(scope, posts, progress).await?;
                Ok(RunOutcome::Batch(report))
            }
        }
    }

    /// Poll recorded bulk jobs once.
    pub async fn check(
        &self,
        scope: Option<&str>,
        progress: &dyn EnrichmentProgress,
    ) -> Result<PollReport> {
        self.batch.check(scope, progress).await
    }

    pub async fn cancel_pending(&self, scope: Option<&str>) -> Result<CancelReport> {
        self.batch.cancel_pending(scope).await
    }

    pub fn batch(&self) -> &BatchJobManager {
        &self.batch
    }
}
