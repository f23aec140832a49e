//! Bulk job lifecycle: submission, polling, consolidation, and cleanup.
//!
//! A job moves through `collecting -> submitted -> polling -> terminal ->
//! consolidated`. Every submitted job is mirrored by a [`PendingJobRecord`]
//! in the [`WorkspaceStateStore`], written right after the submission call
//! returns, so a restarted process can always resume polling. Records and
//! their chunk-source files are only removed once the caller confirms it has
//! persisted the consolidated posts.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, instrument, warn};

use postscout_gemini::{BatchRequest, EnrichmentApi};
use postscout_preprocess::ContentPreprocessor;
use postscout_shared::{
    BatchJobState, EnrichmentConfig, PendingJobRecord, Post, PostScoutError, Result, RunSummary,
};
use postscout_workspace::{SourceEntry, WorkspaceStateStore};

use crate::merge::{ChunkOutcome, ResultMerger};
use crate::parse::parse_enrichment;
use crate::progress::EnrichmentProgress;
use crate::prompt::build_prompt;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// A job that was submitted and recorded.
#[derive(Debug, Clone)]
pub struct SubmittedJob {
    pub record: PendingJobRecord,
}

/// A group of posts whose submission failed. The posts are unchanged and
/// remain eligible for the next run.
#[derive(Debug)]
pub struct FailedSubmission {
    pub error: PostScoutError,
    pub posts: Vec<Post>,
}

/// Outcome of [`BatchJobManager::submit`].
#[derive(Debug, Default)]
pub struct SubmissionReport {
    pub submitted: Vec<SubmittedJob>,
    pub failed: Vec<FailedSubmission>,
    /// Posts that could not be chunked, already marked failed.
    pub rejected: Vec<Post>,
    /// Posts without usable content, left untouched.
    pub skipped: usize,
}

impl SubmissionReport {
    pub fn posts_submitted(&self) -> usize {
        self.submitted.iter().map(|j| j.record.post_count).sum()
    }
}

/// A recorded job that has not reached a terminal state.
#[derive(Debug, Clone)]
pub struct PendingJob {
    pub record: PendingJobRecord,
    pub state: BatchJobState,
}

/// A terminal job turned back into posts, awaiting
/// [`BatchJobManager::confirm_persisted`].
#[derive(Debug, Clone)]
pub struct ConsolidatedJob {
    pub record: PendingJobRecord,
    pub state: BatchJobState,
    pub posts: Vec<Post>,
    pub summary: RunSummary,
}

/// Outcome of one poll pass.
#[derive(Debug, Default)]
pub struct PollReport {
    pub pending: Vec<PendingJob>,
    pub completed: Vec<ConsolidatedJob>,
    /// Status or download failures, one per affected job.
    pub errors: Vec<PostScoutError>,
    /// Registry entries that could not be read.
    pub corrupt: Vec<PostScoutError>,
}

/// Outcome of [`BatchJobManager::cancel_pending`].
#[derive(Debug, Default)]
pub struct CancelReport {
    pub cancelled: Vec<String>,
    pub errors: Vec<PostScoutError>,
}

// ---------------------------------------------------------------------------
// Collecting
// ---------------------------------------------------------------------------

/// One post's chunks ready for a source file.
struct PreparedPost {
    entry: SourceEntry,
    requests: Vec<BatchRequest>,
    bytes: usize,
}

/// Group posts so no group exceeds `max_items` requests or `max_bytes`
/// encoded bytes. A post's chunks always stay together; a post that alone
/// exceeds a cap gets a group of its own.
fn group_posts(
    posts: Vec<PreparedPost>,
    max_items: usize,
    max_bytes: usize,
) -> Vec<Vec<PreparedPost>> {
    let mut groups: Vec<Vec<PreparedPost>> = Vec::new();
    let mut current: Vec<PreparedPost> = Vec::new();
    let (mut items, mut bytes) = (0usize, 0usize);

    for post in posts {
        let n = post.requests.len();
        if !current.is_empty() && (items + n > max_items || bytes + post.bytes > max_bytes) {
            groups.push(std::mem::take(&mut current));
            items = 0;
            bytes = 0;
        }
        items += n;
        bytes += post.bytes;
        current.push(post);
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

// ---------------------------------------------------------------------------
// BatchJobManager
// ---------------------------------------------------------------------------

/// Owns the bulk-job lifecycle for one workspace.
pub struct BatchJobManager {
    api: Arc<dyn EnrichmentApi>,
    store: WorkspaceStateStore,
    preprocessor: ContentPreprocessor,
    config: EnrichmentConfig,
}

impl BatchJobManager {
    /// Open the workspace at `config.workspace_dir`.
    pub fn new(api: Arc<dyn EnrichmentApi>, config: EnrichmentConfig) -> Result<Self> {
        let store = WorkspaceStateStore::open(&config.workspace_dir)?;
        let preprocessor = ContentPreprocessor::new(config.preprocess.clone())?;
        Ok(Self {
            api,
            store,
            preprocessor,
            config,
        })
    }

    pub fn store(&self) -> &WorkspaceStateStore {
        &self.store
    }

    /// Chunk `posts`, write one source file per group, and submit each group
    /// as a bulk job. Each job is recorded as soon as its id is known.
    #[instrument(skip_all, fields(scope = %scope, posts = posts.len()))]
    pub async fn submit(
        &self,
        scope: &str,
        posts: Vec<Post>,
        progress: &dyn EnrichmentProgress,
    ) -> Result<SubmissionReport> {
        match self.store.sweep_orphans(Some(scope)) {
            Ok(removed) if !removed.is_empty() => {
                info!(removed = removed.len(), "swept orphaned source files");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "orphan sweep failed"),
        }

        progress.phase("Preparing content");
        let mut report = SubmissionReport::default();
        let mut prepared = Vec::new();

        for (index, mut post) in posts.into_iter().enumerate() {
            let content = match post.content.as_deref() {
                Some(content) if post.has_enrichable_content() => content,
                _ => {
                    report.skipped += 1;
                    continue;
                }
            };

            match self.preprocessor.prepare(index, content) {
                Ok(content) => {
                    let requests: Vec<BatchRequest> = content
                        .chunks
                        .iter()
                        .map(|chunk| BatchRequest {
                            key: chunk.key.clone(),
                            prompt: build_prompt(&self.config.prompt, &chunk.api_text()),
                        })
                        .collect();
                    let bytes = requests.iter().map(BatchRequest::encoded_len).sum();
                    let keys = requests.iter().map(|r| r.key.clone()).collect();
                    post.content_processing = Some(content.processing);

                    prepared.push(PreparedPost {
                        entry: SourceEntry { index, post, keys },
                        requests,
                        bytes,
                    });
                }
                Err(e) => {
                    warn!(post = %post.url, error = %e, "cannot chunk post");
                    post.mark_failed(e.to_string());
                    report.rejected.push(post);
                }
            }
        }

        let groups = group_posts(
            prepared,
            self.config.max_items_per_file.max(1),
            self.config.max_file_bytes,
        );
        let total = groups.len();
        progress.phase("Submitting bulk jobs");

        for (n, group) in groups.into_iter().enumerate() {
            progress.task_progress(n + 1, total, scope);
            match self.submit_group(scope, group).await {
                Ok(job) => report.submitted.push(job),
                Err(failed) => report.failed.push(failed),
            }
        }

        info!(
            jobs = report.submitted.len(),
            failed_groups = report.failed.len(),
            rejected = report.rejected.len(),
            "bulk submission finished"
        );
        Ok(report)
    }

    /// Write, submit, and record one group.
    async fn submit_group(
        &self,
        scope: &str,
        group: Vec<PreparedPost>,
    ) -> std::result::Result<SubmittedJob, FailedSubmission> {
        let mut entries = Vec::with_capacity(group.len());
        let mut requests = Vec::new();
        for post in group {
            requests.extend(post.requests);
            entries.push(post.entry);
        }
        let into_posts = |entries: Vec<SourceEntry>| entries.into_iter().map(|e| e.post).collect();

        let source_file = match self.store.write_source(scope, &entries) {
            Ok(path) => path,
            Err(error) => {
                return Err(FailedSubmission {
                    error,
                    posts: into_posts(entries),
                });
            }
        };

        let display_name = source_file
            .file_stem()
            .map(|s| format!("postscout-{}", s.to_string_lossy()))
            .unwrap_or_else(|| format!("postscout-{scope}"));

        let job_id = match self
            .api
            .submit_batch(&self.config.batch_model, &display_name, &requests)
            .await
        {
            Ok(job_id) => job_id,
            Err(e) => {
                error!(error = %e, "bulk submission failed");
                self.discard_source(&source_file);
                return Err(FailedSubmission {
                    error: PostScoutError::BatchSubmission(e.to_string()),
                    posts: into_posts(entries),
                });
            }
        };

        let record = PendingJobRecord {
            job_id: job_id.clone(),
            scope: scope.to_string(),
            source_file: source_file.clone(),
            created_at: Utc::now(),
            model: self.config.batch_model.clone(),
            post_count: entries.len(),
            chunk_count: requests.len(),
        };

        if let Err(e) = self.store.put(&record) {
            // Unrecorded jobs can never be consolidated, so stop the remote work.
            error!(job_id = %job_id, error = %e, "failed to record job, cancelling it");
            if let Err(cancel_err) = self.api.cancel_batch(&job_id).await {
                warn!(job_id = %job_id, error = %cancel_err, "cancel after record failure failed");
            }
            self.discard_source(&source_file);
            return Err(FailedSubmission {
                error: e,
                posts: into_posts(entries),
            });
        }

        info!(
            job_id = %job_id,
            posts = record.post_count,
            chunks = record.chunk_count,
            "bulk job submitted"
        );
        Ok(SubmittedJob { record })
    }

    fn discard_source(&self, path: &Path) {
        if let Err(e) = self.store.delete_source(path) {
            warn!(path = %path.display(), error = %e, "failed to delete source file");
        }
    }

    /// Recorded jobs, optionally limited to one scope.
    pub fn list(
        &self,
        scope: Option<&str>,
    ) -> Result<(Vec<PendingJobRecord>, Vec<PostScoutError>)> {
        let scan = self.store.get_all()?;
        let records = scan
            .records
            .into_iter()
            .filter(|r| scope.is_none_or(|s| r.scope == s))
            .collect();
        Ok((records, scan.corrupt))
    }

    /// Poll every recorded job once.
    ///
    /// Terminal jobs are consolidated into posts; nothing in the workspace is
    /// changed, so calling this repeatedly is safe.
    #[instrument(skip_all, fields(scope = scope.unwrap_or("*")))]
    pub async fn check(
        &self,
        scope: Option<&str>,
        progress: &dyn EnrichmentProgress,
    ) -> Result<PollReport> {
        let (records, corrupt) = self.list(scope)?;
        let mut report = PollReport {
            corrupt,
            ..Default::default()
        };

        progress.phase("Checking bulk jobs");
        let total = records.len();

        for (n, record) in records.into_iter().enumerate() {
            progress.task_progress(n + 1, total, &record.job_id);

            let state = match self.api.batch_status(&record.job_id).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(job_id = %record.job_id, error = %e, "status check failed");
                    report.errors.push(PostScoutError::BatchPoll {
                        job_id: record.job_id.clone(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            if !state.is_terminal() {
                info!(job_id = %record.job_id, %state, "job still in progress");
                report.pending.push(PendingJob { record, state });
                continue;
            }

            match self.consolidate(&record, state).await {
                Ok(job) => {
                    info!(
                        job_id = %record.job_id,
                        %state,
                        summary = %job.summary,
                        "job consolidated"
                    );
                    report.completed.push(job);
                }
                Err(e) => {
                    warn!(job_id = %record.job_id, error = %e, "consolidation failed");
                    report.errors.push(e);
                }
            }
        }

        Ok(report)
    }

    /// Turn a terminal job back into posts.
    async fn consolidate(
        &self,
        record: &PendingJobRecord,
        state: BatchJobState,
    ) -> Result<ConsolidatedJob> {
        let entries = self
            .store
            .read_source(&record.source_file)
            .map_err(|e| PostScoutError::StateEntry {
                job_id: record.job_id.clone(),
                path: record.source_file.clone(),
                message: e.to_string(),
            })?;

        let mut posts = Vec::with_capacity(entries.len());

        if state.is_failure() {
            let reason = format!("bulk job {} ended {state}", record.job_id);
            for entry in entries {
                let mut post = entry.post;
                post.mark_failed(reason.clone());
                posts.push(post);
            }
        } else {
            let lines = self
                .api
                .fetch_batch_results(&record.job_id)
                .await
                .map_err(|e| PostScoutError::BatchPoll {
                    job_id: record.job_id.clone(),
                    message: format!("result download failed: {e}"),
                })?;

            let outcomes: HashMap<String, ChunkOutcome> = lines
                .into_iter()
                .map(|line| {
                    let outcome = line
                        .outcome
                        .and_then(|text| parse_enrichment(&text).map_err(|e| e.to_string()));
                    (line.key, outcome)
                })
                .collect();

            for entry in entries {
                let mut post = entry.post;
                ResultMerger::consolidate(&mut post, &entry.keys, &outcomes);
                posts.push(post);
            }
        }

        Ok(ConsolidatedJob {
            record: record.clone(),
            state,
            summary: RunSummary::from_posts(&posts),
            posts,
        })
    }

    /// Remove a consolidated job's record and source file. Call only after
    /// its posts have been saved.
    pub fn confirm_persisted(&self, job: &ConsolidatedJob) -> Result<()> {
        self.store.remove(&job.record.job_id)?;
        self.store.delete_source(&job.record.source_file)?;
        info!(job_id = %job.record.job_id, "job cleaned up");
        Ok(())
    }

    /// Ask the service to stop every non-terminal job recorded for `scope`.
    /// Records are kept; the next check consolidates them as failed.
    #[instrument(skip_all, fields(scope = scope.unwrap_or("*")))]
    pub async fn cancel_pending(&self, scope: Option<&str>) -> Result<CancelReport> {
        let (records, _) = self.list(scope)?;
        let mut report = CancelReport::default();

        for record in records {
            let state = match self.api.batch_status(&record.job_id).await {
                Ok(state) => state,
                Err(e) => {
                    report.errors.push(PostScoutError::BatchPoll {
                        job_id: record.job_id.clone(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            if state.is_terminal() {
                continue;
            }

            match self.api.cancel_batch(&record.job_id).await {
                Ok(()) => report.cancelled.push(record.job_id),
                Err(e) => report.errors.push(PostScoutError::BatchPoll {
                    job_id: record.job_id.clone(),
                    message: format!("cancel failed: {e}"),
                }),
            }
        }

        Ok(report)
    }
}
