//! Live (synchronous-path) enrichment with a bounded worker pool.
//!
//! Every chunk becomes one spawned task that must hold a semaphore permit
//! while calling the API, so at most `concurrency` requests are in flight.
//! Failures never abort the run: they downgrade the owning post to `failed`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use postscout_gemini::EnrichmentApi;
use postscout_preprocess::ContentPreprocessor;
use postscout_shared::{EnrichmentConfig, Post, PostScoutError, RunSummary};

use crate::merge::{ChunkOutcome, ResultMerger};
use crate::parse::parse_enrichment;
use crate::progress::EnrichmentProgress;
use crate::prompt::build_prompt;

/// Outcome of a live run.
#[derive(Debug, Clone)]
pub struct LiveReport {
    /// The input posts, annotated. Posts without usable content are unchanged.
    pub posts: Vec<Post>,
    pub summary: RunSummary,
    /// Posts left untouched for lack of content.
    pub skipped: usize,
}

/// Retry limits for a single chunk.
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_attempts: u32,
    backoff_base: Duration,
    max_rate_limit_wait: Duration,
    request_timeout: Duration,
}

impl RetryPolicy {
    fn from_config(config: &EnrichmentConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            backoff_base: config.backoff_base,
            max_rate_limit_wait: config.max_rate_limit_wait,
            request_timeout: config.request_timeout,
        }
    }

    /// Delay after the `attempt`-th (1-based) failed attempt.
    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Enriches a small set of posts with one concurrent request per chunk.
pub struct LiveEnrichmentWorker {
    api: Arc<dyn EnrichmentApi>,
    preprocessor: ContentPreprocessor,
    config: EnrichmentConfig,
}

impl LiveEnrichmentWorker {
    pub fn new(
        api: Arc<dyn EnrichmentApi>,
        config: EnrichmentConfig,
    ) -> postscout_shared::Result<Self> {
        let preprocessor = ContentPreprocessor::new(config.preprocess.clone())?;
        Ok(Self {
            api,
            preprocessor,
            config,
        })
    }

    /// Enrich `posts` and return them annotated. Never fails as a whole.
    #[instrument(skip_all, fields(posts = posts.len(), concurrency = self.config.concurrency))]
    pub async fn run(&self, mut posts: Vec<Post>, progress: &dyn EnrichmentProgress) -> LiveReport {
        progress.phase("Preparing content");

        // post position -> chunk keys
        let mut plan: Vec<(usize, Vec<String>)> = Vec::new();
        let mut requests: Vec<(String, String)> = Vec::new();
        let mut skipped = 0;

        for (index, post) in posts.iter_mut().enumerate() {
            let content = match post.content.as_deref() {
                Some(content) if post.has_enrichable_content() => content,
                _ => {
                    debug!(post = %post.url, "no usable content, skipping");
                    skipped += 1;
                    continue;
                }
            };

            match self.preprocessor.prepare(index, content) {
                Ok(prepared) => {
                    post.content_processing = Some(prepared.processing);
                    let keys = prepared.chunks.iter().map(|c| c.key.clone()).collect();
                    for chunk in &prepared.chunks {
                        let prompt = build_prompt(&self.config.prompt, &chunk.api_text());
                        requests.push((chunk.key.clone(), prompt));
                    }
                    plan.push((index, keys));
                }
                Err(e) => {
                    warn!(post = %post.url, error = %e, "cannot chunk post");
                    post.mark_failed(e.to_string());
                }
            }
        }

        progress.phase("Enriching");
        let total = requests.len();
        info!(chunks = total, skipped, "starting live enrichment");

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let policy = RetryPolicy::from_config(&self.config);
        let mut handles = Vec::with_capacity(total);

        for (key, prompt) in requests {
            let api = Arc::clone(&self.api);
            let sem = Arc::clone(&semaphore);
            let model = self.config.live_model.clone();
            let task_key = key.clone();

            handles.push((
                key,
                tokio::spawn(async move {
                    let _permit = sem
                        .acquire_owned()
                        .await
                        .map_err(|e| format!("worker pool closed: {e}"))?;
                    enrich_chunk(api.as_ref(), &model, &prompt, policy, &task_key).await
                }),
            ));
        }

        let mut outcomes: HashMap<String, ChunkOutcome> = HashMap::with_capacity(total);
        for (done, (key, handle)) in handles.into_iter().enumerate() {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(format!("task failed: {e}")),
            };
            progress.task_progress(done + 1, total, &key);
            outcomes.insert(key, outcome);
        }

        for (index, keys) in &plan {
            ResultMerger::consolidate(&mut posts[*index], keys, &outcomes);
        }

        let summary = RunSummary::from_posts(&posts);
        info!(%summary, "live enrichment finished");

        LiveReport {
            posts,
            summary,
            skipped,
        }
    }
}

/// Call the API for one chunk under the retry policy.
///
/// - rate limited: wait the advised delay (capped), retry exactly once
/// - other transient errors: exponential backoff up to `max_attempts`
/// - timeout: give up immediately
async fn enrich_chunk(
    api: &dyn EnrichmentApi,
    model: &str,
    prompt: &str,
    policy: RetryPolicy,
    key: &str,
) -> ChunkOutcome {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let err = match attempt_once(api, model, prompt, policy.request_timeout).await {
            Ok(result) => return Ok(result),
            Err(err) => err,
        };

        if err.is_rate_limited() {
            let wait = err
                .retry_after()
                .unwrap_or_else(|| policy.backoff(attempt))
                .min(policy.max_rate_limit_wait);
            warn!(chunk = %key, wait_secs = wait.as_secs_f64(), "rate limited, retrying once");
            tokio::time::sleep(wait).await;

            return attempt_once(api, model, prompt, policy.request_timeout)
                .await
                .map_err(|e| e.to_string());
        }

        if err.is_transient() && attempt < policy.max_attempts {
            let delay = policy.backoff(attempt);
            debug!(
                chunk = %key,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying"
            );
            tokio::time::sleep(delay).await;
            continue;
        }

        warn!(chunk = %key, attempt, error = %err, "chunk failed");
        return Err(err.to_string());
    }
}

async fn attempt_once(
    api: &dyn EnrichmentApi,
    model: &str,
    prompt: &str,
    timeout: Duration,
) -> postscout_shared::Result<postscout_shared::EnrichmentResult> {
    match tokio::time::timeout(timeout, api.generate(model, prompt)).await {
        Ok(Ok(text)) => parse_enrichment(&text),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(PostScoutError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use postscout_shared::{CONTINUATION_MARKER, EnrichmentStatus, FunnelStage, PreprocessConfig};

    use crate::progress::SilentEnrichmentProgress;
    use crate::testing::{FakeApi, ok_payload};

    fn config() -> EnrichmentConfig {
        EnrichmentConfig {
            concurrency: 3,
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            max_rate_limit_wait: Duration::from_secs(120),
            request_timeout: Duration::from_secs(90),
            ..Default::default()
        }
    }

    fn posts(n: usize) -> Vec<Post> {
        (0..n)
            .map(|i| {
                Post::new(
                    format!("https://acme.example/{i}"),
                    format!("Post {i}"),
                    "A post with enough words to enrich.",
                )
            })
            .collect()
    }

    fn worker(api: Arc<FakeApi>, config: EnrichmentConfig) -> LiveEnrichmentWorker {
        LiveEnrichmentWorker::new(api, config).unwrap()
    }

    fn rate_limited(secs: u64) -> PostScoutError {
        PostScoutError::RateLimited {
            retry_after: Some(Duration::from_secs(secs)),
            message: "quota".into(),
        }
    }

    #[tokio::test]
    async fn enriches_every_post() {
        let api = Arc::new(FakeApi::ok());
        let report = worker(api.clone(), config()).run(posts(4), &SilentEnrichmentProgress).await;

        assert_eq!(report.summary.completed, 4);
        assert_eq!(api.calls(), 4);
        let post = &report.posts[0];
        assert_eq!(post.status, EnrichmentStatus::Completed);
        assert_eq!(post.funnel_stage, Some(FunnelStage::Top));
        assert_eq!(post.content_processing.as_ref().unwrap().chunk_count, 1);
    }

    #[tokio::test]
    async fn never_exceeds_concurrency_limit() {
        let api = Arc::new(FakeApi::ok().with_delay(Duration::from_millis(20)));
        let report = worker(api.clone(), config()).run(posts(12), &SilentEnrichmentProgress).await;

        assert_eq!(report.summary.completed, 12);
        assert!(api.max_in_flight() <= 3, "saw {} in flight", api.max_in_flight());
        assert!(api.max_in_flight() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_advised_delay_then_fails_after_one_retry() {
        let api = Arc::new(FakeApi::new(|_, _| Err(rate_limited(30))));
        let start = tokio::time::Instant::now();

        let report = worker(api.clone(), config()).run(posts(1), &SilentEnrichmentProgress).await;

        assert!(start.elapsed() >= Duration::from_secs(30));
        assert_eq!(api.calls(), 2);
        assert_eq!(report.posts[0].status, EnrichmentStatus::Failed);
        assert!(report.posts[0].enrichment_error.as_deref().unwrap().contains("rate limited"));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_retry_can_succeed() {
        let api = Arc::new(FakeApi::new(|_, call| {
            if call == 0 {
                Err(rate_limited(30))
            } else {
                Ok(ok_payload("Later.", &["k"], "MOFU"))
            }
        }));
        let report = worker(api.clone(), config()).run(posts(1), &SilentEnrichmentProgress).await;
        assert_eq!(report.posts[0].status, EnrichmentStatus::Completed);
        assert_eq!(report.posts[0].summary.as_deref(), Some("Later."));
    }

    #[tokio::test(start_paused = true)]
    async fn advised_delay_is_capped() {
        let api = Arc::new(FakeApi::new(|_, _| Err(rate_limited(3_600))));
        let start = tokio::time::Instant::now();
        worker(api, config()).run(posts(1), &SilentEnrichmentProgress).await;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(120));
        assert!(elapsed < Duration::from_secs(3_600));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_back_off_then_succeed() {
        let api = Arc::new(FakeApi::new(|_, call| {
            if call < 2 {
                Err(PostScoutError::api(Some(503), "overloaded"))
            } else {
                Ok(ok_payload("Fine.", &["k"], "BOFU"))
            }
        }));
        let start = tokio::time::Instant::now();
        let report = worker(api.clone(), config()).run(posts(1), &SilentEnrichmentProgress).await;

        assert_eq!(api.calls(), 3);
        // 1s + 2s of backoff
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert_eq!(report.posts[0].status, EnrichmentStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_ceiling_marks_post_failed() {
        let api = Arc::new(FakeApi::new(|_, _| Err(PostScoutError::api(Some(500), "boom"))));
        let report = worker(api.clone(), config()).run(posts(2), &SilentEnrichmentProgress).await;

        assert_eq!(api.calls(), 6);
        assert_eq!(report.summary.failed, 2);
        assert!(report.posts[1].enrichment_error.as_deref().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let api = Arc::new(FakeApi::new(|_, _| Err(PostScoutError::api(Some(400), "bad request"))));
        let report = worker(api.clone(), config()).run(posts(1), &SilentEnrichmentProgress).await;
        assert_eq!(api.calls(), 1);
        assert_eq!(report.summary.failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fails_without_retry() {
        let api = Arc::new(FakeApi::ok().with_delay(Duration::from_secs(5)));
        let config = EnrichmentConfig {
            request_timeout: Duration::from_secs(2),
            ..config()
        };
        let report = worker(api.clone(), config).run(posts(2), &SilentEnrichmentProgress).await;

        assert_eq!(api.calls(), 2);
        assert_eq!(report.summary.failed, 2);
        assert!(report.posts[0].enrichment_error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn posts_without_content_are_left_untouched() {
        let api = Arc::new(FakeApi::ok());
        let mut input = posts(2);
        input[1].content = None;
        let untouched = input[1].clone();

        let report = worker(api.clone(), config()).run(input, &SilentEnrichmentProgress).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.posts[1], untouched);
        assert_eq!(api.calls(), 1);
    }

    #[tokio::test]
    async fn chunked_post_is_merged() {
        let api = Arc::new(FakeApi::new(|prompt, _| {
            if prompt.contains(CONTINUATION_MARKER) {
                Ok(ok_payload("Second half.", &["Migration", "redirects"], "BOFU"))
            } else {
                Ok(ok_payload("First half.", &["migration"], "BOFU"))
            }
        }));
        let config = EnrichmentConfig {
            preprocess: PreprocessConfig {
                max_chunk_chars: 200,
                overlap_chars: 20,
                max_chunks_per_post: 10,
            },
            ..config()
        };
        let body = vec!["Content teams plan editorial calendars each week."; 6].join(" ");
        let input = vec![Post::new("https://acme.example/long", "Long", body)];

        let report = worker(api.clone(), config).run(input, &SilentEnrichmentProgress).await;
        let post = &report.posts[0];

        assert_eq!(api.calls(), 2);
        assert_eq!(post.status, EnrichmentStatus::Completed);
        assert_eq!(post.summary.as_deref(), Some("First half. Second half."));
        assert_eq!(post.keywords, ["migration", "redirects"]);
        assert_eq!(post.content_processing.as_ref().unwrap().chunk_count, 2);
    }

    #[tokio::test]
    async fn one_failed_chunk_fails_the_post() {
        let api = Arc::new(FakeApi::new(|prompt, _| {
            if prompt.contains(CONTINUATION_MARKER) {
                Ok("not json at all".to_string())
            } else {
                Ok(ok_payload("First half.", &["migration"], "BOFU"))
            }
        }));
        let config = EnrichmentConfig {
            max_retries: 1,
            preprocess: PreprocessConfig {
                max_chunk_chars: 200,
                overlap_chars: 20,
                max_chunks_per_post: 10,
            },
            ..config()
        };
        let body = vec!["Content teams plan editorial calendars each week."; 6].join(" ");
        let mut post = Post::new("https://acme.example/long", "Long", body);
        post.summary = Some("old summary".into());

        let report = worker(api, config).run(vec![post], &SilentEnrichmentProgress).await;
        let post = &report.posts[0];
        assert_eq!(post.status, EnrichmentStatus::Failed);
        assert_eq!(post.summary.as_deref(), Some("old summary"));
        assert!(post.enrichment_error.as_deref().unwrap().contains("post-0-chunk-2"));
    }
}
