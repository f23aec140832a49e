//! In-memory [`EnrichmentApi`] used by the worker, manager, and router tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use postscout_gemini::{BatchRequest, BatchResultLine, EnrichmentApi};
use postscout_shared::{BatchJobState, PostScoutError, Result};

type Responder = Box<dyn Fn(&str, usize) -> Result<String> + Send + Sync>;

struct FakeJob {
    state: BatchJobState,
    requests: Vec<BatchRequest>,
}

/// Scripted API. `responder(prompt, call_number)` answers live calls and
/// produces bulk results.
pub(crate) struct FakeApi {
    responder: Responder,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    submits: AtomicUsize,
    fail_submit: bool,
    jobs: Mutex<HashMap<String, FakeJob>>,
    results_override: Mutex<Option<Vec<BatchResultLine>>>,
}

impl FakeApi {
    pub(crate) fn new(
        responder: impl Fn(&str, usize) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            delay: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            submits: AtomicUsize::new(0),
            fail_submit: false,
            jobs: Mutex::new(HashMap::new()),
            results_override: Mutex::new(None),
        }
    }

    /// Always answers with a well-formed enrichment payload.
    pub(crate) fn ok() -> Self {
        Self::new(|_, _| Ok(ok_payload("A summary.", &["cms", "headless"], "TOFU")))
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn failing_submit(mut self) -> Self {
        self.fail_submit = true;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub(crate) fn set_state(&self, job_id: &str, state: BatchJobState) {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(job_id) {
            job.state = state;
        }
    }

    pub(crate) fn set_all_states(&self, state: BatchJobState) {
        for job in self.jobs.lock().unwrap().values_mut() {
            job.state = state;
        }
    }

    pub(crate) fn submitted_keys(&self, job_id: &str) -> Vec<String> {
        self.jobs
            .lock()
            .unwrap()
            .get(job_id)
            .map(|job| job.requests.iter().map(|r| r.key.clone()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn override_results(&self, lines: Vec<BatchResultLine>) {
        *self.results_override.lock().unwrap() = Some(lines);
    }
}

pub(crate) fn ok_payload(summary: &str, keywords: &[&str], funnel: &str) -> String {
    serde_json::json!({
        "summary": summary,
        "seo_keywords": keywords,
        "funnel_stage": funnel,
    })
    .to_string()
}

#[async_trait]
impl EnrichmentApi for FakeApi {
    async fn generate(&self, _model: &str, prompt: &str) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.responder)(prompt, call)
    }

    async fn submit_batch(
        &self,
        _model: &str,
        _display_name: &str,
        requests: &[BatchRequest],
    ) -> Result<String> {
        if self.fail_submit {
            return Err(PostScoutError::api(Some(400), "bad request file"));
        }
        let n = self.submits.fetch_add(1, Ordering::SeqCst);
        let job_id = format!("batches/fake-{n}");
        self.jobs.lock().unwrap().insert(
            job_id.clone(),
            FakeJob {
                state: BatchJobState::Submitted,
                requests: requests.to_vec(),
            },
        );
        Ok(job_id)
    }

    async fn batch_status(&self, job_id: &str) -> Result<BatchJobState> {
        self.jobs
            .lock()
            .unwrap()
            .get(job_id)
            .map(|job| job.state)
            .ok_or_else(|| PostScoutError::api(Some(404), format!("{job_id} not found")))
    }

    async fn fetch_batch_results(&self, job_id: &str) -> Result<Vec<BatchResultLine>> {
        if let Some(lines) = self.results_override.lock().unwrap().clone() {
            return Ok(lines);
        }
        let requests = self
            .jobs
            .lock()
            .unwrap()
            .get(job_id)
            .map(|job| job.requests.clone())
            .ok_or_else(|| PostScoutError::api(Some(404), format!("{job_id} not found")))?;

        Ok(requests
            .iter()
            .enumerate()
            .map(|(i, req)| BatchResultLine {
                key: req.key.clone(),
                outcome: (self.responder)(&req.prompt, i).map_err(|e| e.to_string()),
            })
            .collect())
    }

    async fn cancel_batch(&self, job_id: &str) -> Result<()> {
        self.set_state(job_id, BatchJobState::Cancelled);
        Ok(())
    }
}
