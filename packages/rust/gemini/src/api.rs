//! The enrichment API boundary consumed by the live worker and batch manager.

use async_trait::async_trait;
use serde_json::{Value, json};

use postscout_shared::{BatchJobState, Result};

/// One keyed prompt inside a bulk submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    /// Stable chunk key echoed back in the results file.
    pub key: String,
    pub prompt: String,
}

impl BatchRequest {
    /// The JSONL line submitted for this request.
    ///
    /// Asks for a JSON response so the strict parse usually succeeds.
    pub fn to_line(&self) -> Value {
        json!({
            "key": self.key,
            "request": {
                "contents": [{ "parts": [{ "text": self.prompt }] }],
                "generationConfig": { "responseMimeType": "application/json" }
            }
        })
    }

    /// Serialized size of [`Self::to_line`] plus its newline.
    pub fn encoded_len(&self) -> usize {
        self.to_line().to_string().len() + 1
    }
}

/// One line of a downloaded results file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResultLine {
    pub key: String,
    /// Model text on success, the per-item error message otherwise.
    pub outcome: std::result::Result<String, String>,
}

/// Operations the enrichment subsystem needs from the generative API.
///
/// Implementations must be `Send + Sync` so one instance can be shared by
/// every live task.
#[async_trait]
pub trait EnrichmentApi: Send + Sync {
    /// Synchronous call: prompt in, raw model text out.
    ///
    /// Rate limiting is reported as [`postscout_shared::PostScoutError::RateLimited`]
    /// with the advised delay when the server provided one.
    async fn generate(&self, model: &str, prompt: &str) -> Result<String>;

    /// Upload `requests` and start a bulk job. Returns the job id.
    async fn submit_batch(
        &self,
        model: &str,
        display_name: &str,
        requests: &[BatchRequest],
    ) -> Result<String>;

    /// Current remote state of a bulk job.
    async fn batch_status(&self, job_id: &str) -> Result<BatchJobState>;

    /// Download the results of a succeeded bulk job.
    async fn fetch_batch_results(&self, job_id: &str) -> Result<Vec<BatchResultLine>>;

    /// Ask the service to stop a bulk job.
    async fn cancel_batch(&self, job_id: &str) -> Result<()>;
}
