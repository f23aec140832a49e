//! `reqwest` implementation of [`EnrichmentApi`] for the Gemini REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use postscout_shared::{BatchJobState, PostScoutError, Result};

use crate::api::{BatchRequest, BatchResultLine, EnrichmentApi};

/// User-Agent sent with every request.
const USER_AGENT: &str = concat!("PostScout/", env!("CARGO_PKG_VERSION"));

/// Header carrying the API key.
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Longest error body echoed into an error message.
const MAX_ERROR_BODY: usize = 300;

/// Gemini API client.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl GeminiClient {
    /// Build a client for `base_url` (no trailing path) with a per-request timeout.
    pub fn new(api_key: impl Into<String>, base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| PostScoutError::api(None, format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn transport_error(&self, e: reqwest::Error) -> PostScoutError {
        if e.is_timeout() {
            PostScoutError::Timeout(self.timeout)
        } else {
            PostScoutError::api(None, e.to_string())
        }
    }

    async fn read_json(&self, response: Response) -> Result<Value> {
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| PostScoutError::api(None, format!("invalid JSON response: {e}")))
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let response = self
            .http
            .get(self.url(path))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.read_json(response).await
    }

    /// Upload a JSONL payload through the resumable upload protocol.
    /// Returns the file resource name (`files/...`).
    async fn upload_jsonl(&self, display_name: &str, payload: Vec<u8>) -> Result<String> {
        let start = self
            .http
            .post(self.url("upload/v1beta/files"))
            .header(API_KEY_HEADER, &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", payload.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", "application/jsonl")
            .json(&json!({ "file": { "display_name": display_name } }))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let start = check_status(start).await?;

        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| PostScoutError::api(None, "upload session returned no upload URL"))?;

        let finished = self
            .http
            .post(upload_url)
            .header(API_KEY_HEADER, &self.api_key)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(payload)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let body = self.read_json(finished).await?;

        body["file"]["name"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| PostScoutError::api(None, "upload response carried no file name"))
    }
}

#[async_trait]
impl EnrichmentApi for GeminiClient {
    #[instrument(skip_all, fields(model = %model))]
    async fn generate(&self, model: &str, prompt: &str) -> Result<String> {
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "responseMimeType": "application/json" }
        });

        let response = self
            .http
            .post(self.url(&format!("v1beta/models/{}:generateContent", bare_model(model))))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let value = self.read_json(response).await?;

        candidate_text(&value).ok_or_else(|| {
            let reason = value["promptFeedback"]["blockReason"]
                .as_str()
                .unwrap_or("no candidates");
            PostScoutError::ResultParse(format!("response carried no text ({reason})"))
        })
    }

    #[instrument(skip_all, fields(model = %model, requests = requests.len()))]
    async fn submit_batch(
        &self,
        model: &str,
        display_name: &str,
        requests: &[BatchRequest],
    ) -> Result<String> {
        let mut payload = String::new();
        for request in requests {
            payload.push_str(&request.to_line().to_string());
            payload.push('\n');
        }

        let file_name = self.upload_jsonl(display_name, payload.into_bytes()).await?;
        debug!(file = %file_name, "uploaded bulk request file");

        let response = self
            .http
            .post(self.url(&format!(
                "v1beta/models/{}:batchGenerateContent",
                bare_model(model)
            )))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&json!({
                "batch": {
                    "display_name": display_name,
                    "input_config": { "file_name": file_name }
                }
            }))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let body = self.read_json(response).await?;

        let job_id = body["name"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| PostScoutError::api(None, "batch create response carried no name"))?;

        info!(job_id = %job_id, "bulk job created");
        Ok(job_id)
    }

    async fn batch_status(&self, job_id: &str) -> Result<BatchJobState> {
        let body = self.get_json(&format!("v1beta/{job_id}")).await?;
        let raw = job_state_field(&body)
            .ok_or_else(|| PostScoutError::api(None, format!("no state reported for {job_id}")))?;

        parse_job_state(raw)
            .ok_or_else(|| PostScoutError::api(None, format!("unknown job state {raw}")))
    }

    #[instrument(skip_all, fields(job_id = %job_id))]
    async fn fetch_batch_results(&self, job_id: &str) -> Result<Vec<BatchResultLine>> {
        let body = self.get_json(&format!("v1beta/{job_id}")).await?;
        let file = responses_file(&body).ok_or_else(|| {
            PostScoutError::api(None, format!("job {job_id} has no responses file"))
        })?;

        let response = self
            .http
            .get(self.url(&format!("download/v1beta/{file}:download?alt=media")))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let text = check_status(response)
            .await?
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;

        let lines = parse_results_file(&text);
        debug!(lines = lines.len(), "downloaded bulk results");
        Ok(lines)
    }

    async fn cancel_batch(&self, job_id: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("v1beta/{job_id}:cancel")))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        check_status(response).await?;
        info!(job_id = %job_id, "bulk job cancellation requested");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

/// Turn a non-success response into the matching error.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let header_delay = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    let body = response.text().await.unwrap_or_default();
    let parsed: Option<Value> = serde_json::from_str(&body).ok();
    let message = parsed
        .as_ref()
        .and_then(|v| v["error"]["message"].as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.chars().take(MAX_ERROR_BODY).collect());

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = parsed.as_ref().and_then(retry_delay_from_body).or(header_delay);
        warn!(?retry_after, "rate limited");
        return Err(PostScoutError::RateLimited {
            retry_after,
            message,
        });
    }

    Err(PostScoutError::api(Some(status.as_u16()), message))
}

/// Read `error.details[].retryDelay` (e.g. `"30s"`, `"1.5s"`).
fn retry_delay_from_body(body: &Value) -> Option<Duration> {
    body["error"]["details"]
        .as_array()?
        .iter()
        .filter_map(|detail| detail["retryDelay"].as_str())
        .find_map(|raw| raw.trim().strip_suffix('s')?.parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

/// Concatenate the text parts of the first candidate.
fn candidate_text(response: &Value) -> Option<String> {
    let parts = response["candidates"][0]["content"]["parts"].as_array()?;
    let text: String = parts.iter().filter_map(|p| p["text"].as_str()).collect();
    if text.is_empty() { None } else { Some(text) }
}

fn bare_model(model: &str) -> &str {
    model.strip_prefix("models/").unwrap_or(model)
}

fn job_state_field(body: &Value) -> Option<&str> {
    body["metadata"]["state"]
        .as_str()
        .or_else(|| body["state"].as_str())
}

fn responses_file(body: &Value) -> Option<&str> {
    body["metadata"]["output"]["responsesFile"]
        .as_str()
        .or_else(|| body["response"]["responsesFile"].as_str())
        .or_else(|| body["output"]["responsesFile"].as_str())
}

/// Map `BATCH_STATE_*` / `JOB_STATE_*` names onto [`BatchJobState`].
pub fn parse_job_state(raw: &str) -> Option<BatchJobState> {
    let name = raw
        .strip_prefix("BATCH_STATE_")
        .or_else(|| raw.strip_prefix("JOB_STATE_"))
        .unwrap_or(raw);

    match name {
        "PENDING" | "QUEUED" | "UNSPECIFIED" => Some(BatchJobState::Submitted),
        "RUNNING" => Some(BatchJobState::Running),
        "SUCCEEDED" => Some(BatchJobState::Succeeded),
        "FAILED" => Some(BatchJobState::Failed),
        "CANCELLED" | "CANCELLING" => Some(BatchJobState::Cancelled),
        "EXPIRED" => Some(BatchJobState::Expired),
        _ => None,
    }
}

/// Decode a downloaded results file, one keyed response per line.
///
/// Lines without a key cannot be attributed to a chunk and are skipped.
pub fn parse_results_file(text: &str) -> Vec<BatchResultLine> {
    let mut lines = Vec::new();

    for (number, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!(line = number + 1, error = %e, "skipping undecodable result line");
                continue;
            }
        };
        let Some(key) = value["key"].as_str() else {
            warn!(line = number + 1, "skipping result line without key");
            continue;
        };

        let outcome = if let Some(message) = value["error"]["message"].as_str() {
            Err(message.to_string())
        } else if value.get("error").is_some_and(|e| !e.is_null()) {
            Err(value["error"].to_string())
        } else {
            candidate_text(&value["response"]).ok_or_else(|| "response carried no text".to_string())
        };

        lines.push(BatchResultLine {
            key: key.to_string(),
            outcome,
        });
    }

    lines
}
