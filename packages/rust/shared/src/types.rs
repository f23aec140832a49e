//! Core domain types for PostScout enrichment runs.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Prefix placed before every chunk after the first when sent to the API.
pub const CONTINUATION_MARKER: &str = "[Continued from previous section]";

/// Minimum trimmed content length for a post to be worth enriching.
const MIN_ENRICHABLE_CHARS: usize = 10;

// ---------------------------------------------------------------------------
// Post
// ---------------------------------------------------------------------------

/// Enrichment lifecycle of a single post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    /// Never attempted (or attempted by a run that has not finished yet).
    #[default]
    Pending,
    /// Every chunk produced a parseable result.
    Completed,
    /// At least one chunk failed; placeholder values are retained.
    Failed,
}

impl EnrichmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Buyer-journey phase a piece of content targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunnelStage {
    /// Awareness (TOFU).
    Top,
    /// Consideration (MOFU).
    Middle,
    /// Decision (BOFU).
    Bottom,
}

impl FunnelStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Top => "top",
            Self::Middle => "middle",
            Self::Bottom => "bottom",
        }
    }
}

impl std::fmt::Display for FunnelStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FunnelStage {
    type Err = String;

    /// Accepts the many spellings models use: `TOFU`, `Top of Funnel`,
    /// `top-of-funnel`, `awareness`, ...
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
            .collect();
        let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");

        match normalized.as_str() {
            "top" | "tofu" | "top of funnel" | "top of the funnel" | "awareness" => Ok(Self::Top),
            "middle" | "mofu" | "middle of funnel" | "middle of the funnel" | "consideration" => {
                Ok(Self::Middle)
            }
            "bottom" | "bofu" | "bottom of funnel" | "bottom of the funnel" | "decision"
            | "conversion" => Ok(Self::Bottom),
            _ => Err(format!("unrecognized funnel stage: {s}")),
        }
    }
}

/// Strategic breakdown of a competitor post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategicAnalysis {
    #[serde(default)]
    pub content_angle: String,
    #[serde(default)]
    pub competitive_differentiation: String,
    #[serde(default)]
    pub content_freshness_score: String,
    #[serde(default)]
    pub target_persona_indicators: String,
    #[serde(default)]
    pub content_depth: String,
}

/// How a post's content was prepared for the API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentProcessing {
    /// Raw content length in characters.
    pub original_length: usize,
    /// Length after normalization.
    pub processed_length: usize,
    /// Number of chunks sent (1 = not chunked).
    pub chunk_count: usize,
}

/// One scraped article plus its enrichment fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Post {
    /// Canonical post URL; doubles as the post identifier.
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_date: Option<NaiveDate>,
    /// Raw scraped text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funnel_stage: Option<FunnelStage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_audience: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategic_analysis: Option<StrategicAnalysis>,

    #[serde(default)]
    pub status: EnrichmentStatus,
    /// Last enrichment failure, cleared on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment_error: Option<String>,
    /// Set when any field was recovered from malformed model output.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub low_confidence: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_processing: Option<ContentProcessing>,
}

impl Post {
    /// Create an unenriched post.
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// Whether the post carries enough text to be sent to the API.
    pub fn has_enrichable_content(&self) -> bool {
        self.content
            .as_deref()
            .is_some_and(|c| c.trim().chars().count() > MIN_ENRICHABLE_CHARS)
    }

    /// Whether a run should (re-)enrich this post.
    ///
    /// Failed and never-attempted posts are treated the same.
    pub fn needs_enrichment(&self) -> bool {
        if !self.has_enrichable_content() {
            return false;
        }
        self.status != EnrichmentStatus::Completed
            || self.summary.as_deref().is_none_or(|s| s.trim().is_empty())
            || self.keywords.is_empty()
            || self.funnel_stage.is_none()
    }

    /// Record a failure without touching existing enrichment fields.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = EnrichmentStatus::Failed;
        self.enrichment_error = Some(reason.into());
    }

    /// Overwrite enrichment fields with a merged result and mark completed.
    pub fn apply(&mut self, result: EnrichmentResult) {
        self.summary = Some(result.summary);
        self.keywords = result.keywords;
        self.funnel_stage = result.funnel_stage;
        self.target_audience = result.target_audience;
        self.strategic_analysis = result.strategic_analysis;
        self.low_confidence = result.recovered;
        self.status = EnrichmentStatus::Completed;
        self.enrichment_error = None;
    }
}

/// Sort posts newest first; undated posts keep their relative order at the end.
pub fn sort_newest_first(posts: &mut [Post]) {
    posts.sort_by(|a, b| match (a.publication_date, b.publication_date) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}

// ---------------------------------------------------------------------------
// Chunks and results
// ---------------------------------------------------------------------------

/// A length-bounded slice of a post's normalized text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentChunk {
    /// Stable key: `post-{index}` or `post-{index}-chunk-{n}`.
    pub key: String,
    /// Index of the owning post within the run.
    pub post_index: usize,
    /// Zero-based position within the post.
    pub sequence: usize,
    /// Number of chunks the post was split into.
    pub total: usize,
    /// Leading characters of `body` copied from the previous chunk.
    pub overlap_chars: usize,
    /// Un-prefixed chunk text (overlap included).
    pub body: String,
}

impl ContentChunk {
    /// Text as sent to the API: continuation marker + body for later chunks.
    pub fn api_text(&self) -> String {
        if self.sequence == 0 {
            self.body.clone()
        } else {
            format!("{CONTINUATION_MARKER} {}", self.body)
        }
    }
}

/// Build the stable key for a chunk.
pub fn chunk_key(post_index: usize, sequence: usize, total: usize) -> String {
    if total <= 1 {
        format!("post-{post_index}")
    } else {
        format!("post-{post_index}-chunk-{}", sequence + 1)
    }
}

/// Decoded API output for one chunk key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub summary: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub funnel_stage: Option<FunnelStage>,
    #[serde(default)]
    pub target_audience: Option<String>,
    #[serde(default)]
    pub strategic_analysis: Option<StrategicAnalysis>,
    /// True when the payload only parsed via the embedded-JSON fallback.
    #[serde(default)]
    pub recovered: bool,
}

// ---------------------------------------------------------------------------
// Bulk jobs
// ---------------------------------------------------------------------------

/// Remote state of a bulk job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchJobState {
    Submitted,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Expired,
}

impl BatchJobState {
    /// Whether the job will not change state again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Submitted | Self::Running)
    }

    /// Whether the job ended without usable results.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled | Self::Expired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for BatchJobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable registry entry mirroring one submitted bulk job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingJobRecord {
    pub job_id: String,
    /// Competitor (or other grouping) the job belongs to.
    pub scope: String,
    /// Chunk-source file holding the submitted posts and their chunk keys.
    pub source_file: PathBuf,
    pub created_at: DateTime<Utc>,
    pub model: String,
    pub post_count: usize,
    pub chunk_count: usize,
}

// ---------------------------------------------------------------------------
// RunSummary
// ---------------------------------------------------------------------------

/// Per-item outcome counts for a finished run or consolidation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
}

impl RunSummary {
    pub fn from_posts(posts: &[Post]) -> Self {
        posts.iter().fold(
            Self {
                total: posts.len(),
                ..Default::default()
            },
            |mut acc, post| {
                match post.status {
                    EnrichmentStatus::Completed => acc.completed += 1,
                    EnrichmentStatus::Failed => acc.failed += 1,
                    EnrichmentStatus::Pending => acc.pending += 1,
                }
                acc
            },
        )
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} posts: {} completed, {} failed, {} pending",
            self.total, self.completed, self.failed, self.pending
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn funnel_stage_parses_common_spellings() {
        assert_eq!("TOFU".parse::<FunnelStage>(), Ok(FunnelStage::Top));
        assert_eq!("Top of Funnel".parse::<FunnelStage>(), Ok(FunnelStage::Top));
        assert_eq!("middle-of-the-funnel".parse::<FunnelStage>(), Ok(FunnelStage::Middle));
        assert_eq!("BOFU".parse::<FunnelStage>(), Ok(FunnelStage::Bottom));
        assert!("sideways".parse::<FunnelStage>().is_err());
    }

    #[test]
    fn job_state_classes() {
        use BatchJobState::*;
        for state in [Submitted, Running] {
            assert!(!state.is_terminal() && !state.is_failure());
        }
        assert!(Succeeded.is_terminal() && !Succeeded.is_failure());
        for state in [Failed, Cancelled, Expired] {
            assert!(state.is_terminal() && state.is_failure());
        }
    }

    #[test]
    fn chunk_keys() {
        assert_eq!(chunk_key(3, 0, 1), "post-3");
        assert_eq!(chunk_key(3, 0, 2), "post-3-chunk-1");
        assert_eq!(chunk_key(3, 1, 2), "post-3-chunk-2");
    }

    #[test]
    fn api_text_prefixes_later_chunks() {
        let mut chunk = ContentChunk {
            key: "post-0-chunk-1".into(),
            post_index: 0,
            sequence: 0,
            total: 2,
            overlap_chars: 0,
            body: "First.".into(),
        };
        assert_eq!(chunk.api_text(), "First.");

        chunk.sequence = 1;
        assert!(chunk.api_text().starts_with(CONTINUATION_MARKER));
        assert!(chunk.api_text().ends_with("First."));
    }

    #[test]
    fn needs_enrichment_rules() {
        let mut post = Post::new("https://a.example/p", "P", "Plenty of words in this post body.");
        assert!(post.needs_enrichment());

        post.status = EnrichmentStatus::Failed;
        assert!(post.needs_enrichment());

        post.apply(EnrichmentResult {
            summary: "S".into(),
            keywords: vec!["k".into()],
            funnel_stage: Some(FunnelStage::Top),
            ..Default::default()
        });
        assert!(!post.needs_enrichment());

        let empty = Post::new("https://a.example/q", "Q", "   short   ");
        assert!(!empty.needs_enrichment());
    }

    #[test]
    fn mark_failed_keeps_placeholders() {
        let mut post = Post::new("https://a.example/p", "P", "content content content");
        post.summary = Some("old".into());
        post.mark_failed("boom");
        assert_eq!(post.status, EnrichmentStatus::Failed);
        assert_eq!(post.summary.as_deref(), Some("old"));
        assert_eq!(post.enrichment_error.as_deref(), Some("boom"));
    }

    #[test]
    fn newest_first_puts_undated_last() {
        let mut a = Post::new("a", "a", "x");
        a.publication_date = NaiveDate::from_ymd_opt(2024, 1, 1);
        let mut b = Post::new("b", "b", "x");
        b.publication_date = NaiveDate::from_ymd_opt(2025, 6, 1);
        let c = Post::new("c", "c", "x");

        let mut posts = vec![c, a, b];
        sort_newest_first(&mut posts);
        let urls: Vec<&str> = posts.iter().map(|p| p.url.as_str()).collect();
        assert_eq!(urls, ["b", "a", "c"]);
    }

    #[test]
    fn summary_counts_statuses() {
        let mut done = Post::new("a", "a", "x");
        done.status = EnrichmentStatus::Completed;
        let mut failed = Post::new("b", "b", "x");
        failed.status = EnrichmentStatus::Failed;
        let pending = Post::new("c", "c", "x");

        let summary = RunSummary::from_posts(&[done, failed, pending]);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.pending, 1);
    }

    #[test]
    fn post_fixture_validates() {
        let fixture = std::fs::read_to_string("../../../fixtures/json/posts.fixture.json")
            .expect("read fixture");
        let posts: Vec<Post> = serde_json::from_str(&fixture).expect("deserialize fixture posts");
        assert_eq!(posts.len(), 3);
        assert_eq!(posts[0].status, EnrichmentStatus::Completed);
        assert_eq!(posts[1].status, EnrichmentStatus::Failed);
        assert_eq!(posts[2].status, EnrichmentStatus::Pending);
        assert!(!posts[0].needs_enrichment());
        assert!(posts[1].needs_enrichment());
    }
}
