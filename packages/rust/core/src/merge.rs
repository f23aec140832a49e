//! Reassembly of per-chunk results into one record per post.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use postscout_shared::{EnrichmentResult, Post, PostScoutError, Result};

/// Outcome of one chunk key: a decoded result or the reason it has none.
pub type ChunkOutcome = std::result::Result<EnrichmentResult, String>;

/// Merges chunk results and applies them to posts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultMerger;

impl ResultMerger {
    /// Combine the results of one post's chunks, given in chunk order.
    ///
    /// A single result is returned unchanged.
    pub fn merge(post: &str, results: &[EnrichmentResult]) -> Result<EnrichmentResult> {
        match results {
            [] => Err(PostScoutError::Merge {
                post: post.to_string(),
                message: "no chunk results".into(),
            }),
            [single] => Ok(single.clone()),
            many => Ok(merge_many(many)),
        }
    }

    /// Apply the outcomes for `keys` to `post`.
    ///
    /// The post is completed only when every key has a decoded result;
    /// otherwise it is marked failed and keeps its previous field values.
    /// Returns whether the post completed.
    pub fn consolidate(
        post: &mut Post,
        keys: &[String],
        outcomes: &HashMap<String, ChunkOutcome>,
    ) -> bool {
        let mut results = Vec::with_capacity(keys.len());
        let mut problems = Vec::new();

        for key in keys {
            match outcomes.get(key) {
                Some(Ok(result)) => results.push(result.clone()),
                Some(Err(reason)) => problems.push(format!("{key}: {reason}")),
                None => problems.push(format!("{key}: no result")),
            }
        }

        if !problems.is_empty() {
            let err = PostScoutError::Enrichment {
                post: post.url.clone(),
                message: problems.join("; "),
            };
            warn!(
                post = %post.url,
                failed = problems.len(),
                chunks = keys.len(),
                "post not enriched"
            );
            post.mark_failed(err.to_string());
            return false;
        }

        match Self::merge(&post.url, &results) {
            Ok(merged) => {
                debug!(post = %post.url, chunks = keys.len(), "post enriched");
                post.apply(merged);
                true
            }
            Err(e) => {
                post.mark_failed(e.to_string());
                false
            }
        }
    }
}

fn merge_many(results: &[EnrichmentResult]) -> EnrichmentResult {
    let summary = results
        .iter()
        .map(|r| r.summary.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    let mut seen = HashSet::new();
    let keywords = results
        .iter()
        .flat_map(|r| r.keywords.iter())
        .filter(|k| seen.insert(k.to_lowercase()))
        .cloned()
        .collect();

    EnrichmentResult {
        summary,
        keywords,
        funnel_stage: majority(results.iter().filter_map(|r| r.funnel_stage)),
        target_audience: majority(results.iter().filter_map(|r| r.target_audience.clone())),
        strategic_analysis: results.iter().find_map(|r| r.strategic_analysis.clone()),
        recovered: results.iter().any(|r| r.recovered),
    }
}

/// Most frequent value; ties go to the value seen first.
fn majority<T: PartialEq>(values: impl Iterator<Item = T>) -> Option<T> {
    let mut tally: Vec<(T, usize)> = Vec::new();
    for value in values {
        match tally.iter_mut().find(|(v, _)| *v == value) {
            Some((_, count)) => *count += 1,
            None => tally.push((value, 1)),
        }
    }

    // `tally` is in first-seen order, so keep the earliest on equal counts.
    let mut best: Option<(T, usize)> = None;
    for (value, count) in tally {
        if best.as_ref().is_none_or(|(_, top)| count > *top) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value)
}
