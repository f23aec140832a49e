//! Decoding model output into [`EnrichmentResult`]s.
//!
//! A strict JSON parse is tried first. If that fails, the outermost
//! `{ ... }` span in the text is parsed instead and the result is flagged
//! as recovered.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use postscout_shared::{EnrichmentResult, FunnelStage, PostScoutError, Result, StrategicAnalysis};

/// Shape the prompt asks the model to return. Every field is optional here so
/// that validation can report what is missing.
#[derive(Debug, Deserialize)]
struct RawEnrichment {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default, alias = "keywords")]
    seo_keywords: Option<KeywordField>,
    #[serde(default)]
    funnel_stage: Option<String>,
    #[serde(default)]
    target_audience: Option<String>,
    #[serde(default)]
    strategic_analysis: Option<Value>,
}

/// Keywords arrive either as a list or as one comma-separated string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum KeywordField {
    List(Vec<String>),
    Text(String),
}

/// Decode one chunk's model output.
pub fn parse_enrichment(text: &str) -> Result<EnrichmentResult> {
    let stripped = strip_code_blocks(text);

    match serde_json::from_str::<RawEnrichment>(stripped) {
        Ok(raw) => into_result(raw, false),
        Err(strict_err) => {
            static OBJECT_RE: LazyLock<Regex> =
                LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));

            let Some(found) = OBJECT_RE.find(text) else {
                return Err(PostScoutError::ResultParse(format!(
                    "no JSON object in model output: {strict_err}"
                )));
            };

            let raw: RawEnrichment = serde_json::from_str(found.as_str()).map_err(|e| {
                PostScoutError::ResultParse(format!("embedded JSON is not decodable: {e}"))
            })?;
            debug!("recovered enrichment from embedded JSON");
            into_result(raw, true)
        }
    }
}

/// Remove a surrounding Markdown code fence, if any.
fn strip_code_blocks(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

fn into_result(raw: RawEnrichment, recovered: bool) -> Result<EnrichmentResult> {
    let summary = raw
        .summary
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("n/a"))
        .ok_or_else(|| PostScoutError::ResultParse("result has no summary".into()))?;

    let keywords = match raw.seo_keywords {
        Some(KeywordField::List(list)) => list,
        Some(KeywordField::Text(text)) => text.split(',').map(str::to_string).collect(),
        None => Vec::new(),
    };
    let keywords: Vec<String> = keywords
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();

    let funnel_stage = raw.funnel_stage.as_deref().and_then(|s| {
        s.parse::<FunnelStage>()
            .map_err(|e| debug!(error = %e, "ignoring funnel stage"))
            .ok()
    });

    let target_audience = raw
        .target_audience
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    Ok(EnrichmentResult {
        summary,
        keywords,
        funnel_stage,
        target_audience,
        strategic_analysis: raw.strategic_analysis.as_ref().and_then(strategic_from_value),
        recovered,
    })
}

/// Read the analysis block, accepting numbers or booleans where text is expected.
fn strategic_from_value(value: &Value) -> Option<StrategicAnalysis> {
    let field = |name: &str| -> String {
        match &value[name] {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => String::new(),
        }
    };

    let analysis = StrategicAnalysis {
        content_angle: field("content_angle"),
        competitive_differentiation: field("competitive_differentiation"),
        content_freshness_score: field("content_freshness_score"),
        target_persona_indicators: field("target_persona_indicators"),
        content_depth: field("content_depth"),
    };

    (analysis != StrategicAnalysis::default()).then_some(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_json() {
        let result = parse_enrichment(
            r#"{"summary":"A guide.","seo_keywords":["cms","headless"],"funnel_stage":"TOFU"}"#,
        )
        .unwrap();
        assert_eq!(result.summary, "A guide.");
        assert_eq!(result.keywords, ["cms", "headless"]);
        assert_eq!(result.funnel_stage, Some(FunnelStage::Top));
        assert!(!result.recovered);
    }

    #[test]
    fn fenced_json_is_still_strict() {
        let text = "```json\n{\"summary\":\"S\",\"keywords\":\"a, b ,c\"}\n```";
        let result = parse_enrichment(text).unwrap();
        assert_eq!(result.keywords, ["a", "b", "c"]);
        assert!(!result.recovered);
    }

    #[test]
    fn embedded_json_is_recovered() {
        let text = "Here you go:\n{\"summary\":\"Recovered.\",\"seo_keywords\":[\"x\"]}\nThanks!";
        let result = parse_enrichment(text).unwrap();
        assert_eq!(result.summary, "Recovered.");
        assert!(result.recovered);
    }

    #[test]
    fn missing_summary_is_a_parse_error() {
        let err = parse_enrichment(r#"{"seo_keywords":["x"]}"#).unwrap_err();
        assert!(matches!(err, PostScoutError::ResultParse(_)));

        assert!(parse_enrichment(r#"{"summary":"N/A"}"#).is_err());
    }

    #[test]
    fn prose_without_json_fails() {
        let err = parse_enrichment("I could not analyse this post.").unwrap_err();
        assert!(err.to_string().contains("no JSON object"));
    }

    #[test]
    fn strategic_block_accepts_mixed_types() {
        let text = r#"{
            "summary": "S",
            "target_audience": "  IT directors ",
            "strategic_analysis": {
                "content_angle": "How-to",
                "content_freshness_score": 8,
                "content_depth": "deep"
            }
        }"#;
        let result = parse_enrichment(text).unwrap();
        assert_eq!(result.target_audience.as_deref(), Some("IT directors"));
        let analysis = result.strategic_analysis.unwrap();
        assert_eq!(analysis.content_angle, "How-to");
        assert_eq!(analysis.content_freshness_score, "8");
        assert_eq!(analysis.competitive_differentiation, "");
    }

    #[test]
    fn unknown_funnel_stage_is_dropped() {
        let result = parse_enrichment(r#"{"summary":"S","funnel_stage":"sideways"}"#).unwrap();
        assert_eq!(result.funnel_stage, None);
    }
}
