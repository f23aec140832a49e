//! Text normalization and chunking ahead of enrichment.
//!
//! [`ContentPreprocessor`] turns a post's raw scraped text into normalized
//! text and an ordered list of [`ContentChunk`]s that fit the model's input
//! limit. Short posts yield a single chunk keyed `post-{index}`.

mod chunker;
mod normalize;

pub use chunker::{ChunkIter, ChunkSpan, NormalizedText};

use tracing::debug;

use postscout_shared::{
    chunk_key, ContentChunk, ContentProcessing, PostScoutError, PreprocessConfig, Result,
};

/// Output of [`ContentPreprocessor::prepare`] for one post.
#[derive(Debug, Clone)]
pub struct PreparedContent {
    /// Normalized text.
    pub text: String,
    /// Chunks in order; never empty.
    pub chunks: Vec<ContentChunk>,
    pub processing: ContentProcessing,
}

/// Normalizes and splits post content.
#[derive(Debug, Clone)]
pub struct ContentPreprocessor {
    config: PreprocessConfig,
}

impl ContentPreprocessor {
    /// Create a preprocessor, rejecting limits that cannot make progress.
    pub fn new(config: PreprocessConfig) -> Result<Self> {
        if config.max_chunk_chars == 0 {
            return Err(PostScoutError::chunking("max_chunk_chars must be greater than zero"));
        }
        if config.overlap_chars >= config.max_chunk_chars {
            return Err(PostScoutError::chunking(format!(
                "overlap_chars ({}) must be smaller than max_chunk_chars ({})",
                config.overlap_chars, config.max_chunk_chars
            )));
        }
        if config.max_chunks_per_post == 0 {
            return Err(PostScoutError::chunking("max_chunks_per_post must be greater than zero"));
        }
        Ok(Self { config })
    }

    /// Normalize raw text. Deterministic; entities are decoded one level only,
    /// so `&amp;amp;` becomes `&amp;`.
    pub fn normalize(&self, raw: &str) -> String {
        normalize::run_pipeline(raw)
    }

    /// Lazily split already-normalized text using the configured limits.
    pub fn split<'a>(&self, text: &'a NormalizedText) -> ChunkIter<'a> {
        text.chunks(self.config.max_chunk_chars, self.config.overlap_chars)
    }

    /// Normalize and chunk the content of the post at `post_index`.
    pub fn prepare(&self, post_index: usize, raw: &str) -> Result<PreparedContent> {
        let text = self.normalize(raw);
        let normalized = NormalizedText::new(&text);
        if normalized.is_empty() {
            return Err(PostScoutError::chunking(format!(
                "post {post_index} has no content after normalization"
            )));
        }

        // Count first so an oversized post fails before any chunk is built.
        let total = self.split(&normalized).count();
        if total > self.config.max_chunks_per_post {
            return Err(PostScoutError::chunking(format!(
                "post {post_index} needs {total} chunks, limit is {}",
                self.config.max_chunks_per_post
            )));
        }

        let chunks: Vec<ContentChunk> = self
            .split(&normalized)
            .map(|span| ContentChunk {
                key: chunk_key(post_index, span.sequence, total),
                post_index,
                sequence: span.sequence,
                total,
                overlap_chars: span.overlap_chars,
                body: span.body,
            })
            .collect();

        let processing = ContentProcessing {
            original_length: raw.chars().count(),
            processed_length: normalized.len(),
            chunk_count: total,
        };

        debug!(
            post_index,
            original = processing.original_length,
            processed = processing.processed_length,
            chunks = total,
            "prepared content"
        );

        Ok(PreparedContent {
            text,
            chunks,
            processing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postscout_shared::CONTINUATION_MARKER;

    fn config(max: usize, overlap: usize, max_chunks: usize) -> PreprocessConfig {
        PreprocessConfig {
            max_chunk_chars: max,
            overlap_chars: overlap,
            max_chunks_per_post: max_chunks,
        }
    }

    fn long_text() -> String {
        vec!["Headless platforms decouple content from presentation layers."; 300].join(" ")
    }

    #[test]
    fn rejects_overlap_not_smaller_than_max() {
        let err = ContentPreprocessor::new(config(100, 100, 5)).unwrap_err();
        assert!(matches!(err, PostScoutError::Chunking { .. }));
        assert!(ContentPreprocessor::new(config(0, 0, 5)).is_err());
        assert!(ContentPreprocessor::new(config(100, 10, 0)).is_err());
    }

    #[test]
    fn short_post_gets_plain_key() {
        let pre = ContentPreprocessor::new(PreprocessConfig::default()).unwrap();
        let prepared = pre.prepare(4, "  A \u{201C}short\u{201D} post.  ").unwrap();
        assert_eq!(prepared.text, "A \"short\" post.");
        assert_eq!(prepared.chunks.len(), 1);
        assert_eq!(prepared.chunks[0].key, "post-4");
        assert_eq!(prepared.chunks[0].api_text(), "A \"short\" post.");
        assert_eq!(prepared.processing.chunk_count, 1);
        assert_eq!(prepared.processing.processed_length, 15);
    }

    #[test]
    fn long_post_gets_chunk_keys_and_markers() {
        let pre = ContentPreprocessor::new(PreprocessConfig::default()).unwrap();
        let prepared = pre.prepare(1, &long_text()).unwrap();
        let total = prepared.chunks.len();
        assert!(total > 1);

        for (i, chunk) in prepared.chunks.iter().enumerate() {
            assert_eq!(chunk.key, format!("post-1-chunk-{}", i + 1));
            assert_eq!(chunk.total, total);
            let fresh: String = chunk.body.chars().skip(chunk.overlap_chars).collect();
            assert!(fresh.trim_start().chars().count() <= 6_000);
            assert_eq!(chunk.overlap_chars, if i == 0 { 0 } else { 200 });
            assert_eq!(chunk.api_text().starts_with(CONTINUATION_MARKER), i > 0);
        }
    }

    #[test]
    fn too_many_chunks_is_an_error() {
        let pre = ContentPreprocessor::new(config(500, 50, 3)).unwrap();
        let err = pre.prepare(0, &long_text()).unwrap_err();
        assert!(err.to_string().contains("limit is 3"));
    }

    #[test]
    fn empty_after_normalization_is_an_error() {
        let pre = ContentPreprocessor::new(PreprocessConfig::default()).unwrap();
        assert!(pre.prepare(0, " \u{200B}\n\t ").is_err());
    }
}
