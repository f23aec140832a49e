//! Sentence-aware splitting of normalized text into overlapping chunks.
//!
//! Chunks are produced lazily by [`ChunkIter`]. Each body after the first
//! is a contiguous slice of the text that starts with the tail of the
//! previous body, so the overlap is exact rather than re-joined. The overlap
//! is never traded away to fit a sentence: the length limit applies to the
//! fresh text only.

/// Normalized text held as characters so limits are measured in chars, not bytes.
#[derive(Debug, Clone)]
pub struct NormalizedText {
    chars: Vec<char>,
}

impl NormalizedText {
    pub(crate) fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
        }
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Iterate over chunk spans. Calling this again restarts from the beginning.
    pub fn chunks(&self, max_chars: usize, overlap_chars: usize) -> ChunkIter<'_> {
        ChunkIter {
            chars: &self.chars,
            max_chars,
            overlap_chars,
            sequence: 0,
            next_start: 0,
            prev: None,
        }
    }
}

impl std::fmt::Display for NormalizedText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for c in &self.chars {
            std::fmt::Write::write_char(f, *c)?;
        }
        Ok(())
    }
}

/// One chunk produced by [`ChunkIter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    /// Zero-based position within the text.
    pub sequence: usize,
    /// Leading characters of `body` repeated from the previous chunk.
    pub overlap_chars: usize,
    pub body: String,
}

/// Lazy iterator over [`ChunkSpan`]s.
#[derive(Debug, Clone)]
pub struct ChunkIter<'a> {
    chars: &'a [char],
    max_chars: usize,
    overlap_chars: usize,
    sequence: usize,
    /// Start of the text not yet covered by any chunk.
    next_start: usize,
    /// `(body_start, body_end)` of the previous chunk.
    prev: Option<(usize, usize)>,
}

impl ChunkIter<'_> {
    /// Index just past the last sentence terminator in `(from, to]`.
    fn last_sentence_end(&self, from: usize, to: usize) -> Option<usize> {
        (from + 1..=to).rev().find(|&end| is_sentence_end(self.chars, end))
    }

    /// Pick the body start and end for the segment beginning at `seg_start`.
    ///
    /// `max_chars` bounds the fresh text from `seg_start`; the overlap taken
    /// from the previous body sits on top of it, so a body holds at most
    /// `overlap_chars + max_chars` characters.
    fn cut(&self, seg_start: usize) -> (usize, usize) {
        let len = self.chars.len();
        let body_start = match self.prev {
            Some((prev_start, prev_end)) => {
                prev_end.saturating_sub(self.overlap_chars).max(prev_start)
            }
            None => seg_start,
        };

        let limit = seg_start + self.max_chars;
        if limit >= len {
            return (body_start, len);
        }
        match self.last_sentence_end(seg_start, limit) {
            Some(end) => (body_start, end),
            None => (body_start, limit),
        }
    }
}

impl Iterator for ChunkIter<'_> {
    type Item = ChunkSpan;

    fn next(&mut self) -> Option<Self::Item> {
        let len = self.chars.len();
        if self.next_start >= len || self.max_chars == 0 {
            return None;
        }

        let (body_start, body_end) = self.cut(self.next_start);
        let overlap = self
            .prev
            .map(|(_, prev_end)| prev_end.saturating_sub(body_start))
            .unwrap_or(0);

        let body: String = self.chars[body_start..body_end].iter().collect();
        let span = ChunkSpan {
            sequence: self.sequence,
            overlap_chars: overlap,
            body,
        };

        let mut next = body_end;
        while next < len && self.chars[next].is_whitespace() {
            next += 1;
        }
        self.next_start = next;
        self.prev = Some((body_start, body_end));
        self.sequence += 1;

        Some(span)
    }
}

/// Whether a sentence ends right before `end` (exclusive index).
///
/// A terminator is `.`, `!` or `?`, optionally followed by a closing quote or
/// bracket, and must be followed by whitespace or the end of text.
fn is_sentence_end(chars: &[char], end: usize) -> bool {
    if end == 0 || end > chars.len() {
        return false;
    }
    if end < chars.len() && !chars[end].is_whitespace() {
        return false;
    }

    let last = chars[end - 1];
    if matches!(last, '.' | '!' | '?') {
        return true;
    }
    matches!(last, '"' | '\'' | ')' | ']') && end >= 2 && matches!(chars[end - 2], '.' | '!' | '?')
}
