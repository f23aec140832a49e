//! Normalization passes applied to raw scraped text before chunking.
//!
//! Each pass is a function `&str -> String` applied in sequence, so the
//! output is deterministic for a given input.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full normalization pipeline on raw scraped text.
pub(crate) fn run_pipeline(raw: &str) -> String {
    let mut result = replace_typography(raw);

    result = strip_leftover_tags(&result);
    result = replace_entities(&result);
    result = drop_control_chars(&result);
    result = collapse_whitespace(&result);

    result
}

// ---------------------------------------------------------------------------
// Pass 1: Typographic characters
// ---------------------------------------------------------------------------

/// Map curly quotes, dashes, ellipses, and odd spaces to ASCII.
fn replace_typography(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{2032}' => out.push('\''),
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{2033}' => out.push('"'),
            '\u{2014}' => out.push_str(" - "),
            '\u{2013}' | '\u{2012}' | '\u{2212}' => out.push('-'),
            '\u{2026}' => out.push_str("..."),
            '\u{00A0}' | '\u{2009}' | '\u{202F}' => out.push(' '),
            '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}' => {}
            _ => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Pass 2: Residual markup
// ---------------------------------------------------------------------------

/// Remove HTML tags that survived extraction, keeping their text.
fn strip_leftover_tags(text: &str) -> String {
    static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"</?[a-zA-Z][a-zA-Z0-9-]*(?:\s[^<>]*)?/?>").expect("valid regex")
    });

    TAG_RE.replace_all(text, " ").to_string()
}

/// Decode the handful of entities that carry meaning; blank out the rest.
fn replace_entities(text: &str) -> String {
    static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"&(?:[a-zA-Z][a-zA-Z0-9]*|#[0-9]+|#x[0-9a-fA-F]+);").expect("valid regex")
    });

    ENTITY_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            match &caps[0] {
                "&amp;" => "&",
                "&quot;" => "\"",
                "&apos;" | "&#39;" | "&rsquo;" | "&lsquo;" => "'",
                "&ldquo;" | "&rdquo;" => "\"",
                "&mdash;" => " - ",
                "&ndash;" => "-",
                "&hellip;" => "...",
                _ => " ",
            }
            .to_string()
        })
        .to_string()
}

// ---------------------------------------------------------------------------
// Pass 3: Whitespace and control characters
// ---------------------------------------------------------------------------

/// Replace non-printable characters with a space.
fn drop_control_chars(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

/// Collapse runs of whitespace to a single space and trim the ends.
fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typography_becomes_ascii() {
        let raw = "\u{201C}Hello\u{201D} \u{2018}world\u{2019}\u{2014}it\u{2019}s 9\u{2013}5\u{2026}";
        assert_eq!(run_pipeline(raw), "\"Hello\" 'world' - it's 9-5...");
    }

    #[test]
    fn zero_width_and_nbsp() {
        assert_eq!(run_pipeline("a\u{200B}b\u{00A0}c"), "ab c");
    }

    #[test]
    fn entities_decoded_or_removed() {
        assert_eq!(run_pipeline("Fish &amp; chips&nbsp;today&#8203;!"), "Fish & chips today !");
    }

    #[test]
    fn leftover_tags_stripped() {
        assert_eq!(
            run_pipeline("Read <a href=\"/x\">the guide</a><br/>now."),
            "Read the guide now."
        );
        // Comparisons are not tags
        assert_eq!(run_pipeline("if a < b and b > c"), "if a < b and b > c");
    }

    #[test]
    fn whitespace_collapsed() {
        assert_eq!(run_pipeline("  one\n\n two\t\tthree  "), "one two three");
    }

    #[test]
    fn control_chars_removed() {
        assert_eq!(run_pipeline("bell\u{0007}here"), "bell here");
    }

    #[test]
    fn entities_decode_one_level() {
        assert_eq!(run_pipeline("R&amp;amp;D"), "R&amp;D");
        assert_eq!(run_pipeline("R&amp;D"), "R&D");
    }

    #[test]
    fn plain_output_is_stable() {
        let raw = "\u{201C}Quoted\u{201D} &amp; <b>bold</b>\u{2026}   done.";
        let once = run_pipeline(raw);
        assert_eq!(run_pipeline(&once), once);
    }
}
