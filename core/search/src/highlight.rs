//! Highlight spans of query occurrences in verse text.
//!
//! Spans are half-open byte ranges into the original text and always fall
//! on character boundaries.

use crate::query::normalize;

/// Lowercased text with, per byte, the original character it came from.
struct Folded {
    text: String,
    starts: Vec<usize>,
    ends: Vec<usize>,
}

fn fold(original: &str) -> Folded {
    let mut folded = Folded {
        text: String::with_capacity(original.len()),
        starts: Vec::with_capacity(original.len()),
        ends: Vec::with_capacity(original.len()),
    };

    for (offset, ch) in original.char_indices() {
        let end = offset + ch.len_utf8();
        for lower in ch.to_lowercase() {
            let lower = if lower == 'ς' { 'σ' } else { lower };
            let mut buf = [0u8; 4];
            let encoded = lower.encode_utf8(&mut buf);
            folded.text.push_str(encoded);
            for _ in 0..encoded.len() {
                folded.starts.push(offset);
                folded.ends.push(end);
            }
        }
    }

    folded
}

/// Non-overlapping occurrences of `needle` in `text`, in order.
///
/// Matching is case-insensitive unless `case_sensitive` is set.
pub fn highlight_spans(text: &str, needle: &str, case_sensitive: bool) -> Vec<(usize, usize)> {
    if needle.is_empty() {
        return Vec::new();
    }

    if case_sensitive {
        return text
            .match_indices(needle)
            .map(|(start, m)| (start, start + m.len()))
            .collect();
    }

    let folded = fold(text);
    let needle = normalize(needle, false);
    let mut spans: Vec<(usize, usize)> = Vec::new();

    for (start, m) in folded.text.match_indices(needle.as_str()) {
        let span = (folded.starts[start], folded.ends[start + m.len() - 1]);
        // One original char can fold to several; do not let spans overlap on it.
        if spans.last().is_some_and(|last| span.0 < last.1) {
            continue;
        }
        spans.push(span);
    }

    spans
}
