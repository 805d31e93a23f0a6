//! Recursive text splitting
//!
//! Tries a descending ladder of separators (paragraph, line, word) and falls
//! back to a hard token split for text no separator can break.

use super::TokenCounter;

const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

/// Split `text` into pieces of at most `target` tokens each, preferring the
/// coarsest separator that fits. Pieces concatenate back to the original
/// text (separators are kept with the piece that precedes them).
pub(crate) fn split_text(text: &str, target: usize, counter: &TokenCounter) -> Vec<String> {
    let mut out = Vec::new();
    split_with(text, 0, target.max(1), counter, &mut out);
    out
}

fn split_with(
    text: &str,
    separator_index: usize,
    target: usize,
    counter: &TokenCounter,
    out: &mut Vec<String>,
) {
    if text.is_empty() {
        return;
    }
    if counter.count(text) <= target {
        out.push(text.to_string());
        return;
    }
    if separator_index >= SEPARATORS.len() {
        out.extend(counter.hard_split(text, target));
        return;
    }

    let separator = SEPARATORS[separator_index];
    let pieces: Vec<&str> = text.split_inclusive(separator).collect();
    if pieces.len() <= 1 {
        // This separator does not occur; try the next finer one.
        split_with(text, separator_index + 1, target, counter, out);
        return;
    }

    let mut current = String::new();
    let mut current_tokens = 0usize;
    for piece in pieces {
        let piece_tokens = counter.count(piece);

        if piece_tokens > target {
            // A single piece is oversized: flush what we have and recurse
            // into the piece with the next separator.
            flush(&mut current, &mut current_tokens, target, counter, out);
            split_with(piece, separator_index + 1, target, counter, out);
            continue;
        }

        if current_tokens + piece_tokens > target && !current.is_empty() {
            flush(&mut current, &mut current_tokens, target, counter, out);
        }
        current.push_str(piece);
        current_tokens += piece_tokens;
    }
    flush(&mut current, &mut current_tokens, target, counter, out);
}

fn flush(
    current: &mut String,
    current_tokens: &mut usize,
    target: usize,
    counter: &TokenCounter,
    out: &mut Vec<String>,
) {
    if current.is_empty() {
        return;
    }
    let text = std::mem::take(current);
    *current_tokens = 0;
    // Merged token counts are estimates (BPE is not additive); re-measure
    // so the invariant holds exactly.
    if counter.count(&text) <= target {
        out.push(text);
    } else {
        out.extend(counter.hard_split(&text, target));
    }
}
