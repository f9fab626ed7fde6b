//! Fixed-size sliding windows over line ranges.
//!
//! Consecutive windows overlap by `min(window / 10, lines remaining after the
//! window)`. Windows may cut through multi-line strings or comments; that is
//! an accepted limitation of the fallback path.

/// Split the inclusive line range `[start, end]` into windows of at most
/// `window` lines. Returns inclusive `(start, end)` pairs in order.
#[must_use]
pub fn window_spans(start: usize, end: usize, window: usize) -> Vec<(usize, usize)> {
    if end < start {
        return Vec::new();
    }
    let window = window.max(1);
    let mut spans = Vec::new();
    let mut from = start;
    loop {
        let to = (from + window - 1).min(end);
        spans.push((from, to));
        let remaining = end - to;
        if remaining == 0 {
            break;
        }
        let overlap = (window / 10).min(remaining);
        from = to + 1 - overlap;
    }
    spans
}

/// Window length that keeps each window within `max_tokens`, assuming
/// tokens are spread evenly across `lines`.
#[must_use]
pub fn effective_window(
    window_lines: usize,
    lines: usize,
    tokens: usize,
    max_tokens: usize,
) -> usize {
    if tokens <= max_tokens || tokens == 0 {
        return window_lines.max(1);
    }
    let by_tokens = lines.saturating_mul(max_tokens) / tokens;
    window_lines.min(by_tokens).max(1)
}
