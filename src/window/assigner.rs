//! Window assignment arithmetic
//!
//! Pure bounds computation for tumbling and sliding windows. Session and
//! global assignment is stateful and lives in the
//! [`WindowManager`](super::WindowManager).
//!
//! Alignment uses floored division so negative event times land in the
//! window covering them rather than the one above.

/// Floored division, correct for negative timestamps
fn floor_div(a: i64, b: i64) -> i64 {
    let q = a / b;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

/// Bounds of the tumbling window containing `event_time`:
/// `start = floor(event_time / size) * size`, `end = start + size`.
pub fn tumbling_bounds(size_ms: i64, event_time: i64) -> (i64, i64) {
    let start = floor_div(event_time, size_ms) * size_ms;
    (start, start + size_ms)
}

/// Bounds of every sliding window containing `event_time`.
///
/// A record at `t` belongs to each window `[w, w+size)` where `w` is a
/// multiple of `slide` and `w ∈ (t - size, t]`. With `slide <= size`
/// (enforced at construction) every record belongs to at least one
/// window. Returned in ascending start order.
pub fn sliding_bounds(size_ms: i64, slide_ms: i64, event_time: i64) -> Vec<(i64, i64)> {
    let mut bounds = Vec::with_capacity((size_ms / slide_ms) as usize);
    let mut start = floor_div(event_time, slide_ms) * slide_ms;
    while start + size_ms > event_time {
        bounds.push((start, start + size_ms));
        start -= slide_ms;
    }
    bounds.reverse();
    bounds
}
