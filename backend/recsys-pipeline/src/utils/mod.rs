// Utility functions for recsys-pipeline

use std::cmp::Ordering;

pub const MS_PER_DAY: i64 = 24 * 3600 * 1000;

pub fn days_to_ms(days: u32) -> i64 {
    i64::from(days) * MS_PER_DAY
}

/// Half-life decay: `0.5^(delta / half_life)`, with negative deltas clamped to zero.
///
/// Result is in (0, 1] for any finite delta that does not underflow.
pub fn decay_weight(delta_ms: i64, half_life_ms: i64) -> f64 {
    let delta = delta_ms.max(0) as f64;
    0.5_f64.powf(delta / half_life_ms as f64)
}

/// Floor of the midpoint of two timestamps, without overflow.
pub fn midpoint(a: i64, b: i64) -> i64 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    lo + (hi - lo) / 2
}

/// Score descending, then id ascending. Total order, so sorts are reproducible.
pub fn by_score_desc_then_id(a_score: f64, a_id: u64, b_score: f64, b_id: u64) -> Ordering {
    b_score.total_cmp(&a_score).then_with(|| a_id.cmp(&b_id))
}
