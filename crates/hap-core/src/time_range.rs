// crates/hap-core/src/time_range.rs
//
// Signed interval algebra (`TimeRange`), the disjoint unsigned interval set
// built on top of it (`TimeRangeSet`), and the order-preserving signed
// sequence used to describe a walk of the timeline (`TimeRangeSequence`).
//
// Ported from the original ofxHapPlayer's TimeRangeSet.{h,cpp}: `start` is
// the first tick, `length` may be negative to mean "start here and walk
// backwards `|length|` ticks".

/// A signed half-open interval. A positive `length` walks forward from
/// `start`; a negative `length` walks backward from `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    pub start: i64,
    pub length: i64,
}

impl TimeRange {
    pub fn new(start: i64, length: i64) -> Self {
        Self { start, length }
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The lowest tick this range covers.
    pub fn earliest(&self) -> i64 {
        if self.length < 0 {
            self.start + self.length + 1
        } else {
            self.start
        }
    }

    /// The highest tick this range covers.
    pub fn latest(&self) -> i64 {
        if self.length < 0 {
            self.start
        } else {
            self.start + self.length - 1
        }
    }

    /// Unsigned normalisation: same coverage, `start == earliest()`, `length >= 0`.
    pub fn abs(&self) -> Self {
        Self::new(self.earliest(), self.length.abs())
    }

    /// Move `earliest()` to `e`, preserving direction (sign) and `latest()`.
    pub fn set_earliest(&mut self, e: i64) {
        if e > self.latest() {
            self.start = e;
            self.length = 0;
        } else if self.length > 0 {
            self.length += self.start - e;
            self.start = e;
        } else if self.length < 0 {
            self.length = -(self.start - e + 1);
        }
    }

    /// Move `latest()` to `l`, preserving direction (sign) and `earliest()`.
    pub fn set_latest(&mut self, l: i64) {
        if l < self.earliest() {
            self.start = l;
            self.length = 0;
        } else if self.length > 0 {
            self.length = l - self.start + 1;
        } else {
            self.length -= l - self.start;
            self.start = l;
        }
    }

    pub fn includes(&self, t: i64) -> bool {
        t >= self.earliest() && t <= self.latest()
    }

    pub fn intersects(&self, other: &TimeRange) -> bool {
        self.includes(other.earliest()) || other.includes(self.earliest())
    }

    /// Unsigned intersection on `[earliest, latest]`; zero-length if disjoint.
    pub fn intersection(&self, other: &TimeRange) -> TimeRange {
        let s = self.earliest().max(other.earliest());
        let e = self.latest().min(other.latest());
        let l = (1 + e - s).max(0);
        TimeRange::new(s, l)
    }
}

/// An ordered list of disjoint, non-empty, non-adjacent unsigned ranges.
/// Adjacent or overlapping ranges are merged on `add`. For all `i < j`,
/// `ranges[i].latest() + 1 < ranges[j].earliest()`.
#[derive(Debug, Clone, Default)]
pub struct TimeRangeSet {
    ranges: Vec<TimeRange>,
}

impl TimeRangeSet {
    pub fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn earliest(&self) -> i64 {
        self.ranges.first().map(|r| r.start).unwrap_or(0)
    }

    pub fn latest(&self) -> i64 {
        self.ranges.last().map(|r| r.latest()).unwrap_or(-1)
    }

    pub fn includes(&self, t: i64) -> bool {
        self.ranges.iter().any(|r| r.includes(t))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TimeRange> {
        self.ranges.iter()
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    pub fn add_start_length(&mut self, start: i64, length: i64) {
        self.add(TimeRange::new(start, length));
    }

    /// Merge `range` into the set, normalising sign and merging with any
    /// overlapping or adjacent existing range.
    pub fn add(&mut self, range: TimeRange) {
        let range = range.abs();
        if range.is_empty() {
            return;
        }
        for i in 0..self.ranges.len() {
            let r = self.ranges[i];
            if r.intersects(&range) {
                let end = r.latest().max(range.latest());
                let start = r.start.min(range.start);
                self.ranges[i] = TimeRange::new(start, end - start + 1);
                return;
            } else if r.latest() == range.start - 1 {
                self.ranges[i].length += range.length;
                return;
            } else if r.start == range.latest() + 1 {
                self.ranges[i].start = range.start;
                self.ranges[i].length += range.length;
                return;
            } else if r.latest() > range.start {
                self.ranges.insert(i, range);
                return;
            }
        }
        self.ranges.push(range);
    }

    pub fn remove_start_length(&mut self, start: i64, length: i64) {
        self.remove(TimeRange::new(start, length));
    }

    /// Remove `range`'s coverage from the set, splitting any range it cuts
    /// through the middle of.
    pub fn remove(&mut self, range: TimeRange) {
        let range = range.abs();
        if range.is_empty() {
            return;
        }
        let mut result = Vec::with_capacity(self.ranges.len());
        for r in self.ranges.drain(..) {
            if !r.intersects(&range) {
                result.push(r);
                continue;
            }
            if r.start < range.earliest() {
                result.push(TimeRange::new(r.start, range.earliest() - r.start));
            }
            if r.latest() > range.latest() {
                let s = range.latest() + 1;
                result.push(TimeRange::new(s, r.latest() - s + 1));
            }
        }
        self.ranges = result;
    }

    pub fn remove_set(&mut self, other: &TimeRangeSet) {
        for range in other.iter() {
            self.remove(*range);
        }
    }

    pub fn intersection(&self, other: &TimeRangeSet) -> TimeRangeSet {
        let mut result = TimeRangeSet::new();
        for orange in other.iter() {
            for range in self.iter() {
                result.add(range.intersection(orange));
            }
        }
        result
    }

    pub fn intersection_seq(&self, other: &TimeRangeSequence) -> TimeRangeSet {
        let mut result = TimeRangeSet::new();
        for orange in other.iter() {
            for range in self.iter() {
                result.add(range.intersection(orange));
            }
        }
        result
    }
}

impl<'a> IntoIterator for &'a TimeRangeSet {
    type Item = &'a TimeRange;
    type IntoIter = std::slice::Iter<'a, TimeRange>;
    fn into_iter(self) -> Self::IntoIter {
        self.ranges.iter()
    }
}

/// An ordered multiset of signed ranges, preserving insertion order and
/// sign. Describes a walk of the timeline under a `Clock`.
#[derive(Debug, Clone, Default)]
pub struct TimeRangeSequence {
    ranges: Vec<TimeRange>,
}

impl TimeRangeSequence {
    pub fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TimeRange> {
        self.ranges.iter()
    }

    pub fn add(&mut self, range: TimeRange) {
        self.ranges.push(range);
    }

    pub fn from_set(set: &TimeRangeSet) -> Self {
        let mut seq = Self::new();
        for r in set.iter() {
            seq.add(*r);
        }
        seq
    }

    /// Remove `range`'s coverage, splitting and shortening the ranges it
    /// touches while preserving each survivor's direction (sign).
    pub fn remove(&mut self, range: TimeRange) {
        if range.is_empty() {
            return;
        }
        let mut result = Vec::with_capacity(self.ranges.len());
        for r in self.ranges.drain(..) {
            if !r.intersects(&range) {
                result.push(r);
                continue;
            }
            if r.earliest() >= range.earliest() && r.latest() <= range.latest() {
                // entirely covered by `range` — drop it
                continue;
            }
            if r.earliest() >= range.earliest() && r.latest() > range.latest() {
                let mut nr = r;
                nr.set_earliest(range.latest() + 1);
                result.push(nr);
                continue;
            }
            if r.includes(range.earliest()) {
                if r.latest() > range.latest() {
                    let mut remainder = TimeRange::new(range.latest() + 1, r.latest() - range.latest());
                    if r.length < 0 {
                        remainder = TimeRange::new(remainder.latest(), -remainder.length);
                    }
                    let mut left = r;
                    left.set_latest(range.earliest() - 1);
                    result.push(left);
                    result.push(remainder);
                } else {
                    let mut left = r;
                    left.set_latest(range.earliest() - 1);
                    result.push(left);
                }
                continue;
            }
            result.push(r);
        }
        self.ranges = result;
    }

    pub fn remove_set(&mut self, set: &TimeRangeSet) {
        for range in set.iter() {
            self.remove(*range);
        }
    }

    /// Repeatedly take the absolute value of the head range and remove its
    /// coverage from the rest of the sequence, producing the unsigned
    /// coverage of the whole walk as a new sequence.
    pub fn flatten(mut self) -> TimeRangeSequence {
        let mut flattened = TimeRangeSequence::new();
        while !self.is_empty() {
            let next = self.ranges[0].abs();
            flattened.add(next);
            self.remove(next);
        }
        flattened
    }
}

impl<'a> IntoIterator for &'a TimeRangeSequence {
    type Item = &'a TimeRange;
    type IntoIter = std::slice::Iter<'a, TimeRange>;
    fn into_iter(self) -> Self::IntoIter {
        self.ranges.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_sorted_disjoint(s: &TimeRangeSet) -> bool {
        let ranges: Vec<&TimeRange> = s.iter().collect();
        for w in ranges.windows(2) {
            if w[0].latest() + 1 >= w[1].earliest() {
                return false;
            }
        }
        true
    }

    #[test]
    fn time_range_earliest_latest_forward() {
        let r = TimeRange::new(10, 5);
        assert_eq!(r.earliest(), 10);
        assert_eq!(r.latest(), 14);
    }

    #[test]
    fn time_range_earliest_latest_backward() {
        let r = TimeRange::new(10, -5);
        assert_eq!(r.earliest(), 6);
        assert_eq!(r.latest(), 10);
    }

    #[test]
    fn time_range_abs_normalises() {
        let r = TimeRange::new(10, -5).abs();
        assert_eq!(r.start, 6);
        assert_eq!(r.length, 5);
    }

    #[test]
    fn time_range_intersection() {
        let a = TimeRange::new(0, 10); // [0,9]
        let b = TimeRange::new(5, 10); // [5,14]
        let i = a.intersection(&b);
        assert_eq!((i.earliest(), i.latest()), (5, 9));
    }

    #[test]
    fn time_range_intersection_disjoint_is_empty() {
        let a = TimeRange::new(0, 5); // [0,4]
        let b = TimeRange::new(10, 5); // [10,14]
        assert!(a.intersection(&b).is_empty());
    }

    #[test]
    fn set_add_merges_adjacent() {
        let mut s = TimeRangeSet::new();
        s.add(TimeRange::new(0, 5)); // [0,4]
        s.add(TimeRange::new(5, 5)); // [5,9] adjacent -> merges
        assert_eq!(s.len(), 1);
        assert_eq!((s.earliest(), s.latest()), (0, 9));
    }

    #[test]
    fn set_add_keeps_disjoint_ranges_sorted() {
        let mut s = TimeRangeSet::new();
        s.add(TimeRange::new(100, 10));
        s.add(TimeRange::new(0, 10));
        s.add(TimeRange::new(50, 10));
        assert!(is_sorted_disjoint(&s));
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn set_remove_splits_middle() {
        let mut s = TimeRangeSet::new();
        s.add(TimeRange::new(0, 20)); // [0,19]
        s.remove(TimeRange::new(5, 5)); // remove [5,9]
        assert!(is_sorted_disjoint(&s));
        let got: Vec<(i64, i64)> = s.iter().map(|r| (r.earliest(), r.latest())).collect();
        assert_eq!(got, vec![(0, 4), (10, 19)]);
    }

    #[test]
    fn sequence_flatten_unions_overlap() {
        let mut seq = TimeRangeSequence::new();
        seq.add(TimeRange::new(0, 10)); // [0,9]
        seq.add(TimeRange::new(5, 10)); // [5,14]
        let flat = seq.flatten();
        let set: TimeRangeSet = {
            let mut s = TimeRangeSet::new();
            for r in flat.iter() {
                s.add(*r);
            }
            s
        };
        assert_eq!((set.earliest(), set.latest()), (0, 14));
        assert!(is_sorted_disjoint(&set));
    }

    #[test]
    fn sequence_flatten_preserves_backward_coverage() {
        let mut seq = TimeRangeSequence::new();
        seq.add(TimeRange::new(9, -10)); // backward [0,9]
        let flat = seq.flatten();
        let total: i64 = flat.iter().map(|r| r.abs().length).sum();
        assert_eq!(total, 10);
    }
}
