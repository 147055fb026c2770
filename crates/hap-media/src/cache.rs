// crates/hap-media/src/cache.rs
//
// Generic store-by-tick cache with an active/stable split, plus the
// blocking `LockingPacketCache` wrapper the demuxer's consumer waits on.
// Ported from the original ofxHapPlayer's PacketCache.{h,cpp}.
//
// The active/stable split exists so `limit()` (called every tick from the
// Player's update loop) can drop everything outside the current window in
// one swap instead of scanning and removing entries one at a time: new
// entries land in `active`; whatever was in `active` before the swap
// becomes `stable` and is pruned against the new window next.

use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use hap_core::time_range::TimeRangeSet;

/// A cache of `T` keyed by presentation tick, split into an `active`
/// generation (being filled) and a `stable` generation (the previous
/// active, now read-only until the next `limit()`).
pub struct Cache<T> {
    active: BTreeMap<i64, T>,
    stable: BTreeMap<i64, T>,
}

impl<T> Default for Cache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Cache<T> {
    pub fn new() -> Self {
        Self { active: BTreeMap::new(), stable: BTreeMap::new() }
    }

    pub fn store(&mut self, pts: i64, value: T) {
        self.active.insert(pts, value);
    }

    pub fn fetch(&self, pts: i64) -> Option<&T> {
        self.active.get(&pts).or_else(|| self.stable.get(&pts))
    }

    pub fn contains(&self, pts: i64) -> bool {
        self.active.contains_key(&pts) || self.stable.contains_key(&pts)
    }

    /// The entry with the largest key `<= pts`, across both generations.
    /// Unlike `fetch`, which assumes one entry per tick, this is for
    /// variable-span entries (e.g. an `AudioFrame` covering many ticks)
    /// where the caller needs "whichever entry's span might contain pts"
    /// rather than an exact-tick lookup.
    pub fn floor(&self, pts: i64) -> Option<(i64, &T)> {
        let a = self.active.range(..=pts).next_back();
        let b = self.stable.range(..=pts).next_back();
        match (a, b) {
            (Some((&ka, va)), Some((&kb, vb))) => {
                if ka >= kb {
                    Some((ka, va))
                } else {
                    Some((kb, vb))
                }
            }
            (Some((&k, v)), None) | (None, Some((&k, v))) => Some((k, v)),
            (None, None) => None,
        }
    }

    pub fn clear(&mut self) {
        self.active.clear();
        self.stable.clear();
    }

    /// The set of ticks this cache currently holds, coalesced into ranges.
    pub fn cached_ranges(&self) -> TimeRangeSet {
        let mut set = TimeRangeSet::new();
        for &pts in self.active.keys().chain(self.stable.keys()) {
            set.add_start_length(pts, 1);
        }
        set
    }

    /// Roll `active` into `stable`, then drop anything in the new `stable`
    /// outside `keep`. Called once per Player tick with the freshly
    /// computed cache window.
    pub fn limit(&mut self, keep: &TimeRangeSet) {
        let mut rolled = std::mem::take(&mut self.active);
        rolled.extend(std::mem::take(&mut self.stable));
        rolled.retain(|&pts, _| keep.includes(pts));
        self.stable = rolled;
    }

    pub fn len(&self) -> usize {
        self.active.len() + self.stable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty() && self.stable.is_empty()
    }
}

pub type PacketCache<P> = Cache<P>;
pub type AudioFrameCache<F> = Cache<F>;

/// Mutex+condvar wrapper around a `PacketCache`, giving the video decode
/// step a `fetch(pts, timeout)` that blocks until the demuxer delivers the
/// packet or the deadline passes.
pub struct LockingPacketCache<P> {
    inner: Mutex<Cache<P>>,
    cond: Condvar,
}

impl<P: Clone> Default for LockingPacketCache<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Clone> LockingPacketCache<P> {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Cache::new()), cond: Condvar::new() }
    }

    pub fn store(&self, pts: i64, value: P) {
        let mut cache = self.inner.lock().unwrap();
        cache.store(pts, value);
        drop(cache);
        self.cond.notify_all();
    }

    pub fn limit(&self, keep: &TimeRangeSet) {
        self.inner.lock().unwrap().limit(keep);
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    pub fn cached_ranges(&self) -> TimeRangeSet {
        self.inner.lock().unwrap().cached_ranges()
    }

    /// Block until `pts` is cached or `timeout` elapses, whichever comes
    /// first. Returns `None` on timeout — the caller treats this as
    /// `HapError::Timeout` and keeps the last valid frame.
    pub fn fetch(&self, pts: i64, timeout: Duration) -> Option<P> {
        let deadline = Instant::now() + timeout;
        let mut cache = self.inner.lock().unwrap();
        loop {
            if let Some(v) = cache.fetch(pts) {
                return Some(v.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, result) = self.cond.wait_timeout(cache, deadline - now).unwrap();
            cache = guard;
            if result.timed_out() && cache.fetch(pts).is_none() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_rolls_active_into_stable_and_prunes() {
        let mut cache: Cache<i32> = Cache::new();
        cache.store(0, 100);
        cache.store(5, 105);
        let mut keep = TimeRangeSet::new();
        keep.add_start_length(0, 3);
        cache.limit(&keep);
        assert!(cache.contains(0));
        assert!(!cache.contains(5));
    }

    #[test]
    fn fetch_blocks_until_store_or_timeout() {
        use std::sync::Arc;
        use std::thread;

        let cache: Arc<LockingPacketCache<i32>> = Arc::new(LockingPacketCache::new());
        let producer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                cache.store(42, 999);
            })
        };
        let got = cache.fetch(42, Duration::from_millis(500));
        producer.join().unwrap();
        assert_eq!(got, Some(999));
    }

    #[test]
    fn fetch_times_out_when_never_stored() {
        let cache: LockingPacketCache<i32> = LockingPacketCache::new();
        let got = cache.fetch(7, Duration::from_millis(20));
        assert_eq!(got, None);
    }
}
