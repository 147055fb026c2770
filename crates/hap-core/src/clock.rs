// crates/hap-core/src/clock.rs
//
// A `Clock` maps a wall-clock tick to a position in a fixed-length media
// timeline under one of three loop modes, at an arbitrary signed rate.
// Ported from the original ofxHapPlayer's Clock.{h,cpp}.

/// How a `Clock` behaves once it reaches either end of its period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    /// Stop at the boundary and report `done`.
    Once,
    /// Wrap back to the opposite boundary.
    Loop,
    /// Reverse direction at each boundary.
    Palindrome,
}

/// The direction a `Clock` is currently moving through media time. Purely a
/// function of the sign of `rate` (and, in Palindrome mode, which half of the
/// cycle `at` falls in) — a paused clock still reports a real direction, it
/// just isn't advancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// A rate-and-anchor clock over a `[0, period)` media timeline.
///
/// `start`/`time` are the last sync point: `time` is the media tick that
/// was current at wall-clock tick `start`. Querying at any other wall-clock
/// tick extrapolates from that anchor at the current `rate`.
#[derive(Debug, Clone)]
pub struct Clock {
    period: i64,
    mode: LoopMode,
    rate: f64,
    paused: bool,
    start: i64,
    time: i64,
}

impl Clock {
    pub fn new(period: i64) -> Self {
        Self {
            period: period.max(1),
            mode: LoopMode::Once,
            rate: 1.0,
            paused: false,
            start: 0,
            time: 0,
        }
    }

    pub fn period(&self) -> i64 {
        self.period
    }

    pub fn mode(&self) -> LoopMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: LoopMode) {
        self.mode = mode;
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    /// Re-anchor the clock so `get_time_at(at) == time`, without otherwise
    /// touching rate or pause state.
    pub fn sync_at(&mut self, time: i64, at: i64) {
        self.start = at;
        self.time = time;
    }

    fn raw_time_at(&self, at: i64) -> i64 {
        if self.paused {
            self.time
        } else {
            self.time + ((at - self.start) as f64 * self.rate).round() as i64
        }
    }

    /// The media tick at wall-clock `at`, wrapped according to `mode`.
    pub fn get_time_at(&self, at: i64) -> i64 {
        let t = self.raw_time_at(at);
        match self.mode {
            LoopMode::Once => t.clamp(0, self.period - 1),
            LoopMode::Loop => t.rem_euclid(self.period),
            LoopMode::Palindrome => {
                if self.period <= 1 {
                    0
                } else {
                    let cycle = 2 * (self.period - 1);
                    let m = t.rem_euclid(cycle);
                    if m < self.period {
                        m
                    } else {
                        cycle - m
                    }
                }
            }
        }
    }

    /// The direction of travel at wall-clock `at`. Based purely on the sign
    /// of `rate` (and, in Palindrome mode, which half-cycle `at` falls in);
    /// a paused clock still reports a real direction — use [`Clock::paused`]
    /// separately to ask whether it's actually advancing.
    pub fn get_direction_at(&self, at: i64) -> Direction {
        let t = if self.paused { self.time } else { self.raw_time_at(at) };
        let forward = self.rate > 0.0;
        let reversed_half = self.mode == LoopMode::Palindrome
            && self.period > 1
            && t.div_euclid(self.period).rem_euclid(2) == 1;
        match (forward, reversed_half) {
            (true, false) | (false, true) => Direction::Forward,
            (true, true) | (false, false) => Direction::Backward,
        }
    }

    /// Change rate, re-anchoring at `at` so position doesn't jump.
    pub fn set_rate_at(&mut self, rate: f64, at: i64) {
        let t = self.raw_time_at(at);
        self.start = at;
        self.time = t;
        self.rate = rate;
    }

    /// Pause or resume, re-anchoring at `at` so position doesn't jump.
    pub fn set_paused_at(&mut self, paused: bool, at: i64) {
        let t = self.raw_time_at(at);
        self.start = at;
        self.time = t;
        self.paused = paused;
    }

    /// `Once` mode only: has playback run off either end of the period?
    pub fn get_done(&self, at: i64) -> bool {
        if self.mode != LoopMode::Once {
            return false;
        }
        let t = self.raw_time_at(at);
        t < 0 || t >= self.period
    }

    /// Remap `period`/`start`/`time` from one tick rate to another, e.g.
    /// when a stream's reported `time_base` changes. `from` and `to` are
    /// each expressed as `(numerator, denominator)` seconds per tick.
    pub fn rescale(&mut self, from: (i64, i64), to: (i64, i64)) {
        let (from_num, from_den) = from;
        let (to_num, to_den) = to;
        let rescale_value = |v: i64| -> i64 {
            let num = (v as i128) * (from_num as i128) * (to_den as i128);
            let den = (from_den as i128) * (to_num as i128);
            (num / den) as i64
        };
        self.period = rescale_value(self.period).max(1);
        self.start = rescale_value(self.start);
        self.time = rescale_value(self.time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn once_clamps_at_period() {
        let mut c = Clock::new(100);
        c.sync_at(0, 0);
        assert_eq!(c.get_time_at(50), 50);
        assert_eq!(c.get_time_at(200), 99);
        assert!(c.get_done(200));
        assert!(!c.get_done(50));
    }

    #[test]
    fn loop_wraps() {
        let mut c = Clock::new(100);
        c.set_mode(LoopMode::Loop);
        c.sync_at(0, 0);
        assert_eq!(c.get_time_at(150), 50);
        assert_eq!(c.get_time_at(250), 50);
    }

    #[test]
    fn loop_wraps_backward() {
        let mut c = Clock::new(100);
        c.set_mode(LoopMode::Loop);
        c.sync_at(10, 0);
        c.set_rate_at(-1.0, 0);
        assert_eq!(c.get_time_at(20), 90);
    }

    #[test]
    fn fractional_rate_advances_proportionally() {
        let mut c = Clock::new(1000);
        c.sync_at(0, 0);
        c.set_rate_at(0.5, 0);
        assert_eq!(c.get_time_at(100), 50);
        c.set_rate_at(1.5, 0);
        c.sync_at(0, 0);
        assert_eq!(c.get_time_at(100), 150);
    }

    #[test]
    fn direction_is_reported_even_while_paused() {
        let mut c = Clock::new(100);
        c.set_mode(LoopMode::Loop);
        c.sync_at(10, 0);
        c.set_rate_at(-1.0, 0);
        c.set_paused_at(true, 5);
        assert_eq!(c.get_direction_at(5), Direction::Backward);
        assert_eq!(c.get_direction_at(500), Direction::Backward);
    }

    #[test]
    fn palindrome_mirrors_and_flips_direction() {
        let mut c = Clock::new(100);
        c.set_mode(LoopMode::Palindrome);
        c.sync_at(0, 0);
        // cycle = 198: ticks 0..99 forward, 99 is the turn, then mirrors back down.
        assert_eq!(c.get_time_at(50), 50);
        assert_eq!(c.get_direction_at(50), Direction::Forward);
        assert_eq!(c.get_time_at(120), 78);
        assert_eq!(c.get_direction_at(120), Direction::Backward);
    }

    #[test]
    fn invariant_time_at_in_period_bounds() {
        let mut c = Clock::new(37);
        for mode in [LoopMode::Once, LoopMode::Loop, LoopMode::Palindrome] {
            c.set_mode(mode);
            c.sync_at(5, 0);
            for at in (-500..500).step_by(13) {
                let t = c.get_time_at(at);
                assert!(t >= 0 && t < c.period());
            }
        }
    }

    #[test]
    fn rescale_round_trips() {
        let mut c = Clock::new(1000);
        c.sync_at(250, 0);
        c.rescale((1, 1000), (1, 48000));
        c.rescale((1, 48000), (1, 1000));
        assert_eq!(c.period(), 1000);
        assert_eq!(c.get_time_at(0), 250);
    }

    #[test]
    fn set_rate_at_preserves_position() {
        let mut c = Clock::new(1000);
        c.sync_at(0, 0);
        let pos_before = c.get_time_at(100);
        c.set_rate_at(2.0, 100);
        let pos_after = c.get_time_at(100);
        assert_eq!(pos_before, pos_after);
    }
}
