// crates/hap-media/src/audio_thread.rs
//
// A dedicated thread that pulls decoded audio frames out of a per-pts
// cache to satisfy the clock's current playback position, writing
// resampled, gain-applied, direction-correct samples into a `RingBuffer`
// the cpal output callback reads from. Ported from the original
// ofxHapPlayer's AudioThread.{h,cpp} (cache, `Playhead`, `Fader`, drift
// correction); the action-queue-plus-thread shape follows worker.rs's
// playback decode thread.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};

use hap_core::clock::Clock;
use hap_core::movie_time::{next_range, next_ranges};
use hap_core::time_range::{TimeRange, TimeRangeSet};

use crate::audio_decoder::AudioFrame;
use crate::audio_resampler::AudioResampler;
use crate::cache::{AudioFrameCache, Cache};
use crate::ring_buffer::RingBuffer;

/// A linear ramp from one gain value to another over a span of output
/// ticks. Used for volume changes and mute/unmute so they don't click.
#[derive(Debug, Clone, Copy)]
pub struct Fade {
    pub from: f32,
    pub to: f32,
    pub start: i64,
    pub duration: i64,
}

impl Fade {
    pub fn value_at(&self, at: i64) -> f32 {
        if self.duration <= 0 || at >= self.start + self.duration {
            return self.to;
        }
        if at <= self.start {
            return self.from;
        }
        let t = (at - self.start) as f32 / self.duration as f32;
        self.from + (self.to - self.from) * t
    }

    pub fn done_at(&self, at: i64) -> bool {
        at >= self.start + self.duration
    }
}

/// Current gain plus an optional in-flight ramp towards a new value.
#[derive(Debug, Clone)]
pub struct Fader {
    value: f32,
    fade: Option<Fade>,
}

impl Fader {
    pub fn new(value: f32) -> Self {
        Self { value, fade: None }
    }

    pub fn value_at(&self, at: i64) -> f32 {
        match &self.fade {
            Some(f) => f.value_at(at),
            None => self.value,
        }
    }

    /// Begin a ramp from the current value to `target`, finishing
    /// `duration` ticks after `at`.
    pub fn set_at(&mut self, target: f32, at: i64, duration: i64) {
        let from = self.value_at(at);
        self.value = target;
        self.fade = Some(Fade { from, to: target, start: at, duration });
    }

    /// Install a 0→1 ramp-in starting at `at` — used to smooth over the
    /// discontinuity when the fill loop jumps to a new current range
    /// (loop wrap, palindrome bounce, drift resync).
    pub fn ramp_in_at(&mut self, at: i64, duration: i64) {
        self.value = 1.0;
        self.fade = Some(Fade { from: 0.0, to: 1.0, start: at, duration });
    }

    /// Fold a finished fade into `value` so `value_at` stays cheap once
    /// the ramp is over.
    pub fn settle(&mut self, at: i64) {
        if let Some(f) = &self.fade {
            if f.done_at(at) {
                self.fade = None;
            }
        }
    }
}

/// How many output sample-frames a Player-driven volume change ramps
/// over, to avoid clicks on pause/mute. ~10ms at a typical 48kHz.
pub const DEFAULT_RAMP_SAMPLES: i64 = 512;

/// Width of the ramp installed at the start of a freshly computed current
/// range. 20ms at a typical 48kHz, matching `DEFAULT_RAMP_SAMPLES`'s scale.
fn range_fade_samples(out_rate: u32) -> i64 {
    (out_rate as i64 / 50).max(1)
}

/// How far past the playhead the frame cache is asked to retain decoded
/// frames, mirroring the default video cache window in `PlayerConfig`.
const FRAME_CACHE_USEC: i64 = 500_000;

/// A gap with no cached frame is filled with this many ticks of silence
/// per iteration, so a persistent gap advances the playhead in bounded
/// steps instead of one unbounded write.
const SILENCE_CHUNK_TICKS: i64 = 4_800;

/// Safety valve on `fill`'s inner loop: bounds how many cache entries (or
/// silence chunks) a single wake processes, in case every fetch somehow
/// yields zero output samples.
const MAX_FILL_STEPS: u32 = 256;

enum Action {
    Store(AudioFrame),
    Flush,
}

/// Owns the audio worker thread. `ring()` is read by the cpal output
/// callback; everything else is driven by the Player.
pub struct AudioThread {
    tx: Sender<Action>,
    ring: Arc<RingBuffer<f32>>,
    clock: Arc<Mutex<Clock>>,
    fader: Arc<Mutex<Fader>>,
    written: Arc<AtomicI64>,
    invalidate: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl AudioThread {
    pub fn new(out_rate: u32, out_channels: u16, ring_capacity: usize) -> Self {
        let (tx, rx) = bounded::<Action>(16);
        let ring = Arc::new(RingBuffer::<f32>::new(ring_capacity));
        let clock = Arc::new(Mutex::new(Clock::new(1)));
        let fader = Arc::new(Mutex::new(Fader::new(1.0)));
        let written = Arc::new(AtomicI64::new(0));
        let invalidate = Arc::new(AtomicBool::new(true));

        let thread_ring = Arc::clone(&ring);
        let thread_clock = Arc::clone(&clock);
        let thread_fader = Arc::clone(&fader);
        let thread_written = Arc::clone(&written);
        let thread_invalidate = Arc::clone(&invalidate);

        let handle = thread::spawn(move || {
            run(
                rx,
                thread_ring,
                thread_clock,
                thread_fader,
                thread_written,
                thread_invalidate,
                out_rate,
                out_channels,
            );
        });

        Self { tx, ring, clock, fader, written, invalidate, handle: Some(handle) }
    }

    pub fn ring(&self) -> &Arc<RingBuffer<f32>> {
        &self.ring
    }

    /// Hand a newly decoded frame to the thread; it's filed into the
    /// frame cache and pulled from later, in playhead order, not played
    /// immediately in arrival order.
    pub fn send(&self, frame: AudioFrame) {
        let _ = self.tx.send(Action::Store(frame));
    }

    pub fn flush(&self) {
        let _ = self.tx.send(Action::Flush);
    }

    /// Update the thread's private Clock snapshot. `soft == true` just
    /// re-anchors it (used for routine rate/volume changes), preserving
    /// the current playhead position; `soft == false` additionally
    /// invalidates the playhead and flushes buffered audio (used on seek
    /// and other discontinuities, where stale samples must not play out).
    pub fn sync(&self, time: i64, at: i64, rate: f64, soft: bool) {
        {
            let mut clock = self.clock.lock().unwrap();
            clock.sync_at(time, at);
            clock.set_rate_at(rate, at);
        }
        if !soft {
            self.invalidate.store(true, Ordering::Release);
            self.flush();
        }
    }

    /// Ramp output gain to `target`, finishing `ramp_samples` output
    /// sample-frames after `at_sample` (typically `written_samples()`).
    pub fn set_volume(&self, target: f32, at_sample: i64, ramp_samples: i64) {
        self.fader.lock().unwrap().set_at(target, at_sample, ramp_samples);
    }

    pub fn written_samples(&self) -> i64 {
        self.written.load(Ordering::Acquire)
    }
}

impl Drop for AudioThread {
    fn drop(&mut self) {
        drop(self.tx.clone());
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run(
    rx: Receiver<Action>,
    ring: Arc<RingBuffer<f32>>,
    clock: Arc<Mutex<Clock>>,
    fader: Arc<Mutex<Fader>>,
    written: Arc<AtomicI64>,
    invalidate: Arc<AtomicBool>,
    out_rate: u32,
    out_channels: u16,
) {
    let mut resampler = AudioResampler::new(out_rate, out_channels);
    let mut cache: AudioFrameCache<AudioFrame> = Cache::new();
    let mut scratch: Option<(i64, Vec<f32>)> = None;
    let mut current: Option<TimeRange> = None;
    let mut cursor: i64 = 0;

    let channels = out_channels.max(1) as i64;
    let buffer_usec =
        (ring.capacity() as i64 / channels) * 1_000_000 / out_rate.max(1) as i64;
    let wake = Duration::from_micros((buffer_usec / 2).max(1) as u64);

    let mut epoch = Instant::now();

    loop {
        let mut drained = false;
        match rx.recv_timeout(wake) {
            Ok(action) => {
                apply(action, &ring, &written, &mut scratch, &mut cache, &mut resampler, &mut current);
                drained = true;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if drained {
            while let Ok(action) = rx.try_recv() {
                apply(action, &ring, &written, &mut scratch, &mut cache, &mut resampler, &mut current);
            }
        }

        if invalidate.swap(false, Ordering::AcqRel) {
            current = None;
            cursor = 0;
            epoch = Instant::now();
        }

        let snapshot = clock.lock().unwrap().clone();
        if snapshot.paused() {
            continue;
        }

        // Drift correction: if the audio-time we've queued up has drifted
        // from real elapsed wall time by more than one buffer's worth,
        // resync. Being ahead (the normal, buffered-ahead case) is
        // tolerated up to twice that, since falling behind is the only
        // direction that actually produces an audible stall.
        let expected = epoch.elapsed().as_micros() as i64;
        let diff = cursor - expected;
        let tolerance = if diff >= 0 { 2 * buffer_usec } else { buffer_usec };
        if diff.abs() > tolerance {
            warn!("audio drift resync: cursor {cursor} expected {expected} (diff {diff}us)");
            cursor = expected;
            current = None;
        }

        prune_cache(&mut cache, &snapshot, cursor);
        fill(
            &ring,
            &cache,
            &mut current,
            &mut cursor,
            &snapshot,
            &fader,
            &written,
            &mut resampler,
            &mut scratch,
            out_rate,
            out_channels,
        );
    }
}

fn apply(
    action: Action,
    ring: &RingBuffer<f32>,
    written: &Arc<AtomicI64>,
    scratch: &mut Option<(i64, Vec<f32>)>,
    cache: &mut Cache<AudioFrame>,
    resampler: &mut AudioResampler,
    current: &mut Option<TimeRange>,
) {
    match action {
        Action::Flush => {
            ring.clear();
            written.store(0, Ordering::Release);
            *scratch = None;
            cache.clear();
            *current = None;
            resampler.request_reconfigure();
            debug!("audio thread: flushed");
        }
        Action::Store(frame) => {
            cache.store(frame.pts, frame);
        }
    }
}

/// Keep only frames whose span might still be needed: the same
/// active/stable window the video cache uses, centred on the playhead.
fn prune_cache(cache: &mut Cache<AudioFrame>, clock: &Clock, cursor: i64) {
    let period = clock.period();
    let window = next_ranges(clock, cursor - FRAME_CACHE_USEC, period.min(3 * FRAME_CACHE_USEC)).flatten();
    let mut keep = TimeRangeSet::new();
    for r in window.iter() {
        keep.add(*r);
    }
    cache.limit(&keep);
}

fn frame_covers(frame_pts: i64, frame: &AudioFrame, pos: i64) -> bool {
    pos >= frame_pts && pos < frame_pts + frame.frame_count() as i64
}

fn silence(ticks: i64, channels: usize) -> Vec<f32> {
    vec![0.0f32; ticks.max(0) as usize * channels]
}

/// Pull decoded frames out of `cache` to satisfy the clock's current
/// playback position, writing resampled+gain-applied samples into `ring`.
/// Gaps where no frame covers the needed position are filled with
/// silence rather than blocking, so a stall in decoding never stalls the
/// output device.
#[allow(clippy::too_many_arguments)]
fn fill(
    ring: &RingBuffer<f32>,
    cache: &Cache<AudioFrame>,
    current: &mut Option<TimeRange>,
    cursor: &mut i64,
    clock: &Clock,
    fader: &Arc<Mutex<Fader>>,
    written: &Arc<AtomicI64>,
    resampler: &mut AudioResampler,
    scratch: &mut Option<(i64, Vec<f32>)>,
    out_rate: u32,
    out_channels: u16,
) {
    let channels = out_channels.max(1) as usize;
    let rate = clock.rate();

    for _ in 0..MAX_FILL_STEPS {
        if ring.available_to_write() < channels {
            break;
        }

        if current.is_none_or_empty() {
            let range = next_range(clock, *cursor, clock.period());
            if range.is_empty() {
                break;
            }
            let at = written.load(Ordering::Relaxed) / channels as i64;
            fader.lock().unwrap().ramp_in_at(at, range_fade_samples(out_rate));
            *current = Some(range);
        }

        let range = current.as_mut().expect("current just ensured");
        let forward = range.length >= 0;
        let pos = range.start;
        let remaining = range.length.abs();

        let (produced, consumed_input) = match cache.floor(pos) {
            Some((frame_pts, frame)) if frame_covers(frame_pts, frame, pos) => {
                let consumed_input = (frame.frame_count() as i64).max(1).min(remaining.max(1));
                match resampler.resample(frame, rate) {
                    Ok(resampled) => {
                        let oriented = if forward {
                            resampled
                        } else {
                            match scratch {
                                Some((pts, buf)) if *pts == frame_pts => buf.clone(),
                                _ => {
                                    let reversed = reverse_frames(&resampled, channels);
                                    *scratch = Some((frame_pts, reversed.clone()));
                                    reversed
                                }
                            }
                        };
                        (oriented, consumed_input)
                    }
                    Err(e) => {
                        warn!("audio resample failed: {e}");
                        (silence(remaining.min(SILENCE_CHUNK_TICKS), channels), consumed_input)
                    }
                }
            }
            _ => {
                let gap = remaining.min(SILENCE_CHUNK_TICKS).max(1);
                (silence(gap, channels), gap)
            }
        };

        if !produced.is_empty() {
            write_with_gain(ring, &produced, channels, |i| {
                let at = written.load(Ordering::Relaxed) / channels as i64 + i as i64;
                fader.lock().unwrap().value_at(at)
            });
            let consumed_output = (produced.len() / channels) as i64;
            let expected = written.fetch_add(consumed_output, Ordering::AcqRel) + consumed_output;
            fader.lock().unwrap().settle(expected);
        }

        let signed = if forward { consumed_input } else { -consumed_input };
        range.start += signed;
        range.length -= signed;
        *cursor += consumed_input;

        if range.is_empty() {
            *current = None;
        }
    }
}

/// Small adapter so `fill`'s loop head reads as one condition instead of
/// a nested match — `None` (never started) and `Some(empty)` (just
/// exhausted) both mean "go compute a new range".
trait OptionRangeExt {
    fn is_none_or_empty(&self) -> bool;
}

impl OptionRangeExt for Option<TimeRange> {
    fn is_none_or_empty(&self) -> bool {
        match self {
            None => true,
            Some(r) => r.is_empty(),
        }
    }
}

fn reverse_frames(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels == 0 {
        return interleaved.to_vec();
    }
    let mut out = vec![0.0f32; interleaved.len()];
    let frames = interleaved.len() / channels;
    for f in 0..frames {
        let src = f * channels;
        let dst = (frames - 1 - f) * channels;
        out[dst..dst + channels].copy_from_slice(&interleaved[src..src + channels]);
    }
    out
}

fn write_with_gain(
    ring: &RingBuffer<f32>,
    samples: &[f32],
    channels: usize,
    gain_at: impl Fn(usize) -> f32,
) {
    let mut offset = 0;
    while offset < samples.len() {
        let remaining = samples.len() - offset;
        let mut seg = ring.write_begin(remaining);
        if seg.is_empty() {
            break; // consumer isn't keeping up; drop the tail rather than block
        }
        let n = seg.len();
        let frame_idx_base = offset / channels.max(1);
        for (i, slot) in seg.first.iter_mut().chain(seg.second.iter_mut()).enumerate() {
            let g = gain_at(frame_idx_base + i / channels.max(1));
            *slot = samples[offset + i] * g;
        }
        ring.write_end(n);
        offset += n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fade_interpolates_linearly() {
        let f = Fade { from: 0.0, to: 1.0, start: 0, duration: 100 };
        assert_eq!(f.value_at(0), 0.0);
        assert_eq!(f.value_at(50), 0.5);
        assert_eq!(f.value_at(100), 1.0);
        assert_eq!(f.value_at(200), 1.0);
    }

    #[test]
    fn fader_settles_after_fade_completes() {
        let mut fader = Fader::new(0.0);
        fader.set_at(1.0, 0, 10);
        assert_eq!(fader.value_at(5), 0.5);
        fader.settle(20);
        assert_eq!(fader.value_at(20), 1.0);
    }

    #[test]
    fn fader_ramp_in_starts_at_zero() {
        let mut fader = Fader::new(1.0);
        fader.ramp_in_at(100, 20);
        assert_eq!(fader.value_at(100), 0.0);
        assert_eq!(fader.value_at(110), 0.5);
        assert_eq!(fader.value_at(120), 1.0);
    }

    #[test]
    fn reverse_frames_keeps_channel_grouping() {
        // 2 channels, 3 frames: [L0,R0, L1,R1, L2,R2]
        let input = vec![1.0, -1.0, 2.0, -2.0, 3.0, -3.0];
        let reversed = reverse_frames(&input, 2);
        assert_eq!(reversed, vec![3.0, -3.0, 2.0, -2.0, 1.0, -1.0]);
    }

    #[test]
    fn reverse_frames_is_idempotent_on_empty() {
        let input: Vec<f32> = vec![];
        assert_eq!(reverse_frames(&input, 2), Vec::<f32>::new());
    }

    #[test]
    fn frame_covers_checks_span() {
        let f = AudioFrame { pts: 0, sample_rate: 48000, channels: 2, samples: vec![0.0; 20] };
        assert!(frame_covers(10, &f, 10));
        assert!(frame_covers(10, &f, 19));
        assert!(!frame_covers(10, &f, 20));
        assert!(!frame_covers(10, &f, 9));
    }

    #[test]
    fn silence_fill_advances_and_writes_zeros() {
        let ring = RingBuffer::<f32>::new(64);
        let clock = Clock::new(1000);
        let fader = Arc::new(Mutex::new(Fader::new(1.0)));
        let written = Arc::new(AtomicI64::new(0));
        let mut resampler = AudioResampler::new(48000, 2);
        let mut scratch = None;
        let cache: Cache<AudioFrame> = Cache::new();
        let mut current: Option<TimeRange> = None;
        let mut cursor = 0i64;

        fill(
            &ring, &cache, &mut current, &mut cursor, &clock, &fader, &written, &mut resampler,
            &mut scratch, 48000, 2,
        );

        assert!(written.load(Ordering::Acquire) > 0);
        let seg = ring.read_begin(4);
        assert_eq!(seg.len(), 4);
        assert!(seg.first.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn flush_resets_cache_and_playhead() {
        let ring = Arc::new(RingBuffer::<f32>::new(64));
        let written = Arc::new(AtomicI64::new(7));
        let mut scratch = Some((3, vec![1.0, 2.0]));
        let mut cache: Cache<AudioFrame> = Cache::new();
        cache.store(0, AudioFrame { pts: 0, sample_rate: 48000, channels: 1, samples: vec![0.0; 4] });
        let mut resampler = AudioResampler::new(48000, 1);
        let mut current = Some(TimeRange::new(5, 10));

        apply(Action::Flush, &ring, &written, &mut scratch, &mut cache, &mut resampler, &mut current);

        assert_eq!(written.load(Ordering::Acquire), 0);
        assert!(scratch.is_none());
        assert!(current.is_none());
        assert!(!cache.contains(0));
    }
}
