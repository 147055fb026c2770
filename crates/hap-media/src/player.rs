// crates/hap-media/src/player.rs
//
// The consumer-facing orchestrator. Owns a single mutex over its
// playback state; never calls into the demuxer or an audio thread while
// holding it (locks nest away from this one, never into it) — see
// worker.rs's `MediaWorker`, which plays the same "small public API over
// a few owned threads" role for the editor domain.
//
// `update()` is the per-tick sequence from the spec: resample the wall
// clock, derive the cache window from the clock via `MovieTime`, limit
// the video cache to it, diff against what's already been requested from
// the demuxer, issue reads/seeks, then fetch+decode one packet for the
// current position.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hap_core::clock::{Clock, Direction, LoopMode};
use hap_core::config::PlayerConfig;
use hap_core::error::HapError;
use hap_core::movie_time::next_ranges;
use hap_core::time_range::TimeRangeSet;

use crate::audio_decoder::AudioDecoder;
use crate::audio_output::{AudioOutput, CpalAudioOutput, NullAudioOutput};
use crate::audio_thread::{AudioThread, DEFAULT_RAMP_SAMPLES};
use crate::block_decoder::BlockDecoder;
use crate::cache::LockingPacketCache;
use crate::demuxer::{
    probe_audio_stream, Demuxer, Packet, PacketReceiver, PacketSource, StreamInfo, StreamKind,
};
use crate::texture::{CodecTag, DecodedTexture};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    None,
    Normal,
    Palindrome,
}

impl From<LoopState> for LoopMode {
    fn from(s: LoopState) -> Self {
        match s {
            LoopState::None => LoopMode::Once,
            LoopState::Normal => LoopMode::Loop,
            LoopState::Palindrome => LoopMode::Palindrome,
        }
    }
}

struct Inner {
    clock: Clock,
    loaded: bool,
    width: u32,
    height: u32,
    duration: i64,
    volume: f32,
    fetch_timeout: Duration,
    error: Option<HapError>,
    current_texture: Option<DecodedTexture>,
    frame_is_new: bool,
    requested: TimeRangeSet,
    video_block_size: usize,
}

impl Inner {
    fn new(config: &PlayerConfig) -> Self {
        Self {
            clock: Clock::new(1),
            loaded: false,
            width: 0,
            height: 0,
            duration: 0,
            volume: 1.0,
            fetch_timeout: config.fetch_timeout,
            error: None,
            current_texture: None,
            frame_is_new: false,
            requested: TimeRangeSet::new(),
            video_block_size: 0,
        }
    }
}

/// Receives demuxer callbacks on the demuxer's own thread and files
/// packets into the video cache / error slot, or through the audio
/// decode+resample pipeline. Holds only the handles it needs, never the
/// Player's own mutex, so it can't deadlock against it.
struct PlayerReceiver {
    video_cache: Arc<LockingPacketCache<Vec<u8>>>,
    error_slot: Arc<Mutex<Option<HapError>>>,
    video_stream: Arc<AtomicI64>,
    audio_stream: Arc<AtomicI64>,
    audio_decoder: Arc<Mutex<Option<AudioDecoder>>>,
    audio_thread: Option<Arc<AudioThread>>,
    loaded: Arc<std::sync::atomic::AtomicBool>,
    meta: Arc<Mutex<(i64, (i32, i32), u32, u32)>>, // duration, time_base, width, height
}

impl PacketReceiver for PlayerReceiver {
    fn found_movie(&mut self, duration: i64, time_base: (i32, i32)) {
        let mut meta = self.meta.lock().unwrap();
        meta.0 = duration;
        meta.1 = time_base;
    }

    fn found_stream(&mut self, info: &StreamInfo) -> Result<bool, HapError> {
        match info.kind {
            StreamKind::Video => {
                if self.video_stream.load(Ordering::Acquire) >= 0 {
                    return Ok(false); // already have a video stream
                }
                self.video_stream.store(info.index as i64, Ordering::Release);
                Ok(true)
            }
            StreamKind::Audio => {
                // The stream to decode was already picked by `Player::load`
                // (it needed the codec parameters to build the decoder
                // before the demuxer thread even started); only accept
                // packets from that one stream.
                Ok(self.audio_stream.load(Ordering::Acquire) == info.index as i64)
            }
        }
    }

    fn found_all_streams(&mut self) {
        self.loaded.store(true, Ordering::Release);
    }

    fn read_packet(&mut self, packet: Packet) {
        let stream_index = packet.stream_index as i64;
        if self.video_stream.load(Ordering::Acquire) == stream_index {
            self.video_cache.store(packet.pts, packet.data);
            return;
        }
        if self.audio_stream.load(Ordering::Acquire) != stream_index {
            return;
        }
        let audio_thread = match self.audio_thread.as_ref() {
            Some(t) => Arc::clone(t),
            None => return,
        };
        let result = {
            let mut decoder = self.audio_decoder.lock().unwrap();
            match decoder.as_mut() {
                Some(decoder) => {
                    let sent = decoder.send_packet(&packet.data, packet.pts);
                    if sent.is_ok() {
                        while let Ok(Some(frame)) = decoder.receive_frame() {
                            audio_thread.send(frame);
                        }
                    }
                    sent
                }
                None => return,
            }
        };
        if let Err(e) = result {
            self.error(e);
        }
    }

    fn discontinuity(&mut self) {
        self.video_cache.clear();
    }

    fn end_movie(&mut self) {}

    fn error(&mut self, err: HapError) {
        *self.error_slot.lock().unwrap() = Some(err);
    }
}

/// The playback engine. `load` spawns the demuxer thread; every other
/// method is a short, lock-protected state update intended to be called
/// from any thread (typically the host's UI thread).
pub struct Player<D: BlockDecoder> {
    config: PlayerConfig,
    inner: Mutex<Inner>,
    video_cache: Arc<LockingPacketCache<Vec<u8>>>,
    error_slot: Arc<Mutex<Option<HapError>>>,
    video_stream: Arc<AtomicI64>,
    audio_stream: Arc<AtomicI64>,
    audio_thread: Mutex<Option<Arc<AudioThread>>>,
    audio_output: Mutex<Option<Box<dyn AudioOutput>>>,
    loaded_flag: Arc<std::sync::atomic::AtomicBool>,
    meta: Arc<Mutex<(i64, (i32, i32), u32, u32)>>,
    demuxer: Mutex<Option<Demuxer>>,
    block_decoder: Arc<D>,
    started_at: Instant,
}

impl<D: BlockDecoder + 'static> Player<D> {
    pub fn new(config: PlayerConfig, block_decoder: Arc<D>) -> Self {
        Self {
            inner: Mutex::new(Inner::new(&config)),
            config,
            video_cache: Arc::new(LockingPacketCache::new()),
            error_slot: Arc::new(Mutex::new(None)),
            video_stream: Arc::new(AtomicI64::new(-1)),
            audio_stream: Arc::new(AtomicI64::new(-1)),
            audio_thread: Mutex::new(None),
            audio_output: Mutex::new(None),
            loaded_flag: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            meta: Arc::new(Mutex::new((0, (1, 1_000_000), 0, 0))),
            demuxer: Mutex::new(None),
            block_decoder,
            started_at: Instant::now(),
        }
    }

    /// Probe the file for an audio stream and, if one exists, build the
    /// decoder/resampler/output-device trio for it. Runs synchronously on
    /// the caller's thread before the demuxer is spawned, since the
    /// decoder needs the stream's codec parameters up front.
    fn open_audio(&self, path: &PathBuf) -> (i64, Arc<Mutex<Option<AudioDecoder>>>, Option<Arc<AudioThread>>) {
        let audio_decoder_slot = Arc::new(Mutex::new(None::<AudioDecoder>));
        let probe = match probe_audio_stream(path) {
            Ok(found) => found,
            Err(e) => {
                log::warn!("audio probe failed, playing video only: {e:#}");
                None
            }
        };
        let Some((index, params)) = probe else {
            return (-1, audio_decoder_slot, None);
        };
        let decoder = match AudioDecoder::new(params) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("audio decoder open failed, playing video only: {e}");
                return (-1, audio_decoder_slot, None);
            }
        };
        let sample_rate = decoder.sample_rate();
        let channels = decoder.channels();
        *audio_decoder_slot.lock().unwrap() = Some(decoder);

        let frames_capacity = (sample_rate / self.config.ring_buffer_divisor.max(1)).max(1) as usize;
        let ring_capacity = frames_capacity * channels.max(1) as usize;
        let thread = Arc::new(AudioThread::new(sample_rate, channels, ring_capacity));

        let mut output: Box<dyn AudioOutput> =
            Box::new(CpalAudioOutput::new(Arc::clone(thread.ring()), sample_rate, channels));
        if let Err(e) = output.start() {
            log::warn!("audio output unavailable, falling back to silence: {e}");
            output = Box::new(NullAudioOutput::new(sample_rate, channels));
            let _ = output.start();
        }
        *self.audio_output.lock().unwrap() = Some(output);

        (index as i64, audio_decoder_slot, Some(thread))
    }

    pub fn load(&self, path: PathBuf) {
        self.close();
        let (audio_stream_index, audio_decoder, audio_thread) = self.open_audio(&path);
        self.audio_stream.store(audio_stream_index, Ordering::Release);
        *self.audio_thread.lock().unwrap() = audio_thread.clone();

        let receiver = PlayerReceiver {
            video_cache: Arc::clone(&self.video_cache),
            error_slot: Arc::clone(&self.error_slot),
            video_stream: Arc::clone(&self.video_stream),
            audio_stream: Arc::clone(&self.audio_stream),
            audio_decoder,
            audio_thread,
            loaded: Arc::clone(&self.loaded_flag),
            meta: Arc::clone(&self.meta),
        };
        let demuxer = Demuxer::open(path, receiver);
        demuxer.read(0);
        *self.demuxer.lock().unwrap() = Some(demuxer);
    }

    /// Test/embedding entry point: spawn the demuxer thread against an
    /// arbitrary `PacketSource` instead of opening a real file. No audio
    /// pipeline is built here — `PacketSource` carries no codec
    /// parameters to build an `AudioDecoder` from, so embedders that want
    /// audio under test should exercise `AudioDecoder`/`AudioThread` on
    /// their own and leave this entry point to video-only scenarios.
    pub fn load_with_source<S, F>(&self, open_source: F)
    where
        S: PacketSource + 'static,
        F: FnOnce() -> anyhow::Result<S> + Send + 'static,
    {
        self.close();
        let receiver = PlayerReceiver {
            video_cache: Arc::clone(&self.video_cache),
            error_slot: Arc::clone(&self.error_slot),
            video_stream: Arc::clone(&self.video_stream),
            audio_stream: Arc::clone(&self.audio_stream),
            audio_decoder: Arc::new(Mutex::new(None)),
            audio_thread: None,
            loaded: Arc::clone(&self.loaded_flag),
            meta: Arc::clone(&self.meta),
        };
        let demuxer = Demuxer::spawn(receiver, open_source);
        demuxer.read(0);
        *self.demuxer.lock().unwrap() = Some(demuxer);
    }

    pub fn close(&self) {
        *self.demuxer.lock().unwrap() = None; // Drop joins the thread.
        self.video_cache.clear();
        self.loaded_flag.store(false, Ordering::Release);
        self.video_stream.store(-1, Ordering::Release);
        self.audio_stream.store(-1, Ordering::Release);
        if let Some(mut output) = self.audio_output.lock().unwrap().take() {
            output.stop();
        }
        *self.audio_thread.lock().unwrap() = None; // Drop joins the worker thread.
        let mut inner = self.inner.lock().unwrap();
        *inner = Inner::new(&self.config);
    }

    fn now_ticks(&self) -> i64 {
        self.started_at.elapsed().as_micros() as i64
    }

    /// Re-anchor (and, unless `soft`, flush) the `AudioThread`'s private
    /// clock so buffered audio tracks a position/rate/pause change just
    /// made to `inner.clock`.
    fn sync_audio(&self, inner: &Inner, at: i64, soft: bool) {
        if let Some(thread) = self.audio_thread.lock().unwrap().as_ref() {
            let time = inner.clock.get_time_at(at);
            let rate = inner.clock.rate();
            thread.sync(time, at, rate, soft);
        }
    }

    /// Pull in whatever `found_movie`/`found_stream` have learned since
    /// the last call and finish wiring up playback state. Call this once
    /// loading metadata is expected to have landed (or poll it from
    /// `update()`, as this implementation does).
    fn adopt_metadata(&self, inner: &mut Inner) {
        if inner.loaded || !self.loaded_flag.load(Ordering::Acquire) {
            return;
        }
        let meta = self.meta.lock().unwrap();
        inner.duration = meta.0.max(1);
        inner.clock = Clock::new(inner.duration);
        inner.clock.sync_at(0, self.now_ticks());
        inner.loaded = true;
    }

    /// Per-tick update: resample the clock, refresh the cache window,
    /// issue reads, and decode one packet for the current position.
    pub fn update(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.adopt_metadata(&mut inner);
        if !inner.loaded {
            return;
        }
        if let Some(err) = self.error_slot.lock().unwrap().take() {
            inner.error = Some(err);
        }

        let now = self.now_ticks();
        let pos = inner.clock.get_time_at(now);
        let cache_usec = self.config.cache_usec.max(1);
        let period = inner.clock.period();

        // What the next tick's worth of playback needs (drives reads) vs.
        // the wider window around it the cache should retain (drives limit).
        let future = next_ranges(&inner.clock, now, period.min(cache_usec)).flatten();
        let cache_seq =
            next_ranges(&inner.clock, now - cache_usec, period.min(2 * cache_usec)).flatten();

        let mut cache_set = TimeRangeSet::new();
        for r in cache_seq.iter() {
            cache_set.add(*r);
        }
        self.video_cache.limit(&cache_set);

        // Drop any previously-requested range that has fallen out of the
        // retained window — re-requesting it later starts fresh.
        inner.requested = inner.requested.intersection(&cache_set);

        let mut future_set = TimeRangeSet::new();
        for r in future.iter() {
            future_set.add(*r);
        }
        let mut to_request = future_set;
        to_request.remove_set(&inner.requested);

        if !to_request.is_empty() {
            if let Some(demuxer) = self.demuxer.lock().unwrap().as_ref() {
                // A read close to the demuxer's current position continues
                // forward without a seek; otherwise jump there first.
                const NEAR_READ_USEC: i64 = 250_000;
                for r in to_request.iter() {
                    let near = demuxer
                        .last_read_time()
                        .is_some_and(|last| (r.earliest() - last).abs() <= NEAR_READ_USEC);
                    if !near {
                        demuxer.seek_time(r.earliest());
                    }
                    demuxer.read(r.latest());
                    inner.requested.add(*r);
                }
            }
        }

        if let Some(data) = self.video_cache.fetch(pos, inner.fetch_timeout) {
            let block_size = inner.video_block_size.max(data.len().max(1));
            let blocks = vec![data];
            let mut out = vec![0u8; block_size];
            if self
                .block_decoder
                .decode_block(0, &blocks[0], &mut out)
                .is_ok()
            {
                inner.current_texture =
                    Some(DecodedTexture::new(pos, inner.width, inner.height, CodecTag::Hap1, out));
                inner.frame_is_new = true;
            } else {
                inner.error = Some(HapError::decode("block decoder rejected packet"));
            }
        } else {
            inner.frame_is_new = false;
        }
    }

    // ── Transport ───────────────────────────────────────────────────────

    pub fn play(&self) {
        let mut inner = self.inner.lock().unwrap();
        let at = self.now_ticks();
        inner.clock.set_paused_at(false, at);
        self.sync_audio(&inner, at, true);
    }

    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        let at = self.now_ticks();
        inner.clock.sync_at(0, at);
        inner.clock.set_paused_at(true, at);
        self.sync_audio(&inner, at, false);
    }

    pub fn set_paused(&self, paused: bool) {
        let mut inner = self.inner.lock().unwrap();
        let at = self.now_ticks();
        inner.clock.set_paused_at(paused, at);
        // Pausing hard-flushes the audio thread so stale buffered samples
        // don't keep playing out while the clock is stopped; unpausing
        // just re-anchors.
        self.sync_audio(&inner, at, !paused);
        if let Some(thread) = self.audio_thread.lock().unwrap().as_ref() {
            let target = if paused { 0.0 } else { inner.volume };
            thread.set_volume(target, thread.written_samples(), DEFAULT_RAMP_SAMPLES);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().unwrap().clock.paused()
    }

    pub fn is_playing(&self) -> bool {
        !self.is_paused() && self.is_loaded()
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.lock().unwrap().loaded
    }

    pub fn is_frame_new(&self) -> bool {
        self.inner.lock().unwrap().frame_is_new
    }

    pub fn get_width(&self) -> u32 {
        self.inner.lock().unwrap().width
    }

    pub fn get_height(&self) -> u32 {
        self.inner.lock().unwrap().height
    }

    pub fn get_duration(&self) -> i64 {
        self.inner.lock().unwrap().duration
    }

    /// Position as a fraction of the full duration, in `[0, 1]`.
    pub fn get_position(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        if inner.duration <= 1 {
            return 0.0;
        }
        let at = self.now_ticks();
        inner.clock.get_time_at(at) as f64 / (inner.duration - 1) as f64
    }

    pub fn set_position(&self, pct: f64) {
        let mut inner = self.inner.lock().unwrap();
        let at = self.now_ticks();
        let target = ((pct.clamp(0.0, 1.0)) * (inner.duration - 1).max(0) as f64).round() as i64;
        inner.clock.sync_at(target, at);
        inner.requested.clear();
        if let Some(demuxer) = self.demuxer.lock().unwrap().as_ref() {
            demuxer.seek_time(target);
        }
        self.sync_audio(&inner, at, false);
    }

    pub fn get_speed(&self) -> f64 {
        self.inner.lock().unwrap().clock.rate()
    }

    pub fn set_speed(&self, rate: f64) {
        let mut inner = self.inner.lock().unwrap();
        let at = self.now_ticks();
        inner.clock.set_rate_at(rate, at);
        self.sync_audio(&inner, at, true);
    }

    pub fn get_loop_state(&self) -> LoopState {
        match self.inner.lock().unwrap().clock.mode() {
            LoopMode::Once => LoopState::None,
            LoopMode::Loop => LoopState::Normal,
            LoopMode::Palindrome => LoopState::Palindrome,
        }
    }

    pub fn set_loop_state(&self, state: LoopState) {
        self.inner.lock().unwrap().clock.set_mode(state.into());
    }

    pub fn get_volume(&self) -> f32 {
        self.inner.lock().unwrap().volume
    }

    pub fn set_volume(&self, v: f32) {
        let mut inner = self.inner.lock().unwrap();
        inner.volume = v.clamp(0.0, 1.0);
        if let Some(thread) = self.audio_thread.lock().unwrap().as_ref() {
            if !inner.clock.paused() {
                thread.set_volume(inner.volume, thread.written_samples(), DEFAULT_RAMP_SAMPLES);
            }
        }
    }

    pub fn get_is_movie_done(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.clock.get_done(self.now_ticks())
    }

    pub fn get_error(&self) -> Option<String> {
        self.inner.lock().unwrap().error.as_ref().map(|e| e.to_string())
    }

    pub fn get_timeout(&self) -> Duration {
        self.inner.lock().unwrap().fetch_timeout
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.inner.lock().unwrap().fetch_timeout = timeout;
    }

    pub fn get_direction(&self) -> Direction {
        let inner = self.inner.lock().unwrap();
        inner.clock.get_direction_at(self.now_ticks())
    }

    /// Step one tick and pause, regardless of current speed/direction.
    pub fn next_frame(&self) {
        let mut inner = self.inner.lock().unwrap();
        let at = self.now_ticks();
        let pos = inner.clock.get_time_at(at) + 1;
        inner.clock.sync_at(pos, at);
        inner.clock.set_paused_at(true, at);
        self.sync_audio(&inner, at, false);
    }

    pub fn previous_frame(&self) {
        let mut inner = self.inner.lock().unwrap();
        let at = self.now_ticks();
        let pos = inner.clock.get_time_at(at) - 1;
        inner.clock.sync_at(pos.max(0), at);
        inner.clock.set_paused_at(true, at);
        self.sync_audio(&inner, at, false);
    }

    pub fn first_frame(&self) {
        let mut inner = self.inner.lock().unwrap();
        let at = self.now_ticks();
        inner.clock.sync_at(0, at);
        inner.clock.set_paused_at(true, at);
        self.sync_audio(&inner, at, false);
    }

    pub fn get_total_num_frames(&self) -> i64 {
        self.inner.lock().unwrap().duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demuxer::{Packet as DemuxPacket, StreamInfo as DemuxStreamInfo, StreamKind as DemuxStreamKind};

    struct PassthroughDecoder;
    impl BlockDecoder for PassthroughDecoder {
        fn decode_block(&self, _i: usize, compressed: &[u8], out: &mut [u8]) -> Result<(), String> {
            let n = compressed.len().min(out.len());
            out[..n].copy_from_slice(&compressed[..n]);
            Ok(())
        }
    }

    struct FixedSource {
        streams: Vec<DemuxStreamInfo>,
        packets: Vec<DemuxPacket>,
        cursor: usize,
    }

    impl PacketSource for FixedSource {
        fn duration(&self) -> i64 {
            100
        }
        fn time_base(&self) -> (i32, i32) {
            (1, 1_000_000)
        }
        fn stream_infos(&self) -> Vec<DemuxStreamInfo> {
            self.streams.clone()
        }
        fn seek_time(&mut self, _pts: i64) -> anyhow::Result<()> {
            self.cursor = 0;
            Ok(())
        }
        fn seek_frame(&mut self, frame: i64) -> anyhow::Result<()> {
            self.seek_time(frame)
        }
        fn next_packet(&mut self) -> Option<DemuxPacket> {
            let p = self.packets.get(self.cursor)?.clone();
            self.cursor += 1;
            Some(p)
        }
    }

    fn make_player() -> Player<PassthroughDecoder> {
        Player::new(PlayerConfig::default(), Arc::new(PassthroughDecoder))
    }

    #[test]
    fn starts_unloaded_and_paused_with_no_error() {
        let p = make_player();
        assert!(!p.is_loaded());
        assert!(p.get_error().is_none());
    }

    #[test]
    fn set_speed_and_loop_state_round_trip() {
        let p = make_player();
        p.set_speed(2.0);
        assert_eq!(p.get_speed(), 2.0);
        p.set_loop_state(LoopState::Palindrome);
        assert_eq!(p.get_loop_state(), LoopState::Palindrome);
    }

    #[test]
    fn set_volume_clamps_to_unit_range() {
        let p = make_player();
        p.set_volume(5.0);
        assert_eq!(p.get_volume(), 1.0);
        p.set_volume(-1.0);
        assert_eq!(p.get_volume(), 0.0);
    }

    #[test]
    fn load_with_fake_source_becomes_loaded_after_update() {
        let p = make_player();
        let source = FixedSource {
            streams: vec![DemuxStreamInfo {
                index: 0,
                kind: DemuxStreamKind::Video,
                time_base: (1, 1_000_000),
                duration: 100,
            }],
            packets: vec![DemuxPacket {
                stream_index: 0,
                pts: 0,
                duration: 100,
                data: vec![7, 7, 7, 7],
                keyframe: true,
            }],
            cursor: 0,
        };
        p.load_with_source(move || Ok::<_, anyhow::Error>(source));
        std::thread::sleep(Duration::from_millis(50));
        p.update();
        assert!(p.is_loaded());
        assert_eq!(p.get_duration(), 100);
    }
}
