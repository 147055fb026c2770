// crates/hap-media/src/demuxer.rs
//
// A dedicated thread that owns the input format context and drives a
// `PacketReceiver` with movie/stream/packet callbacks. Ported from the
// original ofxHapPlayer's Demuxer.h; the action-queue-over-a-channel
// thread shape follows the playback decode thread in worker.rs, and the
// ffmpeg open/seek/packet idiom follows decode.rs's `LiveDecoder`.
//
// `PacketSource` separates "where packets come from" from the action
// loop so the loop itself — the part with the action queue and the
// cooperative-cancel behaviour worth testing — can run against a fake
// source with no real media file.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};

use hap_core::error::HapError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
}

#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: StreamKind,
    pub time_base: (i32, i32),
    pub duration: i64,
}

#[derive(Debug, Clone)]
pub struct Packet {
    pub stream_index: usize,
    pub pts: i64,
    pub duration: i64,
    pub data: Vec<u8>,
    pub keyframe: bool,
}

/// Sentinel for "no packet has been read on this stream since the last
/// seek" — a fresh pts/target can never legitimately equal it.
const UNKNOWN_READ_TIME: i64 = i64::MIN;

/// Callbacks the Demuxer drives on its own thread. Implementations should
/// return quickly — anything slow (decoding, resampling) belongs on
/// another thread fed by these callbacks.
pub trait PacketReceiver: Send {
    fn found_movie(&mut self, duration: i64, time_base: (i32, i32));
    /// Return `Ok(true)` to read packets from this stream, `Ok(false)` to
    /// ignore it, or `Err` to abort opening the movie entirely.
    fn found_stream(&mut self, info: &StreamInfo) -> Result<bool, HapError>;
    fn found_all_streams(&mut self);
    fn read_packet(&mut self, packet: Packet);
    fn discontinuity(&mut self);
    fn end_movie(&mut self);
    fn error(&mut self, err: HapError);
}

/// Where the demuxer thread actually gets its packets from. Implemented
/// against `ffmpeg-the-third` by `FfmpegSource`; swapped for a fake in
/// tests of the action loop below.
pub trait PacketSource: Send {
    fn duration(&self) -> i64;
    fn time_base(&self) -> (i32, i32);
    fn stream_infos(&self) -> Vec<StreamInfo>;
    fn seek_time(&mut self, pts: i64) -> anyhow::Result<()>;
    fn seek_frame(&mut self, frame: i64) -> anyhow::Result<()>;
    /// `None` means end of stream.
    fn next_packet(&mut self) -> Option<Packet>;
}

enum Action {
    Read(i64),
    SeekTime(i64),
    SeekFrame(i64),
    Cancel,
}

pub struct Demuxer {
    tx: Sender<Action>,
    active: Arc<AtomicBool>,
    last_read_time: Arc<AtomicI64>,
    last_seek_time: Arc<AtomicI64>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Demuxer {
    pub fn open<R>(path: PathBuf, receiver: R) -> Self
    where
        R: PacketReceiver + 'static,
    {
        Self::spawn(receiver, move || ffmpeg_source::FfmpegSource::open(&path))
    }

    /// Spawn the demuxer thread against an arbitrary `PacketSource`
    /// factory. `open()` is the production entry point; tests use this
    /// directly with a fake source.
    pub fn spawn<R, S, F>(mut receiver: R, open_source: F) -> Self
    where
        R: PacketReceiver + 'static,
        S: PacketSource + 'static,
        F: FnOnce() -> anyhow::Result<S> + Send + 'static,
    {
        let (tx, rx) = bounded::<Action>(32);
        let active = Arc::new(AtomicBool::new(true));
        let thread_active = Arc::clone(&active);

        let handle = thread::spawn(move || {
            let mut source = match open_source() {
                Ok(s) => s,
                Err(e) => {
                    receiver.error(HapError::format(format!("{e:#} (may not be a Hap movie)")));
                    thread_active.store(false, Ordering::Release);
                    return;
                }
            };
            run(&mut source, &mut receiver, rx, &thread_active);
        });

        Self {
            tx,
            active,
            last_read_time: Arc::new(AtomicI64::new(UNKNOWN_READ_TIME)),
            last_seek_time: Arc::new(AtomicI64::new(UNKNOWN_READ_TIME)),
            handle: Some(handle),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Enqueue a read that runs until every kept stream's last-read pts
    /// reaches `target` (`pts + duration - 1 >= target`) or end-of-stream.
    pub fn read(&self, target: i64) {
        self.last_read_time.store(target, Ordering::Release);
        let _ = self.tx.send(Action::Read(target));
    }

    pub fn seek_time(&self, pts: i64) {
        self.last_seek_time.store(pts, Ordering::Release);
        let _ = self.tx.send(Action::SeekTime(pts));
    }

    pub fn seek_frame(&self, frame: i64) {
        self.last_seek_time.store(frame, Ordering::Release);
        let _ = self.tx.send(Action::SeekFrame(frame));
    }

    /// The target passed to the most recent `read()` call, thread-affine to
    /// the caller (set synchronously, not once the thread executes it).
    pub fn last_read_time(&self) -> Option<i64> {
        match self.last_read_time.load(Ordering::Acquire) {
            UNKNOWN_READ_TIME => None,
            t => Some(t),
        }
    }

    /// The pts/frame passed to the most recent `seek_time`/`seek_frame`
    /// call, thread-affine to the caller.
    pub fn last_seek_time(&self) -> Option<i64> {
        match self.last_seek_time.load(Ordering::Acquire) {
            UNKNOWN_READ_TIME => None,
            t => Some(t),
        }
    }

    /// Cooperative cancel: drains the queued actions. Cannot interrupt a
    /// packet read already in flight on the demuxer thread.
    pub fn cancel(&self) {
        let _ = self.tx.send(Action::Cancel);
    }
}

/// Probe a file for its first audio stream's codec parameters, without
/// spawning a demuxer thread. `Player::load` uses this synchronously
/// before opening the real `Demuxer` so it can build an `AudioDecoder`
/// ahead of time and tell `PacketReceiver` which stream index to route to
/// it; `Ok(None)` means the file has no audio stream.
pub(crate) fn probe_audio_stream(
    path: &std::path::Path,
) -> anyhow::Result<Option<(usize, ffmpeg_the_third::codec::Parameters)>> {
    ffmpeg_source::probe_audio_stream(path)
}

impl Drop for Demuxer {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

fn run<S: PacketSource, R: PacketReceiver>(
    source: &mut S,
    receiver: &mut R,
    rx: Receiver<Action>,
    active: &AtomicBool,
) {
    receiver.found_movie(source.duration(), source.time_base());

    let mut wanted = Vec::new();
    for info in source.stream_infos() {
        match receiver.found_stream(&info) {
            Ok(true) => wanted.push(info.index),
            Ok(false) => {}
            Err(e) => {
                receiver.error(e);
                active.store(false, Ordering::Release);
                return;
            }
        }
    }
    receiver.found_all_streams();

    if wanted.is_empty() {
        receiver.error(HapError::format("no playable video or audio stream"));
        active.store(false, Ordering::Release);
        return;
    }

    // Last pts (inclusive of duration) delivered per kept stream; reset to
    // unknown on every seek so a `Read` can't consider a stale position
    // "caught up".
    let mut last_read: HashMap<usize, i64> =
        wanted.iter().map(|&idx| (idx, UNKNOWN_READ_TIME)).collect();

    'outer: while active.load(Ordering::Acquire) {
        let action = match rx.recv() {
            Ok(a) => a,
            Err(_) => break,
        };
        match action {
            Action::Cancel => {
                while rx.try_recv().is_ok() {}
            }
            Action::SeekTime(pts) => match source.seek_time(pts) {
                Ok(()) => {
                    for v in last_read.values_mut() {
                        *v = UNKNOWN_READ_TIME;
                    }
                    receiver.discontinuity();
                }
                Err(e) => receiver.error(HapError::format(format!("seek: {e:#}"))),
            },
            Action::SeekFrame(frame) => match source.seek_frame(frame) {
                Ok(()) => {
                    for v in last_read.values_mut() {
                        *v = UNKNOWN_READ_TIME;
                    }
                    receiver.discontinuity();
                }
                Err(e) => receiver.error(HapError::format(format!("seek: {e:#}"))),
            },
            Action::Read(target) => loop {
                let caught_up = wanted
                    .iter()
                    .all(|idx| last_read.get(idx).copied().unwrap_or(UNKNOWN_READ_TIME) >= target);
                if caught_up {
                    break;
                }
                match source.next_packet() {
                    Some(packet) if wanted.contains(&packet.stream_index) => {
                        let covers_through = packet.pts + packet.duration.max(1) - 1;
                        last_read.insert(packet.stream_index, covers_through);
                        receiver.read_packet(packet);
                    }
                    Some(_) => {}
                    None => {
                        receiver.end_movie();
                        break 'outer;
                    }
                }
            },
        }
    }
    active.store(false, Ordering::Release);
}

mod ffmpeg_source {
    use super::{Packet, PacketSource, StreamInfo, StreamKind};
    use std::path::Path;

    use ffmpeg_the_third as ffmpeg;
    use ffmpeg::format::context::Input;
    use ffmpeg::media::Type;

    const AV_TIME_BASE: i32 = 1_000_000;

    pub struct FfmpegSource {
        ictx: Input,
    }

    impl FfmpegSource {
        pub fn open(path: &Path) -> anyhow::Result<Self> {
            let ictx = ffmpeg::format::input(path)?;
            Ok(Self { ictx })
        }
    }

    impl PacketSource for FfmpegSource {
        fn duration(&self) -> i64 {
            self.ictx.duration()
        }

        fn time_base(&self) -> (i32, i32) {
            (1, AV_TIME_BASE)
        }

        fn stream_infos(&self) -> Vec<StreamInfo> {
            self.ictx
                .streams()
                .filter_map(|stream| {
                    let kind = match stream.parameters().medium() {
                        Type::Video => StreamKind::Video,
                        Type::Audio => StreamKind::Audio,
                        _ => return None,
                    };
                    let tb = stream.time_base();
                    Some(StreamInfo {
                        index: stream.index(),
                        kind,
                        time_base: (tb.numerator(), tb.denominator()),
                        duration: stream.duration(),
                    })
                })
                .collect()
        }

        fn seek_time(&mut self, pts: i64) -> anyhow::Result<()> {
            self.ictx.seek(pts, ..pts)?;
            Ok(())
        }

        fn seek_frame(&mut self, frame: i64) -> anyhow::Result<()> {
            self.ictx.seek(frame, ..frame)?;
            Ok(())
        }

        fn next_packet(&mut self) -> Option<Packet> {
            let (stream, packet) = self.ictx.packets().next()?;
            let pts = packet.pts().unwrap_or(0);
            let duration = packet.duration() as i64;
            let keyframe = packet.is_key();
            let data = packet.data().map(|d| d.to_vec()).unwrap_or_default();
            Some(Packet { stream_index: stream.index(), pts, duration, data, keyframe })
        }
    }

    pub fn probe_audio_stream(
        path: &Path,
    ) -> anyhow::Result<Option<(usize, ffmpeg::codec::Parameters)>> {
        let ictx = ffmpeg::format::input(path)?;
        Ok(ictx
            .streams()
            .find(|s| s.parameters().medium() == Type::Audio)
            .map(|s| (s.index(), s.parameters())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct FakeSource {
        streams: Vec<StreamInfo>,
        packets: Vec<Packet>,
        cursor: usize,
        seeks: Vec<i64>,
    }

    impl PacketSource for FakeSource {
        fn duration(&self) -> i64 {
            1000
        }
        fn time_base(&self) -> (i32, i32) {
            (1, 1000)
        }
        fn stream_infos(&self) -> Vec<StreamInfo> {
            self.streams.clone()
        }
        fn seek_time(&mut self, pts: i64) -> anyhow::Result<()> {
            self.seeks.push(pts);
            self.cursor = self.packets.iter().position(|p| p.pts >= pts).unwrap_or(self.packets.len());
            Ok(())
        }
        fn seek_frame(&mut self, frame: i64) -> anyhow::Result<()> {
            self.seek_time(frame)
        }
        fn next_packet(&mut self) -> Option<Packet> {
            let p = self.packets.get(self.cursor)?.clone();
            self.cursor += 1;
            Some(p)
        }
    }

    #[derive(Default)]
    struct Recorder {
        movies: Vec<(i64, (i32, i32))>,
        packets: Vec<Packet>,
        discontinuities: u32,
        ended: bool,
        errors: Vec<String>,
    }

    struct RecordingReceiver(Arc<Mutex<Recorder>>);

    impl PacketReceiver for RecordingReceiver {
        fn found_movie(&mut self, duration: i64, time_base: (i32, i32)) {
            self.0.lock().unwrap().movies.push((duration, time_base));
        }
        fn found_stream(&mut self, _info: &StreamInfo) -> Result<bool, HapError> {
            Ok(true)
        }
        fn found_all_streams(&mut self) {}
        fn read_packet(&mut self, packet: Packet) {
            self.0.lock().unwrap().packets.push(packet);
        }
        fn discontinuity(&mut self) {
            self.0.lock().unwrap().discontinuities += 1;
        }
        fn end_movie(&mut self) {
            self.0.lock().unwrap().ended = true;
        }
        fn error(&mut self, err: HapError) {
            self.0.lock().unwrap().errors.push(err.to_string());
        }
    }

    fn fake_packets(n: usize) -> Vec<Packet> {
        (0..n)
            .map(|i| Packet {
                stream_index: 0,
                pts: i as i64,
                duration: 1,
                data: vec![i as u8],
                keyframe: i == 0,
            })
            .collect()
    }

    #[test]
    fn reads_packets_in_order_then_ends() {
        let recorder = Arc::new(Mutex::new(Recorder::default()));
        let recv = RecordingReceiver(Arc::clone(&recorder));
        let source = FakeSource {
            streams: vec![StreamInfo { index: 0, kind: StreamKind::Video, time_base: (1, 1000), duration: 10 }],
            packets: fake_packets(3),
            cursor: 0,
            seeks: Vec::new(),
        };
        let demuxer = Demuxer::spawn(recv, move || Ok::<_, anyhow::Error>(source));
        // Target past the last packet's pts so the read runs until EOF.
        demuxer.read(10);
        std::thread::sleep(Duration::from_millis(50));
        let r = recorder.lock().unwrap();
        assert_eq!(r.packets.len(), 3);
        assert_eq!(r.packets[0].pts, 0);
        assert_eq!(r.packets[2].pts, 2);
        assert!(r.ended);
    }

    #[test]
    fn read_stops_once_target_pts_is_covered() {
        let recorder = Arc::new(Mutex::new(Recorder::default()));
        let recv = RecordingReceiver(Arc::clone(&recorder));
        let source = FakeSource {
            streams: vec![StreamInfo { index: 0, kind: StreamKind::Video, time_base: (1, 1000), duration: 10 }],
            packets: fake_packets(5),
            cursor: 0,
            seeks: Vec::new(),
        };
        let demuxer = Demuxer::spawn(recv, move || Ok::<_, anyhow::Error>(source));
        demuxer.read(1);
        std::thread::sleep(Duration::from_millis(50));
        let r = recorder.lock().unwrap();
        // pts 0 and 1 each cover [pts, pts+duration-1] = a single tick, so
        // two packets are needed to reach target 1; the rest stay unread.
        assert_eq!(r.packets.len(), 2);
        assert!(!r.ended);
    }

    #[test]
    fn seek_triggers_discontinuity() {
        let recorder = Arc::new(Mutex::new(Recorder::default()));
        let recv = RecordingReceiver(Arc::clone(&recorder));
        let source = FakeSource {
            streams: vec![StreamInfo { index: 0, kind: StreamKind::Video, time_base: (1, 1000), duration: 10 }],
            packets: fake_packets(5),
            cursor: 0,
            seeks: Vec::new(),
        };
        let demuxer = Demuxer::spawn(recv, move || Ok::<_, anyhow::Error>(source));
        demuxer.seek_time(2);
        demuxer.read(2);
        std::thread::sleep(Duration::from_millis(50));
        let r = recorder.lock().unwrap();
        assert_eq!(r.discontinuities, 1);
        assert_eq!(r.packets[0].pts, 2);
    }

    #[test]
    fn cancel_drains_queue_without_reading() {
        let recorder = Arc::new(Mutex::new(Recorder::default()));
        let recv = RecordingReceiver(Arc::clone(&recorder));
        let source = FakeSource {
            streams: vec![StreamInfo { index: 0, kind: StreamKind::Video, time_base: (1, 1000), duration: 10 }],
            packets: fake_packets(5),
            cursor: 0,
            seeks: Vec::new(),
        };
        let demuxer = Demuxer::spawn(recv, move || Ok::<_, anyhow::Error>(source));
        demuxer.read(0);
        demuxer.read(4);
        demuxer.cancel();
        std::thread::sleep(Duration::from_millis(50));
        let r = recorder.lock().unwrap();
        // The two reads queued before cancel may or may not have been
        // processed depending on scheduling, but cancel must not panic and
        // must leave the demuxer able to keep reading afterwards.
        drop(r);
        demuxer.read(4);
        std::thread::sleep(Duration::from_millis(50));
        assert!(recorder.lock().unwrap().packets.len() <= 5);
    }

    #[test]
    fn last_read_and_seek_time_are_set_synchronously() {
        let recorder = Arc::new(Mutex::new(Recorder::default()));
        let recv = RecordingReceiver(Arc::clone(&recorder));
        let source = FakeSource {
            streams: vec![StreamInfo { index: 0, kind: StreamKind::Video, time_base: (1, 1000), duration: 10 }],
            packets: fake_packets(5),
            cursor: 0,
            seeks: Vec::new(),
        };
        let demuxer = Demuxer::spawn(recv, move || Ok::<_, anyhow::Error>(source));
        assert_eq!(demuxer.last_read_time(), None);
        assert_eq!(demuxer.last_seek_time(), None);
        demuxer.seek_time(7);
        demuxer.read(9);
        assert_eq!(demuxer.last_seek_time(), Some(7));
        assert_eq!(demuxer.last_read_time(), Some(9));
    }

    #[test]
    fn missing_stream_surfaces_format_error() {
        let recorder = Arc::new(Mutex::new(Recorder::default()));
        let recv = RecordingReceiver(Arc::clone(&recorder));
        let source = FakeSource { streams: vec![], packets: vec![], cursor: 0, seeks: Vec::new() };
        let _demuxer = Demuxer::spawn(recv, move || Ok::<_, anyhow::Error>(source));
        std::thread::sleep(Duration::from_millis(50));
        let r = recorder.lock().unwrap();
        assert_eq!(r.errors.len(), 1);
    }
}
