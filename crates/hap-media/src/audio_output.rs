// crates/hap-media/src/audio_output.rs
//
// The audio output device is a named external interface the engine ships
// a reference implementation of (cpal) rather than a UI concern — see
// DESIGN.md. `NullAudioOutput` is what a `DeviceError` degrades a Player
// to: silent but otherwise fully functional playback.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use hap_core::error::HapError;

use crate::ring_buffer::RingBuffer;

/// Something that can consume the interleaved f32 samples an `AudioThread`
/// produces and play them out.
pub trait AudioOutput: Send {
    fn start(&mut self) -> Result<(), HapError>;
    fn stop(&mut self);
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;
}

/// Reads from `ring` on cpal's realtime callback thread. Never blocks:
/// underruns are filled with silence rather than waiting on the producer.
pub struct CpalAudioOutput {
    ring: Arc<RingBuffer<f32>>,
    sample_rate: u32,
    channels: u16,
    stream: Option<cpal::Stream>,
}

impl CpalAudioOutput {
    pub fn new(ring: Arc<RingBuffer<f32>>, sample_rate: u32, channels: u16) -> Self {
        Self { ring, sample_rate, channels, stream: None }
    }
}

impl AudioOutput for CpalAudioOutput {
    fn start(&mut self) -> Result<(), HapError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| HapError::device("no default output device"))?;

        let config = StreamConfig {
            channels: self.channels,
            sample_rate: SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let ring = Arc::clone(&self.ring);
        let channels = self.channels.max(1) as usize;
        let stream = device
            .build_output_stream(
                &config,
                move |out: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    fill_from_ring(&ring, out, channels);
                },
                |err| warn_stream_error(err),
                None,
            )
            .map_err(|e| HapError::device(format!("build output stream: {e}")))?;

        stream.play().map_err(|e| HapError::device(format!("play: {e}")))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) {
        self.stream = None;
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

fn fill_from_ring(ring: &RingBuffer<f32>, out: &mut [f32], channels: usize) {
    let seg = ring.read_begin(out.len());
    let n = seg.len();
    out[..seg.first.len()].copy_from_slice(seg.first);
    out[seg.first.len()..seg.first.len() + seg.second.len()].copy_from_slice(seg.second);
    ring.read_end(n);
    // Underrun: pad the rest with silence, aligned to full sample frames.
    for s in out[n..].iter_mut() {
        *s = 0.0;
    }
    let _ = channels;
}

fn warn_stream_error(err: cpal::StreamError) {
    log::warn!("cpal output stream error: {err}");
}

/// Discards everything written to its ring buffer. Used when no output
/// device is available (`HapError::Device`) so the rest of the engine
/// keeps running with silent audio instead of failing the whole movie.
pub struct NullAudioOutput {
    sample_rate: u32,
    channels: u16,
}

impl NullAudioOutput {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self { sample_rate, channels }
    }
}

impl AudioOutput for NullAudioOutput {
    fn start(&mut self) -> Result<(), HapError> {
        Ok(())
    }

    fn stop(&mut self) {}

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_from_ring_pads_underrun_with_silence() {
        let ring = RingBuffer::<f32>::new(4);
        {
            let mut seg = ring.write_begin(2);
            seg.first[0] = 1.0;
            seg.first[1] = 2.0;
            ring.write_end(2);
        }
        let mut out = vec![9.0f32; 4];
        fill_from_ring(&ring, &mut out, 1);
        assert_eq!(out, vec![1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn null_output_never_fails_to_start() {
        let mut out = NullAudioOutput::new(48000, 2);
        assert!(out.start().is_ok());
        assert_eq!(out.sample_rate(), 48000);
        out.stop();
    }
}
