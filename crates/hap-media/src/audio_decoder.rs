// crates/hap-media/src/audio_decoder.rs
//
// Thin wrapper over an ffmpeg audio decoder: send_packet/receive_frame in
// a loop, normal EAGAIN/EOF handled as control flow rather than errors.
// Ported from the original ofxHapPlayer's AudioDecoder.{h,cpp}; the
// send/receive loop shape follows decode.rs's `LiveDecoder::next_frame`.

use ffmpeg_the_third as ffmpeg;
use ffmpeg::codec::context::Context as CodecContext;
use ffmpeg::decoder::Audio as FfmpegAudioDecoder;
use ffmpeg::util::error::EAGAIN;
use ffmpeg::Error as FfmpegError;

use hap_core::error::HapError;

/// A decoded, still-interleaved audio frame. `samples` holds
/// `frames * channels` values in the decoder's native sample format
/// already converted to `f32`, ready for `AudioResampler`.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub pts: i64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioFrame {
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

pub struct AudioDecoder {
    decoder: FfmpegAudioDecoder,
}

impl AudioDecoder {
    pub fn new(parameters: ffmpeg::codec::Parameters) -> Result<Self, HapError> {
        let ctx = CodecContext::from_parameters(parameters)
            .map_err(|e| HapError::decode(format!("open audio codec: {e}")))?;
        let decoder = ctx
            .decoder()
            .audio()
            .map_err(|e| HapError::decode(format!("audio decoder: {e}")))?;
        Ok(Self { decoder })
    }

    pub fn sample_rate(&self) -> u32 {
        self.decoder.rate()
    }

    pub fn channels(&self) -> u16 {
        self.decoder.channels()
    }

    /// Feed one compressed packet. Decoded frames become available via
    /// repeated `receive_frame` calls afterwards.
    pub fn send_packet(&mut self, data: &[u8], pts: i64) -> Result<(), HapError> {
        let mut packet = ffmpeg::Packet::copy(data);
        packet.set_pts(Some(pts));
        match self.decoder.send_packet(&packet) {
            Ok(()) => Ok(()),
            Err(FfmpegError::Other { errno }) if errno == EAGAIN => Ok(()),
            Err(e) => Err(HapError::decode(format!("send_packet: {e}"))),
        }
    }

    pub fn flush(&mut self) {
        self.decoder.flush();
    }

    /// Pull the next decoded frame, or `Ok(None)` on EAGAIN/EOF — both are
    /// ordinary control flow, not errors.
    pub fn receive_frame(&mut self) -> Result<Option<AudioFrame>, HapError> {
        let mut frame = ffmpeg::util::frame::Audio::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => Ok(Some(convert_frame(&frame))),
            Err(FfmpegError::Other { errno }) if errno == EAGAIN => Ok(None),
            Err(FfmpegError::Eof) => Ok(None),
            Err(e) => Err(HapError::decode(format!("receive_frame: {e}"))),
        }
    }
}

fn convert_frame(frame: &ffmpeg::util::frame::Audio) -> AudioFrame {
    let channels = frame.channels();
    let rate = frame.rate();
    let pts = frame.pts().unwrap_or(0);
    let samples = samples_as_f32(frame);
    AudioFrame { pts, sample_rate: rate, channels, samples }
}

/// Convert whatever sample format the decoder produced into interleaved
/// f32. Handles the two format families ffmpeg actually returns for
/// common audio codecs: packed (`data(0)` interleaved) and planar
/// (one plane per channel).
fn samples_as_f32(frame: &ffmpeg::util::frame::Audio) -> Vec<f32> {
    use ffmpeg::format::sample::{Sample, Type as SampleType};

    let channels = frame.channels() as usize;
    let n = frame.samples();
    let mut out = vec![0.0f32; n * channels];

    match frame.format() {
        Sample::F32(SampleType::Packed) => {
            let data = frame.data(0);
            let src: &[f32] = bytemuck::cast_slice(data);
            out.copy_from_slice(&src[..n * channels]);
        }
        Sample::F32(SampleType::Planar) => {
            for ch in 0..channels {
                let data = frame.data(ch);
                let src: &[f32] = bytemuck::cast_slice(data);
                for i in 0..n {
                    out[i * channels + ch] = src[i];
                }
            }
        }
        Sample::I16(SampleType::Packed) => {
            let data = frame.data(0);
            let src: &[i16] = bytemuck::cast_slice(data);
            for i in 0..n * channels {
                out[i] = src[i] as f32 / i16::MAX as f32;
            }
        }
        Sample::I16(SampleType::Planar) => {
            for ch in 0..channels {
                let data = frame.data(ch);
                let src: &[i16] = bytemuck::cast_slice(data);
                for i in 0..n {
                    out[i * channels + ch] = src[i] as f32 / i16::MAX as f32;
                }
            }
        }
        _ => {
            // Unsupported sample format: silence rather than garbage.
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_count_divides_by_channels() {
        let f = AudioFrame { pts: 0, sample_rate: 48000, channels: 2, samples: vec![0.0; 256] };
        assert_eq!(f.frame_count(), 128);
    }

    #[test]
    fn frame_count_zero_channels_is_zero() {
        let f = AudioFrame { pts: 0, sample_rate: 48000, channels: 0, samples: vec![] };
        assert_eq!(f.frame_count(), 0);
    }
}
