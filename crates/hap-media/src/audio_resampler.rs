// crates/hap-media/src/audio_resampler.rs
//
// Wraps ffmpeg's swresample context with a diagonal per-channel gain
// matrix (volume) and a lazy `reconfigure` flag so format/channel/rate
// changes between frames rebuild the resampler on demand instead of
// every call. Ported from the original ofxHapPlayer's
// AudioResampler.{h,cpp}.
//
// `out_rate_effective` is the resampler's actual target rate: resampling
// to `out_rate / |rate|` is how fast/slow (non-time-stretched) playback
// is implemented — more output samples are produced per input sample
// when `|rate| < 1`, fewer when `|rate| > 1` — rather than a separate
// time-stretch stage.

use ffmpeg_the_third as ffmpeg;
use ffmpeg::software::resampling::Context as SwrContext;
use ffmpeg::util::format::sample::{Sample, Type as SampleType};

use hap_core::error::HapError;

use crate::audio_decoder::AudioFrame;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Params {
    in_rate: u32,
    in_channels: u16,
    out_rate_effective: u32,
    out_channels: u16,
}

/// Resamples and applies a diagonal (no cross-channel mixing) gain to
/// decoded audio frames, producing interleaved f32 at `out_rate` ticks
/// per second, adjusted for the clock's current `rate`.
pub struct AudioResampler {
    out_rate: u32,
    out_channels: u16,
    gains: Vec<f32>,
    ctx: Option<SwrContext>,
    current: Option<Params>,
    reconfigure: bool,
}

impl AudioResampler {
    pub fn new(out_rate: u32, out_channels: u16) -> Self {
        Self {
            out_rate,
            out_channels,
            gains: vec![1.0; out_channels as usize],
            ctx: None,
            current: None,
            reconfigure: true,
        }
    }

    /// Per-output-channel volume, applied after resampling. Values outside
    /// `[0, 1]` are accepted (allows fade overshoot to be clamped by the
    /// caller instead of here).
    pub fn set_gains(&mut self, gains: &[f32]) {
        self.gains.clear();
        self.gains.extend_from_slice(gains);
        self.gains.resize(self.out_channels as usize, 1.0);
    }

    pub fn set_uniform_gain(&mut self, gain: f32) {
        for g in self.gains.iter_mut() {
            *g = gain;
        }
    }

    /// Mark the next `resample` call to rebuild the swr context — call
    /// whenever input format/rate/channels or playback rate changes.
    pub fn request_reconfigure(&mut self) {
        self.reconfigure = true;
    }

    fn out_rate_effective(&self, rate: f64) -> u32 {
        let mag = rate.abs().max(1.0);
        ((self.out_rate as f64 / mag) as u32).max(1)
    }

    fn ensure_context(&mut self, frame: &AudioFrame, rate: f64) -> Result<(), HapError> {
        let wanted = Params {
            in_rate: frame.sample_rate,
            in_channels: frame.channels,
            out_rate_effective: self.out_rate_effective(rate),
            out_channels: self.out_channels,
        };
        if !self.reconfigure && self.current == Some(wanted) {
            return Ok(());
        }
        let ctx = SwrContext::get(
            Sample::F32(SampleType::Packed),
            channel_layout_for(wanted.in_channels),
            wanted.in_rate,
            Sample::F32(SampleType::Packed),
            channel_layout_for(wanted.out_channels),
            wanted.out_rate_effective,
        )
        .map_err(|e| HapError::resample(format!("swr context: {e}")))?;
        self.ctx = Some(ctx);
        self.current = Some(wanted);
        self.reconfigure = false;
        Ok(())
    }

    /// Resample `frame` at the clock's current signed `rate`, returning
    /// interleaved f32 output at `out_channels` channels with gain applied.
    pub fn resample(&mut self, frame: &AudioFrame, rate: f64) -> Result<Vec<f32>, HapError> {
        self.ensure_context(frame, rate)?;
        let ctx = self.ctx.as_mut().expect("context just ensured");

        let mut in_av = ffmpeg::util::frame::Audio::new(
            Sample::F32(SampleType::Packed),
            frame.frame_count(),
            channel_layout_for(frame.channels),
        );
        in_av.data_mut(0)[..frame.samples.len() * 4]
            .copy_from_slice(bytemuck::cast_slice(&frame.samples));

        let mut out_av = ffmpeg::util::frame::Audio::empty();
        ctx.run(&in_av, &mut out_av)
            .map_err(|e| HapError::resample(format!("swr run: {e}")))?;

        let out_channels = self.out_channels as usize;
        let out_frames = out_av.samples();
        let raw: &[f32] = bytemuck::cast_slice(&out_av.data(0)[..out_frames * out_channels * 4]);

        let mut out = raw.to_vec();
        for (i, s) in out.iter_mut().enumerate() {
            let ch = i % out_channels;
            *s *= self.gains.get(ch).copied().unwrap_or(1.0);
        }
        Ok(out)
    }
}

fn channel_layout_for(channels: u16) -> ffmpeg::util::channel_layout::ChannelLayout {
    ffmpeg::util::channel_layout::ChannelLayout::default(channels as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_rate_effective_scales_with_rate_magnitude() {
        let r = AudioResampler::new(48000, 2);
        assert_eq!(r.out_rate_effective(1.0), 48000);
        assert_eq!(r.out_rate_effective(2.0), 24000);
        assert_eq!(r.out_rate_effective(-2.0), 24000);
        assert_eq!(r.out_rate_effective(0.5), 96000);
    }

    #[test]
    fn out_rate_effective_never_zero() {
        let r = AudioResampler::new(48000, 2);
        assert_eq!(r.out_rate_effective(100_000.0), 1);
    }

    #[test]
    fn set_gains_pads_to_channel_count() {
        let mut r = AudioResampler::new(48000, 4);
        r.set_gains(&[0.5]);
        assert_eq!(r.gains, vec![0.5, 1.0, 1.0, 1.0]);
    }
}
