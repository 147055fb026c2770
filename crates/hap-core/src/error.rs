// crates/hap-core/src/error.rs
//
// The public error taxonomy. Internal glue that can't fail in a way the
// public API needs to distinguish (one-shot setup before `foundMovie`,
// that sort of thing) uses `anyhow::Result` instead, matching the
// teacher's split between a typed public surface and `anyhow` for
// thread-internal plumbing.

use thiserror::Error;

/// Everything the Player's public API can report via `getError()`.
#[derive(Debug, Error)]
pub enum HapError {
    /// Opening, probing, or stream selection failed. Usually means "this
    /// isn't a Hap movie".
    #[error("format error: {0}")]
    Format(String),

    /// The block decoder rejected a packet, or the audio decoder returned
    /// something other than EAGAIN/EOF.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("resample error: {0}")]
    Resample(String),

    #[error("out of memory")]
    OutOfMemory,

    /// The audio output device could not be started. Playback degrades to
    /// silent rather than failing outright.
    #[error("audio device error: {0}")]
    Device(String),

    /// A packet was not available before the configured deadline. Non-fatal:
    /// the caller keeps showing the last valid frame.
    #[error("timeout waiting for packet")]
    Timeout,
}

impl HapError {
    pub fn format(msg: impl Into<String>) -> Self {
        HapError::Format(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        HapError::Decode(msg.into())
    }

    pub fn resample(msg: impl Into<String>) -> Self {
        HapError::Resample(msg.into())
    }

    pub fn device(msg: impl Into<String>) -> Self {
        HapError::Device(msg.into())
    }

    /// Whether the Player should keep going after this error (vs. tearing
    /// the whole movie down).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, HapError::Timeout | HapError::Device(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_device_are_recoverable() {
        assert!(HapError::Timeout.is_recoverable());
        assert!(HapError::device("no default output").is_recoverable());
    }

    #[test]
    fn format_errors_are_not_recoverable() {
        assert!(!HapError::format("not a hap movie").is_recoverable());
    }
}
