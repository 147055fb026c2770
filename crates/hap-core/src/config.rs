// crates/hap-core/src/config.rs
//
// Ambient tuning knobs that aren't part of the interactive per-call Player
// API: cache lookahead, the packet-fetch deadline, probe concurrency, and
// the ring buffer sizing divisor. A serde struct with a `Default` matching
// the spec's literal defaults, optionally loaded from a TOML file for hosts
// that want to externalize tuning (e.g. a longer timeout on a slow network
// mount).

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// How far ahead (in microseconds of media time) the video cache keeps
    /// packets decoded/queued.
    pub cache_usec: i64,

    /// How long `LockingPacketCache::fetch` blocks waiting for a packet
    /// before giving up with `HapError::Timeout`.
    #[serde(with = "duration_millis")]
    pub fetch_timeout: Duration,

    /// Reserved for hosts juggling more than one open movie at a time.
    pub probe_concurrency: u32,

    /// Ring buffer capacity, in samples, is `sample_rate / ring_buffer_divisor`.
    pub ring_buffer_divisor: u32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            cache_usec: 500_000,
            fetch_timeout: Duration::from_millis(30),
            probe_concurrency: 1,
            ring_buffer_divisor: 8,
        }
    }
}

impl PlayerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&text)?)
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_literals() {
        let cfg = PlayerConfig::default();
        assert_eq!(cfg.fetch_timeout, Duration::from_millis(30));
        assert_eq!(cfg.cache_usec, 500_000);
        assert_eq!(cfg.ring_buffer_divisor, 8);
    }

    #[test]
    fn toml_round_trips_overrides() {
        let toml_src = r#"
            fetch_timeout = 100
            ring_buffer_divisor = 4
        "#;
        let cfg = PlayerConfig::from_toml_str(toml_src).unwrap();
        assert_eq!(cfg.fetch_timeout, Duration::from_millis(100));
        assert_eq!(cfg.ring_buffer_divisor, 4);
        // Fields not present in the TOML fall back to defaults via `#[serde(default)]`.
        assert_eq!(cfg.cache_usec, 500_000);
    }
}
