use crate::frame::MAX_FRAME_LEN;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning knobs for the peer-to-peer transfer path.
///
/// `chunk_size` only affects throughput; the receiver reassembles whatever
/// chunk boundaries the sender picked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Payload bytes per binary frame (128 KiB by default)
    pub chunk_size: usize,

    /// Pause sending once the channel holds more than this many queued bytes
    pub high_water_mark: usize,

    /// Resume sending once the queue drains to this many bytes
    pub low_water_mark: usize,

    /// How often a ping is sent over an idle channel
    #[serde(with = "duration_secs")]
    pub keepalive_interval: Duration,

    /// Silence longer than this marks the peer as gone
    #[serde(with = "duration_secs")]
    pub keepalive_timeout: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self::with_chunk_size(128 * 1024)
    }
}

impl TransferConfig {
    /// Derive the water marks from a chunk size (4x high, 2x low). The size
    /// is clamped to what one frame can carry.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        let chunk_size = chunk_size.clamp(1, MAX_FRAME_LEN);
        Self {
            chunk_size,
            high_water_mark: chunk_size * 4,
            low_water_mark: chunk_size * 2,
            keepalive_interval: Duration::from_secs(5),
            keepalive_timeout: Duration::from_secs(15),
        }
    }

    /// Chunk size actually used for reads. A deserialized config may carry
    /// any value, so the frame limit is applied again here.
    pub fn frame_chunk_size(&self) -> usize {
        self.chunk_size.clamp(1, MAX_FRAME_LEN)
    }

    pub fn with_keepalive(mut self, interval: Duration, timeout: Duration) -> Self {
        self.keepalive_interval = interval;
        self.keepalive_timeout = timeout;
        self
    }
}

pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn water_marks_follow_chunk_size() {
        let cfg = TransferConfig::with_chunk_size(64 * 1024);
        assert_eq!(cfg.high_water_mark, 256 * 1024);
        assert_eq!(cfg.low_water_mark, 128 * 1024);
        assert!(cfg.low_water_mark < cfg.high_water_mark);
    }

    #[test]
    fn chunk_size_never_exceeds_frame_limit() {
        let cfg = TransferConfig::with_chunk_size(64 * 1024 * 1024);
        assert_eq!(cfg.chunk_size, MAX_FRAME_LEN);
        assert_eq!(cfg.high_water_mark, MAX_FRAME_LEN * 4);
        assert_eq!(TransferConfig::with_chunk_size(0).chunk_size, 1);

        let loaded = TransferConfig { chunk_size: usize::MAX, ..Default::default() };
        assert_eq!(loaded.frame_chunk_size(), MAX_FRAME_LEN);
    }

    #[test]
    fn config_survives_json() {
        let cfg = TransferConfig::default()
            .with_keepalive(Duration::from_millis(500), Duration::from_secs(2));
        let json = serde_json::to_string(&cfg).unwrap();
        let back: TransferConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.chunk_size, cfg.chunk_size);
        assert_eq!(back.keepalive_interval, Duration::from_millis(500));
        assert_eq!(back.keepalive_timeout, Duration::from_secs(2));
    }
}
