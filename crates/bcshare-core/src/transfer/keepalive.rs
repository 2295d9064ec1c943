use crate::config::TransferConfig;
use std::time::Duration;
use tokio::time::Instant;

/// Liveness tracking for one channel. Any inbound frame counts as a sign of life.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    interval: Duration,
    timeout: Duration,
    last_seen: Instant,
}

impl Heartbeat {
    pub fn new(cfg: &TransferConfig) -> Self {
        Self {
            interval: cfg.keepalive_interval,
            timeout: cfg.keepalive_timeout,
            last_seen: Instant::now(),
        }
    }

    pub fn observe(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn silence(&self) -> Duration {
        self.last_seen.elapsed()
    }

    pub fn is_expired(&self) -> bool {
        self.silence() > self.timeout
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expires_only_after_silence() {
        let cfg = TransferConfig::default()
            .with_keepalive(Duration::from_secs(1), Duration::from_secs(3));
        let mut hb = Heartbeat::new(&cfg);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!hb.is_expired());

        hb.observe();
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(!hb.is_expired());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(hb.is_expired());
    }
}
