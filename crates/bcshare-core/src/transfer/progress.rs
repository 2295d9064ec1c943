use crate::metadata::FileMetadata;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Waiting,
    Transferring,
    Completed,
    Error,
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }
}

/// Snapshot reported after every chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferProgress {
    pub file_index: usize,
    pub file_name: String,
    pub bytes: u64,
    pub total: u64,
    /// 0..=100, never decreasing within one transfer
    pub percent: f64,
    /// Bytes per second; `None` until any time has elapsed
    pub rate: Option<f64>,
    /// Seconds remaining; 0 when the rate is unknown or the file is done
    pub eta: f64,
    pub status: TransferStatus,
}

/// Bytes done as a percentage of the total, capped at 100.
pub fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    ((done as f64 / total as f64) * 100.0).min(100.0)
}

/// Average rate since the start of the transfer.
pub fn rate(bytes: u64, elapsed: Duration) -> Option<f64> {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        Some(bytes as f64 / secs)
    } else {
        None
    }
}

pub fn eta(remaining: u64, rate: Option<f64>) -> f64 {
    match rate {
        Some(r) if r > 0.0 && remaining > 0 => remaining as f64 / r,
        _ => 0.0,
    }
}

/// Byte counter for one file in one direction.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    file_index: usize,
    file_name: String,
    total: u64,
    transferred: u64,
    started: Instant,
    last_rate: Option<f64>,
    last_percent: f64,
}

impl ProgressTracker {
    pub fn start(file_index: usize, metadata: &FileMetadata) -> Self {
        Self {
            file_index,
            file_name: metadata.name.clone(),
            total: metadata.size,
            transferred: 0,
            started: Instant::now(),
            last_rate: None,
            last_percent: 0.0,
        }
    }

    /// Account for `n` more bytes and report. The counter never passes the total.
    pub fn record(&mut self, n: u64) -> TransferProgress {
        self.transferred = self.transferred.saturating_add(n).min(self.total);
        self.last_rate = rate(self.transferred, self.started.elapsed());
        self.last_percent = self.last_percent.max(percent(self.transferred, self.total));
        self.snapshot(TransferStatus::Transferring)
    }

    /// Terminal event: 100 %, rate frozen at the last measurement, ETA 0.
    pub fn completed(&self) -> TransferProgress {
        TransferProgress {
            percent: 100.0,
            eta: 0.0,
            ..self.snapshot(TransferStatus::Completed)
        }
    }

    pub fn waiting(&self) -> TransferProgress {
        self.snapshot(TransferStatus::Waiting)
    }

    pub fn started(&self) -> TransferProgress {
        self.snapshot(TransferStatus::Transferring)
    }

    pub fn failed(&self) -> TransferProgress {
        TransferProgress {
            eta: 0.0,
            ..self.snapshot(TransferStatus::Error)
        }
    }

    pub fn cancelled(&self) -> TransferProgress {
        TransferProgress {
            eta: 0.0,
            ..self.snapshot(TransferStatus::Cancelled)
        }
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_complete(&self) -> bool {
        self.transferred == self.total
    }

    fn snapshot(&self, status: TransferStatus) -> TransferProgress {
        TransferProgress {
            file_index: self.file_index,
            file_name: self.file_name.clone(),
            bytes: self.transferred,
            total: self.total,
            percent: self.last_percent,
            rate: self.last_rate,
            eta: eta(self.total - self.transferred, self.last_rate),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_capped() {
        assert_eq!(percent(0, 10), 0.0);
        assert_eq!(percent(5, 10), 50.0);
        assert_eq!(percent(11, 10), 100.0);
        assert_eq!(percent(0, 0), 100.0);
    }

    #[test]
    fn rate_undefined_without_elapsed_time() {
        assert_eq!(rate(100, Duration::ZERO), None);
        assert_eq!(rate(100, Duration::from_secs(2)), Some(50.0));
        assert_eq!(eta(100, None), 0.0);
        assert_eq!(eta(100, Some(50.0)), 2.0);
        assert_eq!(eta(0, Some(50.0)), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn tracker_reports_rate_and_eta() {
        let meta = FileMetadata::new("big.bin", 1000);
        let mut tracker = ProgressTracker::start(0, &meta);

        let first = tracker.record(0);
        assert_eq!(first.rate, None);
        assert_eq!(first.eta, 0.0);

        tokio::time::advance(Duration::from_secs(1)).await;
        let p = tracker.record(250);
        assert_eq!(p.bytes, 250);
        assert_eq!(p.percent, 25.0);
        assert_eq!(p.rate, Some(250.0));
        assert_eq!(p.eta, 3.0);
        assert_eq!(p.status, TransferStatus::Transferring);

        tokio::time::advance(Duration::from_secs(3)).await;
        let p = tracker.record(750);
        assert!(tracker.is_complete());
        assert_eq!(p.rate, Some(250.0));

        let done = tracker.completed();
        assert_eq!(done.status, TransferStatus::Completed);
        assert_eq!(done.percent, 100.0);
        assert_eq!(done.rate, Some(250.0));
        assert_eq!(done.eta, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn percent_never_decreases_and_bytes_never_overshoot() {
        let meta = FileMetadata::new("f", 10);
        let mut tracker = ProgressTracker::start(3, &meta);
        let mut last = 0.0;
        for n in [3, 3, 3, 3, 3] {
            tokio::time::advance(Duration::from_millis(10)).await;
            let p = tracker.record(n);
            assert!(p.percent >= last);
            assert!(p.percent <= 100.0);
            assert!(p.bytes <= p.total);
            assert_eq!(p.file_index, 3);
            last = p.percent;
        }
        assert_eq!(tracker.transferred(), 10);
    }
}
