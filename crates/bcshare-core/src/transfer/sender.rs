use super::{ProgressTracker, TransferError, TransferEvent};
use crate::channel::ChannelSink;
use crate::config::TransferConfig;
use crate::frame::{ControlMessage, Frame};
use crate::metadata::FileMetadata;
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Idle,
    Sending,
    Complete,
    Error,
    Cancelled,
}

/// Streams files over one channel, strictly one after another.
pub struct FileSender<S: ChannelSink + ?Sized> {
    sink: Arc<S>,
    cfg: TransferConfig,
    events: mpsc::UnboundedSender<TransferEvent>,
    cancel: CancellationToken,
    state: SenderState,
}

impl<S: ChannelSink + ?Sized> FileSender<S> {
    pub fn new(
        sink: Arc<S>,
        cfg: TransferConfig,
        events: mpsc::UnboundedSender<TransferEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sink,
            cfg,
            events,
            cancel,
            state: SenderState::Idle,
        }
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    /// Send metadata followed by exactly `metadata.size` bytes from `reader`.
    pub async fn send_file<R>(
        &mut self,
        file_index: usize,
        metadata: &FileMetadata,
        mut reader: R,
    ) -> Result<(), TransferError>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.state = SenderState::Sending;
        let mut tracker = ProgressTracker::start(file_index, metadata);

        tracing::info!("Sending {}", metadata.summary());
        let announce = Frame::control(&ControlMessage::Metadata(metadata.clone()))?;
        if let Err(e) = self.sink.send(announce).await {
            return Err(self.fail(&tracker, e.into()));
        }
        self.emit(TransferEvent::Progress(tracker.started()));

        let mut buf = vec![0u8; self.cfg.frame_chunk_size()];

        while tracker.transferred() < metadata.size {
            if self.cancel.is_cancelled() {
                return Err(self.abort(&tracker).await);
            }

            if self.sink.buffered_amount() > self.cfg.high_water_mark {
                tracing::debug!(
                    buffered = self.sink.buffered_amount(),
                    high_water = self.cfg.high_water_mark,
                    "Applying backpressure - waiting for buffer to drain"
                );
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(self.abort(&tracker).await),
                    drained = self.sink.drained_below(self.cfg.low_water_mark) => {
                        if let Err(e) = drained {
                            return Err(self.fail(&tracker, e.into()));
                        }
                    }
                }
            }

            let remaining = metadata.size - tracker.transferred();
            let want = remaining.min(buf.len() as u64) as usize;
            let n = match read_full(&mut reader, &mut buf[..want]).await {
                Ok(n) => n,
                Err(e) => return Err(self.fail(&tracker, e.into())),
            };
            if n == 0 {
                let err = TransferError::SourceTruncated {
                    sent: tracker.transferred(),
                    declared: metadata.size,
                };
                return Err(self.fail(&tracker, err));
            }

            if let Err(e) = self.sink.send(Frame::Binary(Bytes::copy_from_slice(&buf[..n]))).await {
                return Err(self.fail(&tracker, e.into()));
            }

            let progress = tracker.record(n as u64);
            self.emit(TransferEvent::Progress(progress));
        }

        self.state = SenderState::Complete;
        tracing::info!("Transfer complete: {}", metadata.name);
        self.emit(TransferEvent::Progress(tracker.completed()));
        Ok(())
    }

    fn fail(&mut self, tracker: &ProgressTracker, err: TransferError) -> TransferError {
        tracing::warn!("Transfer failed after {} bytes: {}", tracker.transferred(), err);
        self.state = SenderState::Error;
        self.emit(TransferEvent::Progress(tracker.failed()));
        err
    }

    async fn abort(&mut self, tracker: &ProgressTracker) -> TransferError {
        tracing::info!("Transfer cancelled after {} bytes", tracker.transferred());
        self.state = SenderState::Cancelled;
        // Best effort: the receiver also resets on close.
        if let Ok(frame) = Frame::control(&ControlMessage::Cancel) {
            let _ = self.sink.send(frame).await;
        }
        self.emit(TransferEvent::Progress(tracker.cancelled()));
        TransferError::Cancelled
    }

    fn emit(&self, event: TransferEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

/// Fill `buf` unless the reader hits EOF first; returns bytes read.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::channel::ChannelError;
    use crate::transfer::TransferStatus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// Records frames; buffered amount is set by the test.
    #[derive(Default)]
    pub(crate) struct MockSink {
        pub frames: Mutex<Vec<Frame>>,
        pub buffered: AtomicUsize,
        pub closed: AtomicBool,
        pub drained: Notify,
        pub fail_after: Option<usize>,
    }

    impl MockSink {
        pub fn binary_payload(&self) -> Vec<u8> {
            self.frames
                .lock()
                .unwrap()
                .iter()
                .filter_map(|f| match f {
                    Frame::Binary(b) => Some(b.to_vec()),
                    Frame::Text(_) => None,
                })
                .flatten()
                .collect()
        }

        pub fn texts(&self) -> Vec<String> {
            self.frames
                .lock()
                .unwrap()
                .iter()
                .filter_map(|f| match f {
                    Frame::Text(t) => Some(t.clone()),
                    Frame::Binary(_) => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl ChannelSink for MockSink {
        async fn send(&self, frame: Frame) -> Result<(), ChannelError> {
            let mut frames = self.frames.lock().unwrap();
            if self.closed.load(Ordering::SeqCst) || self.fail_after.is_some_and(|n| frames.len() >= n) {
                return Err(ChannelError::Closed);
            }
            frames.push(frame);
            Ok(())
        }

        fn buffered_amount(&self) -> usize {
            self.buffered.load(Ordering::SeqCst)
        }

        async fn drained_below(&self, threshold: usize) -> Result<(), ChannelError> {
            loop {
                let notified = self.drained.notified();
                if self.closed.load(Ordering::SeqCst) {
                    return Err(ChannelError::Closed);
                }
                if self.buffered.load(Ordering::SeqCst) <= threshold {
                    return Ok(());
                }
                notified.await;
            }
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
            self.drained.notify_waiters();
        }
    }

    fn collect(rx: &mut mpsc::UnboundedReceiver<TransferEvent>) -> Vec<TransferEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    fn statuses(events: &[TransferEvent]) -> Vec<TransferStatus> {
        events
            .iter()
            .filter_map(|e| match e {
                TransferEvent::Progress(p) => Some(p.status),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_sends_metadata_then_chunks() -> anyhow::Result<()> {
        let sink = Arc::new(MockSink::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cfg = TransferConfig::with_chunk_size(4);
        let mut sender = FileSender::new(sink.clone(), cfg, tx, CancellationToken::new());

        let data: Vec<u8> = (0..10).collect();
        let meta = FileMetadata::new("a.bin", 10);
        sender.send_file(0, &meta, &data[..]).await?;

        assert_eq!(sender.state(), SenderState::Complete);
        let frames = sink.frames.lock().unwrap().clone();
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0], Frame::control(&ControlMessage::Metadata(meta))?);
        assert_eq!(sink.binary_payload(), data);

        let events = collect(&mut rx);
        let st = statuses(&events);
        assert_eq!(st.first(), Some(&TransferStatus::Transferring));
        assert_eq!(st.last(), Some(&TransferStatus::Completed));
        assert_eq!(st.iter().filter(|s| **s == TransferStatus::Completed).count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_zero_byte_file_completes_immediately() -> anyhow::Result<()> {
        let sink = Arc::new(MockSink::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sender = FileSender::new(sink.clone(), TransferConfig::default(), tx, CancellationToken::new());

        sender.send_file(0, &FileMetadata::new("empty", 0), tokio::io::empty()).await?;

        assert_eq!(sink.frames.lock().unwrap().len(), 1);
        let events = collect(&mut rx);
        match events.last() {
            Some(TransferEvent::Progress(p)) => {
                assert_eq!(p.status, TransferStatus::Completed);
                assert_eq!(p.percent, 100.0);
                assert_eq!(p.rate, None);
                assert_eq!(p.eta, 0.0);
            }
            other => panic!("unexpected {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_short_source_is_an_error() {
        let sink = Arc::new(MockSink::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sender = FileSender::new(sink, TransferConfig::with_chunk_size(4), tx, CancellationToken::new());

        let err = sender
            .send_file(0, &FileMetadata::new("short", 10), &b"abc"[..])
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::SourceTruncated { sent: 3, declared: 10 }));
        assert_eq!(sender.state(), SenderState::Error);
        assert!(!statuses(&collect(&mut rx)).contains(&TransferStatus::Completed));
    }

    #[tokio::test]
    async fn test_extra_source_bytes_are_not_sent() -> anyhow::Result<()> {
        let sink = Arc::new(MockSink::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut sender = FileSender::new(sink.clone(), TransferConfig::with_chunk_size(4), tx, CancellationToken::new());

        sender.send_file(0, &FileMetadata::new("f", 5), &b"0123456789"[..]).await?;
        assert_eq!(sink.binary_payload(), b"01234");
        Ok(())
    }

    #[tokio::test]
    async fn test_channel_failure_marks_error() {
        let sink = Arc::new(MockSink {
            fail_after: Some(2),
            ..Default::default()
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sender = FileSender::new(sink, TransferConfig::with_chunk_size(2), tx, CancellationToken::new());

        let err = sender
            .send_file(0, &FileMetadata::new("f", 8), &[7u8; 8][..])
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Channel(ChannelError::Closed)));
        assert_eq!(statuses(&collect(&mut rx)).last(), Some(&TransferStatus::Error));
    }

    #[tokio::test]
    async fn test_cancel_before_first_chunk() {
        let sink = Arc::new(MockSink::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut sender = FileSender::new(sink.clone(), TransferConfig::with_chunk_size(2), tx, cancel);

        let err = sender
            .send_file(0, &FileMetadata::new("f", 8), &[1u8; 8][..])
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Cancelled));
        assert_eq!(sender.state(), SenderState::Cancelled);
        assert!(sink.binary_payload().is_empty());
        assert_eq!(sink.texts().last().map(String::as_str), Some(r#"{"type":"cancel"}"#));

        let st = statuses(&collect(&mut rx));
        assert_eq!(st.last(), Some(&TransferStatus::Cancelled));
        assert!(!st.contains(&TransferStatus::Completed));
    }

    #[tokio::test]
    async fn test_backpressure_suspends_until_drained() -> anyhow::Result<()> {
        let sink = Arc::new(MockSink::default());
        sink.buffered.store(1_000, Ordering::SeqCst);
        let (tx, _rx) = mpsc::unbounded_channel();
        let cfg = TransferConfig::with_chunk_size(4);
        let mut sender = FileSender::new(sink.clone(), cfg, tx, CancellationToken::new());

        let task_sink = sink.clone();
        let handle = tokio::spawn(async move {
            sender.send_file(0, &FileMetadata::new("f", 4), &b"abcd"[..]).await
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(task_sink.binary_payload().is_empty(), "sent while over the high-water mark");

        task_sink.buffered.store(0, Ordering::SeqCst);
        task_sink.drained.notify_waiters();

        handle.await??;
        assert_eq!(sink.binary_payload(), b"abcd");
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_drain() {
        let sink = Arc::new(MockSink::default());
        sink.buffered.store(1_000, Ordering::SeqCst);
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let mut sender = FileSender::new(sink.clone(), TransferConfig::with_chunk_size(4), tx, cancel.clone());

        let handle = tokio::spawn(async move {
            let r = sender.send_file(0, &FileMetadata::new("f", 4), &b"abcd"[..]).await;
            (r, sender.state())
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel();

        let (result, state) = handle.await.unwrap();
        assert!(matches!(result, Err(TransferError::Cancelled)));
        assert_eq!(state, SenderState::Cancelled);
        assert!(sink.binary_payload().is_empty());
    }
}
