use super::{ProgressTracker, TransferEvent};
use crate::metadata::FileMetadata;
use bytes::{Bytes, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Idle,
    MetadataReceived,
    Receiving,
    /// Last file assembled; ready for the next metadata message.
    Complete,
    Error,
}

/// Receiving side of the transfer state machine.
///
/// Pure state: feed it frames, get events back. Chunks are appended in
/// arrival order; the channel is ordered so no reordering is needed.
#[derive(Debug)]
pub struct FileReceiver {
    state: ReceiverState,
    metadata: Option<FileMetadata>,
    chunks: Vec<Bytes>,
    tracker: Option<ProgressTracker>,
    next_index: usize,
}

impl Default for FileReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl FileReceiver {
    pub fn new() -> Self {
        Self {
            state: ReceiverState::Idle,
            metadata: None,
            chunks: Vec::new(),
            tracker: None,
            next_index: 0,
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn received_size(&self) -> u64 {
        self.tracker.as_ref().map(|t| t.transferred()).unwrap_or(0)
    }

    pub fn current(&self) -> Option<&FileMetadata> {
        self.metadata.as_ref()
    }

    /// Files fully received on this channel so far.
    pub fn files_received(&self) -> usize {
        self.next_index
    }

    /// A metadata message always starts a fresh file, abandoning any partial one.
    pub fn on_metadata(&mut self, metadata: FileMetadata) -> Vec<TransferEvent> {
        let mut events = Vec::new();

        if self.in_flight() {
            tracing::warn!("New metadata while {} bytes of a file were pending; discarding them", self.received_size());
            if let Some(tracker) = &self.tracker {
                events.push(TransferEvent::Progress(tracker.cancelled()));
            }
        }

        tracing::info!("Receiving: {}", metadata.summary());
        let tracker = ProgressTracker::start(self.next_index, &metadata);
        events.push(TransferEvent::MetadataReceived(metadata.clone()));
        events.push(TransferEvent::Progress(tracker.started()));

        self.chunks.clear();
        self.metadata = Some(metadata);
        self.tracker = Some(tracker);
        self.state = ReceiverState::MetadataReceived;

        if self.metadata.as_ref().is_some_and(|m| m.size == 0) {
            self.finish(&mut events);
        }
        events
    }

    pub fn on_chunk(&mut self, data: Bytes) -> Vec<TransferEvent> {
        let mut events = Vec::new();

        if !matches!(self.state, ReceiverState::MetadataReceived | ReceiverState::Receiving) {
            tracing::warn!("Dropping {} byte chunk received in state {:?}", data.len(), self.state);
            self.state = ReceiverState::Error;
            events.push(TransferEvent::ProtocolError("chunk received without metadata".into()));
            return events;
        }

        let declared = self.metadata.as_ref().map(|m| m.size).unwrap_or(0);
        let Some(tracker) = self.tracker.as_mut() else {
            self.state = ReceiverState::Error;
            return events;
        };

        if tracker.transferred() + data.len() as u64 > declared {
            tracing::warn!(
                "Chunk overruns declared size: {} + {} > {}",
                tracker.transferred(),
                data.len(),
                declared
            );
            events.push(TransferEvent::Progress(tracker.failed()));
            events.push(TransferEvent::ProtocolError(format!(
                "received more than the declared {declared} bytes"
            )));
            self.chunks.clear();
            self.state = ReceiverState::Error;
            return events;
        }

        let progress = tracker.record(data.len() as u64);
        self.chunks.push(data);
        self.state = ReceiverState::Receiving;
        events.push(TransferEvent::Progress(progress));

        if self.tracker.as_ref().is_some_and(|t| t.is_complete()) {
            self.finish(&mut events);
        }
        events
    }

    /// Sender abandoned the current file.
    pub fn on_cancel(&mut self) -> Vec<TransferEvent> {
        let mut events = Vec::new();
        if self.in_flight() {
            if let Some(tracker) = &self.tracker {
                tracing::info!("Sender cancelled after {} bytes", tracker.transferred());
                events.push(TransferEvent::Progress(tracker.cancelled()));
            }
        }
        self.reset(ReceiverState::Idle);
        events
    }

    /// Channel went away (closed, failed, or timed out).
    pub fn on_channel_lost(&mut self) -> Vec<TransferEvent> {
        let mut events = Vec::new();
        if self.in_flight() {
            if let Some(tracker) = &self.tracker {
                tracing::warn!("Channel lost with {} of {} bytes received", tracker.transferred(), tracker.total());
                events.push(TransferEvent::Progress(tracker.failed()));
            }
            self.reset(ReceiverState::Error);
        }
        events
    }

    fn in_flight(&self) -> bool {
        matches!(self.state, ReceiverState::MetadataReceived | ReceiverState::Receiving)
    }

    fn finish(&mut self, events: &mut Vec<TransferEvent>) {
        let total = self.chunks.iter().map(Bytes::len).sum();
        let mut assembled = BytesMut::with_capacity(total);
        for chunk in self.chunks.drain(..) {
            assembled.extend_from_slice(&chunk);
        }

        if let (Some(metadata), Some(tracker)) = (self.metadata.take(), self.tracker.take()) {
            tracing::info!("Transfer complete: {}", metadata.name);
            events.push(TransferEvent::FileReceived {
                metadata,
                data: assembled.freeze(),
            });
            events.push(TransferEvent::Progress(tracker.completed()));
        }

        self.next_index += 1;
        self.state = ReceiverState::Complete;
    }

    fn reset(&mut self, state: ReceiverState) {
        self.chunks.clear();
        self.metadata = None;
        self.tracker = None;
        self.state = state;
    }
}
