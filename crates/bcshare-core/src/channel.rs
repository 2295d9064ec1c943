//! Seams between the transfer state machine and whatever carries its frames.
//!
//! The channel must be ordered and reliable: the receiver appends chunks in
//! arrival order and never reorders.

use crate::frame::Frame;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("channel closed")]
    Closed,
}

/// Sending half of a data channel.
#[async_trait]
pub trait ChannelSink: Send + Sync {
    /// Queue a frame. Returns once the frame is accepted, not once delivered.
    async fn send(&self, frame: Frame) -> Result<(), ChannelError>;

    /// Bytes queued locally and not yet handed to the network.
    fn buffered_amount(&self) -> usize;

    /// Resolve once `buffered_amount() <= threshold`, or fail if the channel
    /// closes while waiting.
    async fn drained_below(&self, threshold: usize) -> Result<(), ChannelError>;

    /// Flush queued frames and close. Further sends fail with `Closed`.
    ///
    /// May wait as long as the peer takes to read what is queued.
    async fn close(&self);

    /// Close at once, dropping anything still queued. Waiters in
    /// `drained_below` and later sends see `Closed` immediately.
    async fn abort(&self) {
        self.close().await
    }
}

/// Receiving half of a data channel.
#[async_trait]
pub trait ChannelStream: Send {
    /// Next frame, or `Ok(None)` once the peer closed the channel cleanly.
    ///
    /// Must be cancel-safe: the session polls it inside `select!` next to timers.
    async fn recv(&mut self) -> Result<Option<Frame>, ChannelError>;
}
