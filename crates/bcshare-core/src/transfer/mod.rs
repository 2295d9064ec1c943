//! Per-channel transfer state machine.
//!
//! Runs independently on each peer. The sender announces metadata, streams
//! chunks with backpressure and reports progress; the receiver accumulates
//! chunks until the declared size is reached and hands back the assembled file.

pub mod keepalive;
pub mod progress;
pub mod receiver;
pub mod sender;

use crate::channel::ChannelError;
use crate::metadata::FileMetadata;
use bytes::Bytes;
use thiserror::Error;

pub use keepalive::Heartbeat;
pub use progress::{ProgressTracker, TransferProgress, TransferStatus};
pub use receiver::{FileReceiver, ReceiverState};
pub use sender::{FileSender, SenderState};

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("source ended after {sent} of {declared} bytes")]
    SourceTruncated { sent: u64, declared: u64 },
    #[error("transfer cancelled")]
    Cancelled,
    #[error("control message could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Everything a session reports upward.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Progress(TransferProgress),
    MetadataReceived(FileMetadata),
    FileReceived { metadata: FileMetadata, data: Bytes },
    /// Peer sent something the state machine cannot accept.
    ProtocolError(String),
    /// Nothing heard from the peer within the keep-alive timeout.
    PeerTimeout,
    /// The channel closed; no more events follow.
    ChannelClosed,
}
