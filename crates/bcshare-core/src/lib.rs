//! bcshare core - peer-to-peer transfer over an established data channel
//!
//! Frames, the channel seam, the per-file transfer state machine and the
//! session that ties them together. Signaling and the relay store live in
//! their own crates.

pub mod channel;
pub mod client;
pub mod config;
pub mod frame;
pub mod metadata;
pub mod transfer;

// Re-export commonly used types
pub use channel::{ChannelError, ChannelSink, ChannelStream};
pub use client::PeerSession;
pub use config::TransferConfig;
pub use frame::{ControlMessage, Frame};
pub use metadata::FileMetadata;
pub use transfer::{TransferError, TransferEvent, TransferProgress, TransferStatus};
