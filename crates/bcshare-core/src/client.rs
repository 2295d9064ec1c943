//! Peer session: one established data channel, both directions.
//!
//! The session owns the inbound loop (dispatching frames to the receiver
//! state machine, answering pings, watching liveness) and exposes sequential
//! file sending on top of the channel's sink.

use crate::channel::{ChannelSink, ChannelStream};
use crate::config::TransferConfig;
use crate::frame::{ControlMessage, Frame};
use crate::metadata::FileMetadata;
use crate::transfer::{FileReceiver, FileSender, Heartbeat, TransferError, TransferEvent};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct PeerSession<S> {
    sink: Arc<S>,
    cfg: TransferConfig,
    events: mpsc::UnboundedSender<TransferEvent>,
    shutdown: CancellationToken,
    current_send: Mutex<CancellationToken>,
    inbound: JoinHandle<()>,
}

impl<S> PeerSession<S>
where
    S: ChannelSink + 'static,
{
    /// Start the inbound loop over an established channel.
    pub fn start<R>(sink: S, stream: R, cfg: TransferConfig) -> (Self, mpsc::UnboundedReceiver<TransferEvent>)
    where
        R: ChannelStream + 'static,
    {
        let sink = Arc::new(sink);
        let (events, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let inbound = tokio::spawn(run_inbound(
            stream,
            sink.clone(),
            cfg.clone(),
            events.clone(),
            shutdown.clone(),
        ));

        let session = Self {
            sink,
            cfg,
            events,
            current_send: Mutex::new(shutdown.child_token()),
            shutdown,
            inbound,
        };
        (session, rx)
    }

    /// Send files from disk one after another. Stops at the first failure.
    pub async fn send_files(&self, paths: &[PathBuf]) -> Result<(), TransferError> {
        let cancel = self.begin_send();
        for (file_index, path) in paths.iter().enumerate() {
            let metadata = FileMetadata::from_path(path)
                .await
                .map_err(|e| TransferError::Io(std::io::Error::other(e.to_string())))?;
            let file = tokio::fs::File::open(path).await?;
            self.send_with(cancel.clone(), file_index, &metadata, file).await?;
        }
        Ok(())
    }

    /// Send a single file from any reader.
    pub async fn send_reader<R>(&self, file_index: usize, metadata: &FileMetadata, reader: R) -> Result<(), TransferError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let cancel = self.begin_send();
        self.send_with(cancel, file_index, metadata, reader).await
    }

    /// Abort the send in progress: no more chunk reads, receiver told to discard.
    pub fn abort(&self) {
        if let Ok(token) = self.current_send.lock() {
            token.cancel();
        }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.cfg
    }

    /// Flush outstanding frames, close the channel and stop the inbound loop.
    ///
    /// A peer that does not drain the queue within the keep-alive timeout
    /// loses whatever is still queued.
    pub async fn close(self) {
        if tokio::time::timeout(self.cfg.keepalive_timeout, self.sink.close())
            .await
            .is_err()
        {
            tracing::warn!("Peer stopped reading; dropping unsent frames");
            self.sink.abort().await;
        }
        self.shutdown.cancel();
        let _ = self.inbound.await;
    }

    /// Wait for the peer to close the channel (or the keep-alive to give up).
    pub async fn closed(self) {
        let _ = self.inbound.await;
        self.sink.abort().await;
    }

    fn begin_send(&self) -> CancellationToken {
        let token = self.shutdown.child_token();
        if let Ok(mut current) = self.current_send.lock() {
            *current = token.clone();
        }
        token
    }

    async fn send_with<R>(
        &self,
        cancel: CancellationToken,
        file_index: usize,
        metadata: &FileMetadata,
        reader: R,
    ) -> Result<(), TransferError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut sender = FileSender::new(self.sink.clone(), self.cfg.clone(), self.events.clone(), cancel);
        sender.send_file(file_index, metadata, reader).await
    }
}

async fn run_inbound<R, S>(
    mut stream: R,
    sink: Arc<S>,
    cfg: TransferConfig,
    events: mpsc::UnboundedSender<TransferEvent>,
    shutdown: CancellationToken,
) where
    R: ChannelStream,
    S: ChannelSink,
{
    let mut receiver = FileReceiver::new();
    let mut heartbeat = Heartbeat::new(&cfg);
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + heartbeat.interval(),
        heartbeat.interval(),
    );

    let emit = |batch: Vec<TransferEvent>| {
        for e in batch {
            let _ = events.send(e);
        }
    };

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!("Session shut down locally");
                break;
            }
            _ = ticker.tick() => {
                if heartbeat.is_expired() {
                    tracing::warn!("No frames from peer for {:?}, giving up", heartbeat.silence());
                    emit(receiver.on_channel_lost());
                    let _ = events.send(TransferEvent::PeerTimeout);
                    break;
                }
                if let Ok(ping) = Frame::control(&ControlMessage::Ping) {
                    if sink.send(ping).await.is_err() {
                        tracing::debug!("Ping failed, channel closed");
                        emit(receiver.on_channel_lost());
                        break;
                    }
                }
            }
            frame = stream.recv() => {
                match frame {
                    Ok(Some(frame)) => {
                        heartbeat.observe();
                        match frame {
                            Frame::Binary(data) => emit(receiver.on_chunk(data)),
                            Frame::Text(text) => match ControlMessage::parse(&text) {
                                Ok(ControlMessage::Metadata(meta)) => {
                                    emit(receiver.on_metadata(meta));
                                }
                                Ok(ControlMessage::Ping) => {
                                    if let Ok(pong) = Frame::control(&ControlMessage::Pong) {
                                        let _ = sink.send(pong).await;
                                    }
                                }
                                Ok(ControlMessage::Pong) => {}
                                Ok(ControlMessage::Cancel) => emit(receiver.on_cancel()),
                                Err(e) => {
                                    tracing::warn!("Unparseable control message: {}", e);
                                    let _ = events.send(TransferEvent::ProtocolError(e.to_string()));
                                }
                            },
                        }
                    }
                    Ok(None) => {
                        tracing::info!("Peer closed the channel");
                        emit(receiver.on_channel_lost());
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Channel failed: {}", e);
                        emit(receiver.on_channel_lost());
                        break;
                    }
                }
            }
        }
    }

    // Not a graceful close: the peer may have stopped reading, and a sender
    // parked on backpressure must see the failure now.
    sink.abort().await;
    let _ = events.send(TransferEvent::ChannelClosed);
}
