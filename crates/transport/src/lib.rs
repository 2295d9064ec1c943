//! Data channel over an ordered, reliable byte stream.
//!
//! Gives any `AsyncRead + AsyncWrite` (TCP, an in-memory duplex, a QUIC
//! stream later) the shape of a WebRTC data channel: text and binary
//! messages, a `buffered_amount` counter, and a drain signal for
//! backpressure.

use async_trait::async_trait;
use bcshare_core::frame::{read_frame, write_frame, MAX_FRAME_LEN};
use bcshare_core::{ChannelError, ChannelSink, ChannelStream, Frame};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, Notify};
use tokio::task::{AbortHandle, JoinHandle};

/// Frames read ahead of the consumer before the reader stops pulling.
const INBOUND_QUEUE: usize = 16;

struct Shared {
    buffered: AtomicUsize,
    closed: AtomicBool,
    drained: Notify,
}

impl Shared {
    fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.drained.notify_waiters();
    }
}

/// Sending half. Frames are queued and written by a background task, so
/// `buffered_amount` reflects bytes accepted but not yet written.
pub struct StreamSink {
    queue: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    shared: Arc<Shared>,
    writer: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    writer_abort: AbortHandle,
}

/// Receiving half. A background task reads frames so `recv` is cancel-safe.
pub struct StreamReceiver {
    rx: mpsc::Receiver<std::io::Result<Frame>>,
    reader: JoinHandle<()>,
}

/// Split a connected stream into a data channel.
pub fn split<T>(stream: T) -> (StreamSink, StreamReceiver)
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);

    let shared = Arc::new(Shared {
        buffered: AtomicUsize::new(0),
        closed: AtomicBool::new(false),
        drained: Notify::new(),
    });

    let (queue_tx, queue_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(write_half, queue_rx, shared.clone()));

    let (frames_tx, frames_rx) = mpsc::channel(INBOUND_QUEUE);
    let reader = tokio::spawn(read_loop(read_half, frames_tx));

    let sink = StreamSink {
        queue: Mutex::new(Some(queue_tx)),
        shared,
        writer_abort: writer.abort_handle(),
        writer: tokio::sync::Mutex::new(Some(writer)),
    };
    (sink, StreamReceiver { rx: frames_rx, reader })
}

/// Dial a peer over TCP.
pub async fn connect<A: ToSocketAddrs>(addr: A) -> anyhow::Result<(StreamSink, StreamReceiver)> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    tracing::debug!("Connected to {}", stream.peer_addr()?);
    Ok(split(stream))
}

/// Two connected channel ends over an in-memory pipe of `capacity` bytes.
pub fn memory_pair(capacity: usize) -> ((StreamSink, StreamReceiver), (StreamSink, StreamReceiver)) {
    let (a, b) = tokio::io::duplex(capacity);
    (split(a), split(b))
}

async fn write_loop<W>(mut writer: W, mut queue: mpsc::UnboundedReceiver<Frame>, shared: Arc<Shared>)
where
    W: AsyncWrite + Unpin + Send,
{
    while let Some(frame) = queue.recv().await {
        let len = frame.len();
        let result = write_frame(&mut writer, &frame).await;
        shared.buffered.fetch_sub(len, Ordering::SeqCst);
        shared.drained.notify_waiters();

        if let Err(e) = result {
            tracing::warn!("Write failed, closing channel: {}", e);
            break;
        }
    }

    shared.mark_closed();
    let _ = writer.shutdown().await;
}

async fn read_loop<R>(mut reader: R, frames: mpsc::Sender<std::io::Result<Frame>>)
where
    R: AsyncRead + Unpin + Send,
{
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(frame)) => {
                if frames.send(Ok(frame)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = frames.send(Err(e)).await;
                break;
            }
        }
    }
}

#[async_trait]
impl ChannelSink for StreamSink {
    async fn send(&self, frame: Frame) -> Result<(), ChannelError> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(ChannelError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "frame too large",
            )));
        }
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }

        let queue = self.queue.lock().map_err(|_| ChannelError::Closed)?;
        let Some(tx) = queue.as_ref() else {
            return Err(ChannelError::Closed);
        };

        let len = frame.len();
        self.shared.buffered.fetch_add(len, Ordering::SeqCst);
        if tx.send(frame).is_err() {
            self.shared.buffered.fetch_sub(len, Ordering::SeqCst);
            return Err(ChannelError::Closed);
        }
        Ok(())
    }

    fn buffered_amount(&self) -> usize {
        self.shared.buffered.load(Ordering::SeqCst)
    }

    async fn drained_below(&self, threshold: usize) -> Result<(), ChannelError> {
        loop {
            let notified = self.shared.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shared.closed.load(Ordering::SeqCst) {
                return Err(ChannelError::Closed);
            }
            if self.shared.buffered.load(Ordering::SeqCst) <= threshold {
                return Ok(());
            }
            notified.await;
        }
    }

    async fn close(&self) {
        // Dropping the queue sender lets the writer drain what is left and exit.
        if let Ok(mut queue) = self.queue.lock() {
            queue.take();
        }
        let writer = self.writer.lock().await.take();
        if let Some(handle) = writer {
            let _ = handle.await;
        }
        self.shared.mark_closed();
    }

    async fn abort(&self) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.take();
        }
        // Closed first: a sender parked in `drained_below` must wake even
        // though the writer may be stuck on a peer that stopped reading.
        self.shared.mark_closed();
        self.writer_abort.abort();
    }
}

#[async_trait]
impl ChannelStream for StreamReceiver {
    async fn recv(&mut self) -> Result<Option<Frame>, ChannelError> {
        match self.rx.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(ChannelError::Io(e)),
            None => Ok(None),
        }
    }
}

impl Drop for StreamReceiver {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
