//! Async connection engine: frame-based messaging over a byte stream.
//!
//! One read task appends raw bytes into a growing buffer and drains complete
//! frames in wire order into a [`PacketHandler`]. One write task drains a
//! FIFO queue of serialized frames. The queue's byte total is tracked in an
//! atomic so any thread can poll [`PacketSender::is_congested`] without
//! touching the buffers. Business logic lives entirely in the handler.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::frame::{self, ParsedFrame};
use crate::protocol::Packet;

/// Staging buffer for each socket read.
pub const READ_BUFFER_SIZE: usize = 8192;

/// Outbound queue size above which `is_congested` reports true.
pub const CONGESTION_THRESHOLD: usize = 1024 * 1024;

/// Receives parsed frames from a connection.
///
/// The engine guarantees calls are serialized: no reentrant or concurrent
/// invocations on the same handler. The frame's payload borrows the receive
/// buffer and is valid only for the duration of the call.
pub trait PacketHandler: Send {
    /// Invoked once per complete frame, in wire arrival order. Returning an
    /// error is logged by the engine and never terminates the connection.
    fn on_packet(&mut self, frame: &ParsedFrame<'_>) -> Result<()>;

    /// Invoked exactly once when the connection terminates.
    fn on_disconnect(&mut self);
}

/// Narrow outbound seam: enqueue packets and observe backpressure. This is
/// what transfer logic holds instead of a whole connection.
pub trait PacketSender: Send + Sync {
    /// Serialize and enqueue a packet for delivery. Frames are delivered to
    /// the peer in `send` call order. Fails once the connection is closed.
    fn send(&self, packet: &Packet) -> Result<()>;

    /// Best-effort congestion hint (may be briefly stale).
    fn is_congested(&self) -> bool;
}

/// Cloneable sending side of a [`Connection`]. Safe to use from any thread.
#[derive(Clone)]
pub struct ConnectionHandle {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    queue_size: Arc<AtomicUsize>,
}

impl PacketSender for ConnectionHandle {
    fn send(&self, packet: &Packet) -> Result<()> {
        let frame = frame::build_frame(packet)?;
        let len = frame.len();
        // Add before enqueueing so the counter never under-reports.
        self.queue_size.fetch_add(len, Ordering::Relaxed);
        if self.outbound.send(frame).is_err() {
            self.queue_size.fetch_sub(len, Ordering::Relaxed);
            anyhow::bail!("connection closed");
        }
        Ok(())
    }

    fn is_congested(&self) -> bool {
        self.queue_size.load(Ordering::Relaxed) > CONGESTION_THRESHOLD
    }
}

/// A not-yet-started connection: the outbound queue plus its byte counter.
/// Grab handles with [`Connection::handle`] before calling
/// [`Connection::start`]; once every handle is dropped and the queue has
/// drained, the write side flushes and shuts down.
pub struct Connection {
    outbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    outbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    queue_size: Arc<AtomicUsize>,
}

/// Join handles for a started connection's read and write tasks.
pub struct ConnectionTask {
    pub reader: JoinHandle<()>,
    pub writer: JoinHandle<()>,
}

impl Connection {
    pub fn new() -> Connection {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Connection {
            outbound_tx,
            outbound_rx,
            queue_size: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            outbound: self.outbound_tx.clone(),
            queue_size: self.queue_size.clone(),
        }
    }

    /// Begin the read and write loops on an established stream.
    pub fn start<S, H>(self, stream: S, handler: H) -> ConnectionTask
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
        H: PacketHandler + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        ConnectionTask {
            reader: tokio::spawn(read_loop(read_half, handler)),
            writer: tokio::spawn(write_loop(write_half, self.outbound_rx, self.queue_size)),
        }
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_loop<R, H>(mut reader: R, mut handler: H)
where
    R: AsyncRead + Unpin,
    H: PacketHandler,
{
    let mut read_buf = [0u8; READ_BUFFER_SIZE];
    let mut incoming = BytesMut::with_capacity(READ_BUFFER_SIZE);
    loop {
        match reader.read(&mut read_buf).await {
            Ok(0) => break,
            Ok(n) => {
                incoming.extend_from_slice(&read_buf[..n]);
                drain_frames(&mut incoming, &mut handler);
            }
            Err(e) => {
                eprintln!("[connection] read error: {e}");
                break;
            }
        }
    }
    handler.on_disconnect();
}

/// Dispatch every complete frame at the front of the buffer, consuming each
/// after its handler call returns. A handler failure is logged and the rest
/// of the buffer is still processed - one poisoned frame never takes the
/// connection down.
fn drain_frames<H: PacketHandler>(incoming: &mut BytesMut, handler: &mut H) {
    while let Some(frame) = frame::try_parse_frame(incoming) {
        let consumed = frame.total_size();
        if let Err(e) = handler.on_packet(&frame) {
            eprintln!("[connection] packet handling error: {e}");
        }
        incoming.advance(consumed);
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    queue_size: Arc<AtomicUsize>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        let result = writer.write_all(&frame).await;
        queue_size.fetch_sub(frame.len(), Ordering::Relaxed);
        if let Err(e) = result {
            eprintln!("[connection] write error: {e}");
            break;
        }
    }
    // Either every sender hung up or a write failed. Refuse new sends and
    // release the byte accounting of anything still queued so congested
    // senders are not left waiting on a queue that will never drain.
    outbound.close();
    while let Ok(frame) = outbound.try_recv() {
        queue_size.fetch_sub(frame.len(), Ordering::Relaxed);
    }
    let _ = writer.shutdown().await;
}
