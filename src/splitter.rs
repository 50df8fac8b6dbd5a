//! Stream splitter: multiplexes one transport between a terminal and the
//! protocol engine.
//!
//! ```text
//!                      +--------------+
//! transport reader --> | inbound pump | --> protocol queue (engine)
//!                      |              | --> terminal reader (host, idle only)
//!                      +--------------+
//!
//! terminal writer  --> +---------------+
//!        (host)        | outbound pump | --> transport writer
//! engine writes ------>+---------------+     (direct, shared mutex)
//! ```
//!
//! Two long-lived tasks own the transport halves. While a transfer is active,
//! inbound bytes go only to the protocol queue and terminal writes accumulate
//! in a cache; the finish signal drains the cache and clears the active flag.

use bytes::{Buf, Bytes, BytesMut};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, SimplexStream, WriteHalf,
};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Mutex;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;

/// Chunk queue depth for the protocol reader. While idle the queue is lossy:
/// everything still in it is discarded when a transfer begins.
const PROTOCOL_QUEUE_CHUNKS: usize = 256;

/// Chunk queue depth for terminal-bound transport data.
const TERMINAL_QUEUE_CHUNKS: usize = 64;

/// Buffer size of the terminal write pipe.
const TERMINAL_PIPE_BYTES: usize = 64 * 1024;

/// Transport read chunk size.
const READ_CHUNK: usize = 1024;

/// Host-visible reader. Carries transport bytes while no transfer is active;
/// a transport read error surfaces here as well.
pub type TerminalReader = StreamReader<ReceiverStream<io::Result<Bytes>>, Bytes>;

/// Host-visible writer. Passes through while idle, buffered while a transfer
/// is active and drained once it ends.
pub type TerminalWriter = WriteHalf<SimplexStream>;

type ChunkTx = mpsc::Sender<io::Result<Bytes>>;

/// Everything the protocol engine needs to drive the shared transport.
pub(crate) struct EngineHandles<W> {
    pub(crate) proto: ProtocolReader,
    pub(crate) writer: Arc<Mutex<W>>,
    pub(crate) term_tx: ChunkTx,
    pub(crate) active: Arc<AtomicBool>,
    pub(crate) finish_tx: mpsc::Sender<()>,
}

/// Wrap a transport pair and spawn the two pump tasks.
pub(crate) fn split<R, W>(reader: R, writer: W) -> (EngineHandles<W>, TerminalReader, TerminalWriter)
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let (proto_tx, proto_rx) = mpsc::channel(PROTOCOL_QUEUE_CHUNKS);
    let (term_in_tx, term_in_rx) = mpsc::channel(TERMINAL_QUEUE_CHUNKS);
    let (term_out_read, term_out_write) = tokio::io::simplex(TERMINAL_PIPE_BYTES);
    let (finish_tx, finish_rx) = mpsc::channel(1);
    let active = Arc::new(AtomicBool::new(false));
    let writer = Arc::new(Mutex::new(writer));

    tokio::spawn(inbound_pump(
        reader,
        proto_tx,
        term_in_tx.clone(),
        active.clone(),
    ));
    tokio::spawn(outbound_pump(
        term_out_read,
        writer.clone(),
        active.clone(),
        finish_rx,
    ));

    let handles = EngineHandles {
        proto: ProtocolReader::new(proto_rx),
        writer,
        term_tx: term_in_tx,
        active,
        finish_tx,
    };
    let terminal_reader = StreamReader::new(ReceiverStream::new(term_in_rx));
    (handles, terminal_reader, term_out_write)
}

/// Read from the transport and dispatch chunks downstream.
///
/// Chunks always go to the protocol queue; while idle they additionally go to
/// the terminal reader. An idle protocol queue that fills up simply drops
/// chunks, since the engine discards that backlog on transfer start anyway.
async fn inbound_pump<R>(mut reader: R, proto_tx: ChunkTx, term_tx: ChunkTx, active: Arc<AtomicBool>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_CHUNK];
    let mut proto_open = true;
    let mut term_open = true;
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                let is_active = active.load(Ordering::Acquire);
                if proto_open {
                    if is_active {
                        if proto_tx.send(Ok(chunk.clone())).await.is_err() {
                            proto_open = false;
                        }
                    } else {
                        match proto_tx.try_send(Ok(chunk.clone())) {
                            Ok(()) | Err(TrySendError::Full(_)) => {}
                            Err(TrySendError::Closed(_)) => proto_open = false,
                        }
                    }
                }
                if !is_active && term_open && term_tx.send(Ok(chunk)).await.is_err() {
                    term_open = false;
                }
                if !proto_open && !term_open {
                    break;
                }
            }
            Err(e) => {
                let kind = e.kind();
                let msg = e.to_string();
                if proto_open {
                    let _ = proto_tx.send(Err(io::Error::new(kind, msg.clone()))).await;
                }
                if term_open {
                    let _ = term_tx.send(Err(io::Error::new(kind, msg))).await;
                }
                break;
            }
        }
    }
}

/// Service terminal writes: pass through while idle, cache while a transfer
/// is active, drain the cache on the finish signal.
async fn outbound_pump<W>(
    mut term_out: ReadHalf<SimplexStream>,
    writer: Arc<Mutex<W>>,
    active: Arc<AtomicBool>,
    mut finish_rx: mpsc::Receiver<()>,
) where
    W: AsyncWrite + Unpin,
{
    let mut cache = BytesMut::new();
    let mut buf = [0u8; READ_CHUNK];
    let mut term_open = true;
    loop {
        let finished = if term_open {
            tokio::select! {
                biased;
                signal = finish_rx.recv() => match signal {
                    Some(()) => true,
                    None => return,
                },
                read = term_out.read(&mut buf) => {
                    match read {
                        Ok(0) | Err(_) => term_open = false,
                        Ok(n) => {
                            if active.load(Ordering::Acquire) {
                                cache.extend_from_slice(&buf[..n]);
                            } else if write_chunk(&writer, &buf[..n]).await.is_err() {
                                // Transport is gone; stop reading terminal
                                // output but keep servicing finish signals.
                                term_open = false;
                            }
                        }
                    }
                    false
                }
            }
        } else {
            match finish_rx.recv().await {
                Some(()) => true,
                None => return,
            }
        };
        if finished {
            if !cache.is_empty() {
                if write_chunk(&writer, &cache).await.is_err() {
                    tracing::warn!("buffered terminal output lost: transport write failed");
                }
                cache.clear();
            }
            active.store(false, Ordering::Release);
        }
    }
}

async fn write_chunk<W: AsyncWrite + Unpin>(writer: &Arc<Mutex<W>>, data: &[u8]) -> io::Result<()> {
    let mut w = writer.lock().await;
    w.write_all(data).await?;
    w.flush().await
}

// =============================================================================
// Protocol reader
// =============================================================================

/// Byte-oriented view over the protocol chunk queue.
///
/// Supports the three access patterns the engine needs: single-byte reads,
/// exact multi-byte reads, and a consuming-nothing wait used by mode
/// advertising.
pub(crate) struct ProtocolReader {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    pending: Bytes,
    stashed_err: Option<io::Error>,
}

impl ProtocolReader {
    fn new(rx: mpsc::Receiver<io::Result<Bytes>>) -> Self {
        Self {
            rx,
            pending: Bytes::new(),
            stashed_err: None,
        }
    }

    /// Block until at least one byte is buffered, without consuming it.
    pub(crate) async fn wait_byte(&mut self) -> io::Result<()> {
        if let Some(e) = self.stashed_err.take() {
            return Err(e);
        }
        while self.pending.is_empty() {
            self.pending = match self.rx.recv().await {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => return Err(e),
                None => return Err(closed()),
            };
        }
        Ok(())
    }

    pub(crate) async fn read_byte(&mut self) -> io::Result<u8> {
        self.wait_byte().await?;
        let b = self.pending[0];
        self.pending.advance(1);
        Ok(b)
    }

    pub(crate) async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            self.wait_byte().await?;
            let n = self.pending.len().min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&self.pending[..n]);
            self.pending.advance(n);
            filled += n;
        }
        Ok(())
    }

    /// Throw away everything queued so far. Idle-time transport traffic must
    /// not be parsed as protocol; a queued transport error survives and is
    /// returned by the next read.
    pub(crate) fn discard_backlog(&mut self) {
        self.pending = Bytes::new();
        while let Ok(item) = self.rx.try_recv() {
            if let Err(e) = item {
                self.stashed_err = Some(e);
            }
        }
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "transport closed")
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn idle_traffic_reaches_terminal_reader() {
        let (transport, far) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(transport);
        let (_handles, mut term_reader, _term_writer) = split(read_half, write_half);

        let (_far_read, mut far_write) = tokio::io::split(far);
        far_write.write_all(b"login: ").await.unwrap();

        let mut buf = [0u8; 7];
        term_reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"login: ");
    }

    #[tokio::test]
    async fn idle_terminal_writes_pass_through() {
        let (transport, far) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(transport);
        let (_handles, _term_reader, mut term_writer) = split(read_half, write_half);

        term_writer.write_all(b"ok\n").await.unwrap();

        let (mut far_read, _far_write) = tokio::io::split(far);
        let mut buf = [0u8; 3];
        far_read.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok\n");
    }

    #[tokio::test]
    async fn active_transfer_buffers_terminal_writes_until_finish() {
        let (transport, far) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(transport);
        let (handles, _term_reader, mut term_writer) = split(read_half, write_half);

        handles.active.store(true, Ordering::Release);
        term_writer.write_all(b"buffered").await.unwrap();

        // Engine bytes go straight to the transport while the terminal
        // output sits in the cache.
        write_chunk(&handles.writer, b"\x01").await.unwrap();

        let (mut far_read, _far_write) = tokio::io::split(far);
        let mut one = [0u8; 1];
        far_read.read_exact(&mut one).await.unwrap();
        assert_eq!(one[0], 0x01);

        handles.finish_tx.send(()).await.unwrap();
        let mut buf = [0u8; 8];
        far_read.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"buffered");
        assert!(!handles.active.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn discard_backlog_drops_idle_bytes() {
        let (transport, far) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(transport);
        let (mut handles, mut term_reader, _term_writer) = split(read_half, write_half);

        let (_far_read, mut far_write) = tokio::io::split(far);
        far_write.write_all(b"stale keystrokes").await.unwrap();

        // Wait until the pump has dispatched the chunk.
        let mut buf = [0u8; 16];
        term_reader.read_exact(&mut buf).await.unwrap();

        handles.active.store(true, Ordering::Release);
        handles.proto.discard_backlog();

        far_write.write_all(b"\x15").await.unwrap();
        assert_eq!(handles.proto.read_byte().await.unwrap(), 0x15);
    }

    #[tokio::test]
    async fn transport_eof_closes_protocol_reader() {
        let (transport, far) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(transport);
        let (mut handles, _term_reader, _term_writer) = split(read_half, write_half);

        drop(far);
        let err = handles.proto.read_byte().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
