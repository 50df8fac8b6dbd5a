//! The modem handle: transport wiring, file descriptors, and the pieces of
//! the engine shared by both directions.

use bytes::Bytes;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, SimplexStream};
use tokio::sync::{mpsc, Mutex};

use crate::config::{ModemConfig, ModemFeatures};
use crate::error::Result;
use crate::frame::CAN;
use crate::splitter::{self, ProtocolReader, TerminalReader, TerminalWriter};

/// Read end of an in-memory pipe carrying one received file body.
pub type FileBody = ReadHalf<SimplexStream>;

/// A file queued for sending in a batch.
///
/// `length == 0` declares the length unknown; the receiver then keeps the
/// padding of the final packet.
pub struct FileJob {
    pub path: String,
    pub length: u64,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: i64,
    /// Permission bits; only the low 9 bits travel.
    pub mode: u32,
    pub body: Box<dyn AsyncRead + Send + Unpin>,
}

/// A file delivered to the receive sink.
///
/// The body is fed while the transfer is still running, so it must be
/// consumed concurrently (typically from a spawned task); the receiver blocks
/// once the pipe fills.
pub struct ReceivedFile {
    pub path: String,
    /// Declared length, 0 when unknown.
    pub length: u64,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: i64,
    /// Permission bits (low 9 bits).
    pub mode: u32,
    pub body: FileBody,
}

/// One endpoint of the transfer protocol, sharing its transport with a
/// terminal.
///
/// Created by [`new_modem`]; drive it with
/// [`send_bytes`](Modem::send_bytes), [`send_list`](Modem::send_list) or
/// [`receive`](Modem::receive).
pub struct Modem<W> {
    pub(crate) config: ModemConfig,
    pub(crate) proto: ProtocolReader,
    pub(crate) writer: Arc<Mutex<W>>,
    pub(crate) term_tx: mpsc::Sender<io::Result<Bytes>>,
    active: Arc<AtomicBool>,
    finish_tx: mpsc::Sender<()>,
}

/// Wrap a transport pair in a modem. Returns the modem together with the
/// terminal reader and writer the host application talks through; protocol
/// traffic never appears on those.
pub fn new_modem<R, W>(
    config: ModemConfig,
    reader: R,
    writer: W,
) -> (Modem<W>, TerminalReader, TerminalWriter)
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let (handles, terminal_reader, terminal_writer) = splitter::split(reader, writer);
    let modem = Modem {
        config,
        proto: handles.proto,
        writer: handles.writer,
        term_tx: handles.term_tx,
        active: handles.active,
        finish_tx: handles.finish_tx,
    };
    (modem, terminal_reader, terminal_writer)
}

impl<W: AsyncWrite + Unpin> Modem<W> {
    pub fn config(&self) -> ModemConfig {
        self.config
    }

    /// Divert transport bytes to the engine and discard whatever idle-time
    /// traffic is still queued as protocol input.
    pub(crate) fn begin_transfer(&mut self) {
        self.active.store(true, Ordering::Release);
        self.proto.discard_backlog();
    }

    /// Ask the outbound pump to drain buffered terminal output and go idle.
    pub(crate) async fn end_transfer(&mut self) {
        let _ = self.finish_tx.send(()).await;
    }

    pub(crate) async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(data).await?;
        writer.flush().await
    }

    /// Hand a byte that is not protocol traffic to the terminal reader.
    /// A dropped terminal reader is not an error.
    pub(crate) async fn forward_to_terminal(&self, byte: u8) {
        let _ = self
            .term_tx
            .send(Ok(Bytes::copy_from_slice(&[byte])))
            .await;
    }

    /// Abort the current exchange: a double `CAN` when the feature is
    /// enabled, otherwise the `EOT` handshake.
    pub async fn send_break(&mut self) -> Result<()> {
        if self.config.features().contains(ModemFeatures::DOUBLE_CAN) {
            self.write_all(&[CAN, CAN]).await?;
            Ok(())
        } else {
            self.send_eot().await
        }
    }
}
