//! Sending side of the protocol engine.
//!
//! A session waits for the receiver's handshake byte, streams the body as
//! sequenced packets with per-packet acknowledgment (except in streaming
//! mode), and closes with the `EOT` handshake. Batch sends wrap every file in
//! a metadata packet and terminate with an all-zero one.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::config::{ModemDialect, ModemFeatures};
use crate::error::{ModemError, Result};
use crate::frame::{
    encode_packet, WorkMode, ACK, CAN, CRC_HANDSHAKE, EOT, NAK, STREAM_HANDSHAKE, SUB,
};
use crate::modem::{FileJob, Modem};

/// Consecutive rejections of one transmission before giving up.
const MAX_NAKS: u32 = 10;

impl<W: AsyncWrite + Unpin> Modem<W> {
    /// Send a single body: XMODEM, or YMODEM without the batch wrapper.
    /// The length is not declared, so the receiver sees the final packet's
    /// padding.
    pub async fn send_bytes<B>(&mut self, mut body: B) -> Result<()>
    where
        B: AsyncRead + Unpin,
    {
        self.begin_transfer();
        let result = self.send_single(&mut body).await;
        self.finish_send(result).await
    }

    async fn send_single<B>(&mut self, body: &mut B) -> Result<()>
    where
        B: AsyncRead + Unpin,
    {
        let mode = self.wait_work_mode().await?;
        self.send_stream(body, 0, mode).await
    }

    /// Send a batch of files. Requires a YMODEM configuration.
    pub async fn send_list(&mut self, files: Vec<FileJob>) -> Result<()> {
        self.begin_transfer();
        let result = self.send_batch(files).await;
        self.finish_send(result).await
    }

    /// Common tail of every send operation: best-effort break on a
    /// non-benign error, then let the terminal buffer drain.
    async fn finish_send(&mut self, result: Result<()>) -> Result<()> {
        if let Err(e) = &result {
            if e.wants_break() {
                if let Err(break_err) = self.send_break().await {
                    tracing::debug!("break after failed transfer not delivered: {break_err}");
                }
            }
        }
        self.end_transfer().await;
        result
    }

    async fn send_batch(&mut self, files: Vec<FileJob>) -> Result<()> {
        if self.config.dialect() != ModemDialect::YModem
            || !self.config.features().contains(ModemFeatures::BATCH)
        {
            return Err(ModemError::WrongModemType);
        }
        for mut file in files {
            let mode = self.wait_work_mode().await?;
            match file_info_payload(&file, self.config.packet_len()) {
                Ok(info) => self.send_pack(0, &info, mode).await?,
                Err(e) => {
                    // Keep the peer's framer in sync before reporting the
                    // oversized metadata to the caller.
                    let filler = vec![0u8; self.config.packet_len()];
                    self.send_pack(0, &filler, mode).await?;
                    return Err(e);
                }
            }
            self.send_stream(&mut file.body, file.length, mode).await?;
        }
        let mode = self.wait_work_mode().await?;
        self.send_pack(0, &[0u8; 128], mode).await
    }

    /// Wait for the receiver to advertise a work mode. Anything that is not
    /// an enabled handshake byte is a keystroke predating the handshake and
    /// goes to the terminal.
    async fn wait_work_mode(&mut self) -> Result<WorkMode> {
        loop {
            let byte = self.proto.read_byte().await?;
            let mode = match byte {
                NAK => WorkMode::Checksum,
                CRC_HANDSHAKE if self.config.features().contains(ModemFeatures::CRC) => {
                    WorkMode::Crc
                }
                STREAM_HANDSHAKE if self.config.features().contains(ModemFeatures::STREAMING) => {
                    WorkMode::Stream
                }
                other => {
                    self.forward_to_terminal(other).await;
                    continue;
                }
            };
            tracing::debug!(?mode, "work mode negotiated");
            return Ok(mode);
        }
    }

    /// Stream a body as sequenced packets followed by `EOT`. `max_len > 0`
    /// bounds the stream to the declared file length.
    pub(crate) async fn send_stream<B>(
        &mut self,
        body: &mut B,
        max_len: u64,
        mode: WorkMode,
    ) -> Result<()>
    where
        B: AsyncRead + Unpin,
    {
        let packet_len = self.config.packet_len();
        let mut buf = vec![0u8; packet_len];
        let mut total: u64 = 0;
        let mut index: u8 = 1;
        loop {
            let n = read_full(body, &mut buf).await?;
            if n == 0 {
                return self.send_eot().await;
            }
            total += n as u64;
            if max_len > 0 && total > max_len {
                return Err(ModemError::FileTooLong);
            }
            let finished = n < packet_len;
            let send_len = if finished {
                // A short tail fits a 128-byte packet even in 1K mode.
                let send_len = if n <= 128 { 128 } else { packet_len };
                for pad in &mut buf[n..send_len] {
                    *pad = SUB;
                }
                send_len
            } else {
                packet_len
            };
            self.send_pack(index, &buf[..send_len], mode).await?;
            index = index.wrapping_add(1);
            if finished {
                return self.send_eot().await;
            }
        }
    }

    /// Transmit one packet and, outside streaming mode, wait for the
    /// verdict. Only a `NAK` triggers retransmission; stray bytes go to the
    /// terminal.
    pub(crate) async fn send_pack(&mut self, index: u8, payload: &[u8], mode: WorkMode) -> Result<()> {
        let frame = encode_packet(index, payload, mode);
        let mut naks = 0u32;
        let mut cans = 0u32;
        loop {
            self.write_all(&frame).await?;
            if mode == WorkMode::Stream {
                return Ok(());
            }
            loop {
                match self.proto.read_byte().await? {
                    ACK => return Ok(()),
                    CAN => {
                        cans += 1;
                        if cans >= 2 {
                            return Err(ModemError::PeerCancel);
                        }
                    }
                    NAK => {
                        cans = 0;
                        naks += 1;
                        if naks >= MAX_NAKS {
                            return Err(ModemError::TooManyNaks);
                        }
                        tracing::debug!(index, attempt = naks, "retransmitting after NAK");
                        break;
                    }
                    other => {
                        cans = 0;
                        self.forward_to_terminal(other).await;
                    }
                }
            }
        }
    }

    /// The `EOT` handshake follows the same retry discipline as a data
    /// packet.
    pub(crate) async fn send_eot(&mut self) -> Result<()> {
        let mut naks = 0u32;
        let mut cans = 0u32;
        loop {
            self.write_all(&[EOT]).await?;
            loop {
                match self.proto.read_byte().await? {
                    ACK => return Ok(()),
                    CAN => {
                        cans += 1;
                        if cans >= 2 {
                            return Err(ModemError::PeerCancel);
                        }
                    }
                    NAK => {
                        cans = 0;
                        naks += 1;
                        if naks >= MAX_NAKS {
                            return Err(ModemError::TooManyNaks);
                        }
                        break;
                    }
                    other => {
                        cans = 0;
                        self.forward_to_terminal(other).await;
                    }
                }
            }
        }
    }
}

/// Metadata packet payload: NUL-terminated path, then
/// `"{length} {mtime:o} {mode:o}"`, NUL, zero padding to packet size.
fn file_info_payload(file: &FileJob, packet_len: usize) -> Result<Vec<u8>> {
    let mut info = Vec::with_capacity(128);
    info.extend_from_slice(file.path.as_bytes());
    info.push(0);
    info.extend_from_slice(
        format!("{} {:o} {:o}", file.length, file.mtime, file.mode & 0o777).as_bytes(),
    );
    info.push(0);
    if info.len() > packet_len {
        return Err(ModemError::FileInfoTooLong);
    }
    let target = if info.len() <= 128 { 128 } else { packet_len };
    info.resize(target, 0);
    Ok(info)
}

/// Fill `buf` from the reader, stopping early only at end of input.
async fn read_full<B: AsyncRead + Unpin>(body: &mut B, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = body.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
