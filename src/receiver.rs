//! Receiving side of the protocol engine.
//!
//! A session advertises the strongest enabled work mode, validates inbound
//! packets against a wrapping block index, and streams payloads into a pipe
//! handed to the caller's sink. Batch sessions read a metadata packet per
//! file and stop at the all-zero one.

use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::config::ModemFeatures;
use crate::error::{ModemError, Result};
use crate::frame::{self, PacketCheck, WorkMode, ACK, EOT, NAK};
use crate::modem::{Modem, ReceivedFile};

/// Advertisement attempts per work mode before falling back to a weaker one.
const ADVERTISE_ATTEMPTS: u32 = 3;

/// Buffer size of the per-file body pipe.
const FILE_PIPE_BYTES: usize = 64 * 1024;

impl<W: AsyncWrite + Unpin> Modem<W> {
    /// Receive one file, or a whole batch on a batch configuration.
    ///
    /// The sink runs once per file, while the transfer is still in flight;
    /// it must arrange for the body to be consumed concurrently (a spawned
    /// task reading `file.body` is the usual shape).
    pub async fn receive<F>(&mut self, mut sink: F) -> Result<()>
    where
        F: FnMut(ReceivedFile),
    {
        self.begin_transfer();
        let result = self.receive_inner(&mut sink).await;
        self.end_transfer().await;
        result
    }

    async fn receive_inner<F>(&mut self, sink: &mut F) -> Result<()>
    where
        F: FnMut(ReceivedFile),
    {
        let batch = self.config.features().contains(ModemFeatures::BATCH);
        loop {
            let mode = self.try_work_mode().await?;
            let mut info = FileInfo::default();
            if batch {
                let payload = match self.receive_pack(0, mode).await? {
                    Some(payload) => payload,
                    None => {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "EOT in place of file metadata",
                        )
                        .into())
                    }
                };
                // An all-zero metadata packet closes the batch.
                if payload.first() == Some(&0) {
                    return Ok(());
                }
                info = parse_file_info(&payload);
            }

            let (body_read, mut body_write) = tokio::io::simplex(FILE_PIPE_BYTES);
            let declared = info.length;
            sink(ReceivedFile {
                path: info.path,
                length: info.length,
                mtime: info.mtime,
                mode: info.mode,
                body: body_read,
            });

            let mut delivered: u64 = 0;
            let mut index: u8 = 1;
            loop {
                match self.receive_pack(index, mode).await? {
                    None => {
                        self.write_all(&[ACK]).await?;
                        break;
                    }
                    Some(mut payload) => {
                        index = index.wrapping_add(1);
                        if declared > 0 {
                            let remaining = declared.saturating_sub(delivered);
                            if payload.len() as u64 > remaining {
                                payload.truncate(remaining as usize);
                            }
                        }
                        delivered += payload.len() as u64;
                        // A dropped body reader only means the sink lost
                        // interest; the wire transfer still runs to the end.
                        if !payload.is_empty() {
                            let _ = body_write.write_all(&payload).await;
                        }
                    }
                }
            }
            drop(body_write);
            if !batch {
                return Ok(());
            }
        }
    }

    /// Advertise the strongest enabled work mode until the sender answers,
    /// falling back to weaker dialects on transport hiccups.
    async fn try_work_mode(&mut self) -> Result<WorkMode> {
        let features = self.config.features();
        let mut choices = Vec::with_capacity(3);
        if features.contains(ModemFeatures::STREAMING) {
            choices.push(WorkMode::Stream);
        }
        if features.contains(ModemFeatures::CRC) {
            choices.push(WorkMode::Crc);
        }
        choices.push(WorkMode::Checksum);

        let mut last_err: Option<io::Error> = None;
        for mode in choices {
            for _ in 0..ADVERTISE_ATTEMPTS {
                self.write_all(&[mode.handshake_byte()]).await?;
                match self.proto.wait_byte().await {
                    Ok(()) => {
                        tracing::debug!(?mode, "work mode advertised and answered");
                        return Ok(mode);
                    }
                    // A closed transport will never answer; stop here.
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(e.into()),
                    Err(e) => last_err = Some(e),
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "no answer to handshake"))
            .into())
    }

    /// Read one packet with the expected index. `Ok(None)` is `EOT`. Invalid
    /// packets are NAK'd and the header wait restarts; in streaming mode any
    /// defect is terminal. Bytes that are not packet framing go to the
    /// terminal.
    pub(crate) async fn receive_pack(
        &mut self,
        expected_index: u8,
        mode: WorkMode,
    ) -> Result<Option<Vec<u8>>> {
        loop {
            let header = self.proto.read_byte().await?;
            let payload_len = match frame::payload_len_for(header) {
                Some(len) => len,
                None if header == EOT => return Ok(None),
                None => {
                    self.forward_to_terminal(header).await;
                    continue;
                }
            };
            let mut body = vec![0u8; frame::body_len(payload_len, mode)];
            self.proto.read_exact(&mut body).await?;
            match frame::check_packet_body(&body, expected_index, payload_len, mode) {
                PacketCheck::Valid => {
                    if mode != WorkMode::Stream {
                        self.write_all(&[ACK]).await?;
                    }
                    return Ok(Some(body[2..2 + payload_len].to_vec()));
                }
                defect => {
                    if mode == WorkMode::Stream {
                        return Err(ModemError::StreamModeCorrupt);
                    }
                    tracing::debug!(?defect, expected_index, "rejecting packet");
                    self.write_all(&[NAK]).await?;
                }
            }
        }
    }
}

/// Parsed metadata packet.
#[derive(Debug, PartialEq, Eq)]
struct FileInfo {
    path: String,
    length: u64,
    mtime: i64,
    mode: u32,
}

impl Default for FileInfo {
    fn default() -> Self {
        Self {
            path: String::new(),
            length: 0,
            mtime: 0,
            mode: 0o777,
        }
    }
}

/// Parse a metadata payload: NUL-terminated path, then an optional
/// `"{length} {mtime:o} {mode:o}"` tail. A missing or partial tail leaves
/// the defaults in place.
fn parse_file_info(payload: &[u8]) -> FileInfo {
    let mut info = FileInfo::default();
    let path_end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    info.path = String::from_utf8_lossy(&payload[..path_end]).into_owned();

    let tail = payload.get(path_end + 1..).unwrap_or(&[]);
    let tail_end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    let tail = String::from_utf8_lossy(&tail[..tail_end]).into_owned();
    let mut fields = tail.split_whitespace();
    if let Some(length) = fields.next().and_then(|f| f.parse::<u64>().ok()) {
        info.length = length;
    }
    if let Some(mtime) = fields.next().and_then(|f| i64::from_str_radix(f, 8).ok()) {
        info.mtime = mtime;
    }
    if let Some(mode) = fields.next().and_then(|f| u32::from_str_radix(f, 8).ok()) {
        info.mode = mode & 0o777;
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_file_info() {
        let mut payload = b"a.txt\x005 1 644\x00".to_vec();
        payload.resize(128, 0);
        assert_eq!(
            parse_file_info(&payload),
            FileInfo {
                path: "a.txt".to_string(),
                length: 5,
                mtime: 1,
                mode: 0o644,
            }
        );
    }

    #[test]
    fn parse_octal_mtime() {
        let mut payload = b"f\x00100 17777777777 600\x00".to_vec();
        payload.resize(128, 0);
        let info = parse_file_info(&payload);
        assert_eq!(info.length, 100);
        assert_eq!(info.mtime, 0o17777777777);
        assert_eq!(info.mode, 0o600);
    }

    #[test]
    fn parse_tolerates_missing_tail() {
        let mut payload = b"bare\x00".to_vec();
        payload.resize(128, 0);
        let info = parse_file_info(&payload);
        assert_eq!(info.path, "bare");
        assert_eq!(info.length, 0);
        assert_eq!(info.mtime, 0);
        assert_eq!(info.mode, 0o777);
    }

    #[test]
    fn parse_keeps_length_from_partial_tail() {
        let mut payload = b"p\x0042\x00".to_vec();
        payload.resize(128, 0);
        let info = parse_file_info(&payload);
        assert_eq!(info.length, 42);
        assert_eq!(info.mtime, 0);
    }
}
