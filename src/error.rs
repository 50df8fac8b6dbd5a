//! Error types for modem transfers.

use std::io;
use thiserror::Error;

/// Result type alias for transfer operations.
pub type Result<T> = std::result::Result<T, ModemError>;

/// Everything a transfer can fail with. Transport errors pass through
/// unchanged; the rest are protocol-level outcomes.
#[derive(Debug, Error)]
pub enum ModemError {
    /// Batch operation requested on a configuration without batch framing.
    #[error("operation not supported by this modem configuration")]
    WrongModemType,

    /// File metadata does not fit in a metadata packet. A zero-filled packet
    /// is still sent so the peer is not left mid-handshake.
    #[error("file info does not fit in a metadata packet")]
    FileInfoTooLong,

    /// The peer rejected the same transmission ten times.
    #[error("peer rejected the same transmission ten times")]
    TooManyNaks,

    /// The source stream produced more bytes than the declared file length.
    #[error("source stream is longer than the declared file length")]
    FileTooLong,

    /// A corrupt packet arrived in streaming mode, which has no retry path.
    #[error("corrupt packet while streaming without acknowledgments")]
    StreamModeCorrupt,

    /// The peer aborted the transfer with two consecutive `CAN` bytes.
    #[error("peer cancelled the transfer")]
    PeerCancel,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ModemError {
    /// Whether the send path should emit a break before surfacing this error.
    ///
    /// No break for a rejected metadata packet (the zero-filled packet already
    /// resolved the handshake), for a peer-initiated abort (the peer is gone),
    /// or for a closed transport (nobody is listening).
    pub(crate) fn wants_break(&self) -> bool {
        match self {
            ModemError::FileInfoTooLong | ModemError::PeerCancel => false,
            ModemError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => false,
            _ => true,
        }
    }
}
