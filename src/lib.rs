//! XMODEM/YMODEM file-transfer endpoint that shares one byte stream with a
//! terminal.
//!
//! The crate splits a raw transport into a terminal pair the host keeps
//! using and a protocol pair the engine drives:
//!
//! ```text
//!                 +----------+      +-----------------+
//! transport <---> | splitter | <--> | protocol engine | <--> files
//!                 +----------+      +-----------------+
//!                      ^
//!                      |
//!              terminal reader/writer (host)
//! ```
//!
//! While a transfer runs, inbound bytes feed only the engine and terminal
//! output is buffered; when it ends, the buffer drains so protocol and
//! terminal traffic never interleave on the wire.
//!
//! # Example
//!
//! ```no_run
//! use xymodem::{new_modem, ModemConfig, ModemFeatures};
//!
//! # async fn run(port: tokio::io::DuplexStream) -> xymodem::Result<()> {
//! let (reader, writer) = tokio::io::split(port);
//! let config = ModemConfig::xmodem(ModemFeatures::CRC);
//! let (mut modem, _terminal_reader, _terminal_writer) = new_modem(config, reader, writer);
//! modem.send_bytes(&b"hello"[..]).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod frame;
pub mod modem;
pub mod splitter;
pub mod store;

mod receiver;
mod sender;

pub use config::{ModemConfig, ModemDialect, ModemFeatures};
pub use error::{ModemError, Result};
pub use frame::WorkMode;
pub use modem::{new_modem, FileBody, FileJob, Modem, ReceivedFile};
pub use splitter::{TerminalReader, TerminalWriter};
