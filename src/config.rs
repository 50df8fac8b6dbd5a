//! Modem configuration: dialect selection and feature normalization.

use bitflags::bitflags;

bitflags! {
    /// Optional protocol features negotiated per session.
    ///
    /// Not every combination is honored verbatim: the [`ModemConfig`]
    /// constructors normalize the set for the chosen dialect.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ModemFeatures: u32 {
        /// 1024-byte data packets instead of 128-byte ones.
        const ONE_K = 1 << 0;
        /// CRC-16 framing (handshake byte `C`).
        const CRC = 1 << 1;
        /// Abort with a double `CAN` instead of an `EOT` handshake.
        const DOUBLE_CAN = 1 << 2;
        /// Batch transfers with a metadata packet per file.
        const BATCH = 1 << 3;
        /// Streaming mode: no per-packet acknowledgments (handshake byte `G`).
        const STREAMING = 1 << 4;
    }
}

/// Protocol dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemDialect {
    XModem,
    YModem,
}

/// Immutable per-modem configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModemConfig {
    dialect: ModemDialect,
    features: ModemFeatures,
}

impl ModemConfig {
    /// An XMODEM configuration. Batch and streaming are YMODEM-only and are
    /// cleared from `features`.
    pub fn xmodem(features: ModemFeatures) -> Self {
        Self {
            dialect: ModemDialect::XModem,
            features: features - (ModemFeatures::BATCH | ModemFeatures::STREAMING),
        }
    }

    /// A YMODEM configuration. Batch framing is always on.
    pub fn ymodem(features: ModemFeatures) -> Self {
        Self {
            dialect: ModemDialect::YModem,
            features: features | ModemFeatures::BATCH,
        }
    }

    pub fn dialect(&self) -> ModemDialect {
        self.dialect
    }

    pub fn features(&self) -> ModemFeatures {
        self.features
    }

    /// Data packet size selected by this configuration.
    pub(crate) fn packet_len(&self) -> usize {
        if self.features.contains(ModemFeatures::ONE_K) {
            1024
        } else {
            128
        }
    }
}
