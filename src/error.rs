use crate::analog::Ambiguity;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connection refused, unreachable, reset or the connect timeout elapsed.
    #[error("Connection to {peer} failed: {source}")]
    ConnectionFailure {
        peer: String,
        #[source]
        source: std::io::Error,
    },
    /// No data arrived within the read timeout.
    #[error("No response within {0:?}")]
    ReadTimeout(Duration),
    #[error("Frame truncated - required={required} received={received}")]
    Truncated { required: usize, received: usize },
    #[error("Invalid checksum - calculated={calculated:04X} received={received}")]
    ChecksumMismatch { calculated: u16, received: String },
    #[error("Malformed frame: {0}")]
    Malformed(String),
    #[error("Response exceeds {limit} bytes")]
    Oversized { limit: usize },
    #[error("BMS rejected command {command:#04x}: {code} (VER={version:#04x})")]
    Rejected {
        command: u8,
        code: crate::protocol::ResponseCode,
        version: u8,
    },
    #[error("BMS variant mismatch: BMS reports {reported} (VER={version:#04x}) but {configured} is configured")]
    VariantMismatch {
        configured: crate::protocol::Variant,
        reported: crate::protocol::Variant,
        version: u8,
    },
    /// A field read would run past the end of the payload.
    #[error("Payload read out of range - offset={offset} len={len} available={available}")]
    BoundsFailure {
        offset: usize,
        len: usize,
        available: usize,
    },
    /// No confident cell/temperature layout was found.
    #[error("Structural ambiguity: {0}")]
    StructuralAmbiguity(Box<Ambiguity>),
    #[error("Console protocol error: {0}")]
    Console(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short, stable name of the error kind, used in structured log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ConnectionFailure { .. } => "connection_failure",
            Error::ReadTimeout(_) => "read_timeout",
            Error::Truncated { .. } => "truncated",
            Error::ChecksumMismatch { .. } => "checksum_mismatch",
            Error::Malformed(_) => "malformed",
            Error::Oversized { .. } => "oversized",
            Error::Rejected { .. } => "rejected",
            Error::VariantMismatch { .. } => "variant_mismatch",
            Error::BoundsFailure { .. } => "bounds_failure",
            Error::StructuralAmbiguity(_) => "structural_ambiguity",
            Error::Console(_) => "console",
            Error::Io(_) => "io",
        }
    }
}
