//! Error types for mapi-rop-client

use crate::wire::RopId;
use thiserror::Error;

/// Codec failures raised while building or parsing ROP buffers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("insufficient data: need {needed} bytes, have {have}")]
    InsufficientData { needed: usize, have: usize },

    #[error("invalid RPC header: {0}")]
    InvalidHeader(String),

    #[error("count mismatch for {field}: declared {declared}, actual {actual}")]
    CountMismatch {
        field: &'static str,
        declared: usize,
        actual: usize,
    },

    #[error("unknown ROP id {0:#04x}")]
    UnknownRop(u8),

    #[error("unknown notification type {0:#06x}")]
    UnknownNotificationType(u16),

    #[error("unknown table event type {0:#06x}")]
    UnknownTableEvent(u16),

    #[error("field presence violation: {0}")]
    FieldPresence(String),

    #[error("unterminated string in {0}")]
    UnterminatedString(&'static str),

    #[error("value too large for {field}: {size}")]
    TooLarge { field: &'static str, size: usize },

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("compressed payloads are not supported")]
    Compressed,

    #[error("terminal marker {0:?} is not the last response")]
    MisplacedTerminal(RopId),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    /// The server reported `ecRpcFormat`; never retried.
    #[error("RPC format error (status {0:#010x})")]
    Format(u32),

    #[error("{call} failed with status {status:#010x}")]
    Rpc { call: &'static str, status: u32 },

    #[error("transport is not connected")]
    NotConnected,

    #[error("invalid handle reference row {row} slot {slot}")]
    InvalidHandle { row: usize, slot: usize },

    #[error("unexpected response: expected {expected:?}, got {actual:?}")]
    UnexpectedResponse { expected: Option<RopId>, actual: RopId },

    /// A ROP completed with a non-zero return value.
    #[error("{rop:?} failed with return value {return_value:#010x}")]
    Rop { rop: RopId, return_value: u32 },

    #[error("server returned {missing} fewer responses than requested")]
    MissingResponses { missing: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
