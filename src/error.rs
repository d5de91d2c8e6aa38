//! Error taxonomy shared across the stack (§7 of the design notes).
//!
//! Parse-level errors encountered while processing an inbound frame are
//! never propagated to callers: the dispatch path logs them at `trace`
//! level and drops the packet. Everything else — configuration mistakes,
//! resource exhaustion, API misuse — is returned up through `Result`.

use core::fmt;

/// Every error the stack can report to a caller.
///
/// This is a flat taxonomy rather than a per-layer error type: callers at
/// the socket API boundary want one enum they can match on regardless of
/// which layer produced the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid parameter")]
    InvalidParameter,
    #[error("invalid length")]
    InvalidLength,
    #[error("invalid address")]
    InvalidAddress,
    #[error("invalid interface")]
    InvalidInterface,
    #[error("value out of range")]
    OutOfRange,
    #[error("out of resources")]
    OutOfResources,
    #[error("out of memory")]
    OutOfMemory,
    #[error("capability not compiled in")]
    NotImplemented,
    #[error("transmitter busy")]
    TransmitterBusy,
    #[error("no packet pending")]
    BufferEmpty,
    #[error("wrong identifier")]
    WrongIdentifier,
    #[error("destination not on link")]
    NotOnLink,
    #[error("no binding")]
    NoBinding,
    #[error("no address configured")]
    NoAddress,
    #[error("wait canceled")]
    WaitCanceled,
    #[error("operation timed out")]
    Timeout,
    #[error("message too long")]
    MessageTooLong,
    #[error("malformed packet")]
    InvalidPacket,
    #[error("checksum mismatch")]
    InvalidChecksum,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("unspecified failure")]
    Failure,
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors that only ever occur while parsing a received frame.
///
/// These never escape the dispatch path: every call site maps them to a
/// `trace!`/`debug!` log line and drops the packet, per §7's propagation
/// policy ("parse-level errors on RX are always silently dropped").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxError {
    TooShort,
    BadVersion,
    BadChecksum,
    Unsupported,
}

impl fmt::Display for RxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RxError::TooShort => write!(f, "frame shorter than its header"),
            RxError::BadVersion => write!(f, "unexpected protocol version"),
            RxError::BadChecksum => write!(f, "checksum did not verify"),
            RxError::Unsupported => write!(f, "unsupported wire feature"),
        }
    }
}

impl From<RxError> for Error {
    fn from(e: RxError) -> Self {
        match e {
            RxError::BadChecksum => Error::InvalidChecksum,
            _ => Error::InvalidPacket,
        }
    }
}
