//! Error types for ax25link.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Codec errors, session outcomes, and
//! transport failures are all captured here.

/// The error type for all ax25link operations.
///
/// The first group of variants are caller errors raised while building or
/// encoding a frame. The decode group describes malformed inbound bytes and
/// is recoverable: the link drops the frame and keeps reading. The session
/// group terminates a pending `connect`/`send`/`disconnect`. The rest are
/// transport failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A callsign was empty, longer than six characters, or contained
    /// characters outside `A-Z0-9`.
    #[error("invalid callsign: {0:?}")]
    InvalidCallsign(String),

    /// An SSID outside `0..=15`.
    #[error("invalid SSID {0} (must be 0-15)")]
    InvalidSsid(u8),

    /// A PID value that AX.25 reserves as an escape (`0xFF`).
    #[error("invalid PID 0x{0:02X}")]
    InvalidPid(u8),

    /// The requested frame type does not exist at the requested modulo
    /// (for example SABME at modulo 8).
    #[error("unsupported control field combination: {0}")]
    UnsupportedCombination(String),

    /// The control field did not match any known frame type.
    #[error("unknown control field 0x{0:02X}")]
    UnknownControlField(u8),

    /// The frame is shorter than the AX.25 minimum.
    #[error("frame too short: {0} bytes")]
    FrameTooShort(usize),

    /// The frame ended in the middle of an address or control field.
    #[error("frame truncated")]
    Truncated,

    /// The repeater path exceeded the configured ceiling.
    #[error("too many repeaters (limit {0})")]
    TooManyRepeaters(usize),

    /// The peer answered a connection request with DM.
    #[error("connection rejected by peer")]
    ConnectionRejected,

    /// The T1 retry budget was exhausted without a response.
    #[error("timeout waiting for response")]
    Timeout,

    /// The peer sent FRMR, or a response inconsistent with the request.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The operation was cancelled because the session or link closed.
    #[error("operation cancelled")]
    Cancelled,

    /// The session is not in a state that permits the operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An invalid parameter was passed to a builder or operation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A transport-level error (serial port, TCP socket).
    #[error("transport error: {0}")]
    Transport(String),

    /// No connection to the TNC has been established, or it was closed.
    #[error("not connected")]
    NotConnected,

    /// The connection to the TNC was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` for errors caused by malformed inbound bytes.
    ///
    /// The link drops such frames and continues with the next one.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Error::UnknownControlField(_)
                | Error::FrameTooShort(_)
                | Error::Truncated
                | Error::TooManyRepeaters(_)
                | Error::InvalidCallsign(_)
        )
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
