//! Crate-wide error type.
//!
//! Connection errors carry a [`TransportErrorCode`]; everything else (codec
//! failures on data that should be discarded rather than torn the
//! connection down for, collaborator failures) is folded into `Protocol`
//! or `Internal`. See `transport_error.rs` for the error-code table.

use std::{error::Error, fmt};

use crate::transport_error::TransportErrorCode;

pub type QuicResult<T> = Result<T, QuicError>;

/// Why a connection is being torn down, and with what error code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuicError {
    /// A connection-fatal error: the peer violated a MUST, or we did.
    Transport {
        code: TransportErrorCode,
        frame_type: Option<u64>,
        reason: String,
    },
    /// An application closed a stream or the connection with its own code.
    Application { code: u64, reason: String },
    /// A collaborator (crypto layer) reported a failure.
    Crypto { code: u16, reason: String },
    /// Input that is malformed enough that the safe behavior is to drop it
    /// silently per §7, but the caller asked to see the reason.
    Malformed(String),
    /// Socket I/O or other local failure.
    Io(String),
}

impl QuicError {
    pub fn transport(code: TransportErrorCode, reason: impl Into<String>) -> Self {
        QuicError::Transport {
            code,
            frame_type: None,
            reason: reason.into(),
        }
    }

    pub fn transport_on_frame(
        code: TransportErrorCode,
        frame_type: u64,
        reason: impl Into<String>,
    ) -> Self {
        QuicError::Transport {
            code,
            frame_type: Some(frame_type),
            reason: reason.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        QuicError::Malformed(reason.into())
    }

    /// The error code to put on the wire in a CONNECTION_CLOSE frame, if
    /// this error is connection-fatal. Malformed-input errors are not
    /// wire-visible: per §7 they are silently discarded instead.
    pub fn transport_code(&self) -> Option<TransportErrorCode> {
        match self {
            QuicError::Transport { code, .. } => Some(*code),
            QuicError::Crypto { code, .. } => Some(TransportErrorCode::Crypto(*code)),
            _ => None,
        }
    }
}

impl Error for QuicError {}

impl fmt::Display for QuicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuicError::Transport {
                code,
                frame_type,
                reason,
            } => write!(
                f,
                "transport error {:?} (frame {:?}): {}",
                code, frame_type, reason
            ),
            QuicError::Application { code, reason } => {
                write!(f, "application error 0x{:x}: {}", code, reason)
            }
            QuicError::Crypto { code, reason } => write!(f, "crypto error 0x{:x}: {}", code, reason),
            QuicError::Malformed(reason) => write!(f, "malformed input: {}", reason),
            QuicError::Io(reason) => write!(f, "io error: {}", reason),
        }
    }
}

impl From<std::io::Error> for QuicError {
    fn from(err: std::io::Error) -> Self {
        QuicError::Io(err.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for QuicError {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        QuicError::Io(err.to_string())
    }
}

/// Analogous to the teacher's `require`: fail fast with a malformed-input
/// error rather than reaching for `assert!`/`unwrap` in codec paths.
pub fn require(cond: bool, msg: &str) -> QuicResult<()> {
    if !cond {
        return Err(QuicError::malformed(msg));
    }
    Ok(())
}
