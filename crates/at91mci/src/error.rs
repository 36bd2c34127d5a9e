//! Error types shared by the bridge, the DMA adapter and the card session.

use crate::host::Ivar;
use crate::mmc::Request;
use thiserror::Error;

/// Outcome of a single card command, recorded in [`crate::mmc::Command::error`].
///
/// These never cross the interrupt boundary as control flow; the upstream
/// layer inspects them after the request's completion resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MmcError {
    /// Response or data phase timed out
    #[error("command timed out")]
    Timeout,
    /// Response or data CRC mismatch
    #[error("bad CRC")]
    BadCrc,
    /// Receive overrun or transmit underrun
    #[error("FIFO overrun/underrun")]
    Fifo,
    /// The transfer buffer could not be mapped for DMA
    #[error("no memory for DMA mapping")]
    NoMemory,
    /// Any other controller error status
    #[error("command failed")]
    Failed,
}

/// Failures of the bridge contract itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// A request is already outstanding on this controller
    #[error("controller busy")]
    Busy,
    /// The property cannot be written by the upstream layer
    #[error("{0:?} is read-only")]
    ReadOnly(Ivar),
    /// The controller was detached and no longer accepts work
    #[error("controller detached")]
    Detached,
    /// The controller dropped the request without completing it
    #[error("request abandoned")]
    Abandoned,
}

/// A rejected submission; the request is handed back untouched.
#[derive(Debug, Error)]
#[error("request rejected: {reason}")]
pub struct SubmitError {
    /// Why the request was not accepted
    pub reason: BridgeError,
    /// The request as it was submitted
    pub request: Request,
}

/// Failures of a DMA engine mapping operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DmaError {
    /// The buffer exceeds what a single mapping may cover
    #[error("mapping of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: usize, max: usize },
    /// The engine has no mapping resources left
    #[error("no DMA mapping resources available")]
    Exhausted,
    /// A mapping is already active; the previous one was never unloaded
    #[error("DMA map already loaded")]
    AlreadyMapped,
}

/// Failures of the upstream-side card session and its block device view
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error("CMD{opcode} failed: {error}")]
    Command { opcode: u32, error: MmcError },
    #[error("card did not leave the busy state during initialisation")]
    InitTimeout,
    #[error("card did not echo the interface condition check pattern")]
    VoltageMismatch,
    #[error("request did not complete within {0:?}")]
    Stalled(std::time::Duration),
    #[error("transfer of {0} bytes is not a whole number of blocks")]
    Unaligned(usize),
}

impl From<SubmitError> for SessionError {
    fn from(err: SubmitError) -> Self {
        Self::Bridge(err.reason)
    }
}

impl From<SessionError> for std::io::Error {
    fn from(err: SessionError) -> Self {
        let kind = match &err {
            SessionError::Command {
                error: MmcError::Timeout,
                ..
            }
            | SessionError::Stalled(_)
            | SessionError::InitTimeout => std::io::ErrorKind::TimedOut,
            SessionError::Unaligned(_) => std::io::ErrorKind::InvalidInput,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}
