use crate::registry::MailboxId;

/// Failure reported by a manager pass or one of its collaborators.
///
/// None of these halt the system: the task runner logs them and the next
/// pass retries. Broken invariants panic instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("operation failed")]
    Fail,
    #[error("unknown event")]
    UnknownEvent,
    #[error("not running")]
    NotRunning,
    #[error("already running")]
    AlreadyRunning,
    #[error("unknown notification")]
    UnknownNotify,
    #[error("mailbox {0:?} full, event dropped")]
    MailboxFull(MailboxId),
    #[error("timed out waiting for data")]
    Timeout,
    #[error("frame stalled mid-transfer")]
    Stalled,
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl Error {
    /// Start/stop guards that leave the state untouched.
    pub const fn is_idempotency_guard(&self) -> bool {
        matches!(self, Error::AlreadyRunning | Error::NotRunning)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("buffer too small")]
    BufferTooSmall,
    #[error("malformed packet")]
    Malformed,
    #[error("unknown packet type {0}")]
    UnknownPacketType(u32),
    #[error("frame length mismatch")]
    LengthMismatch,
    #[error("frame too long")]
    FrameTooLong,
}
