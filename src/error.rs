use thiserror::Error;

/// Failure taxonomy for the audio pipeline.
///
/// Cloneable so a single fetch failure can fan out to every waiter attached
/// to the same in-flight download.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AudioError {
    /// Malformed identifier, rejected before any fetch is attempted.
    #[error("invalid source: {0}")]
    InvalidSource(String),

    /// The source cannot be retrieved (private, removed, restricted).
    /// Not retried automatically.
    #[error("source unavailable: {0}")]
    FetchUnavailable(String),

    /// Network error or timeout. Eligible for a bounded number of retries
    /// at the queue layer's discretion.
    #[error("transient fetch failure: {0}")]
    FetchTransient(String),

    /// Payload was retrieved but could not be decoded.
    #[error("failed to decode audio: {0}")]
    DecodeError(String),

    #[error("the queue is empty")]
    QueueEmpty,

    #[error("no track is currently playing")]
    NoCurrentTrack,

    #[error("no queue entry at position {0}")]
    NoSuchPosition(usize),

    #[error("unknown effect: {0}")]
    UnknownEffect(String),

    #[error("no active session with id {0}")]
    UnknownSession(u64),
}

impl AudioError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AudioError::FetchTransient(_))
    }
}
