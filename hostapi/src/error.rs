//! Errors raised by a block-data service.

use webz_primitives::BlockHeight;

/// Failure talking to the block-data service.
///
/// These never originate inside the sandbox; the wallet facade hands them
/// back to the caller as-is and performs no retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    /// The service could not be reached.
    #[error("block source unavailable: {0}")]
    Unavailable(String),
    /// The requested range extends past what the service has.
    #[error("blocks {start}..={end} are not available")]
    MissingBlocks { start: BlockHeight, end: BlockHeight },
    /// The service refused a submitted transaction.
    #[error("transaction rejected: {0}")]
    Rejected(String),
    /// The service answered with something unusable.
    #[error("invalid response from block source: {0}")]
    InvalidResponse(String),
}

impl NetworkError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }
}
