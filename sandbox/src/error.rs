//! Sandbox error types.

use webz_hostapi::NetworkError;
use webz_primitives::{ErrorCode, WalletError};

/// Top-level error type for the sandbox crate.
///
/// Every failed call resolves to exactly one of these. Errors raised inside
/// the sandbox cross the boundary through the error bridge and are rebuilt
/// here with their message unchanged.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Wasmtime engine, compilation, or instantiation error.
    #[error("wasmtime error: {0}")]
    Wasmtime(#[from] anyhow::Error),

    /// Invalid sandbox or wallet configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A value could not be moved across the boundary (bad UTF-8, truncated
    /// buffer, out-of-range sentinel).
    #[error("marshalling error: {0}")]
    Marshal(String),

    /// Linear memory access or growth failed.
    #[error("memory error: {0}")]
    Memory(String),

    /// A handle, slot, or allocation was used after it was consumed or freed.
    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    /// The wallet logic rejected the request.
    #[error("{message}")]
    Domain { code: ErrorCode, message: String },

    /// The block-data service failed.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Worker pool bootstrap or dispatch failed.
    #[error("worker pool error: {0}")]
    Pool(String),

    /// A worker context trapped.
    #[error("guest trapped: {0}")]
    GuestTrapped(String),
}

impl SandboxError {
    pub fn marshal(message: impl Into<String>) -> Self {
        Self::Marshal(message.into())
    }

    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::Lifecycle(message.into())
    }

    pub fn memory(message: impl Into<String>) -> Self {
        Self::Memory(message.into())
    }

    /// Domain error code, if this came from the wallet logic.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Domain { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<WalletError> for SandboxError {
    fn from(e: WalletError) -> Self {
        Self::Domain {
            code: e.code,
            message: e.message,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = SandboxError> = std::result::Result<T, E>;
