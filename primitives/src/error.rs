//! Error types for the WebZ wallet layer.
//!
//! Domain failures carry a stable [`ErrorCode`] plus a human-readable
//! message. The code crosses the sandbox boundary unchanged so the host can
//! branch on it; the message is what callers display.

use std::fmt;

/// Stable wallet error codes.
///
/// The repr values are part of the boundary contract: the sandbox reports
/// them as plain integers and the host maps them back with
/// [`ErrorCode::from_i32`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    InvalidEncoding = 1,
    InvalidNetwork = 2,
    InvalidAddress = 3,
    InvalidKey = 4,
    InvalidSeed = 5,
    AccountNotFound = 6,
    AccountExists = 7,
    InsufficientFunds = 8,
    InvalidArgument = 9,
    MissingProvingKey = 10,
    MissingSignature = 11,
    MissingProof = 12,
    MismatchedPczt = 13,
    TransactionNotFound = 14,
    ChainMismatch = 15,
    Internal = 16,
}

impl ErrorCode {
    /// Convert from the integer code reported across the boundary.
    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Ok),
            1 => Some(Self::InvalidEncoding),
            2 => Some(Self::InvalidNetwork),
            3 => Some(Self::InvalidAddress),
            4 => Some(Self::InvalidKey),
            5 => Some(Self::InvalidSeed),
            6 => Some(Self::AccountNotFound),
            7 => Some(Self::AccountExists),
            8 => Some(Self::InsufficientFunds),
            9 => Some(Self::InvalidArgument),
            10 => Some(Self::MissingProvingKey),
            11 => Some(Self::MissingSignature),
            12 => Some(Self::MissingProof),
            13 => Some(Self::MismatchedPczt),
            14 => Some(Self::TransactionNotFound),
            15 => Some(Self::ChainMismatch),
            16 => Some(Self::Internal),
            _ => None,
        }
    }

    /// Return the i32 representation of this error code.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Returns true if this is the `Ok` variant.
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::InvalidEncoding => write!(f, "ERR_INVALID_ENCODING"),
            Self::InvalidNetwork => write!(f, "ERR_INVALID_NETWORK"),
            Self::InvalidAddress => write!(f, "ERR_INVALID_ADDRESS"),
            Self::InvalidKey => write!(f, "ERR_INVALID_KEY"),
            Self::InvalidSeed => write!(f, "ERR_INVALID_SEED"),
            Self::AccountNotFound => write!(f, "ERR_ACCOUNT_NOT_FOUND"),
            Self::AccountExists => write!(f, "ERR_ACCOUNT_EXISTS"),
            Self::InsufficientFunds => write!(f, "ERR_INSUFFICIENT_FUNDS"),
            Self::InvalidArgument => write!(f, "ERR_INVALID_ARGUMENT"),
            Self::MissingProvingKey => write!(f, "ERR_MISSING_PROVING_KEY"),
            Self::MissingSignature => write!(f, "ERR_MISSING_SIGNATURE"),
            Self::MissingProof => write!(f, "ERR_MISSING_PROOF"),
            Self::MismatchedPczt => write!(f, "ERR_MISMATCHED_PCZT"),
            Self::TransactionNotFound => write!(f, "ERR_TRANSACTION_NOT_FOUND"),
            Self::ChainMismatch => write!(f, "ERR_CHAIN_MISMATCH"),
            Self::Internal => write!(f, "ERR_INTERNAL"),
        }
    }
}

/// A domain failure raised by wallet logic.
///
/// Displays as the bare message so it can be surfaced to users verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct WalletError {
    pub code: ErrorCode,
    pub message: String,
}

impl WalletError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn encoding(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidEncoding, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    pub fn account_not_found(account: u32) -> Self {
        Self::new(
            ErrorCode::AccountNotFound,
            format!("account {account} not found"),
        )
    }

    pub fn insufficient_funds(available: u64, required: u64) -> Self {
        Self::new(
            ErrorCode::InsufficientFunds,
            format!("insufficient balance: available {available}, required {required}"),
        )
    }
}

/// Convenience result type for the wallet layer.
pub type WalletResult<T> = Result<T, WalletError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_from_i32_roundtrip() {
        for code in 0..=16 {
            let ec = ErrorCode::from_i32(code).unwrap();
            assert_eq!(ec.as_i32(), code);
        }
    }

    #[test]
    fn test_error_code_from_i32_invalid() {
        assert_eq!(ErrorCode::from_i32(-1), None);
        assert_eq!(ErrorCode::from_i32(17), None);
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::InsufficientFunds.to_string(), "ERR_INSUFFICIENT_FUNDS");
        assert_eq!(ErrorCode::Ok.to_string(), "OK");
        assert!(ErrorCode::Ok.is_ok());
        assert!(!ErrorCode::Internal.is_ok());
    }

    #[test]
    fn test_wallet_error_displays_message_verbatim() {
        let err = WalletError::insufficient_funds(100, 15_000);
        assert_eq!(err.code, ErrorCode::InsufficientFunds);
        assert_eq!(
            err.to_string(),
            "insufficient balance: available 100, required 15000"
        );
    }

    #[test]
    fn test_account_not_found_message() {
        let err = WalletError::account_not_found(7);
        assert_eq!(err.code, ErrorCode::AccountNotFound);
        assert!(err.message.contains('7'));
    }
}
