// ⚠️ Errors - Recoverable game and identity failures
// Every failing operation returns one of these and leaves state untouched.

use crate::money::Gold;
use thiserror::Error;

/// Ledger and education failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("invalid amount")]
    InvalidAmount,

    #[error("insufficient gold: need {needed:.2}, have {available:.2}")]
    InsufficientFunds { needed: Gold, available: Gold },

    #[error("invalid index {index} (have {len} entries)")]
    InvalidIndex { index: usize, len: usize },

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} is not available to your social class")]
    Forbidden(String),

    #[error("prerequisites for {course} not met: missing {}", .missing.join(", "))]
    PrereqUnmet { course: String, missing: Vec<String> },

    #[error("already enrolled in {0}")]
    AlreadyEnrolled(String),

    #[error("{0} has already been completed")]
    AlreadyCompleted(String),

    #[error("not enrolled in any course")]
    NotEnrolled,
}

impl GameError {
    /// Stable machine-readable code
    pub fn kind(&self) -> &'static str {
        match self {
            GameError::InvalidAmount => "invalid_amount",
            GameError::InsufficientFunds { .. } => "insufficient_funds",
            GameError::InvalidIndex { .. } => "invalid_index",
            GameError::NotFound(_) => "not_found",
            GameError::Forbidden(_) => "forbidden",
            GameError::PrereqUnmet { .. } => "prereq_unmet",
            GameError::AlreadyEnrolled(_) => "already_enrolled",
            GameError::AlreadyCompleted(_) => "already_completed",
            GameError::NotEnrolled => "not_enrolled",
        }
    }
}

/// Registration, login and session failures
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("username or email already registered")]
    AlreadyRegistered,

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("identity storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_error_messages() {
        let err = GameError::InsufficientFunds {
            needed: Decimal::from(50),
            available: Decimal::from(10),
        };
        assert_eq!(err.to_string(), "insufficient gold: need 50.00, have 10.00");
        assert_eq!(err.kind(), "insufficient_funds");

        let err = GameError::PrereqUnmet {
            course: "Law".to_string(),
            missing: vec!["Trivium Studies".to_string(), "Latin".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "prerequisites for Law not met: missing Trivium Studies, Latin"
        );
    }
}
