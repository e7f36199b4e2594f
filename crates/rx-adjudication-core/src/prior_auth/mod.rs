//! Prior authorization workflow.
//!
//! Lifecycle: Pending → {Approved | PartiallyApproved | Denied | Cancelled}.
//! `Expired` is derived when a record is read after its expiration date.

mod policy;
mod store;
mod workflow;

pub use policy::*;
pub use store::*;
pub use workflow::*;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Prior authorization errors.
#[derive(Error, Debug)]
pub enum PriorAuthError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DbError),

    #[error("Prior authorization not found: {0}")]
    NotFound(String),

    #[error("Invalid prior authorization request: {0}")]
    InvalidRequest(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

pub type PriorAuthResult<T> = Result<T, PriorAuthError>;

impl<T> From<std::sync::PoisonError<T>> for PriorAuthError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        PriorAuthError::LockPoisoned(e.to_string())
    }
}

/// Length of the hex portion of a generated authorization number.
const AUTH_NUMBER_HEX_LEN: usize = 12;

/// Derive an authorization number from a seed and timestamp.
///
/// `prefix` + first 12 uppercase hex digits of SHA-256(seed ‖ timestamp).
pub fn authorization_number(prefix: &str, seed: &str, at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(at.to_rfc3339().as_bytes());
    let digest = hex::encode_upper(hasher.finalize());
    format!("{}{}", prefix, &digest[..AUTH_NUMBER_HEX_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_authorization_number_shape() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let number = authorization_number("PA", "req-1", at);
        assert_eq!(number.len(), 14);
        assert!(number.starts_with("PA"));
        assert!(number[2..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert_eq!(number, authorization_number("PA", "req-1", at));
        assert_ne!(number, authorization_number("PA", "req-2", at));
    }
}
