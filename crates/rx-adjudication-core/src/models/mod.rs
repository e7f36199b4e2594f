//! Domain models for pharmacy claim adjudication.

mod claim;
mod dur;
mod formulary;
mod member;
mod ndc;
mod prior_auth;
mod response;

pub use claim::*;
pub use dur::*;
pub use formulary::*;
pub use member::*;
pub use ndc::*;
pub use prior_auth::*;
pub use response::*;

use rust_decimal::Decimal;
use thiserror::Error;

/// Structural problems with submitted data, found before any business rule runs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid NDC '{value}': {reason}")]
    InvalidNdc { value: String, reason: String },

    #[error("Invalid GPI: {0}")]
    InvalidGpi(String),

    #[error("Invalid {field}: '{value}' is not a 10-digit NPI")]
    InvalidNpi { field: &'static str, value: String },

    #[error("Invalid fill number: {0}")]
    InvalidFillNumber(u8),

    #[error("Quantity must be positive, got {0}")]
    InvalidQuantity(Decimal),

    #[error("Days supply out of range: {0}")]
    InvalidDaysSupply(u32),

    #[error("Amount must not be negative: {0}")]
    NegativeAmount(&'static str),

    #[error("Invalid date: {0}")]
    InvalidDate(String),
}
