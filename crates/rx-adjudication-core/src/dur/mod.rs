//! Drug utilization review.
//!
//! Pipeline: Rules Engine (interactions, duplication, early refill, age/gender)
//! + Step Therapy → Validator summary → override handling

mod rules;
mod step_therapy;
mod validator;

pub use rules::*;
pub use step_therapy::*;
pub use validator::*;

use thiserror::Error;

/// DUR errors. Raised for bad override input, never for clinical findings.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DurError {
    #[error("Invalid reason-for-service code: {0}")]
    InvalidReasonCode(String),

    #[error("Invalid professional-service code: {0}")]
    InvalidProfessionalServiceCode(String),

    #[error("Invalid result-of-service code: {0}")]
    InvalidResultOfServiceCode(String),

    #[error("Unknown step therapy protocol: {0}")]
    UnknownProtocol(String),
}

pub type DurResult<T> = Result<T, DurError>;
