//! Drug identifiers: NDC package codes and GPI therapeutic classes.
//!
//! Handles:
//! - NDC normalization (4-4-2, 5-3-2, 5-4-1 → 11-digit 5-4-2)
//! - GPI prefix matching for rule tables

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ValidationError;

/// Maximum length of a full GPI-14 code.
const GPI_MAX_LEN: usize = 14;

/// National Drug Code, always stored as 11 digits with no separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ndc(String);

impl Ndc {
    /// Parse and normalize an NDC.
    ///
    /// Hyphenated labeler-product-package forms are zero-padded to 5-4-2.
    /// A bare 10-digit code is rejected because the padding position is unknown.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::MissingField("ndc"));
        }

        let invalid = |reason: &str| ValidationError::InvalidNdc {
            value: raw.to_string(),
            reason: reason.to_string(),
        };

        let segments: Vec<&str> = trimmed.split('-').collect();
        let digits = match segments.as_slice() {
            [single] => {
                if !single.chars().all(|c| c.is_ascii_digit()) {
                    return Err(invalid("must contain only digits"));
                }
                match single.len() {
                    11 => single.to_string(),
                    10 => return Err(invalid("10-digit NDC is ambiguous without hyphens")),
                    n => return Err(invalid(&format!("expected 11 digits, found {}", n))),
                }
            }
            [labeler, product, package] => {
                if !segments
                    .iter()
                    .all(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
                {
                    return Err(invalid("segments must be non-empty digits"));
                }
                match (labeler.len(), product.len(), package.len()) {
                    (5, 4, 2) => format!("{}{}{}", labeler, product, package),
                    (4, 4, 2) => format!("0{}{}{}", labeler, product, package),
                    (5, 3, 2) => format!("{}0{}{}", labeler, product, package),
                    (5, 4, 1) => format!("{}{}0{}", labeler, product, package),
                    (a, b, c) => {
                        return Err(invalid(&format!("unsupported segment layout {}-{}-{}", a, b, c)))
                    }
                }
            }
            _ => return Err(invalid("expected 11 digits or three hyphenated segments")),
        };

        Ok(Self(digits))
    }

    /// The 11-digit form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Render as 5-4-2 with hyphens.
    pub fn formatted(&self) -> String {
        format!("{}-{}-{}", &self.0[..5], &self.0[5..9], &self.0[9..])
    }

    /// Labeler (manufacturer) segment.
    pub fn labeler(&self) -> &str {
        &self.0[..5]
    }
}

impl fmt::Display for Ndc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Ndc {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Ndc {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Ndc> for String {
    fn from(ndc: Ndc) -> Self {
        ndc.0
    }
}

/// Generic Product Identifier: a hierarchical therapeutic class code.
///
/// Two digits per level (group, class, subclass, ...), so a shorter code is
/// a broader class. Rules compare by plain string prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Gpi(String);

impl Gpi {
    /// Parse a GPI, ignoring spaces and hyphens used for display grouping.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let compact: String = raw.chars().filter(|c| *c != ' ' && *c != '-').collect();
        if compact.is_empty() {
            return Err(ValidationError::MissingField("gpi"));
        }
        if compact.len() > GPI_MAX_LEN || !compact.chars().all(|c| c.is_ascii_digit()) {
            return Err(ValidationError::InvalidGpi(raw.to_string()));
        }
        Ok(Self(compact))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when this code falls under the given class prefix.
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        !prefix.is_empty() && self.0.starts_with(prefix)
    }

    /// Two-digit drug group.
    pub fn drug_group(&self) -> &str {
        let end = self.0.len().min(2);
        &self.0[..end]
    }
}

impl fmt::Display for Gpi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Gpi {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Gpi> for String {
    fn from(gpi: Gpi) -> Self {
        gpi.0
    }
}
