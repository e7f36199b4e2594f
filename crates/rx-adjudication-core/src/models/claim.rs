//! Pharmacy claim and paid-fill history models.

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::dur::DurOverride;
use super::ndc::{Gpi, Ndc};
use super::response::ClaimResponse;
use super::ValidationError;

/// Longest days-supply a single fill may carry.
pub const MAX_DAYS_SUPPLY: u32 = 365;

/// Highest NCPDP fill number (0 = original, 1..=99 = refills).
pub const MAX_FILL_NUMBER: u8 = 99;

/// The dispensed product: package code, therapeutic class and display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrugInfo {
    pub ndc: Ndc,
    pub gpi: Gpi,
    pub name: String,
}

impl DrugInfo {
    pub fn new(ndc: Ndc, gpi: Gpi, name: impl Into<String>) -> Self {
        Self {
            ndc,
            gpi,
            name: name.into(),
        }
    }
}

/// A submitted pharmacy claim. Created by the caller, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub claim_id: String,
    pub prescription_number: String,
    /// 0 for the original fill
    pub fill_number: u8,
    pub member_id: String,
    pub bin: String,
    pub pcn: String,
    pub group_number: String,
    pub drug: DrugInfo,
    pub quantity: Decimal,
    pub days_supply: u32,
    pub ingredient_cost: Decimal,
    pub dispensing_fee: Decimal,
    pub service_date: NaiveDate,
    pub prescriber_npi: String,
    pub pharmacy_npi: String,
    /// Prior authorization number submitted with the claim
    pub prior_auth_number: Option<String>,
    /// DUR/PPS override codes submitted with the claim
    pub dur_override: Option<DurOverride>,
}

impl Claim {
    /// Structural validation. Runs before any accumulator is touched.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("claim_id", &self.claim_id)?;
        require("prescription_number", &self.prescription_number)?;
        require("member_id", &self.member_id)?;
        require("bin", &self.bin)?;
        require("pcn", &self.pcn)?;
        require("group_number", &self.group_number)?;
        require("drug_name", &self.drug.name)?;

        validate_npi("prescriber_npi", &self.prescriber_npi)?;
        validate_npi("pharmacy_npi", &self.pharmacy_npi)?;

        if self.fill_number > MAX_FILL_NUMBER {
            return Err(ValidationError::InvalidFillNumber(self.fill_number));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(ValidationError::InvalidQuantity(self.quantity));
        }
        if self.days_supply == 0 || self.days_supply > MAX_DAYS_SUPPLY {
            return Err(ValidationError::InvalidDaysSupply(self.days_supply));
        }
        if self.ingredient_cost < Decimal::ZERO {
            return Err(ValidationError::NegativeAmount("ingredient_cost"));
        }
        if self.dispensing_fee < Decimal::ZERO {
            return Err(ValidationError::NegativeAmount("dispensing_fee"));
        }
        if let Some(pa) = &self.prior_auth_number {
            require("prior_auth_number", pa)?;
        }
        Ok(())
    }

    /// Ingredient cost plus dispensing fee.
    pub fn total_cost(&self) -> Decimal {
        self.ingredient_cost + self.dispensing_fee
    }

    /// True when the claim carries a non-blank prior authorization reference.
    pub fn has_prior_auth(&self) -> bool {
        self.prior_auth_number
            .as_deref()
            .map(|pa| !pa.trim().is_empty())
            .unwrap_or(false)
    }
}

/// A previously paid fill, used for DUR lookback and step therapy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorFill {
    pub claim_id: String,
    pub member_id: String,
    pub drug: DrugInfo,
    pub fill_date: NaiveDate,
    pub days_supply: u32,
    pub quantity: Decimal,
    pub prescriber_npi: Option<String>,
}

impl PriorFill {
    /// History entry for a claim that was paid. Rejected responses yield None.
    pub fn from_accepted(claim: &Claim, response: &ClaimResponse) -> Option<Self> {
        if !response.is_accepted() || response.claim_id != claim.claim_id {
            return None;
        }
        Some(Self {
            claim_id: claim.claim_id.clone(),
            member_id: claim.member_id.clone(),
            drug: claim.drug.clone(),
            fill_date: claim.service_date,
            days_supply: claim.days_supply,
            quantity: claim.quantity,
            prescriber_npi: Some(claim.prescriber_npi.clone()),
        })
    }

    /// Day the supply is expected to run out.
    pub fn supply_end(&self) -> NaiveDate {
        self.fill_date
            .checked_add_signed(Duration::days(i64::from(self.days_supply)))
            .unwrap_or(NaiveDate::MAX)
    }

    /// True when the patient should still have medication on hand on `date`.
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.fill_date <= date && date < self.supply_end()
    }
}

/// Fills whose supply covers `date`, one per NDC (latest fill wins).
pub fn active_medications(history: &[PriorFill], date: NaiveDate) -> Vec<&PriorFill> {
    let mut active: Vec<&PriorFill> = Vec::new();
    for fill in history.iter().filter(|f| f.is_active_on(date)) {
        match active.iter().position(|a| a.drug.ndc == fill.drug.ndc) {
            Some(pos) if active[pos].fill_date < fill.fill_date => active[pos] = fill,
            Some(_) => {}
            None => active.push(fill),
        }
    }
    active
}

fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    Ok(())
}

fn validate_npi(field: &'static str, value: &str) -> Result<(), ValidationError> {
    require(field, value)?;
    if value.len() != 10 || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidNpi {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}
