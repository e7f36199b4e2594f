//! Claim response models.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::dur::DurAlert;

/// NCPDP-style reject codes. Values are stable identifiers, not a conformance claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectCode {
    /// 01
    InvalidBin,
    /// 04
    InvalidPcn,
    /// 06
    InvalidGroup,
    /// 07
    InvalidCardholderId,
    /// 60
    AgeNotCovered,
    /// 61
    GenderNotCovered,
    /// 65
    PatientNotCovered,
    /// 70
    ProductNotCovered,
    /// 75
    PriorAuthRequired,
    /// 76
    PlanLimitationsExceeded,
    /// 79
    RefillTooSoon,
    /// 88
    DurReject,
    /// 608
    StepTherapyRequired,
}

impl RejectCode {
    pub const ALL: [RejectCode; 13] = [
        RejectCode::InvalidBin,
        RejectCode::InvalidPcn,
        RejectCode::InvalidGroup,
        RejectCode::InvalidCardholderId,
        RejectCode::AgeNotCovered,
        RejectCode::GenderNotCovered,
        RejectCode::PatientNotCovered,
        RejectCode::ProductNotCovered,
        RejectCode::PriorAuthRequired,
        RejectCode::PlanLimitationsExceeded,
        RejectCode::RefillTooSoon,
        RejectCode::DurReject,
        RejectCode::StepTherapyRequired,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            RejectCode::InvalidBin => "01",
            RejectCode::InvalidPcn => "04",
            RejectCode::InvalidGroup => "06",
            RejectCode::InvalidCardholderId => "07",
            RejectCode::AgeNotCovered => "60",
            RejectCode::GenderNotCovered => "61",
            RejectCode::PatientNotCovered => "65",
            RejectCode::ProductNotCovered => "70",
            RejectCode::PriorAuthRequired => "75",
            RejectCode::PlanLimitationsExceeded => "76",
            RejectCode::RefillTooSoon => "79",
            RejectCode::DurReject => "88",
            RejectCode::StepTherapyRequired => "608",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RejectCode::InvalidBin => "M/I BIN Number",
            RejectCode::InvalidPcn => "M/I Processor Control Number",
            RejectCode::InvalidGroup => "M/I Group ID",
            RejectCode::InvalidCardholderId => "M/I Cardholder ID",
            RejectCode::AgeNotCovered => "Product/Service Not Covered For Patient Age",
            RejectCode::GenderNotCovered => "Product/Service Not Covered For Patient Gender",
            RejectCode::PatientNotCovered => "Patient Is Not Covered",
            RejectCode::ProductNotCovered => "Product/Service Not Covered",
            RejectCode::PriorAuthRequired => "Prior Authorization Required",
            RejectCode::PlanLimitationsExceeded => "Plan Limitations Exceeded",
            RejectCode::RefillTooSoon => "Refill Too Soon",
            RejectCode::DurReject => "DUR Reject Error",
            RejectCode::StepTherapyRequired => "Step Therapy, Alternate Drug Therapy Required",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim();
        Self::ALL.into_iter().find(|c| c.code() == code)
    }
}

impl fmt::Display for RejectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.description())
    }
}

/// Final claim disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimStatus {
    Accepted,
    Rejected,
}

/// How the total cost was split between plan and member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingBreakdown {
    pub ingredient_cost: Decimal,
    pub dispensing_fee: Decimal,
    pub total_cost: Decimal,
    /// Drawn from the deductible accumulator
    pub deductible_applied: Decimal,
    /// Copay/coinsurance owed on the post-deductible balance
    pub copay_amount: Decimal,
    pub member_paid: Decimal,
    pub plan_paid: Decimal,
    /// Member share applied to the out-of-pocket accumulator
    pub out_of_pocket_applied: Decimal,
    pub deductible_remaining: Decimal,
    pub out_of_pocket_remaining: Decimal,
}

impl PricingBreakdown {
    /// Member and plan shares account for exactly the total cost.
    pub fn is_balanced(&self) -> bool {
        self.member_paid + self.plan_paid == self.total_cost
            && self.total_cost == self.ingredient_cost + self.dispensing_fee
            && self.member_paid >= Decimal::ZERO
            && self.plan_paid >= Decimal::ZERO
    }
}

/// The one response produced for a claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub claim_id: String,
    pub status: ClaimStatus,
    /// Empty on accept
    pub reject_codes: Vec<RejectCode>,
    /// Human-readable notes, one per finding
    pub messages: Vec<String>,
    pub pricing: Option<PricingBreakdown>,
    /// Payer authorization number for a paid claim
    pub authorization_number: Option<String>,
    /// Prior authorization that covered this claim, if any
    pub prior_auth_number: Option<String>,
    pub dur_alerts: Vec<DurAlert>,
    pub adjudicated_at: DateTime<Utc>,
}

impl ClaimResponse {
    /// Paid claim.
    pub fn accepted(
        claim_id: impl Into<String>,
        pricing: PricingBreakdown,
        authorization_number: String,
        prior_auth_number: Option<String>,
        dur_alerts: Vec<DurAlert>,
        adjudicated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            claim_id: claim_id.into(),
            status: ClaimStatus::Accepted,
            reject_codes: Vec::new(),
            messages: Vec::new(),
            pricing: Some(pricing),
            authorization_number: Some(authorization_number),
            prior_auth_number,
            dur_alerts,
            adjudicated_at,
        }
    }

    /// Rejected claim. Codes keep the order they were found in.
    pub fn rejected(
        claim_id: impl Into<String>,
        reject_codes: Vec<RejectCode>,
        messages: Vec<String>,
        dur_alerts: Vec<DurAlert>,
    ) -> Self {
        Self {
            claim_id: claim_id.into(),
            status: ClaimStatus::Rejected,
            reject_codes,
            messages,
            pricing: None,
            authorization_number: None,
            prior_auth_number: None,
            dur_alerts,
            adjudicated_at: Utc::now(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == ClaimStatus::Accepted
    }

    pub fn has_reject(&self, code: RejectCode) -> bool {
        self.reject_codes.contains(&code)
    }

    /// Reject codes as their wire values.
    pub fn reject_code_values(&self) -> Vec<&'static str> {
        self.reject_codes.iter().map(|c| c.code()).collect()
    }
}
