//! Prior authorization request/response models.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::claim::DrugInfo;
use super::ndc::Ndc;

/// How quickly the prescriber needs a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Urgency {
    Standard,
    Urgent,
    Emergency,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Standard => "standard",
            Urgency::Urgent => "urgent",
            Urgency::Emergency => "emergency",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "standard" => Some(Urgency::Standard),
            "urgent" | "expedited" => Some(Urgency::Urgent),
            "emergency" => Some(Urgency::Emergency),
            _ => None,
        }
    }
}

/// Whether this is a first request or a continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    New,
    Renewal,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::New => "new",
            RequestType::Renewal => "renewal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "new" | "initial" => Some(RequestType::New),
            "renewal" | "continuation" => Some(RequestType::Renewal),
            _ => None,
        }
    }
}

/// Decisions reachable from `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaDecision {
    Approved,
    PartiallyApproved,
    Denied,
    Cancelled,
}

impl PaDecision {
    pub fn grants_coverage(&self) -> bool {
        matches!(self, PaDecision::Approved | PaDecision::PartiallyApproved)
    }
}

/// Observable status. `Expired` is only ever derived at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaStatus {
    Pending,
    Approved,
    PartiallyApproved,
    Denied,
    Cancelled,
    Expired,
}

impl PaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaStatus::Pending => "pending",
            PaStatus::Approved => "approved",
            PaStatus::PartiallyApproved => "partially_approved",
            PaStatus::Denied => "denied",
            PaStatus::Cancelled => "cancelled",
            PaStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaStatus::Pending),
            "approved" => Some(PaStatus::Approved),
            "partially_approved" => Some(PaStatus::PartiallyApproved),
            "denied" => Some(PaStatus::Denied),
            "cancelled" => Some(PaStatus::Cancelled),
            "expired" => Some(PaStatus::Expired),
            _ => None,
        }
    }
}

impl From<PaDecision> for PaStatus {
    fn from(decision: PaDecision) -> Self {
        match decision {
            PaDecision::Approved => PaStatus::Approved,
            PaDecision::PartiallyApproved => PaStatus::PartiallyApproved,
            PaDecision::Denied => PaStatus::Denied,
            PaDecision::Cancelled => PaStatus::Cancelled,
        }
    }
}

/// A prescriber's request for authorization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaRequest {
    pub request_id: String,
    pub member_id: String,
    pub drug: DrugInfo,
    pub quantity: Decimal,
    pub days_supply: u32,
    /// ICD-10 codes supporting medical necessity
    pub diagnosis_codes: Vec<String>,
    pub urgency: Urgency,
    pub request_type: RequestType,
    pub prescriber_npi: String,
    pub clinical_notes: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl PaRequest {
    /// New standard request with a generated id.
    pub fn new(
        member_id: impl Into<String>,
        drug: DrugInfo,
        quantity: Decimal,
        days_supply: u32,
        prescriber_npi: impl Into<String>,
    ) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            member_id: member_id.into(),
            drug,
            quantity,
            days_supply,
            diagnosis_codes: Vec::new(),
            urgency: Urgency::Standard,
            request_type: RequestType::New,
            prescriber_npi: prescriber_npi.into(),
            clinical_notes: None,
            submitted_at: Utc::now(),
        }
    }

    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }

    pub fn with_request_type(mut self, request_type: RequestType) -> Self {
        self.request_type = request_type;
        self
    }

    pub fn with_diagnoses(mut self, codes: Vec<String>) -> Self {
        self.diagnosis_codes = codes;
        self
    }
}

/// The payer's answer to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaResponse {
    pub decision: PaDecision,
    pub authorization_number: Option<String>,
    pub approved_quantity: Option<Decimal>,
    pub approved_days_supply: Option<u32>,
    pub effective_date: Option<NaiveDate>,
    pub expiration_date: Option<NaiveDate>,
    pub denial_reason: Option<String>,
    /// Suggested formulary alternatives on denial
    pub alternatives: Vec<String>,
    pub appeal_deadline: Option<NaiveDate>,
    pub appeal_instructions: Option<String>,
    pub auto_approved: bool,
    pub decided_by: String,
    pub decided_at: DateTime<Utc>,
}

/// One entry in a record's append-only status log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub sequence: u32,
    pub status: PaStatus,
    pub actor: String,
    pub note: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// A request, its current response and the full status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaRecord {
    pub request: PaRequest,
    pub response: Option<PaResponse>,
    pub history: Vec<StatusChange>,
}

impl PaRecord {
    /// New pending record with its opening history entry.
    pub fn new(request: PaRequest) -> Self {
        let opened = StatusChange {
            sequence: 1,
            status: PaStatus::Pending,
            actor: request.prescriber_npi.clone(),
            note: Some("Request submitted".into()),
            changed_at: request.submitted_at,
        };
        Self {
            request,
            response: None,
            history: vec![opened],
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request.request_id
    }

    /// Stored status: `Pending` until a response exists.
    pub fn status(&self) -> PaStatus {
        match &self.response {
            None => PaStatus::Pending,
            Some(response) => response.decision.into(),
        }
    }

    /// Status as seen on `as_of`, with expiry applied.
    pub fn effective_status(&self, as_of: NaiveDate) -> PaStatus {
        match &self.response {
            Some(response) if response.decision.grants_coverage() => match response.expiration_date {
                Some(expires) if as_of > expires => PaStatus::Expired,
                _ => response.decision.into(),
            },
            _ => self.status(),
        }
    }

    pub fn is_decided(&self) -> bool {
        self.response.is_some()
    }

    pub fn authorization_number(&self) -> Option<&str> {
        self.response
            .as_ref()
            .and_then(|r| r.authorization_number.as_deref())
    }

    /// True when an approval for this member and drug is in force on `as_of`.
    pub fn covers(&self, member_id: &str, ndc: &Ndc, as_of: NaiveDate) -> bool {
        if self.request.member_id != member_id || &self.request.drug.ndc != ndc {
            return false;
        }
        match &self.response {
            Some(response) if response.decision.grants_coverage() => {
                match (response.effective_date, response.expiration_date) {
                    (Some(from), Some(to)) => from <= as_of && as_of <= to,
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// Replace the current response and append a history entry.
    ///
    /// Earlier history entries are never removed.
    pub(crate) fn record_response(&mut self, response: PaResponse, note: Option<String>) {
        let entry = StatusChange {
            sequence: self.next_sequence(),
            status: response.decision.into(),
            actor: response.decided_by.clone(),
            note,
            changed_at: response.decided_at,
        };
        self.history.push(entry);
        self.response = Some(response);
    }

    fn next_sequence(&self) -> u32 {
        self.history.last().map(|h| h.sequence + 1).unwrap_or(1)
    }
}
