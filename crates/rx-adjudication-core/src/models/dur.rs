//! Drug utilization review alert and override models.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Alert severity. Ordered so that `Major` is the highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Informational
    Minor,
    /// Use with caution
    Moderate,
    /// Requires an override before dispensing
    Major,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Minor => "Minor",
            Severity::Moderate => "Moderate",
            Severity::Major => "Major",
        }
    }

    /// NCPDP clinical significance code.
    pub fn significance_code(&self) -> &'static str {
        match self {
            Severity::Major => "1",
            Severity::Moderate => "2",
            Severity::Minor => "3",
        }
    }

    pub fn requires_override(&self) -> bool {
        matches!(self, Severity::Major)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "minor" | "3" => Some(Severity::Minor),
            "moderate" | "2" => Some(Severity::Moderate),
            "major" | "1" | "severe" => Some(Severity::Major),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of DUR finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DurAlertType {
    DrugInteraction,
    TherapeuticDuplication,
    EarlyRefill,
    DrugAge,
    DrugGender,
    StepTherapy,
}

impl DurAlertType {
    /// Reason-for-service code used to report this alert.
    pub fn reason_for_service(&self) -> ReasonForService {
        match self {
            DurAlertType::DrugInteraction => ReasonForService::DrugDrugInteraction,
            DurAlertType::TherapeuticDuplication => ReasonForService::TherapeuticDuplication,
            DurAlertType::EarlyRefill => ReasonForService::EarlyRefill,
            DurAlertType::DrugAge => ReasonForService::DrugAgePrecaution,
            DurAlertType::DrugGender => ReasonForService::DrugGenderPrecaution,
            DurAlertType::StepTherapy => ReasonForService::AlternativeTherapy,
        }
    }
}

/// NCPDP reason-for-service (conflict) codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReasonForService {
    DrugDrugInteraction,
    TherapeuticDuplication,
    EarlyRefill,
    DrugAgePrecaution,
    DrugGenderPrecaution,
    AlternativeTherapy,
}

impl ReasonForService {
    pub const ALL: [ReasonForService; 6] = [
        ReasonForService::DrugDrugInteraction,
        ReasonForService::TherapeuticDuplication,
        ReasonForService::EarlyRefill,
        ReasonForService::DrugAgePrecaution,
        ReasonForService::DrugGenderPrecaution,
        ReasonForService::AlternativeTherapy,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            ReasonForService::DrugDrugInteraction => "DD",
            ReasonForService::TherapeuticDuplication => "TD",
            ReasonForService::EarlyRefill => "ER",
            ReasonForService::DrugAgePrecaution => "PA",
            ReasonForService::DrugGenderPrecaution => "SX",
            ReasonForService::AlternativeTherapy => "AT",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim().to_uppercase();
        Self::ALL.into_iter().find(|r| r.code() == code)
    }
}

/// NCPDP professional-service codes (what the pharmacist did).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProfessionalServiceCode {
    NoIntervention,
    PatientAssessment,
    CoordinationOfCare,
    PrescriberConsulted,
    MedicationReview,
    PatientConsulted,
    PatientEducation,
    PatientMedicationHistory,
    PharmacistConsultedOtherSource,
}

impl ProfessionalServiceCode {
    pub const ALL: [ProfessionalServiceCode; 9] = [
        ProfessionalServiceCode::NoIntervention,
        ProfessionalServiceCode::PatientAssessment,
        ProfessionalServiceCode::CoordinationOfCare,
        ProfessionalServiceCode::PrescriberConsulted,
        ProfessionalServiceCode::MedicationReview,
        ProfessionalServiceCode::PatientConsulted,
        ProfessionalServiceCode::PatientEducation,
        ProfessionalServiceCode::PatientMedicationHistory,
        ProfessionalServiceCode::PharmacistConsultedOtherSource,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            ProfessionalServiceCode::NoIntervention => "00",
            ProfessionalServiceCode::PatientAssessment => "AS",
            ProfessionalServiceCode::CoordinationOfCare => "CC",
            ProfessionalServiceCode::PrescriberConsulted => "M0",
            ProfessionalServiceCode::MedicationReview => "MR",
            ProfessionalServiceCode::PatientConsulted => "P0",
            ProfessionalServiceCode::PatientEducation => "PE",
            ProfessionalServiceCode::PatientMedicationHistory => "PH",
            ProfessionalServiceCode::PharmacistConsultedOtherSource => "R0",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim().to_uppercase();
        Self::ALL.into_iter().find(|p| p.code() == code)
    }
}

/// NCPDP result-of-service codes (what happened to the prescription).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultOfServiceCode {
    NotSpecified,
    FilledFalsePositive,
    FilledAsIs,
    FilledDifferentDose,
    FilledDifferentDirections,
    FilledDifferentDrug,
    FilledDifferentQuantity,
    FilledWithPrescriberApproval,
    NotFilled,
    NotFilledDirectionsClarified,
}

impl ResultOfServiceCode {
    pub const ALL: [ResultOfServiceCode; 10] = [
        ResultOfServiceCode::NotSpecified,
        ResultOfServiceCode::FilledFalsePositive,
        ResultOfServiceCode::FilledAsIs,
        ResultOfServiceCode::FilledDifferentDose,
        ResultOfServiceCode::FilledDifferentDirections,
        ResultOfServiceCode::FilledDifferentDrug,
        ResultOfServiceCode::FilledDifferentQuantity,
        ResultOfServiceCode::FilledWithPrescriberApproval,
        ResultOfServiceCode::NotFilled,
        ResultOfServiceCode::NotFilledDirectionsClarified,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            ResultOfServiceCode::NotSpecified => "00",
            ResultOfServiceCode::FilledFalsePositive => "1A",
            ResultOfServiceCode::FilledAsIs => "1B",
            ResultOfServiceCode::FilledDifferentDose => "1C",
            ResultOfServiceCode::FilledDifferentDirections => "1D",
            ResultOfServiceCode::FilledDifferentDrug => "1E",
            ResultOfServiceCode::FilledDifferentQuantity => "1F",
            ResultOfServiceCode::FilledWithPrescriberApproval => "1G",
            ResultOfServiceCode::NotFilled => "2A",
            ResultOfServiceCode::NotFilledDirectionsClarified => "2B",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim().to_uppercase();
        Self::ALL.into_iter().find(|r| r.code() == code)
    }

    /// True for results where the prescription was dispensed.
    pub fn is_filled(&self) -> bool {
        self.code().starts_with('1')
    }
}

/// Raw override codes as submitted on a claim's DUR/PPS segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurOverride {
    /// Reason-for-service code being overridden (blank = all alerts)
    pub reason_for_service: Option<String>,
    pub professional_service: String,
    pub result_of_service: String,
}

impl DurOverride {
    pub fn new(professional_service: impl Into<String>, result_of_service: impl Into<String>) -> Self {
        Self {
            reason_for_service: None,
            professional_service: professional_service.into(),
            result_of_service: result_of_service.into(),
        }
    }

    pub fn for_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason_for_service = Some(reason.into());
        self
    }
}

/// Override codes after validation against the closed code sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideCodes {
    pub reason_for_service: Option<ReasonForService>,
    pub professional_service: ProfessionalServiceCode,
    pub result_of_service: ResultOfServiceCode,
}

/// A single DUR finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurAlert {
    pub alert_type: DurAlertType,
    pub severity: Severity,
    /// The drug being dispensed
    pub drug: String,
    /// The conflicting drug, when there is one
    pub other_drug: Option<String>,
    pub message: String,
    pub reason_for_service: ReasonForService,
    /// Days ahead of the allowed refill date (early refill only)
    pub days_early: Option<i64>,
    /// Codes recorded when the alert was overridden
    pub professional_service: Option<ProfessionalServiceCode>,
    pub result_of_service: Option<ResultOfServiceCode>,
}

impl DurAlert {
    pub fn new(
        alert_type: DurAlertType,
        severity: Severity,
        drug: impl Into<String>,
        other_drug: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            alert_type,
            severity,
            drug: drug.into(),
            other_drug,
            message: message.into(),
            reason_for_service: alert_type.reason_for_service(),
            days_early: None,
            professional_service: None,
            result_of_service: None,
        }
    }

    pub fn is_overridden(&self) -> bool {
        self.professional_service.is_some() && self.result_of_service.is_some()
    }

    /// Record override codes against this alert.
    pub fn record_override(&mut self, codes: &OverrideCodes) {
        self.professional_service = Some(codes.professional_service);
        self.result_of_service = Some(codes.result_of_service);
    }
}
