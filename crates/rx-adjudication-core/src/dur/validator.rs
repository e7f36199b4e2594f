//! DUR validator: runs every check and reduces the alerts to one verdict.

use chrono::NaiveDate;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::AdjudicationConfig;
use crate::models::{
    active_medications, Claim, DrugInfo, DurAlert, DurAlertType, DurOverride, Gender, Member,
    OverrideCodes, PriorFill, ProfessionalServiceCode, ReasonForService, ResultOfServiceCode,
    Severity,
};

use super::{
    DurError, DurResult, RulesEngine, StepTherapyManager, StepTherapyResult,
    DEFAULT_EARLY_REFILL_THRESHOLD_PERCENT,
};

/// Everything the checks need for one fill.
#[derive(Debug, Clone, Copy)]
pub struct DurRequest<'a> {
    pub drug: &'a DrugInfo,
    pub member_age: u32,
    pub gender: Gender,
    pub service_date: NaiveDate,
    /// The member's paid fills, any order
    pub history: &'a [PriorFill],
    pub dur_override: Option<&'a DurOverride>,
}

impl<'a> DurRequest<'a> {
    pub fn for_claim(claim: &'a Claim, member: &Member, history: &'a [PriorFill]) -> Self {
        Self {
            drug: &claim.drug,
            member_age: member.age_on(claim.service_date),
            gender: member.gender,
            service_date: claim.service_date,
            history,
            dur_override: claim.dur_override.as_ref(),
        }
    }
}

/// Aggregated DUR outcome for one fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurAlertSummary {
    pub alerts: Vec<DurAlert>,
    pub major_count: usize,
    pub moderate_count: usize,
    pub minor_count: usize,
    /// At least one Major alert
    pub requires_override: bool,
    /// Valid override codes cleared every Major alert
    pub override_provided: bool,
    /// No alerts, or every required override was supplied
    pub passed: bool,
    pub step_therapy: Option<StepTherapyResult>,
}

impl DurAlertSummary {
    fn from_alerts(
        alerts: Vec<DurAlert>,
        override_provided: bool,
        step_therapy: Option<StepTherapyResult>,
    ) -> Self {
        let count = |s: Severity| alerts.iter().filter(|a| a.severity == s).count();
        let major_count = count(Severity::Major);
        let moderate_count = count(Severity::Moderate);
        let minor_count = count(Severity::Minor);
        let requires_override = major_count > 0;
        let passed = alerts.is_empty() || (requires_override && override_provided);
        Self {
            alerts,
            major_count,
            moderate_count,
            minor_count,
            requires_override,
            override_provided,
            passed,
            step_therapy,
        }
    }

    /// Major findings that were not overridden. Advisory alerts never block.
    pub fn blocks_dispensing(&self) -> bool {
        self.requires_override && !self.override_provided
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.alerts.iter().map(|a| a.severity).max()
    }

    pub fn has_major(&self, alert_type: DurAlertType) -> bool {
        self.alerts
            .iter()
            .any(|a| a.alert_type == alert_type && a.severity == Severity::Major)
    }
}

/// Orchestrates the rules engine, early-refill check and step therapy.
#[derive(Debug, Clone)]
pub struct DurValidator {
    rules: RulesEngine,
    step_therapy: StepTherapyManager,
    early_refill_threshold_percent: u8,
}

impl Default for DurValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl DurValidator {
    /// Validator with the default rule tables and protocols.
    pub fn new() -> Self {
        Self {
            rules: RulesEngine::new(),
            step_therapy: StepTherapyManager::new(),
            early_refill_threshold_percent: DEFAULT_EARLY_REFILL_THRESHOLD_PERCENT,
        }
    }

    pub fn from_config(config: &AdjudicationConfig) -> Self {
        Self {
            rules: RulesEngine::new(),
            step_therapy: StepTherapyManager::with_lookback_days(config.step_therapy_lookback_days),
            early_refill_threshold_percent: config.early_refill_threshold_percent,
        }
    }

    pub fn with_parts(rules: RulesEngine, step_therapy: StepTherapyManager, threshold_percent: u8) -> Self {
        Self {
            rules,
            step_therapy,
            early_refill_threshold_percent: threshold_percent,
        }
    }

    pub fn rules(&self) -> &RulesEngine {
        &self.rules
    }

    pub fn step_therapy(&self) -> &StepTherapyManager {
        &self.step_therapy
    }

    /// Run every check for one fill.
    ///
    /// Fails only when submitted override codes are invalid; clinical findings
    /// are reported through the summary.
    pub fn validate(&self, request: &DurRequest<'_>) -> DurResult<DurAlertSummary> {
        let current: Vec<&PriorFill> = active_medications(request.history, request.service_date);
        let drug = request.drug;

        let mut alerts = self.rules.check_interactions(drug, &current);
        alerts.extend(self.rules.check_duplication(drug, &current));
        alerts.extend(self.rules.check_early_refill(
            drug,
            request.history,
            request.service_date,
            self.early_refill_threshold_percent,
        ));
        alerts.extend(self.rules.check_age_gender(drug, request.member_age, request.gender));

        let step = self
            .step_therapy
            .check_satisfied(drug, request.history, request.service_date);
        if step.required && !step.satisfied {
            alerts.push(DurAlert::new(
                DurAlertType::StepTherapy,
                Severity::Moderate,
                drug.name.clone(),
                None,
                step.message.clone(),
            ));
        }
        let step = if step.required { Some(step) } else { None };

        let override_provided = match request.dur_override {
            Some(raw) => {
                let codes = validate_override(raw)?;
                apply_override(&mut alerts, &codes)
            }
            None => false,
        };

        let summary = DurAlertSummary::from_alerts(alerts, override_provided, step);
        debug!(
            "DUR for {}: {} major, {} moderate, {} minor, passed={}",
            drug.name, summary.major_count, summary.moderate_count, summary.minor_count, summary.passed
        );
        Ok(summary)
    }
}

/// Check raw override codes against the closed NCPDP code sets.
pub fn validate_override(raw: &DurOverride) -> DurResult<OverrideCodes> {
    let reason_for_service = match raw.reason_for_service.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(code) => Some(
            ReasonForService::from_code(code)
                .ok_or_else(|| DurError::InvalidReasonCode(code.to_string()))?,
        ),
    };
    let professional_service = ProfessionalServiceCode::from_code(&raw.professional_service)
        .ok_or_else(|| DurError::InvalidProfessionalServiceCode(raw.professional_service.clone()))?;
    let result_of_service = ResultOfServiceCode::from_code(&raw.result_of_service)
        .ok_or_else(|| DurError::InvalidResultOfServiceCode(raw.result_of_service.clone()))?;

    Ok(OverrideCodes {
        reason_for_service,
        professional_service,
        result_of_service,
    })
}

/// Record codes on matching alerts. Returns true when every Major alert is cleared.
fn apply_override(alerts: &mut [DurAlert], codes: &OverrideCodes) -> bool {
    if !codes.result_of_service.is_filled() {
        warn!(
            "Override result {} does not dispense; Major alerts stay open",
            codes.result_of_service.code()
        );
        return false;
    }
    let mut any_recorded = false;
    for alert in alerts.iter_mut() {
        let targeted = codes
            .reason_for_service
            .map(|r| r == alert.reason_for_service)
            .unwrap_or(true);
        if targeted {
            alert.record_override(codes);
            any_recorded = true;
        }
    }
    let majors_cleared = alerts
        .iter()
        .filter(|a| a.severity == Severity::Major)
        .all(|a| a.is_overridden());
    any_recorded && majors_cleared
}
