//! Claim adjudication.
//!
//! Pipeline: Validation → Eligibility → Formulary → Plan limits →
//! Authorization → Step therapy → DUR → Pricing
//!
//! Every stage before pricing is read-only. A claim that passes all of them
//! commits its pricing to the member's accumulators exactly once.

mod pricing;
mod registry;

pub use pricing::*;
pub use registry::*;

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};
use thiserror::Error;

use crate::config::AdjudicationConfig;
use crate::dur::{DurError, DurRequest, DurValidator, StepTherapyManager, StepTherapyResult};
use crate::models::{
    Claim, ClaimResponse, CoverageDetails, DurAlertType, Formulary, FormularyStatus, Member,
    PriorFill, RejectCode, ValidationError,
};
use crate::prior_auth::{authorization_number, PriorAuthError, PriorAuthWorkflow};

/// Adjudication errors. Business rejections are responses, not errors.
#[derive(Error, Debug)]
pub enum AdjudicationError {
    #[error("Invalid claim: {0}")]
    Validation(#[from] ValidationError),

    #[error("DUR error: {0}")]
    Dur(#[from] DurError),

    #[error("Prior authorization error: {0}")]
    PriorAuth(#[from] PriorAuthError),

    #[error("Pricing does not balance for claim {claim_id}: member {member_paid} + plan {plan_paid} != {total_cost}")]
    PricingImbalance {
        claim_id: String,
        member_paid: rust_decimal::Decimal,
        plan_paid: rust_decimal::Decimal,
        total_cost: rust_decimal::Decimal,
    },

    #[error("Accumulators changed during adjudication: {0}")]
    StaleAccumulators(String),

    #[error("Member not registered: {0}")]
    MemberNotRegistered(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

pub type AdjudicationResult<T> = Result<T, AdjudicationError>;

impl<T> From<std::sync::PoisonError<T>> for AdjudicationError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        AdjudicationError::LockPoisoned(e.to_string())
    }
}

/// Reject codes and one message per finding from a single stage.
#[derive(Debug, Default)]
struct Findings {
    codes: Vec<RejectCode>,
    messages: Vec<String>,
}

impl Findings {
    fn add(&mut self, code: RejectCode, message: String) {
        if !self.codes.contains(&code) {
            self.codes.push(code);
        }
        self.messages.push(message);
    }

    fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    fn into_response(self, claim_id: &str) -> ClaimResponse {
        ClaimResponse::rejected(claim_id, self.codes, self.messages, Vec::new())
    }
}

/// Decides claims against a formulary snapshot.
///
/// Holds no per-member state; the caller supplies the member and history.
pub struct AdjudicationEngine {
    formulary: Arc<Formulary>,
    config: AdjudicationConfig,
    step_therapy: StepTherapyManager,
    dur: Option<DurValidator>,
    prior_auth: Option<Arc<PriorAuthWorkflow>>,
}

impl AdjudicationEngine {
    /// Engine without DUR or prior-auth lookups.
    pub fn new(formulary: Arc<Formulary>, config: AdjudicationConfig) -> Self {
        Self {
            formulary,
            step_therapy: StepTherapyManager::with_lookback_days(config.step_therapy_lookback_days),
            config,
            dur: None,
            prior_auth: None,
        }
    }

    /// Attach a DUR validator, run before pricing when `enforce_dur` is set.
    pub fn with_dur(mut self, validator: DurValidator) -> Self {
        self.dur = Some(validator);
        self
    }

    /// Attach a workflow used to find authorizations a claim did not reference.
    pub fn with_prior_auth(mut self, workflow: Arc<PriorAuthWorkflow>) -> Self {
        self.prior_auth = Some(workflow);
        self
    }

    pub fn with_step_therapy(mut self, manager: StepTherapyManager) -> Self {
        self.step_therapy = manager;
        self
    }

    pub fn formulary(&self) -> &Formulary {
        &self.formulary
    }

    pub fn config(&self) -> &AdjudicationConfig {
        &self.config
    }

    /// Adjudicate with no claim history.
    pub fn adjudicate(&self, claim: &Claim, member: &mut Member) -> AdjudicationResult<ClaimResponse> {
        self.adjudicate_with_history(claim, member, &[])
    }

    /// Adjudicate a claim for a registered member, holding that member's lock
    /// from eligibility through the accumulator commit.
    pub fn adjudicate_registered(
        &self,
        claim: &Claim,
        registry: &MemberRegistry,
        history: &[PriorFill],
    ) -> AdjudicationResult<ClaimResponse> {
        registry.with_member(&claim.member_id, |member| {
            self.adjudicate_with_history(claim, member, history)
        })
    }

    /// Full pipeline. `history` is the member's paid fills for DUR and step therapy.
    pub fn adjudicate_with_history(
        &self,
        claim: &Claim,
        member: &mut Member,
        history: &[PriorFill],
    ) -> AdjudicationResult<ClaimResponse> {
        claim.validate()?;
        debug!("Adjudicating claim {} for member {}", claim.claim_id, member.member_id);

        let eligibility = check_eligibility(claim, member);
        if !eligibility.is_empty() {
            return Ok(self.reject(claim, eligibility));
        }

        let coverage = match self.formulary.check_coverage(&claim.drug.ndc) {
            FormularyStatus::Covered(details) => details,
            status => {
                let mut findings = Findings::default();
                findings.add(RejectCode::ProductNotCovered, status.message());
                return Ok(self.reject(claim, findings));
            }
        };

        if self.config.enforce_plan_limits {
            let limits = check_plan_limits(claim, member, &coverage);
            if !limits.is_empty() {
                return Ok(self.reject(claim, limits));
            }
        }

        let prior_auth_number = self.resolve_prior_auth(claim, &coverage)?;
        if coverage.requires_prior_auth && prior_auth_number.is_none() {
            let mut findings = Findings::default();
            findings.add(
                RejectCode::PriorAuthRequired,
                format!("{} requires prior authorization", coverage.drug_name),
            );
            return Ok(self.reject(claim, findings));
        }

        if coverage.requires_step_therapy && prior_auth_number.is_none() {
            let step = self.check_step_therapy(claim, &coverage, history)?;
            if !step.satisfied {
                let mut findings = Findings::default();
                findings.add(
                    RejectCode::StepTherapyRequired,
                    format!(
                        "{}; try {}",
                        step.message,
                        step.required_alternatives.join(", ")
                    ),
                );
                return Ok(self.reject(claim, findings));
            }
        }

        let mut dur_alerts = Vec::new();
        if self.config.enforce_dur {
            if let Some(validator) = &self.dur {
                let summary = validator.validate(&DurRequest::for_claim(claim, member, history))?;
                if summary.blocks_dispensing() {
                    let code = if summary.has_major(DurAlertType::EarlyRefill) {
                        RejectCode::RefillTooSoon
                    } else {
                        RejectCode::DurReject
                    };
                    let messages = summary
                        .alerts
                        .iter()
                        .filter(|a| a.severity.requires_override())
                        .map(|a| a.message.clone())
                        .collect();
                    info!("Claim {} held by DUR ({})", claim.claim_id, code.code());
                    return Ok(ClaimResponse::rejected(
                        &claim.claim_id,
                        vec![code],
                        messages,
                        summary.alerts,
                    ));
                }
                dur_alerts = summary.alerts;
            }
        }

        let pricing = quote(
            claim.ingredient_cost,
            claim.dispensing_fee,
            coverage.cost_share,
            &member.accumulators,
        );
        if !pricing.is_balanced() {
            return Err(AdjudicationError::PricingImbalance {
                claim_id: claim.claim_id.clone(),
                member_paid: pricing.member_paid,
                plan_paid: pricing.plan_paid,
                total_cost: pricing.total_cost,
            });
        }
        commit(&mut member.accumulators, &pricing)?;

        let adjudicated_at = Utc::now();
        let auth = authorization_number("RX", &claim.claim_id, adjudicated_at);
        info!(
            "Claim {} accepted: total {} member {} plan {}",
            claim.claim_id, pricing.total_cost, pricing.member_paid, pricing.plan_paid
        );
        Ok(ClaimResponse::accepted(
            &claim.claim_id,
            pricing,
            auth,
            prior_auth_number,
            dur_alerts,
            adjudicated_at,
        ))
    }

    fn reject(&self, claim: &Claim, findings: Findings) -> ClaimResponse {
        info!(
            "Claim {} rejected: {}",
            claim.claim_id,
            findings
                .codes
                .iter()
                .map(|c| c.code())
                .collect::<Vec<_>>()
                .join(",")
        );
        findings.into_response(&claim.claim_id)
    }

    /// The claim's own PA reference, else an approval on file for the drug.
    fn resolve_prior_auth(
        &self,
        claim: &Claim,
        coverage: &CoverageDetails,
    ) -> AdjudicationResult<Option<String>> {
        if claim.has_prior_auth() {
            return Ok(claim.prior_auth_number.clone());
        }
        if !(coverage.requires_prior_auth || coverage.requires_step_therapy) {
            return Ok(None);
        }
        let Some(workflow) = &self.prior_auth else {
            return Ok(None);
        };
        let existing =
            workflow.check_existing_auth(&claim.member_id, &claim.drug.ndc, claim.service_date)?;
        Ok(existing.and_then(|r| r.authorization_number().map(str::to_string)))
    }

    fn check_step_therapy(
        &self,
        claim: &Claim,
        coverage: &CoverageDetails,
        history: &[PriorFill],
    ) -> AdjudicationResult<StepTherapyResult> {
        let result = match &coverage.step_therapy_protocol {
            Some(id) => self.step_therapy.check_protocol(id, history, claim.service_date)?,
            None => self
                .step_therapy
                .check_satisfied(&claim.drug, history, claim.service_date),
        };
        Ok(result)
    }
}

/// Every eligibility mismatch, in a fixed order.
fn check_eligibility(claim: &Claim, member: &Member) -> Findings {
    let mut findings = Findings::default();
    if !member.is_eligible_on(claim.service_date) {
        findings.add(
            RejectCode::PatientNotCovered,
            format!(
                "Member {} not eligible on {}",
                member.member_id, claim.service_date
            ),
        );
    }
    if claim.member_id != member.member_id {
        findings.add(
            RejectCode::InvalidCardholderId,
            format!("Cardholder {} does not match member {}", claim.member_id, member.member_id),
        );
    }
    if claim.bin != member.bin {
        findings.add(RejectCode::InvalidBin, format!("BIN {} does not match", claim.bin));
    }
    if claim.pcn != member.pcn {
        findings.add(RejectCode::InvalidPcn, format!("PCN {} does not match", claim.pcn));
    }
    if claim.group_number != member.group_number {
        findings.add(
            RejectCode::InvalidGroup,
            format!("Group {} does not match", claim.group_number),
        );
    }
    findings
}

/// Quantity, days-supply, age and gender limits from the formulary entry.
fn check_plan_limits(claim: &Claim, member: &Member, coverage: &CoverageDetails) -> Findings {
    let mut findings = Findings::default();
    if let Some(limit) = coverage.quantity_limit {
        if claim.quantity > limit {
            findings.add(
                RejectCode::PlanLimitationsExceeded,
                format!("Quantity {} exceeds limit {}", claim.quantity, limit),
            );
        }
    }
    if let Some(limit) = coverage.days_supply_limit {
        if claim.days_supply > limit {
            findings.add(
                RejectCode::PlanLimitationsExceeded,
                format!("Days supply {} exceeds limit {}", claim.days_supply, limit),
            );
        }
    }
    let age = member.age_on(claim.service_date);
    let too_young = coverage.min_age.map(|min| age < min).unwrap_or(false);
    let too_old = coverage.max_age.map(|max| age > max).unwrap_or(false);
    if too_young || too_old {
        findings.add(
            RejectCode::AgeNotCovered,
            format!("{} not covered at age {}", coverage.drug_name, age),
        );
    }
    if let Some(required) = coverage.gender_restriction {
        if member.gender != required {
            findings.add(
                RejectCode::GenderNotCovered,
                format!("{} restricted to gender {}", coverage.drug_name, required.code()),
            );
        }
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AccumulatorKind, AccumulatorSet, CostShare, DrugInfo, FormularyEntry, Gender, Gpi, Ndc,
    };
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn atorvastatin() -> DrugInfo {
        DrugInfo::new(
            Ndc::parse("00378395077").unwrap(),
            Gpi::parse("39400010000310").unwrap(),
            "Atorvastatin 10mg",
        )
    }

    fn formulary() -> Arc<Formulary> {
        let d = atorvastatin();
        let mut entry = FormularyEntry::covered(d.ndc, d.gpi, d.name, 1, CostShare::Copay(dec!(30)));
        entry.quantity_limit = Some(dec!(90));
        Arc::new(Formulary::from_entries(vec![entry]))
    }

    fn member() -> Member {
        Member {
            member_id: "M100".into(),
            first_name: "Ada".into(),
            last_name: "Moss".into(),
            date_of_birth: date(1970, 1, 1),
            gender: Gender::Female,
            bin: "610014".into(),
            pcn: "RXPCN".into(),
            group_number: "GRP01".into(),
            effective_date: date(2024, 1, 1),
            termination_date: None,
            accumulators: AccumulatorSet::new(dec!(100), dec!(3000)),
        }
    }

    fn claim() -> Claim {
        Claim {
            claim_id: "CLM-1".into(),
            prescription_number: "RX1001".into(),
            fill_number: 0,
            member_id: "M100".into(),
            bin: "610014".into(),
            pcn: "RXPCN".into(),
            group_number: "GRP01".into(),
            drug: atorvastatin(),
            quantity: dec!(30),
            days_supply: 30,
            ingredient_cost: dec!(140),
            dispensing_fee: dec!(10),
            service_date: date(2024, 3, 1),
            prescriber_npi: "1234567893".into(),
            pharmacy_npi: "1098765432".into(),
            prior_auth_number: None,
            dur_override: None,
        }
    }

    fn engine() -> AdjudicationEngine {
        AdjudicationEngine::new(formulary(), AdjudicationConfig::default())
    }

    #[test]
    fn test_accepts_and_commits_once() {
        let mut m = member();
        let response = engine().adjudicate(&claim(), &mut m).unwrap();
        assert!(response.is_accepted());
        let pricing = response.pricing.as_ref().unwrap();
        assert_eq!(pricing.member_paid, dec!(130));
        assert_eq!(pricing.plan_paid, dec!(20));
        assert!(response.authorization_number.as_ref().unwrap().starts_with("RX"));
        assert_eq!(m.accumulators.applied(AccumulatorKind::Deductible), dec!(100));
        assert_eq!(m.accumulators.applied(AccumulatorKind::OutOfPocket), dec!(130));
    }

    #[test]
    fn test_eligibility_collects_all_mismatches() {
        let mut m = member();
        let before = m.accumulators.clone();
        let mut c = claim();
        c.service_date = date(2023, 12, 1);
        c.bin = "999999".into();
        c.group_number = "OTHER".into();
        let response = engine().adjudicate(&c, &mut m).unwrap();
        assert_eq!(response.reject_code_values(), vec!["65", "01", "06"]);
        assert_eq!(response.messages.len(), 3);
        assert_eq!(m.accumulators, before);
    }

    #[test]
    fn test_not_on_formulary() {
        let mut m = member();
        let mut c = claim();
        c.drug.ndc = Ndc::parse("00000000001").unwrap();
        let response = engine().adjudicate(&c, &mut m).unwrap();
        assert_eq!(response.reject_codes, vec![RejectCode::ProductNotCovered]);
        assert!(response.messages[0].contains("not on formulary"));
    }

    #[test]
    fn test_quantity_limit() {
        let mut m = member();
        let mut c = claim();
        c.quantity = dec!(120);
        let response = engine().adjudicate(&c, &mut m).unwrap();
        assert_eq!(response.reject_codes, vec![RejectCode::PlanLimitationsExceeded]);

        let relaxed = AdjudicationEngine::new(
            formulary(),
            AdjudicationConfig {
                enforce_plan_limits: false,
                ..AdjudicationConfig::default()
            },
        );
        assert!(relaxed.adjudicate(&c, &mut m).unwrap().is_accepted());
    }

    #[test]
    fn test_invalid_claim_is_an_error() {
        let mut m = member();
        let before = m.accumulators.clone();
        let mut c = claim();
        c.claim_id = String::new();
        assert!(matches!(
            engine().adjudicate(&c, &mut m),
            Err(AdjudicationError::Validation(_))
        ));
        assert_eq!(m.accumulators, before);
    }

    #[test]
    fn test_unregistered_member() {
        let registry = MemberRegistry::new();
        assert!(matches!(
            engine().adjudicate_registered(&claim(), &registry, &[]),
            Err(AdjudicationError::MemberNotRegistered(_))
        ));
    }
}
