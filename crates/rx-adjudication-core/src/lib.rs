//! Rx Adjudication Core Library
//!
//! Pharmacy benefit claim adjudication with drug utilization review and
//! prior authorization.
//!
//! # Architecture
//!
//! ```text
//! Pharmacy claim
//!      │
//!  Validation → Eligibility → Formulary → Plan limits
//!                                              │
//!                               Prior authorization lookup ◄── PA workflow
//!                                              │                (submit / review /
//!                                        Step therapy              auto-approve)
//!                                              │
//!                                  DUR (interaction, duplication,
//!                                   early refill, age/gender)
//!                                              │
//!                              ┌───────────────▼───────────────┐
//!                              │            Pricing            │
//!                              │  deductible → copay/coins.    │
//!                              │  out-of-pocket cap            │
//!                              └───────────────┬───────────────┘
//!                                              │
//!                              accumulators + paid-fill history
//! ```
//!
//! # Core Principle
//!
//! **Every claim gets exactly one response.** Accumulators change only when
//! a claim is accepted, and the member share plus the plan share always
//! equals the total cost.
//!
//! # Modules
//!
//! - [`adjudication`]: Claim pipeline, pricing and per-member locking
//! - [`config`]: Tunables loaded from TOML or the environment
//! - [`db`]: SQLite persistence for formulary, members, fills and prior auths
//! - [`dur`]: DUR rules engine, step therapy manager and validator
//! - [`models`]: Domain types (Claim, Member, FormularyEntry, PaRecord, etc.)
//! - [`prior_auth`]: Prior authorization workflow

pub mod adjudication;
pub mod config;
pub mod db;
pub mod dur;
pub mod models;
pub mod prior_auth;

// Re-export commonly used types
pub use adjudication::{AdjudicationEngine, AdjudicationError, MemberRegistry};
pub use config::{AdjudicationConfig, ConfigBuilder};
pub use db::{Database, SqlitePaStore};
pub use dur::{DurAlertSummary, DurValidator, RulesEngine, StepTherapyManager};
pub use models::{
    AccumulatorSet, Claim, ClaimResponse, DrugInfo, DurAlert, Formulary, FormularyEntry, Member,
    PaRecord, PaRequest, PaStatus, RejectCode, Severity,
};
pub use prior_auth::{InMemoryPaStore, PaStore, PriorAuthWorkflow};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, Utc};
use log::{info, warn};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use models::{
    Accumulator, AccumulatorKind, CostShare, DurAlertType, DurOverride, Gender, Gpi, Ndc,
    PriorFill, RequestType, StatusChange, Urgency,
};
use prior_auth::ApprovalTerms;

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum RxCoreError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Adjudication error: {0}")]
    AdjudicationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<db::DbError> for RxCoreError {
    fn from(e: db::DbError) -> Self {
        match e {
            db::DbError::NotFound(what) => RxCoreError::NotFound(what),
            other => RxCoreError::DatabaseError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for RxCoreError {
    fn from(e: serde_json::Error) -> Self {
        RxCoreError::SerializationError(e.to_string())
    }
}

impl From<models::ValidationError> for RxCoreError {
    fn from(e: models::ValidationError) -> Self {
        RxCoreError::InvalidInput(e.to_string())
    }
}

impl From<dur::DurError> for RxCoreError {
    fn from(e: dur::DurError) -> Self {
        RxCoreError::InvalidInput(e.to_string())
    }
}

impl From<AdjudicationError> for RxCoreError {
    fn from(e: AdjudicationError) -> Self {
        match e {
            AdjudicationError::Validation(v) => RxCoreError::InvalidInput(v.to_string()),
            other => RxCoreError::AdjudicationError(other.to_string()),
        }
    }
}

impl From<prior_auth::PriorAuthError> for RxCoreError {
    fn from(e: prior_auth::PriorAuthError) -> Self {
        match e {
            prior_auth::PriorAuthError::NotFound(id) => {
                RxCoreError::NotFound(format!("Prior authorization {}", id))
            }
            prior_auth::PriorAuthError::InvalidRequest(msg) => RxCoreError::InvalidInput(msg),
            other => RxCoreError::DatabaseError(other.to_string()),
        }
    }
}

impl From<config::ConfigError> for RxCoreError {
    fn from(e: config::ConfigError) -> Self {
        RxCoreError::ConfigError(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for RxCoreError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        RxCoreError::DatabaseError(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create a database at the given path. Configuration comes from
/// `RXADJ_*` environment variables.
#[uniffi::export]
pub fn open_database(path: String) -> Result<Arc<RxAdjudicationCore>, RxCoreError> {
    let db = Database::open(&path)?;
    let config = AdjudicationConfig::from_env();
    config.validate()?;
    Ok(Arc::new(RxAdjudicationCore::new(db, config)))
}

/// Open a database with configuration read from a TOML file.
#[uniffi::export]
pub fn open_database_with_config(
    path: String,
    config_path: String,
) -> Result<Arc<RxAdjudicationCore>, RxCoreError> {
    let config = AdjudicationConfig::from_file(&config_path)?;
    let db = Database::open(&path)?;
    Ok(Arc::new(RxAdjudicationCore::new(db, config)))
}

/// Create an in-memory database (for testing).
#[uniffi::export]
pub fn open_database_in_memory() -> Result<Arc<RxAdjudicationCore>, RxCoreError> {
    let db = Database::open_in_memory()?;
    Ok(Arc::new(RxAdjudicationCore::new(db, AdjudicationConfig::default())))
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe adjudication service for FFI.
#[derive(uniffi::Object)]
pub struct RxAdjudicationCore {
    db: Arc<Mutex<Database>>,
    config: AdjudicationConfig,
    prior_auth: Arc<PriorAuthWorkflow>,
    /// Held from member load through accumulator write
    claims: Mutex<()>,
}

impl RxAdjudicationCore {
    fn new(db: Database, config: AdjudicationConfig) -> Self {
        let db = Arc::new(Mutex::new(db));
        let prior_auth = Arc::new(PriorAuthWorkflow::sqlite(db.clone(), &config));
        Self {
            db,
            config,
            prior_auth,
            claims: Mutex::new(()),
        }
    }
}

#[uniffi::export]
impl RxAdjudicationCore {
    // =========================================================================
    // Formulary Operations
    // =========================================================================

    /// Add or update a formulary entry.
    pub fn upsert_formulary_entry(&self, entry: FfiFormularyEntry) -> Result<(), RxCoreError> {
        let entry: FormularyEntry = entry.try_into()?;
        let db = self.db.lock()?;
        db.upsert_formulary_entry(&entry)?;
        Ok(())
    }

    /// Get a formulary entry by NDC.
    pub fn get_formulary_entry(&self, ndc: String) -> Result<Option<FfiFormularyEntry>, RxCoreError> {
        let ndc = Ndc::parse(&ndc)?;
        let db = self.db.lock()?;
        let entry = db.get_formulary_entry(&ndc)?;
        Ok(entry.map(|e| e.into()))
    }

    // =========================================================================
    // Member Operations
    // =========================================================================

    /// Add or update a member, including accumulator totals.
    pub fn upsert_member(&self, member: FfiMember) -> Result<(), RxCoreError> {
        let member: Member = member.try_into()?;
        let db = self.db.lock()?;
        db.upsert_member(&member)?;
        Ok(())
    }

    /// Get a member by id.
    pub fn get_member(&self, member_id: String) -> Result<Option<FfiMember>, RxCoreError> {
        let db = self.db.lock()?;
        let member = db.get_member(&member_id)?;
        Ok(member.map(|m| m.into()))
    }

    /// Paid fills for a member, oldest first.
    pub fn get_fill_history(&self, member_id: String) -> Result<Vec<FfiPriorFill>, RxCoreError> {
        let db = self.db.lock()?;
        let fills = db.fills_for_member(&member_id, None)?;
        Ok(fills.into_iter().map(|f| f.into()).collect())
    }

    // =========================================================================
    // Claim Operations
    // =========================================================================

    /// Adjudicate a claim. Accepted claims update the member's accumulators
    /// and fill history before the response is returned.
    pub fn adjudicate_claim(&self, claim: FfiClaim) -> Result<FfiClaimResponse, RxCoreError> {
        let claim: Claim = claim.try_into()?;
        claim.validate()?;

        let _serial = self.claims.lock()?;
        let (formulary, member, history) = {
            let db = self.db.lock()?;
            let formulary = db.load_formulary()?;
            let member = db.get_member(&claim.member_id)?;
            let history = db.fills_for_member(&claim.member_id, None)?;
            (formulary, member, history)
        };

        let Some(mut member) = member else {
            warn!("Claim {} names unknown member {}", claim.claim_id, claim.member_id);
            let response = ClaimResponse::rejected(
                &claim.claim_id,
                vec![RejectCode::InvalidCardholderId],
                vec![format!("Member {} not found", claim.member_id)],
                Vec::new(),
            );
            return Ok(response.into());
        };

        // the workflow locks the database itself, so no db guard is held here
        let engine = AdjudicationEngine::new(Arc::new(formulary), self.config.clone())
            .with_dur(DurValidator::from_config(&self.config))
            .with_prior_auth(self.prior_auth.clone());
        let response = engine.adjudicate_with_history(&claim, &mut member, &history)?;

        if let Some(fill) = PriorFill::from_accepted(&claim, &response) {
            let mut db = self.db.lock()?;
            db.record_paid_claim(&fill, &member.accumulators)?;
            info!("Recorded paid fill {} for member {}", fill.claim_id, fill.member_id);
        }

        Ok(response.into())
    }

    // =========================================================================
    // Prior Authorization Operations
    // =========================================================================

    /// Submit a prior authorization request.
    pub fn submit_prior_auth(&self, request: FfiPaRequest) -> Result<FfiPaRecord, RxCoreError> {
        let request: PaRequest = request.try_into()?;
        let record = self.prior_auth.submit(request)?;
        Ok(ffi_record(record, today()))
    }

    /// Run the auto-approval policy. None when the request stays pending.
    pub fn check_auto_approval(&self, request_id: String) -> Result<Option<FfiPaRecord>, RxCoreError> {
        let record = self.prior_auth.check_auto_approval(&request_id)?;
        Ok(record.map(|r| ffi_record(r, today())))
    }

    /// Approve a request, optionally overriding the default term.
    pub fn approve_prior_auth(
        &self,
        request_id: String,
        reviewer: String,
        duration_days: Option<u32>,
        note: Option<String>,
    ) -> Result<FfiPaRecord, RxCoreError> {
        let terms = ApprovalTerms {
            duration_days,
            note,
            ..ApprovalTerms::default()
        };
        let record = self.prior_auth.approve(&request_id, &reviewer, terms)?;
        Ok(ffi_record(record, today()))
    }

    /// Approve a reduced quantity and days supply.
    pub fn partial_approve_prior_auth(
        &self,
        request_id: String,
        reviewer: String,
        quantity: f64,
        days_supply: u32,
    ) -> Result<FfiPaRecord, RxCoreError> {
        let quantity = to_decimal("quantity", quantity)?;
        let record = self
            .prior_auth
            .partial_approve(&request_id, &reviewer, quantity, days_supply, None)?;
        Ok(ffi_record(record, today()))
    }

    /// Deny a request with a reason and suggested alternatives.
    pub fn deny_prior_auth(
        &self,
        request_id: String,
        reviewer: String,
        reason: String,
        alternatives: Vec<String>,
    ) -> Result<FfiPaRecord, RxCoreError> {
        let record = self
            .prior_auth
            .deny(&request_id, &reviewer, &reason, alternatives)?;
        Ok(ffi_record(record, today()))
    }

    /// Withdraw a request.
    pub fn cancel_prior_auth(
        &self,
        request_id: String,
        actor: String,
        reason: String,
    ) -> Result<FfiPaRecord, RxCoreError> {
        let record = self.prior_auth.cancel(&request_id, &actor, &reason)?;
        Ok(ffi_record(record, today()))
    }

    /// Get a prior authorization with its history.
    pub fn get_prior_auth(&self, request_id: String) -> Result<Option<FfiPaRecord>, RxCoreError> {
        let record = self.prior_auth.get(&request_id)?;
        Ok(record.map(|r| ffi_record(r, today())))
    }

    /// An approval for the member and drug in force on `as_of` (YYYY-MM-DD).
    pub fn check_existing_auth(
        &self,
        member_id: String,
        ndc: String,
        as_of: String,
    ) -> Result<Option<FfiPaRecord>, RxCoreError> {
        let ndc = Ndc::parse(&ndc)?;
        let as_of = parse_date("as_of", &as_of)?;
        let record = self.prior_auth.check_existing_auth(&member_id, &ndc, as_of)?;
        Ok(record.map(|r| ffi_record(r, as_of)))
    }
}

// =========================================================================
// Conversion Helpers
// =========================================================================

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate, RxCoreError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|e| RxCoreError::InvalidInput(format!("{}: '{}' is not YYYY-MM-DD ({})", field, value, e)))
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn to_decimal(field: &str, value: f64) -> Result<Decimal, RxCoreError> {
    Decimal::from_f64(value)
        .ok_or_else(|| RxCoreError::InvalidInput(format!("{}: {} is not a finite amount", field, value)))
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

fn alert_type_to_string(alert_type: DurAlertType) -> &'static str {
    match alert_type {
        DurAlertType::DrugInteraction => "drug_interaction",
        DurAlertType::TherapeuticDuplication => "therapeutic_duplication",
        DurAlertType::EarlyRefill => "early_refill",
        DurAlertType::DrugAge => "drug_age",
        DurAlertType::DrugGender => "drug_gender",
        DurAlertType::StepTherapy => "step_therapy",
    }
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe formulary entry.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiFormularyEntry {
    pub ndc: String,
    pub gpi: String,
    pub drug_name: String,
    pub covered: bool,
    pub tier: u8,
    /// "copay" or "coinsurance"
    pub cost_share_kind: String,
    /// Dollars for a copay, a fraction (0.20) for coinsurance
    pub cost_share_amount: f64,
    pub requires_prior_auth: bool,
    pub requires_step_therapy: bool,
    pub step_therapy_protocol: Option<String>,
    pub quantity_limit: Option<f64>,
    pub days_supply_limit: Option<u32>,
    pub min_age: Option<u32>,
    pub max_age: Option<u32>,
    pub gender_restriction: Option<String>,
}

impl From<FormularyEntry> for FfiFormularyEntry {
    fn from(entry: FormularyEntry) -> Self {
        let (kind, amount) = match entry.cost_share {
            CostShare::Copay(amount) => ("copay", amount),
            CostShare::Coinsurance(rate) => ("coinsurance", rate),
        };
        Self {
            ndc: entry.ndc.as_str().to_string(),
            gpi: entry.gpi.as_str().to_string(),
            drug_name: entry.drug_name,
            covered: entry.covered,
            tier: entry.tier,
            cost_share_kind: kind.to_string(),
            cost_share_amount: to_f64(amount),
            requires_prior_auth: entry.requires_prior_auth,
            requires_step_therapy: entry.requires_step_therapy,
            step_therapy_protocol: entry.step_therapy_protocol,
            quantity_limit: entry.quantity_limit.map(to_f64),
            days_supply_limit: entry.days_supply_limit,
            min_age: entry.min_age,
            max_age: entry.max_age,
            gender_restriction: entry.gender_restriction.map(|g| g.code().to_string()),
        }
    }
}

impl TryFrom<FfiFormularyEntry> for FormularyEntry {
    type Error = RxCoreError;

    fn try_from(entry: FfiFormularyEntry) -> Result<Self, Self::Error> {
        let amount = to_decimal("cost_share_amount", entry.cost_share_amount)?;
        let cost_share = match entry.cost_share_kind.trim().to_lowercase().as_str() {
            "copay" => CostShare::Copay(amount),
            "coinsurance" => CostShare::Coinsurance(amount),
            other => {
                return Err(RxCoreError::InvalidInput(format!("Unknown cost share kind: {}", other)));
            }
        };
        let gender_restriction = match entry.gender_restriction.as_deref() {
            Some(g) => Some(
                Gender::parse(g).ok_or_else(|| RxCoreError::InvalidInput(format!("Unknown gender: {}", g)))?,
            ),
            None => None,
        };
        Ok(FormularyEntry {
            ndc: Ndc::parse(&entry.ndc)?,
            gpi: Gpi::parse(&entry.gpi)?,
            drug_name: entry.drug_name,
            covered: entry.covered,
            tier: entry.tier,
            cost_share,
            requires_prior_auth: entry.requires_prior_auth,
            requires_step_therapy: entry.requires_step_therapy,
            step_therapy_protocol: entry.step_therapy_protocol,
            quantity_limit: entry
                .quantity_limit
                .map(|q| to_decimal("quantity_limit", q))
                .transpose()?,
            days_supply_limit: entry.days_supply_limit,
            min_age: entry.min_age,
            max_age: entry.max_age,
            gender_restriction,
        })
    }
}

/// FFI-safe member with accumulator totals.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiMember {
    pub member_id: String,
    pub first_name: String,
    pub last_name: String,
    /// YYYY-MM-DD
    pub date_of_birth: String,
    /// "M", "F" or "U" (NCPDP 1/2/0 also accepted)
    pub gender: String,
    pub bin: String,
    pub pcn: String,
    pub group_number: String,
    pub effective_date: String,
    pub termination_date: Option<String>,
    pub deductible_limit: f64,
    pub deductible_applied: f64,
    pub out_of_pocket_limit: f64,
    pub out_of_pocket_applied: f64,
}

impl From<Member> for FfiMember {
    fn from(member: Member) -> Self {
        let deductible = member.accumulators.get(AccumulatorKind::Deductible);
        let oop = member.accumulators.get(AccumulatorKind::OutOfPocket);
        Self {
            deductible_limit: to_f64(deductible.limit()),
            deductible_applied: to_f64(deductible.applied()),
            out_of_pocket_limit: to_f64(oop.limit()),
            out_of_pocket_applied: to_f64(oop.applied()),
            member_id: member.member_id,
            first_name: member.first_name,
            last_name: member.last_name,
            date_of_birth: format_date(member.date_of_birth),
            gender: match member.gender {
                Gender::Male => "M".into(),
                Gender::Female => "F".into(),
                Gender::Unknown => "U".into(),
            },
            bin: member.bin,
            pcn: member.pcn,
            group_number: member.group_number,
            effective_date: format_date(member.effective_date),
            termination_date: member.termination_date.map(format_date),
        }
    }
}

impl TryFrom<FfiMember> for Member {
    type Error = RxCoreError;

    fn try_from(member: FfiMember) -> Result<Self, Self::Error> {
        let gender = Gender::parse(&member.gender)
            .ok_or_else(|| RxCoreError::InvalidInput(format!("Unknown gender: {}", member.gender)))?;
        let deductible = Accumulator::with_applied(
            to_decimal("deductible_limit", member.deductible_limit)?,
            to_decimal("deductible_applied", member.deductible_applied)?,
        );
        let out_of_pocket = Accumulator::with_applied(
            to_decimal("out_of_pocket_limit", member.out_of_pocket_limit)?,
            to_decimal("out_of_pocket_applied", member.out_of_pocket_applied)?,
        );
        Ok(Member {
            date_of_birth: parse_date("date_of_birth", &member.date_of_birth)?,
            effective_date: parse_date("effective_date", &member.effective_date)?,
            termination_date: member
                .termination_date
                .as_deref()
                .map(|d| parse_date("termination_date", d))
                .transpose()?,
            member_id: member.member_id,
            first_name: member.first_name,
            last_name: member.last_name,
            gender,
            bin: member.bin,
            pcn: member.pcn,
            group_number: member.group_number,
            accumulators: AccumulatorSet::from_parts(deductible, out_of_pocket),
        })
    }
}

/// FFI-safe pharmacy claim.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiClaim {
    pub claim_id: String,
    pub prescription_number: String,
    pub fill_number: u8,
    pub member_id: String,
    pub bin: String,
    pub pcn: String,
    pub group_number: String,
    pub ndc: String,
    pub gpi: String,
    pub drug_name: String,
    pub quantity: f64,
    pub days_supply: u32,
    pub ingredient_cost: f64,
    pub dispensing_fee: f64,
    /// YYYY-MM-DD
    pub service_date: String,
    pub prescriber_npi: String,
    pub pharmacy_npi: String,
    pub prior_auth_number: Option<String>,
    /// DUR override: reason-for-service code being overridden
    pub dur_reason_for_service: Option<String>,
    pub dur_professional_service: Option<String>,
    pub dur_result_of_service: Option<String>,
}

impl TryFrom<FfiClaim> for Claim {
    type Error = RxCoreError;

    fn try_from(claim: FfiClaim) -> Result<Self, Self::Error> {
        let dur_override = match (claim.dur_professional_service, claim.dur_result_of_service) {
            (Some(ps), Some(rs)) => {
                let mut codes = DurOverride::new(ps, rs);
                if let Some(reason) = claim.dur_reason_for_service {
                    codes = codes.for_reason(reason);
                }
                Some(codes)
            }
            (None, None) => None,
            _ => {
                return Err(RxCoreError::InvalidInput(
                    "DUR override needs both professional and result of service codes".into(),
                ));
            }
        };
        Ok(Claim {
            drug: DrugInfo::new(Ndc::parse(&claim.ndc)?, Gpi::parse(&claim.gpi)?, claim.drug_name),
            quantity: to_decimal("quantity", claim.quantity)?,
            ingredient_cost: to_decimal("ingredient_cost", claim.ingredient_cost)?,
            dispensing_fee: to_decimal("dispensing_fee", claim.dispensing_fee)?,
            service_date: parse_date("service_date", &claim.service_date)?,
            claim_id: claim.claim_id,
            prescription_number: claim.prescription_number,
            fill_number: claim.fill_number,
            member_id: claim.member_id,
            bin: claim.bin,
            pcn: claim.pcn,
            group_number: claim.group_number,
            days_supply: claim.days_supply,
            prescriber_npi: claim.prescriber_npi,
            pharmacy_npi: claim.pharmacy_npi,
            prior_auth_number: claim.prior_auth_number,
            dur_override,
        })
    }
}

/// FFI-safe pricing breakdown.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPricing {
    pub ingredient_cost: f64,
    pub dispensing_fee: f64,
    pub total_cost: f64,
    pub deductible_applied: f64,
    pub copay_amount: f64,
    pub member_paid: f64,
    pub plan_paid: f64,
    pub out_of_pocket_applied: f64,
    pub deductible_remaining: f64,
    pub out_of_pocket_remaining: f64,
}

impl From<models::PricingBreakdown> for FfiPricing {
    fn from(p: models::PricingBreakdown) -> Self {
        Self {
            ingredient_cost: to_f64(p.ingredient_cost),
            dispensing_fee: to_f64(p.dispensing_fee),
            total_cost: to_f64(p.total_cost),
            deductible_applied: to_f64(p.deductible_applied),
            copay_amount: to_f64(p.copay_amount),
            member_paid: to_f64(p.member_paid),
            plan_paid: to_f64(p.plan_paid),
            out_of_pocket_applied: to_f64(p.out_of_pocket_applied),
            deductible_remaining: to_f64(p.deductible_remaining),
            out_of_pocket_remaining: to_f64(p.out_of_pocket_remaining),
        }
    }
}

/// FFI-safe DUR alert.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDurAlert {
    pub alert_type: String,
    pub severity: String,
    pub drug: String,
    pub other_drug: Option<String>,
    pub message: String,
    pub reason_for_service: String,
    pub days_early: Option<i64>,
    pub overridden: bool,
}

impl From<DurAlert> for FfiDurAlert {
    fn from(alert: DurAlert) -> Self {
        Self {
            alert_type: alert_type_to_string(alert.alert_type).to_string(),
            severity: alert.severity.as_str().to_string(),
            overridden: alert.is_overridden(),
            reason_for_service: alert.reason_for_service.code().to_string(),
            drug: alert.drug,
            other_drug: alert.other_drug,
            message: alert.message,
            days_early: alert.days_early,
        }
    }
}

/// FFI-safe claim response.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiClaimResponse {
    pub claim_id: String,
    pub accepted: bool,
    pub reject_codes: Vec<String>,
    pub messages: Vec<String>,
    pub pricing: Option<FfiPricing>,
    pub authorization_number: Option<String>,
    pub prior_auth_number: Option<String>,
    pub dur_alerts: Vec<FfiDurAlert>,
    /// RFC 3339
    pub adjudicated_at: String,
}

impl From<ClaimResponse> for FfiClaimResponse {
    fn from(response: ClaimResponse) -> Self {
        Self {
            accepted: response.is_accepted(),
            reject_codes: response
                .reject_code_values()
                .into_iter()
                .map(str::to_string)
                .collect(),
            claim_id: response.claim_id,
            messages: response.messages,
            pricing: response.pricing.map(|p| p.into()),
            authorization_number: response.authorization_number,
            prior_auth_number: response.prior_auth_number,
            dur_alerts: response.dur_alerts.into_iter().map(|a| a.into()).collect(),
            adjudicated_at: response.adjudicated_at.to_rfc3339(),
        }
    }
}

/// FFI-safe paid fill.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPriorFill {
    pub claim_id: String,
    pub ndc: String,
    pub gpi: String,
    pub drug_name: String,
    pub fill_date: String,
    pub days_supply: u32,
    pub quantity: f64,
}

impl From<PriorFill> for FfiPriorFill {
    fn from(fill: PriorFill) -> Self {
        Self {
            claim_id: fill.claim_id,
            ndc: fill.drug.ndc.as_str().to_string(),
            gpi: fill.drug.gpi.as_str().to_string(),
            drug_name: fill.drug.name,
            fill_date: format_date(fill.fill_date),
            days_supply: fill.days_supply,
            quantity: to_f64(fill.quantity),
        }
    }
}

/// FFI-safe prior authorization request.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPaRequest {
    pub member_id: String,
    pub ndc: String,
    pub gpi: String,
    pub drug_name: String,
    pub quantity: f64,
    pub days_supply: u32,
    pub prescriber_npi: String,
    pub diagnosis_codes: Vec<String>,
    /// "standard", "urgent" or "emergency"
    pub urgency: String,
    /// "new" or "renewal"
    pub request_type: String,
    pub clinical_notes: Option<String>,
}

impl TryFrom<FfiPaRequest> for PaRequest {
    type Error = RxCoreError;

    fn try_from(request: FfiPaRequest) -> Result<Self, Self::Error> {
        let urgency = Urgency::parse(&request.urgency)
            .ok_or_else(|| RxCoreError::InvalidInput(format!("Unknown urgency: {}", request.urgency)))?;
        let request_type = RequestType::parse(&request.request_type).ok_or_else(|| {
            RxCoreError::InvalidInput(format!("Unknown request type: {}", request.request_type))
        })?;
        let drug = DrugInfo::new(Ndc::parse(&request.ndc)?, Gpi::parse(&request.gpi)?, request.drug_name);
        let mut pa = PaRequest::new(
            request.member_id,
            drug,
            to_decimal("quantity", request.quantity)?,
            request.days_supply,
            request.prescriber_npi,
        )
        .with_urgency(urgency)
        .with_request_type(request_type)
        .with_diagnoses(request.diagnosis_codes);
        pa.clinical_notes = request.clinical_notes;
        Ok(pa)
    }
}

/// FFI-safe status history entry.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiStatusChange {
    pub sequence: u32,
    pub status: String,
    pub actor: String,
    pub note: Option<String>,
    pub changed_at: String,
}

impl From<StatusChange> for FfiStatusChange {
    fn from(change: StatusChange) -> Self {
        Self {
            sequence: change.sequence,
            status: change.status.as_str().to_string(),
            actor: change.actor,
            note: change.note,
            changed_at: change.changed_at.to_rfc3339(),
        }
    }
}

/// FFI-safe prior authorization record.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPaRecord {
    pub request_id: String,
    pub member_id: String,
    pub ndc: String,
    pub drug_name: String,
    /// Status on the date the record was read, so "expired" can appear
    pub status: String,
    pub authorization_number: Option<String>,
    pub approved_quantity: Option<f64>,
    pub approved_days_supply: Option<u32>,
    pub effective_date: Option<String>,
    pub expiration_date: Option<String>,
    pub denial_reason: Option<String>,
    pub alternatives: Vec<String>,
    pub appeal_deadline: Option<String>,
    pub appeal_instructions: Option<String>,
    pub auto_approved: bool,
    pub history: Vec<FfiStatusChange>,
}

fn ffi_record(record: PaRecord, as_of: NaiveDate) -> FfiPaRecord {
    let status = record.effective_status(as_of).as_str().to_string();
    let PaRecord {
        request,
        response,
        history,
    } = record;
    let mut ffi = FfiPaRecord {
        request_id: request.request_id,
        member_id: request.member_id,
        ndc: request.drug.ndc.as_str().to_string(),
        drug_name: request.drug.name,
        status,
        authorization_number: None,
        approved_quantity: None,
        approved_days_supply: None,
        effective_date: None,
        expiration_date: None,
        denial_reason: None,
        alternatives: Vec::new(),
        appeal_deadline: None,
        appeal_instructions: None,
        auto_approved: false,
        history: history.into_iter().map(|h| h.into()).collect(),
    };
    if let Some(response) = response {
        ffi.authorization_number = response.authorization_number;
        ffi.approved_quantity = response.approved_quantity.map(to_f64);
        ffi.approved_days_supply = response.approved_days_supply;
        ffi.effective_date = response.effective_date.map(format_date);
        ffi.expiration_date = response.expiration_date.map(format_date);
        ffi.denial_reason = response.denial_reason;
        ffi.alternatives = response.alternatives;
        ffi.appeal_deadline = response.appeal_deadline.map(format_date);
        ffi.appeal_instructions = response.appeal_instructions;
        ffi.auto_approved = response.auto_approved;
    }
    ffi
}
