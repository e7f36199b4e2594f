//! Prior authorization state machine.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::{debug, info};
use rust_decimal::Decimal;

use crate::config::AdjudicationConfig;
use crate::db::{Database, SqlitePaStore};
use crate::models::{Ndc, PaDecision, PaRecord, PaRequest, PaResponse, PaStatus};

use super::{
    authorization_number, AutoApprovalPolicy, DefaultAutoApprovalPolicy, InMemoryPaStore,
    PaStore, PriorAuthError, PriorAuthResult,
};

/// Instructions attached to every denial.
pub const APPEAL_INSTRUCTIONS: &str = "Submit a written appeal with supporting clinical \
documentation to the plan appeals unit before the appeal deadline.";

/// Actor recorded for policy decisions.
pub const AUTO_APPROVAL_ACTOR: &str = "auto-approval-policy";

/// Optional terms for a full approval. Unset fields take the request's values.
#[derive(Debug, Clone, Default)]
pub struct ApprovalTerms {
    pub quantity: Option<Decimal>,
    pub days_supply: Option<u32>,
    pub duration_days: Option<u32>,
    /// Defaults to today
    pub effective_date: Option<NaiveDate>,
    pub note: Option<String>,
}

/// Submits, decides and looks up prior authorizations.
pub struct PriorAuthWorkflow {
    store: Arc<dyn PaStore>,
    policy: Box<dyn AutoApprovalPolicy>,
    default_duration_days: u32,
    partial_duration_days: u32,
    appeal_window_days: u32,
}

impl PriorAuthWorkflow {
    /// Workflow over the given store with the default auto-approval policy.
    pub fn new(store: Arc<dyn PaStore>, config: &AdjudicationConfig) -> Self {
        Self {
            store,
            policy: Box::new(DefaultAutoApprovalPolicy::from_config(config)),
            default_duration_days: config.pa_default_duration_days,
            partial_duration_days: config.pa_partial_duration_days,
            appeal_window_days: config.appeal_window_days,
        }
    }

    pub fn in_memory(config: &AdjudicationConfig) -> Self {
        Self::new(Arc::new(InMemoryPaStore::new()), config)
    }

    /// Workflow persisting to a shared database handle.
    pub fn sqlite(db: Arc<Mutex<Database>>, config: &AdjudicationConfig) -> Self {
        Self::new(Arc::new(SqlitePaStore::new(db)), config)
    }

    /// Replace the auto-approval policy.
    pub fn with_policy<P: AutoApprovalPolicy + 'static>(mut self, policy: P) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Store a new pending request.
    pub fn submit(&self, request: PaRequest) -> PriorAuthResult<PaRecord> {
        validate_request(&request)?;
        let record = PaRecord::new(request);
        self.store.insert(&record)?;
        info!(
            "PA {} submitted for member {} drug {}",
            record.request_id(),
            record.request.member_id,
            record.request.drug.ndc
        );
        Ok(record)
    }

    /// Apply the auto-approval policy to a pending request.
    ///
    /// Returns the approved record, or None when the request stays pending
    /// (or was already decided).
    pub fn check_auto_approval(&self, request_id: &str) -> PriorAuthResult<Option<PaRecord>> {
        let now = Utc::now();
        let effective = now.date_naive();
        let mut approved_for: Option<String> = None;
        // decided/pending is re-read under the store lock so a concurrent
        // decision is never overwritten
        let updated = self.store.update(request_id, &mut |record| {
            if record.is_decided() {
                return Ok(());
            }
            let Some(auto) = self.policy.evaluate(&record.request) else {
                return Ok(());
            };
            let response = PaResponse {
                decision: PaDecision::Approved,
                authorization_number: Some(authorization_number("PA", record.request_id(), now)),
                approved_quantity: Some(record.request.quantity),
                approved_days_supply: Some(record.request.days_supply),
                effective_date: Some(effective),
                expiration_date: Some(add_days(effective, auto.duration_days)?),
                denial_reason: None,
                alternatives: Vec::new(),
                appeal_deadline: None,
                appeal_instructions: None,
                auto_approved: true,
                decided_by: AUTO_APPROVAL_ACTOR.into(),
                decided_at: now,
            };
            record.record_response(response, Some(auto.reason.clone()));
            approved_for = Some(auto.reason);
            Ok(())
        })?;
        match approved_for {
            Some(reason) => {
                info!("PA {} auto-approved: {}", request_id, reason);
                Ok(Some(updated))
            }
            None => {
                debug!("PA {} not auto-approved (status {})", request_id, updated.status().as_str());
                Ok(None)
            }
        }
    }

    /// Approve with an authorization number and validity window.
    pub fn approve(&self, request_id: &str, reviewer: &str, terms: ApprovalTerms) -> PriorAuthResult<PaRecord> {
        let duration = terms.duration_days.unwrap_or(self.default_duration_days);
        self.grant(
            request_id,
            reviewer,
            PaDecision::Approved,
            terms.quantity,
            terms.days_supply,
            duration,
            terms.effective_date,
            terms.note,
        )
    }

    /// Approve a reduced quantity/days supply for a shorter default term.
    pub fn partial_approve(
        &self,
        request_id: &str,
        reviewer: &str,
        quantity: Decimal,
        days_supply: u32,
        duration_days: Option<u32>,
    ) -> PriorAuthResult<PaRecord> {
        if quantity <= Decimal::ZERO || days_supply == 0 {
            return Err(PriorAuthError::InvalidRequest(format!(
                "partial approval needs positive quantity and days supply, got {} / {}",
                quantity, days_supply
            )));
        }
        let duration = duration_days.unwrap_or(self.partial_duration_days);
        self.grant(
            request_id,
            reviewer,
            PaDecision::PartiallyApproved,
            Some(quantity),
            Some(days_supply),
            duration,
            None,
            None,
        )
    }

    /// Deny with a reason, an appeal deadline and optional alternatives.
    pub fn deny(
        &self,
        request_id: &str,
        reviewer: &str,
        reason: &str,
        alternatives: Vec<String>,
    ) -> PriorAuthResult<PaRecord> {
        let now = Utc::now();
        let deadline = add_days(now.date_naive(), self.appeal_window_days)?;
        let updated = self.store.update(request_id, &mut |record| {
            let response = PaResponse {
                decision: PaDecision::Denied,
                authorization_number: None,
                approved_quantity: None,
                approved_days_supply: None,
                effective_date: None,
                expiration_date: None,
                denial_reason: Some(reason.to_string()),
                alternatives: alternatives.clone(),
                appeal_deadline: Some(deadline),
                appeal_instructions: Some(APPEAL_INSTRUCTIONS.to_string()),
                auto_approved: false,
                decided_by: reviewer.to_string(),
                decided_at: now,
            };
            record.record_response(response, Some(reason.to_string()));
            Ok(())
        })?;
        info!("PA {} denied by {}: {}", request_id, reviewer, reason);
        Ok(updated)
    }

    /// Withdraw a request.
    pub fn cancel(&self, request_id: &str, actor: &str, reason: &str) -> PriorAuthResult<PaRecord> {
        let now = Utc::now();
        let updated = self.store.update(request_id, &mut |record| {
            let response = PaResponse {
                decision: PaDecision::Cancelled,
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
                decided_by: actor.to_string(),
                decided_at: now,
            };
            record.record_response(response, Some(reason.to_string()));
            Ok(())
        })?;
        info!("PA {} cancelled by {}", request_id, actor);
        Ok(updated)
    }

    pub fn get(&self, request_id: &str) -> PriorAuthResult<Option<PaRecord>> {
        self.store.get(request_id)
    }

    pub fn records_for_member(&self, member_id: &str) -> PriorAuthResult<Vec<PaRecord>> {
        self.store.records_for_member(member_id)
    }

    /// Status on `as_of`, with expiry derived.
    pub fn effective_status(&self, request_id: &str, as_of: NaiveDate) -> PriorAuthResult<PaStatus> {
        Ok(self.require(request_id)?.effective_status(as_of))
    }

    /// An approval for this member and drug in force on `as_of`, if any.
    ///
    /// When several overlap, the one expiring last wins.
    pub fn check_existing_auth(
        &self,
        member_id: &str,
        ndc: &Ndc,
        as_of: NaiveDate,
    ) -> PriorAuthResult<Option<PaRecord>> {
        let found = self
            .store
            .records_for_member(member_id)?
            .into_iter()
            .filter(|r| r.covers(member_id, ndc, as_of))
            .max_by_key(|r| r.response.as_ref().and_then(|resp| resp.expiration_date));
        if let Some(record) = &found {
            debug!(
                "Existing PA {} covers member {} drug {} on {}",
                record.request_id(),
                member_id,
                ndc,
                as_of
            );
        }
        Ok(found)
    }

    fn require(&self, request_id: &str) -> PriorAuthResult<PaRecord> {
        self.store
            .get(request_id)?
            .ok_or_else(|| PriorAuthError::NotFound(request_id.to_string()))
    }

    #[allow(clippy::too_many_arguments)]
    fn grant(
        &self,
        request_id: &str,
        reviewer: &str,
        decision: PaDecision,
        quantity: Option<Decimal>,
        days_supply: Option<u32>,
        duration_days: u32,
        effective_date: Option<NaiveDate>,
        note: Option<String>,
    ) -> PriorAuthResult<PaRecord> {
        let now: DateTime<Utc> = Utc::now();
        let effective = effective_date.unwrap_or_else(|| now.date_naive());
        let expiration = add_days(effective, duration_days)?;
        let updated = self.store.update(request_id, &mut |record| {
            let response = PaResponse {
                decision,
                authorization_number: Some(authorization_number("PA", record.request_id(), now)),
                approved_quantity: Some(quantity.unwrap_or(record.request.quantity)),
                approved_days_supply: Some(days_supply.unwrap_or(record.request.days_supply)),
                effective_date: Some(effective),
                expiration_date: Some(expiration),
                denial_reason: None,
                alternatives: Vec::new(),
                appeal_deadline: None,
                appeal_instructions: None,
                auto_approved: false,
                decided_by: reviewer.to_string(),
                decided_at: now,
            };
            record.record_response(response, note.clone());
            Ok(())
        })?;
        info!(
            "PA {} {} by {} for {} days",
            request_id,
            PaStatus::from(decision).as_str(),
            reviewer,
            duration_days
        );
        Ok(updated)
    }
}

fn add_days(from: NaiveDate, n: u32) -> PriorAuthResult<NaiveDate> {
    from.checked_add_signed(Duration::days(i64::from(n)))
        .ok_or_else(|| PriorAuthError::InvalidRequest(format!("{} days from {} is out of range", n, from)))
}

fn validate_request(request: &PaRequest) -> PriorAuthResult<()> {
    if request.member_id.trim().is_empty() {
        return Err(PriorAuthError::InvalidRequest("member_id is required".into()));
    }
    if request.prescriber_npi.trim().is_empty() {
        return Err(PriorAuthError::InvalidRequest("prescriber_npi is required".into()));
    }
    if request.quantity <= Decimal::ZERO {
        return Err(PriorAuthError::InvalidRequest(format!(
            "quantity must be positive, got {}",
            request.quantity
        )));
    }
    if request.days_supply == 0 {
        return Err(PriorAuthError::InvalidRequest("days_supply must be positive".into()));
    }
    Ok(())
}
