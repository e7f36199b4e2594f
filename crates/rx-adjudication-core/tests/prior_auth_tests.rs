//! Prior authorization workflow tests over the SQLite store.

use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;

use rx_adjudication_core::config::{AdjudicationConfig, ConfigBuilder};
use rx_adjudication_core::db::Database;
use rx_adjudication_core::models::{
    DrugInfo, Gpi, Ndc, PaRequest, PaStatus, RequestType, Urgency,
};
use rx_adjudication_core::prior_auth::{
    ApprovalTerms, ManualReviewPolicy, PriorAuthError, PriorAuthWorkflow, APPEAL_INSTRUCTIONS,
    AUTO_APPROVAL_ACTOR,
};

fn semaglutide() -> DrugInfo {
    DrugInfo::new(
        Ndc::parse("00169-4130-13").unwrap(),
        Gpi::parse("27175080000320").unwrap(),
        "Semaglutide 1mg",
    )
}

fn request() -> PaRequest {
    PaRequest::new("M100", semaglutide(), dec!(4), 28, "1234567893")
        .with_diagnoses(vec!["E11.9".into()])
}

fn workflow(db: &Arc<Mutex<Database>>) -> PriorAuthWorkflow {
    PriorAuthWorkflow::sqlite(db.clone(), &AdjudicationConfig::default())
}

fn open() -> Arc<Mutex<Database>> {
    Arc::new(Mutex::new(Database::open_in_memory().unwrap()))
}

#[test]
fn test_submit_is_pending() {
    let db = open();
    let wf = workflow(&db);
    let record = wf.submit(request()).unwrap();

    assert_eq!(record.status(), PaStatus::Pending);
    assert_eq!(record.history.len(), 1);
    let stored = wf.get(record.request_id()).unwrap().unwrap();
    assert_eq!(stored, record);
}

#[test]
fn test_standard_request_is_not_auto_approved() {
    let db = open();
    let wf = workflow(&db);
    let record = wf.submit(request()).unwrap();

    assert!(wf.check_auto_approval(record.request_id()).unwrap().is_none());
    assert_eq!(
        wf.get(record.request_id()).unwrap().unwrap().status(),
        PaStatus::Pending
    );
}

#[test]
fn test_emergency_auto_approval() {
    let db = open();
    let wf = workflow(&db);
    let record = wf.submit(request().with_urgency(Urgency::Emergency)).unwrap();

    let approved = wf.check_auto_approval(record.request_id()).unwrap().unwrap();
    let response = approved.response.as_ref().unwrap();
    assert_eq!(approved.status(), PaStatus::Approved);
    assert!(response.auto_approved);
    assert_eq!(response.decided_by, AUTO_APPROVAL_ACTOR);
    let effective = response.effective_date.unwrap();
    assert_eq!(response.expiration_date, Some(effective + Duration::days(30)));
    assert_eq!(approved.history.len(), 2);

    // already decided
    assert!(wf.check_auto_approval(record.request_id()).unwrap().is_none());
}

#[test]
fn test_renewal_auto_approval_uses_full_term() {
    let db = open();
    let wf = workflow(&db);
    let record = wf.submit(request().with_request_type(RequestType::Renewal)).unwrap();

    let approved = wf.check_auto_approval(record.request_id()).unwrap().unwrap();
    let response = approved.response.unwrap();
    assert_eq!(
        response.expiration_date,
        Some(response.effective_date.unwrap() + Duration::days(365))
    );
}

#[test]
fn test_manual_policy_never_auto_approves() {
    let db = open();
    let wf = workflow(&db).with_policy(ManualReviewPolicy);
    let record = wf.submit(request().with_urgency(Urgency::Emergency)).unwrap();
    assert!(wf.check_auto_approval(record.request_id()).unwrap().is_none());
}

#[test]
fn test_denial_sets_appeal_window() {
    let db = open();
    let wf = workflow(&db);
    let record = wf.submit(request()).unwrap();

    let denied = wf
        .deny(
            record.request_id(),
            "reviewer-1",
            "Step therapy not documented",
            vec!["Metformin".into()],
        )
        .unwrap();
    let response = denied.response.as_ref().unwrap();
    assert_eq!(denied.status(), PaStatus::Denied);
    assert_eq!(response.authorization_number, None);
    assert_eq!(response.alternatives, vec!["Metformin".to_string()]);
    assert_eq!(
        response.appeal_deadline,
        Some(response.decided_at.date_naive() + Duration::days(60))
    );
    assert_eq!(response.appeal_instructions.as_deref(), Some(APPEAL_INSTRUCTIONS));
}

#[test]
fn test_partial_approval() {
    let db = open();
    let wf = workflow(&db);
    let record = wf.submit(request()).unwrap();

    let partial = wf
        .partial_approve(record.request_id(), "reviewer-1", dec!(2), 14, None)
        .unwrap();
    let response = partial.response.as_ref().unwrap();
    assert_eq!(partial.status(), PaStatus::PartiallyApproved);
    assert_eq!(response.approved_quantity, Some(dec!(2)));
    assert_eq!(response.approved_days_supply, Some(14));
    assert_eq!(
        response.expiration_date,
        Some(response.effective_date.unwrap() + Duration::days(90))
    );

    assert!(matches!(
        wf.partial_approve(record.request_id(), "reviewer-1", dec!(0), 14, None),
        Err(PriorAuthError::InvalidRequest(_))
    ));
}

#[test]
fn test_history_keeps_every_decision() {
    let db = open();
    let wf = workflow(&db);
    let record = wf.submit(request()).unwrap();
    let id = record.request_id().to_string();

    wf.approve(&id, "reviewer-1", ApprovalTerms::default()).unwrap();
    wf.cancel(&id, "prescriber", "Therapy discontinued").unwrap();

    let stored = wf.get(&id).unwrap().unwrap();
    assert_eq!(stored.status(), PaStatus::Cancelled);
    let statuses: Vec<PaStatus> = stored.history.iter().map(|h| h.status).collect();
    assert_eq!(
        statuses,
        vec![PaStatus::Pending, PaStatus::Approved, PaStatus::Cancelled]
    );
    let sequences: Vec<u32> = stored.history.iter().map(|h| h.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
    assert!(wf.check_existing_auth("M100", &semaglutide().ndc, Utc::now().date_naive()).unwrap().is_none());
}

#[test]
fn test_existing_auth_and_expiry() {
    let db = open();
    let wf = workflow(&db);
    let today = Utc::now().date_naive();
    let record = wf.submit(request()).unwrap();
    let id = record.request_id().to_string();

    let terms = ApprovalTerms {
        duration_days: Some(30),
        ..ApprovalTerms::default()
    };
    wf.approve(&id, "reviewer-1", terms).unwrap();

    let ndc = semaglutide().ndc;
    assert!(wf.check_existing_auth("M100", &ndc, today).unwrap().is_some());
    assert!(wf.check_existing_auth("M100", &ndc, today + Duration::days(30)).unwrap().is_some());
    assert!(wf.check_existing_auth("M100", &ndc, today + Duration::days(31)).unwrap().is_none());
    assert!(wf.check_existing_auth("M200", &ndc, today).unwrap().is_none());

    assert_eq!(wf.effective_status(&id, today).unwrap(), PaStatus::Approved);
    assert_eq!(
        wf.effective_status(&id, today + Duration::days(31)).unwrap(),
        PaStatus::Expired
    );
}

#[test]
fn test_unknown_request() {
    let db = open();
    let wf = workflow(&db);
    assert!(wf.get("missing").unwrap().is_none());
    assert!(matches!(
        wf.approve("missing", "reviewer-1", ApprovalTerms::default()),
        Err(PriorAuthError::NotFound(_))
    ));
    assert!(matches!(
        wf.check_auto_approval("missing"),
        Err(PriorAuthError::NotFound(_))
    ));
}

#[test]
fn test_records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pa.db");
    let config = ConfigBuilder::new().pa_default_duration_days(180).build().unwrap();

    let id = {
        let db = Arc::new(Mutex::new(Database::open(&path).unwrap()));
        let wf = PriorAuthWorkflow::sqlite(db, &config);
        let record = wf.submit(request()).unwrap();
        wf.approve(record.request_id(), "reviewer-1", ApprovalTerms::default())
            .unwrap();
        record.request_id().to_string()
    };

    let db = Arc::new(Mutex::new(Database::open(&path).unwrap()));
    let wf = PriorAuthWorkflow::sqlite(db, &config);
    let stored = wf.get(&id).unwrap().unwrap();
    let response = stored.response.as_ref().unwrap();
    assert_eq!(stored.status(), PaStatus::Approved);
    assert_eq!(stored.history.len(), 2);
    assert_eq!(
        response.expiration_date,
        Some(response.effective_date.unwrap() + Duration::days(180))
    );
    assert_eq!(wf.records_for_member("M100").unwrap().len(), 1);
}

#[test]
fn test_concurrent_decisions_all_recorded() {
    let db = open();
    let wf = Arc::new(workflow(&db));
    let record = wf.submit(request()).unwrap();
    let id = record.request_id().to_string();

    std::thread::scope(|s| {
        for i in 0..4 {
            let wf = wf.clone();
            let id = id.clone();
            s.spawn(move || {
                wf.deny(&id, &format!("reviewer-{}", i), "Not medically necessary", Vec::new())
                    .unwrap();
            });
        }
    });

    let stored = wf.get(&id).unwrap().unwrap();
    assert_eq!(stored.history.len(), 5);
    let sequences: Vec<u32> = stored.history.iter().map(|h| h.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_auto_approval_never_overwrites_a_denial() {
    let db = open();
    let wf = Arc::new(workflow(&db));
    let ids: Vec<String> = (0..16)
        .map(|_| {
            let record = wf.submit(request().with_urgency(Urgency::Emergency)).unwrap();
            record.request_id().to_string()
        })
        .collect();

    std::thread::scope(|s| {
        for id in &ids {
            let deny_wf = wf.clone();
            s.spawn(move || {
                deny_wf.deny(id, "reviewer-1", "Not medically necessary", Vec::new()).unwrap();
            });
            let auto_wf = wf.clone();
            s.spawn(move || {
                auto_wf.check_auto_approval(id).unwrap();
            });
        }
    });

    for id in &ids {
        let stored = wf.get(id).unwrap().unwrap();
        assert_eq!(stored.status(), PaStatus::Denied);
        let last = stored.history.last().unwrap();
        assert_eq!(last.status, PaStatus::Denied);
        assert!(stored.history.len() == 2 || stored.history.len() == 3);
    }
}

#[test]
fn test_out_of_range_duration_is_rejected_and_store_stays_usable() {
    let db = open();
    let wf = workflow(&db);
    let record = wf.submit(request()).unwrap();

    let terms = ApprovalTerms {
        duration_days: Some(u32::MAX),
        ..ApprovalTerms::default()
    };
    assert!(matches!(
        wf.approve(record.request_id(), "reviewer-1", terms),
        Err(PriorAuthError::InvalidRequest(_))
    ));

    let stored = wf.get(record.request_id()).unwrap().unwrap();
    assert_eq!(stored.status(), PaStatus::Pending);
    assert_eq!(stored.history.len(), 1);
    assert!(!db.is_poisoned());

    let approved = wf
        .approve(record.request_id(), "reviewer-1", ApprovalTerms::default())
        .unwrap();
    assert_eq!(approved.status(), PaStatus::Approved);
}
