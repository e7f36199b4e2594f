//! Tests through the exported `RxAdjudicationCore` object.

use chrono::{Duration, Utc};

use rx_adjudication_core::{
    open_database, open_database_in_memory, open_database_with_config, FfiClaim,
    FfiFormularyEntry, FfiMember, FfiPaRequest, RxAdjudicationCore, RxCoreError,
};

fn today() -> String {
    Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

fn days_from_today(n: i64) -> String {
    (Utc::now().date_naive() + Duration::days(n)).format("%Y-%m-%d").to_string()
}

fn entry(ndc: &str, gpi: &str, name: &str, kind: &str, amount: f64) -> FfiFormularyEntry {
    FfiFormularyEntry {
        ndc: ndc.into(),
        gpi: gpi.into(),
        drug_name: name.into(),
        covered: true,
        tier: 1,
        cost_share_kind: kind.into(),
        cost_share_amount: amount,
        requires_prior_auth: false,
        requires_step_therapy: false,
        step_therapy_protocol: None,
        quantity_limit: None,
        days_supply_limit: None,
        min_age: None,
        max_age: None,
        gender_restriction: None,
    }
}

fn member() -> FfiMember {
    FfiMember {
        member_id: "M100".into(),
        first_name: "Ada".into(),
        last_name: "Moss".into(),
        date_of_birth: "1970-01-01".into(),
        gender: "F".into(),
        bin: "610014".into(),
        pcn: "RXPCN".into(),
        group_number: "GRP01".into(),
        effective_date: "2020-01-01".into(),
        termination_date: None,
        deductible_limit: 100.0,
        deductible_applied: 0.0,
        out_of_pocket_limit: 3000.0,
        out_of_pocket_applied: 0.0,
    }
}

fn claim(id: &str, ndc: &str, gpi: &str, service_date: &str) -> FfiClaim {
    FfiClaim {
        claim_id: id.into(),
        prescription_number: format!("RX-{}", id),
        fill_number: 0,
        member_id: "M100".into(),
        bin: "610014".into(),
        pcn: "RXPCN".into(),
        group_number: "GRP01".into(),
        ndc: ndc.into(),
        gpi: gpi.into(),
        drug_name: "Test drug".into(),
        quantity: 30.0,
        days_supply: 30,
        ingredient_cost: 140.0,
        dispensing_fee: 10.0,
        service_date: service_date.into(),
        prescriber_npi: "1234567893".into(),
        pharmacy_npi: "1098765432".into(),
        prior_auth_number: None,
        dur_reason_for_service: None,
        dur_professional_service: None,
        dur_result_of_service: None,
    }
}

const ATORVASTATIN: (&str, &str) = ("00378395077", "39400010000310");
const SEMAGLUTIDE: (&str, &str) = ("00169413013", "27175080000320");

fn seeded(core: &RxAdjudicationCore) {
    core.upsert_formulary_entry(entry(ATORVASTATIN.0, ATORVASTATIN.1, "Atorvastatin 10mg", "copay", 30.0))
        .unwrap();
    let mut sema = entry(SEMAGLUTIDE.0, SEMAGLUTIDE.1, "Semaglutide 1mg", "coinsurance", 0.25);
    sema.tier = 3;
    sema.requires_prior_auth = true;
    core.upsert_formulary_entry(sema).unwrap();
    core.upsert_member(member()).unwrap();
}

fn pa_request() -> FfiPaRequest {
    FfiPaRequest {
        member_id: "M100".into(),
        ndc: SEMAGLUTIDE.0.into(),
        gpi: SEMAGLUTIDE.1.into(),
        drug_name: "Semaglutide 1mg".into(),
        quantity: 4.0,
        days_supply: 28,
        prescriber_npi: "1234567893".into(),
        diagnosis_codes: vec!["E11.9".into()],
        urgency: "standard".into(),
        request_type: "new".into(),
        clinical_notes: None,
    }
}

#[test]
fn test_formulary_and_member_round_trip() {
    let core = open_database_in_memory().unwrap();
    seeded(&core);

    let stored = core.get_formulary_entry(ATORVASTATIN.0.into()).unwrap().unwrap();
    assert_eq!(stored.cost_share_kind, "copay");
    assert_eq!(stored.cost_share_amount, 30.0);
    assert!(core.get_formulary_entry("99999999999".into()).unwrap().is_none());

    let m = core.get_member("M100".into()).unwrap().unwrap();
    assert_eq!(m.gender, "F");
    assert_eq!(m.deductible_limit, 100.0);
    assert!(core.get_member("M999".into()).unwrap().is_none());
}

#[test]
fn test_invalid_input_rejected() {
    let core = open_database_in_memory().unwrap();
    assert!(matches!(
        core.upsert_formulary_entry(entry("123", ATORVASTATIN.1, "Bad", "copay", 1.0)),
        Err(RxCoreError::InvalidInput(_))
    ));
    assert!(matches!(
        core.upsert_formulary_entry(entry(ATORVASTATIN.0, ATORVASTATIN.1, "Bad", "rebate", 1.0)),
        Err(RxCoreError::InvalidInput(_))
    ));

    let mut bad = claim("C1", ATORVASTATIN.0, ATORVASTATIN.1, "2024-13-01");
    assert!(matches!(core.adjudicate_claim(bad.clone()), Err(RxCoreError::InvalidInput(_))));
    bad.service_date = "2024-03-01".into();
    bad.dur_professional_service = Some("M0".into());
    assert!(matches!(core.adjudicate_claim(bad), Err(RxCoreError::InvalidInput(_))));
}

#[test]
fn test_paid_claim_persists_accumulators_and_fill() {
    let core = open_database_in_memory().unwrap();
    seeded(&core);

    let response = core
        .adjudicate_claim(claim("C1", ATORVASTATIN.0, ATORVASTATIN.1, "2024-03-01"))
        .unwrap();
    assert!(response.accepted, "{:?}", response.messages);
    assert!(response.reject_codes.is_empty());
    let pricing = response.pricing.unwrap();
    assert_eq!(pricing.member_paid, 130.0);
    assert_eq!(pricing.plan_paid, 20.0);

    let m = core.get_member("M100".into()).unwrap().unwrap();
    assert_eq!(m.deductible_applied, 100.0);
    assert_eq!(m.out_of_pocket_applied, 130.0);

    let fills = core.get_fill_history("M100".into()).unwrap();
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].claim_id, "C1");
    assert_eq!(fills[0].fill_date, "2024-03-01");

    // the recorded fill now drives the early refill check
    let response = core
        .adjudicate_claim(claim("C2", ATORVASTATIN.0, ATORVASTATIN.1, "2024-03-11"))
        .unwrap();
    assert!(!response.accepted);
    assert_eq!(response.reject_codes, vec!["79".to_string()]);
    let early = response.dur_alerts.iter().find(|a| a.days_early.is_some()).unwrap();
    assert_eq!(early.days_early, Some(20));

    let m = core.get_member("M100".into()).unwrap().unwrap();
    assert_eq!(m.out_of_pocket_applied, 130.0);
    assert_eq!(core.get_fill_history("M100".into()).unwrap().len(), 1);
}

#[test]
fn test_unknown_member_rejected() {
    let core = open_database_in_memory().unwrap();
    seeded(&core);

    let mut c = claim("C1", ATORVASTATIN.0, ATORVASTATIN.1, "2024-03-01");
    c.member_id = "M999".into();
    let response = core.adjudicate_claim(c).unwrap();
    assert!(!response.accepted);
    assert_eq!(response.reject_codes, vec!["07".to_string()]);
    assert!(response.pricing.is_none());
}

#[test]
fn test_prior_auth_through_core() {
    let core = open_database_in_memory().unwrap();
    seeded(&core);

    let response = core
        .adjudicate_claim(claim("C1", SEMAGLUTIDE.0, SEMAGLUTIDE.1, &today()))
        .unwrap();
    assert_eq!(response.reject_codes, vec!["75".to_string()]);

    let submitted = core.submit_prior_auth(pa_request()).unwrap();
    assert_eq!(submitted.status, "pending");
    assert!(core.check_auto_approval(submitted.request_id.clone()).unwrap().is_none());

    assert!(matches!(
        core.approve_prior_auth(submitted.request_id.clone(), "reviewer-1".into(), Some(u32::MAX), None),
        Err(RxCoreError::InvalidInput(_))
    ));
    let still_pending = core.get_prior_auth(submitted.request_id.clone()).unwrap().unwrap();
    assert_eq!(still_pending.status, "pending");

    let approved = core
        .approve_prior_auth(submitted.request_id.clone(), "reviewer-1".into(), Some(90), None)
        .unwrap();
    assert_eq!(approved.status, "approved");
    assert_eq!(approved.expiration_date, Some(days_from_today(90)));
    assert_eq!(approved.history.len(), 2);
    let auth = approved.authorization_number.clone().unwrap();

    let existing = core
        .check_existing_auth("M100".into(), SEMAGLUTIDE.0.into(), today())
        .unwrap()
        .unwrap();
    assert_eq!(existing.request_id, submitted.request_id);
    let expired = core
        .check_existing_auth("M100".into(), SEMAGLUTIDE.0.into(), days_from_today(91))
        .unwrap();
    assert!(expired.is_none());

    let response = core
        .adjudicate_claim(claim("C2", SEMAGLUTIDE.0, SEMAGLUTIDE.1, &today()))
        .unwrap();
    assert!(response.accepted, "{:?}", response.messages);
    assert_eq!(response.prior_auth_number, Some(auth));
}

#[test]
fn test_prior_auth_denial_and_errors() {
    let core = open_database_in_memory().unwrap();
    let submitted = core.submit_prior_auth(pa_request()).unwrap();

    let denied = core
        .deny_prior_auth(
            submitted.request_id.clone(),
            "reviewer-1".into(),
            "Metformin trial not documented".into(),
            vec!["Metformin 500mg".into()],
        )
        .unwrap();
    assert_eq!(denied.status, "denied");
    assert_eq!(denied.appeal_deadline, Some(days_from_today(60)));
    assert!(denied.appeal_instructions.is_some());
    assert_eq!(denied.alternatives, vec!["Metformin 500mg".to_string()]);

    let fetched = core.get_prior_auth(submitted.request_id.clone()).unwrap().unwrap();
    let statuses: Vec<&str> = fetched.history.iter().map(|h| h.status.as_str()).collect();
    assert_eq!(statuses, vec!["pending", "denied"]);

    assert!(matches!(
        core.approve_prior_auth("missing".into(), "reviewer-1".into(), None, None),
        Err(RxCoreError::NotFound(_))
    ));
    let mut bad = pa_request();
    bad.urgency = "whenever".into();
    assert!(matches!(core.submit_prior_auth(bad), Err(RxCoreError::InvalidInput(_))));
}

#[test]
fn test_emergency_and_partial_approval() {
    let core = open_database_in_memory().unwrap();

    let mut emergency = pa_request();
    emergency.urgency = "emergency".into();
    let submitted = core.submit_prior_auth(emergency).unwrap();
    let approved = core.check_auto_approval(submitted.request_id).unwrap().unwrap();
    assert!(approved.auto_approved);
    assert_eq!(approved.expiration_date, Some(days_from_today(30)));

    let submitted = core.submit_prior_auth(pa_request()).unwrap();
    let partial = core
        .partial_approve_prior_auth(submitted.request_id.clone(), "reviewer-1".into(), 2.0, 14)
        .unwrap();
    assert_eq!(partial.status, "partially_approved");
    assert_eq!(partial.approved_quantity, Some(2.0));
    assert_eq!(partial.approved_days_supply, Some(14));

    let cancelled = core
        .cancel_prior_auth(submitted.request_id, "prescriber".into(), "Therapy changed".into())
        .unwrap();
    assert_eq!(cancelled.status, "cancelled");
    assert_eq!(cancelled.history.len(), 3);
}

#[test]
fn test_file_database_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rx.db").to_string_lossy().to_string();

    {
        let core = open_database(path.clone()).unwrap();
        seeded(&core);
        let response = core
            .adjudicate_claim(claim("C1", ATORVASTATIN.0, ATORVASTATIN.1, "2024-03-01"))
            .unwrap();
        assert!(response.accepted);
    }

    let core = open_database(path).unwrap();
    let m = core.get_member("M100".into()).unwrap().unwrap();
    assert_eq!(m.deductible_applied, 100.0);
    assert_eq!(core.get_fill_history("M100".into()).unwrap().len(), 1);
}

#[test]
fn test_open_with_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("rx.db").to_string_lossy().to_string();
    let config_path = dir.path().join("rxadj.toml");
    std::fs::write(&config_path, "enforce_dur = false\n").unwrap();

    let core = open_database_with_config(db_path.clone(), config_path.to_string_lossy().to_string()).unwrap();
    seeded(&core);
    assert!(core
        .adjudicate_claim(claim("C1", ATORVASTATIN.0, ATORVASTATIN.1, "2024-03-01"))
        .unwrap()
        .accepted);
    // early refill passes without DUR enforcement
    let response = core
        .adjudicate_claim(claim("C2", ATORVASTATIN.0, ATORVASTATIN.1, "2024-03-11"))
        .unwrap();
    assert!(response.accepted, "{:?}", response.messages);

    std::fs::write(&config_path, "early_refill_threshold_percent = 0\n").unwrap();
    assert!(matches!(
        open_database_with_config(db_path, config_path.to_string_lossy().to_string()),
        Err(RxCoreError::ConfigError(_))
    ));
}
