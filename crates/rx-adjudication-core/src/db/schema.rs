//! Table layout for the adjudication store.

/// Complete database schema.
pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- formulary: reference data, replaced wholesale or per entry

CREATE TABLE IF NOT EXISTS formulary (
    ndc TEXT PRIMARY KEY CHECK (length(ndc) = 11),
    gpi TEXT NOT NULL,
    drug_name TEXT NOT NULL,
    covered INTEGER NOT NULL DEFAULT 1,
    tier INTEGER NOT NULL,
    cost_share_kind TEXT NOT NULL CHECK (cost_share_kind IN ('copay', 'coinsurance')),
    cost_share_amount TEXT NOT NULL,               -- decimal text
    requires_prior_auth INTEGER NOT NULL DEFAULT 0,
    requires_step_therapy INTEGER NOT NULL DEFAULT 0,
    step_therapy_protocol TEXT,
    quantity_limit TEXT,                           -- decimal text
    days_supply_limit INTEGER,
    min_age INTEGER,
    max_age INTEGER,
    gender_restriction TEXT,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_formulary_gpi ON formulary(gpi);

-- members and their running accumulators

CREATE TABLE IF NOT EXISTS members (
    member_id TEXT PRIMARY KEY,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL,
    date_of_birth TEXT NOT NULL,
    gender TEXT NOT NULL,
    bin TEXT NOT NULL,
    pcn TEXT NOT NULL,
    group_number TEXT NOT NULL,
    effective_date TEXT NOT NULL,
    termination_date TEXT,                         -- exclusive
    deductible_limit TEXT NOT NULL,
    deductible_applied TEXT NOT NULL DEFAULT '0',
    out_of_pocket_limit TEXT NOT NULL,
    out_of_pocket_applied TEXT NOT NULL DEFAULT '0',
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- claim_fills: paid fills for DUR lookback and step therapy history

CREATE TABLE IF NOT EXISTS claim_fills (
    claim_id TEXT PRIMARY KEY,
    member_id TEXT NOT NULL REFERENCES members(member_id),
    ndc TEXT NOT NULL,
    gpi TEXT NOT NULL,
    drug_name TEXT NOT NULL,
    fill_date TEXT NOT NULL,
    days_supply INTEGER NOT NULL CHECK (days_supply > 0),
    quantity TEXT NOT NULL,
    prescriber_npi TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_fills_member_date ON claim_fills(member_id, fill_date);

-- prior authorization: records are never deleted

CREATE TABLE IF NOT EXISTS prior_auth_records (
    request_id TEXT PRIMARY KEY,
    member_id TEXT NOT NULL,
    ndc TEXT NOT NULL,
    request TEXT NOT NULL,                         -- JSON PaRequest
    response TEXT,                                 -- JSON PaResponse, NULL while pending
    status TEXT NOT NULL CHECK (status IN
        ('pending', 'approved', 'partially_approved', 'denied', 'cancelled')),
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_pa_member_ndc ON prior_auth_records(member_id, ndc);

CREATE TRIGGER IF NOT EXISTS prior_auth_records_no_delete BEFORE DELETE ON prior_auth_records
BEGIN
    SELECT RAISE(ABORT, 'prior_auth_records cannot be deleted');
END;

-- decision history, append-only
CREATE TABLE IF NOT EXISTS prior_auth_history (
    request_id TEXT NOT NULL REFERENCES prior_auth_records(request_id),
    sequence INTEGER NOT NULL,
    status TEXT NOT NULL,
    actor TEXT NOT NULL,
    note TEXT,
    changed_at TEXT NOT NULL,
    PRIMARY KEY (request_id, sequence)
);

CREATE TRIGGER IF NOT EXISTS prior_auth_history_no_update BEFORE UPDATE ON prior_auth_history
BEGIN
    SELECT RAISE(ABORT, 'prior_auth_history is append-only');
END;

CREATE TRIGGER IF NOT EXISTS prior_auth_history_no_delete BEFORE DELETE ON prior_auth_history
BEGIN
    SELECT RAISE(ABORT, 'prior_auth_history is append-only');
END;
"#;
