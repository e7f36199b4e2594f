//! Prior authorization persistence.
//!
//! The request and current response are stored as JSON on the record row;
//! status history lives in its own append-only table.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{Database, DbError, DbResult};
use crate::models::{PaRecord, PaRequest, PaResponse, PaStatus, StatusChange};
use crate::prior_auth::{PaStore, PriorAuthError, PriorAuthResult};

impl Database {
    /// Insert a new record with its history.
    pub fn insert_pa_record(&self, record: &PaRecord) -> DbResult<()> {
        insert_record(&self.conn, record)
    }

    /// Get a record with its full history.
    pub fn get_pa_record(&self, request_id: &str) -> DbResult<Option<PaRecord>> {
        load_record(&self.conn, request_id)
    }

    /// Store the current response and any history entries not yet persisted.
    pub fn save_pa_record(&mut self, record: &PaRecord) -> DbResult<()> {
        let tx = self.conn.transaction()?;
        save_record(&tx, record)?;
        tx.commit()?;
        Ok(())
    }

    /// All records for a member, oldest submission first.
    pub fn pa_records_for_member(&self, member_id: &str) -> DbResult<Vec<PaRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT request_id FROM prior_auth_records
            WHERE member_id = ?1
            ORDER BY created_at, rowid
            "#,
        )?;
        let ids = stmt.query_map(params![member_id], |row| row.get::<_, String>(0))?;

        let mut records = Vec::new();
        for id in ids {
            let id = id?;
            let record = load_record(&self.conn, &id)?
                .ok_or_else(|| DbError::NotFound(format!("Prior authorization {}", id)))?;
            records.push(record);
        }
        records.sort_by(|a, b| a.request.submitted_at.cmp(&b.request.submitted_at));
        Ok(records)
    }
}

fn insert_record(conn: &Connection, record: &PaRecord) -> DbResult<()> {
    let request_json = serde_json::to_string(&record.request)?;
    let response_json = record.response.as_ref().map(serde_json::to_string).transpose()?;
    conn.execute(
        r#"
        INSERT INTO prior_auth_records (request_id, member_id, ndc, request, response, status)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            record.request_id(),
            record.request.member_id,
            record.request.drug.ndc.as_str(),
            request_json,
            response_json,
            record.status().as_str(),
        ],
    )?;
    for entry in &record.history {
        insert_history(conn, record.request_id(), entry)?;
    }
    Ok(())
}

fn save_record(conn: &Connection, record: &PaRecord) -> DbResult<()> {
    let response_json = record.response.as_ref().map(serde_json::to_string).transpose()?;
    let rows = conn.execute(
        r#"
        UPDATE prior_auth_records
        SET response = ?1, status = ?2, updated_at = datetime('now')
        WHERE request_id = ?3
        "#,
        params![response_json, record.status().as_str(), record.request_id()],
    )?;
    if rows == 0 {
        return Err(DbError::NotFound(format!("Prior authorization {}", record.request_id())));
    }

    let persisted: u32 = conn.query_row(
        "SELECT COALESCE(MAX(sequence), 0) FROM prior_auth_history WHERE request_id = ?1",
        params![record.request_id()],
        |row| row.get(0),
    )?;
    for entry in record.history.iter().filter(|e| e.sequence > persisted) {
        insert_history(conn, record.request_id(), entry)?;
    }
    Ok(())
}

fn insert_history(conn: &Connection, request_id: &str, entry: &StatusChange) -> DbResult<()> {
    conn.execute(
        r#"
        INSERT INTO prior_auth_history (request_id, sequence, status, actor, note, changed_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            request_id,
            entry.sequence,
            entry.status.as_str(),
            entry.actor,
            entry.note,
            entry.changed_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn load_record(conn: &Connection, request_id: &str) -> DbResult<Option<PaRecord>> {
    let row = conn
        .query_row(
            "SELECT request, response FROM prior_auth_records WHERE request_id = ?1",
            params![request_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
        )
        .optional()?;

    let Some((request_json, response_json)) = row else {
        return Ok(None);
    };
    let request: PaRequest = serde_json::from_str(&request_json)?;
    let response: Option<PaResponse> = response_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;

    let mut stmt = conn.prepare(
        r#"
        SELECT sequence, status, actor, note, changed_at
        FROM prior_auth_history
        WHERE request_id = ?1
        ORDER BY sequence
        "#,
    )?;
    let rows = stmt.query_map(params![request_id], |row| {
        Ok(HistoryRow {
            sequence: row.get(0)?,
            status: row.get(1)?,
            actor: row.get(2)?,
            note: row.get(3)?,
            changed_at: row.get(4)?,
        })
    })?;

    let mut history = Vec::new();
    for row in rows {
        history.push(row?.try_into()?);
    }

    Ok(Some(PaRecord {
        request,
        response,
        history,
    }))
}

struct HistoryRow {
    sequence: u32,
    status: String,
    actor: String,
    note: Option<String>,
    changed_at: String,
}

impl TryFrom<HistoryRow> for StatusChange {
    type Error = DbError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        let status = PaStatus::parse(&row.status)
            .ok_or_else(|| DbError::Constraint(format!("Unknown PA status: {}", row.status)))?;
        let changed_at = DateTime::parse_from_rfc3339(&row.changed_at)
            .map_err(|e| DbError::Constraint(format!("Invalid timestamp {}: {}", row.changed_at, e)))?
            .with_timezone(&Utc);
        Ok(StatusChange {
            sequence: row.sequence,
            status,
            actor: row.actor,
            note: row.note,
            changed_at,
        })
    }
}

// ============================================================================
// PaStore backed by the database
// ============================================================================

/// Prior authorization store sharing the core's database handle.
#[derive(Clone)]
pub struct SqlitePaStore {
    db: Arc<Mutex<Database>>,
}

impl SqlitePaStore {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }
}

impl PaStore for SqlitePaStore {
    fn insert(&self, record: &PaRecord) -> PriorAuthResult<()> {
        let db = self.db.lock()?;
        if db.get_pa_record(record.request_id())?.is_some() {
            return Err(PriorAuthError::InvalidRequest(format!(
                "duplicate request id {}",
                record.request_id()
            )));
        }
        db.insert_pa_record(record)?;
        Ok(())
    }

    fn get(&self, request_id: &str) -> PriorAuthResult<Option<PaRecord>> {
        let db = self.db.lock()?;
        Ok(db.get_pa_record(request_id)?)
    }

    fn update(
        &self,
        request_id: &str,
        apply: &mut dyn FnMut(&mut PaRecord) -> PriorAuthResult<()>,
    ) -> PriorAuthResult<PaRecord> {
        let mut db = self.db.lock()?;
        let tx = db.transaction()?;
        let mut record = load_record(&tx, request_id)?
            .ok_or_else(|| PriorAuthError::NotFound(request_id.to_string()))?;
        // dropping the transaction on error rolls it back
        apply(&mut record)?;
        save_record(&tx, &record)?;
        tx.commit().map_err(DbError::from)?;
        Ok(record)
    }

    fn records_for_member(&self, member_id: &str) -> PriorAuthResult<Vec<PaRecord>> {
        let db = self.db.lock()?;
        Ok(db.pa_records_for_member(member_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DrugInfo, Gpi, Ndc, PaDecision};
    use rust_decimal_macros::dec;

    fn request() -> PaRequest {
        PaRequest::new(
            "M100",
            DrugInfo::new(
                Ndc::parse("00169413013").unwrap(),
                Gpi::parse("27175080000320").unwrap(),
                "Semaglutide 1mg",
            ),
            dec!(4),
            28,
            "1234567893",
        )
    }

    fn denial(at: DateTime<Utc>) -> PaResponse {
        PaResponse {
            decision: PaDecision::Denied,
            authorization_number: None,
            approved_quantity: None,
            approved_days_supply: None,
            effective_date: None,
            expiration_date: None,
            denial_reason: Some("Step therapy not met".into()),
            alternatives: vec!["Metformin".into()],
            appeal_deadline: Some(at.date_naive() + chrono::Duration::days(60)),
            appeal_instructions: Some("Appeal in writing".into()),
            auto_approved: false,
            decided_by: "reviewer-1".into(),
            decided_at: at,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let db = Database::open_in_memory().unwrap();
        let record = PaRecord::new(request());
        db.insert_pa_record(&record).unwrap();

        let loaded = db.get_pa_record(record.request_id()).unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(db.get_pa_record("missing").unwrap().is_none());
    }

    #[test]
    fn test_save_appends_history() {
        let mut db = Database::open_in_memory().unwrap();
        let mut record = PaRecord::new(request());
        db.insert_pa_record(&record).unwrap();

        record.record_response(denial(Utc::now()), Some("Step therapy not met".into()));
        db.save_pa_record(&record).unwrap();
        // saving again adds nothing
        db.save_pa_record(&record).unwrap();

        let loaded = db.get_pa_record(record.request_id()).unwrap().unwrap();
        assert_eq!(loaded.status(), PaStatus::Denied);
        assert_eq!(loaded.history.len(), 2);
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_store_update_is_transactional() {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let store = SqlitePaStore::new(db.clone());
        let record = PaRecord::new(request());
        store.insert(&record).unwrap();
        assert!(store.insert(&record).is_err());

        let result = store.update(record.request_id(), &mut |r| {
            r.record_response(denial(Utc::now()), None);
            Err(PriorAuthError::InvalidRequest("abort".into()))
        });
        assert!(result.is_err());
        let stored = store.get(record.request_id()).unwrap().unwrap();
        assert_eq!(stored.history.len(), 1);
        assert!(stored.response.is_none());

        let updated = store
            .update(record.request_id(), &mut |r| {
                r.record_response(denial(Utc::now()), None);
                Ok(())
            })
            .unwrap();
        assert_eq!(updated.history.len(), 2);
        assert_eq!(store.records_for_member("M100").unwrap().len(), 1);
        assert!(matches!(
            store.update("missing", &mut |_| Ok(())),
            Err(PriorAuthError::NotFound(_))
        ));
    }
}
