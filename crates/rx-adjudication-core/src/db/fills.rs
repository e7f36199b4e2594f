//! Paid-fill history used by DUR and step therapy.

use chrono::NaiveDate;
use rusqlite::{params, Connection};

use super::members::write_accumulators;
use super::{date_from_sql, date_to_sql, decimal_from_sql, decimal_to_sql, Database, DbError, DbResult};
use crate::models::{AccumulatorSet, DrugInfo, Gpi, Ndc, PriorFill};

impl Database {
    /// Record a paid fill. A claim id can be recorded once.
    pub fn insert_fill(&self, fill: &PriorFill) -> DbResult<()> {
        insert_fill_row(&self.conn, fill)
    }

    /// Record a paid claim's fill and the member's new accumulator totals together.
    pub fn record_paid_claim(&mut self, fill: &PriorFill, accumulators: &AccumulatorSet) -> DbResult<()> {
        let tx = self.conn.transaction()?;
        insert_fill_row(&tx, fill)?;
        write_accumulators(&tx, &fill.member_id, accumulators)?;
        tx.commit()?;
        Ok(())
    }

    /// Fills for a member on or after `since`, oldest first.
    pub fn fills_for_member(&self, member_id: &str, since: Option<NaiveDate>) -> DbResult<Vec<PriorFill>> {
        let since = since.map(date_to_sql).unwrap_or_default();
        let mut stmt = self.conn.prepare(
            r#"
            SELECT claim_id, member_id, ndc, gpi, drug_name, fill_date, days_supply, quantity, prescriber_npi
            FROM claim_fills
            WHERE member_id = ?1 AND fill_date >= ?2
            ORDER BY fill_date, claim_id
            "#,
        )?;

        let rows = stmt.query_map(params![member_id, since], |row| {
            Ok(FillRow {
                claim_id: row.get(0)?,
                member_id: row.get(1)?,
                ndc: row.get(2)?,
                gpi: row.get(3)?,
                drug_name: row.get(4)?,
                fill_date: row.get(5)?,
                days_supply: row.get(6)?,
                quantity: row.get(7)?,
                prescriber_npi: row.get(8)?,
            })
        })?;

        let mut fills = Vec::new();
        for row in rows {
            fills.push(row?.try_into()?);
        }
        Ok(fills)
    }
}

fn insert_fill_row(conn: &Connection, fill: &PriorFill) -> DbResult<()> {
    let result = conn.execute(
        r#"
        INSERT INTO claim_fills (
            claim_id, member_id, ndc, gpi, drug_name, fill_date, days_supply, quantity, prescriber_npi
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            fill.claim_id,
            fill.member_id,
            fill.drug.ndc.as_str(),
            fill.drug.gpi.as_str(),
            fill.drug.name,
            date_to_sql(fill.fill_date),
            fill.days_supply,
            decimal_to_sql(fill.quantity),
            fill.prescriber_npi,
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, msg)) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            Err(DbError::Constraint(msg.unwrap_or_else(|| {
                format!("Fill for claim {} rejected", fill.claim_id)
            })))
        }
        Err(e) => Err(e.into()),
    }
}

struct FillRow {
    claim_id: String,
    member_id: String,
    ndc: String,
    gpi: String,
    drug_name: String,
    fill_date: String,
    days_supply: u32,
    quantity: String,
    prescriber_npi: Option<String>,
}

impl TryFrom<FillRow> for PriorFill {
    type Error = DbError;

    fn try_from(row: FillRow) -> Result<Self, Self::Error> {
        let ndc = Ndc::parse(&row.ndc).map_err(|e| DbError::Constraint(e.to_string()))?;
        let gpi = Gpi::parse(&row.gpi).map_err(|e| DbError::Constraint(e.to_string()))?;
        Ok(PriorFill {
            claim_id: row.claim_id,
            member_id: row.member_id,
            drug: DrugInfo::new(ndc, gpi, row.drug_name),
            fill_date: date_from_sql("fill_date", &row.fill_date)?,
            days_supply: row.days_supply,
            quantity: decimal_from_sql("quantity", &row.quantity)?,
            prescriber_npi: row.prescriber_npi,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccumulatorKind, Gender, Member};
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.upsert_member(&Member {
            member_id: "M100".into(),
            first_name: "Ada".into(),
            last_name: "Quinn".into(),
            date_of_birth: date(1980, 5, 17),
            gender: Gender::Female,
            bin: "610014".into(),
            pcn: "RXPCN".into(),
            group_number: "GRP001".into(),
            effective_date: date(2024, 1, 1),
            termination_date: None,
            accumulators: AccumulatorSet::new(dec!(100), dec!(2000)),
        })
        .unwrap();
        db
    }

    fn fill(claim_id: &str, fill_date: NaiveDate) -> PriorFill {
        PriorFill {
            claim_id: claim_id.into(),
            member_id: "M100".into(),
            drug: DrugInfo::new(
                Ndc::parse("00093104801").unwrap(),
                Gpi::parse("27250050000330").unwrap(),
                "Metformin 500mg",
            ),
            fill_date,
            days_supply: 30,
            quantity: dec!(60),
            prescriber_npi: Some("1234567893".into()),
        }
    }

    #[test]
    fn test_insert_and_list() {
        let db = setup();
        db.insert_fill(&fill("C2", date(2024, 3, 1))).unwrap();
        db.insert_fill(&fill("C1", date(2024, 1, 1))).unwrap();

        let fills = db.fills_for_member("M100", None).unwrap();
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].claim_id, "C1");
        assert_eq!(fills[1], fill("C2", date(2024, 3, 1)));

        let recent = db.fills_for_member("M100", Some(date(2024, 2, 1))).unwrap();
        assert_eq!(recent.len(), 1);
        assert!(db.fills_for_member("M999", None).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_claim_rejected() {
        let db = setup();
        db.insert_fill(&fill("C1", date(2024, 1, 1))).unwrap();
        let result = db.insert_fill(&fill("C1", date(2024, 1, 1)));
        assert!(matches!(result, Err(DbError::Constraint(_))));
    }

    #[test]
    fn test_fill_requires_member() {
        let db = setup();
        let mut orphan = fill("C9", date(2024, 1, 1));
        orphan.member_id = "M404".into();
        assert!(db.insert_fill(&orphan).is_err());
    }

    #[test]
    fn test_record_paid_claim_is_atomic() {
        let mut db = setup();
        let mut accumulators = AccumulatorSet::new(dec!(100), dec!(2000));
        accumulators.apply(AccumulatorKind::Deductible, dec!(40));
        db.record_paid_claim(&fill("C1", date(2024, 1, 1)), &accumulators).unwrap();

        let member = db.get_member("M100").unwrap().unwrap();
        assert_eq!(member.accumulators.applied(AccumulatorKind::Deductible), dec!(40));

        // duplicate fill rolls back the accumulator write
        accumulators.apply(AccumulatorKind::Deductible, dec!(10));
        assert!(db.record_paid_claim(&fill("C1", date(2024, 1, 1)), &accumulators).is_err());
        let member = db.get_member("M100").unwrap().unwrap();
        assert_eq!(member.accumulators.applied(AccumulatorKind::Deductible), dec!(40));
        assert_eq!(db.fills_for_member("M100", None).unwrap().len(), 1);
    }
}
