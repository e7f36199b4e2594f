//! Member eligibility and accumulator persistence.

use rusqlite::{params, Connection, OptionalExtension};

use super::{date_from_sql, date_to_sql, decimal_from_sql, decimal_to_sql, Database, DbError, DbResult};
use crate::models::{Accumulator, AccumulatorKind, AccumulatorSet, Gender, Member};

impl Database {
    /// Insert or replace a member, including accumulator state.
    pub fn upsert_member(&self, member: &Member) -> DbResult<()> {
        let deductible = member.accumulators.get(AccumulatorKind::Deductible);
        let oop = member.accumulators.get(AccumulatorKind::OutOfPocket);
        self.conn.execute(
            r#"
            INSERT INTO members (
                member_id, first_name, last_name, date_of_birth, gender, bin, pcn, group_number,
                effective_date, termination_date, deductible_limit, deductible_applied,
                out_of_pocket_limit, out_of_pocket_applied
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(member_id) DO UPDATE SET
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                date_of_birth = excluded.date_of_birth,
                gender = excluded.gender,
                bin = excluded.bin,
                pcn = excluded.pcn,
                group_number = excluded.group_number,
                effective_date = excluded.effective_date,
                termination_date = excluded.termination_date,
                deductible_limit = excluded.deductible_limit,
                deductible_applied = excluded.deductible_applied,
                out_of_pocket_limit = excluded.out_of_pocket_limit,
                out_of_pocket_applied = excluded.out_of_pocket_applied,
                updated_at = datetime('now')
            "#,
            params![
                member.member_id,
                member.first_name,
                member.last_name,
                date_to_sql(member.date_of_birth),
                member.gender.code(),
                member.bin,
                member.pcn,
                member.group_number,
                date_to_sql(member.effective_date),
                member.termination_date.map(date_to_sql),
                decimal_to_sql(deductible.limit()),
                decimal_to_sql(deductible.applied()),
                decimal_to_sql(oop.limit()),
                decimal_to_sql(oop.applied()),
            ],
        )?;
        Ok(())
    }

    /// Get a member by id.
    pub fn get_member(&self, member_id: &str) -> DbResult<Option<Member>> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT member_id, first_name, last_name, date_of_birth, gender, bin, pcn,
                       group_number, effective_date, termination_date, deductible_limit,
                       deductible_applied, out_of_pocket_limit, out_of_pocket_applied
                FROM members WHERE member_id = ?1
                "#,
                params![member_id],
                |row| {
                    Ok(MemberRow {
                        member_id: row.get(0)?,
                        first_name: row.get(1)?,
                        last_name: row.get(2)?,
                        date_of_birth: row.get(3)?,
                        gender: row.get(4)?,
                        bin: row.get(5)?,
                        pcn: row.get(6)?,
                        group_number: row.get(7)?,
                        effective_date: row.get(8)?,
                        termination_date: row.get(9)?,
                        deductible_limit: row.get(10)?,
                        deductible_applied: row.get(11)?,
                        out_of_pocket_limit: row.get(12)?,
                        out_of_pocket_applied: row.get(13)?,
                    })
                },
            )
            .optional()?;

        match row {
            Some(row) => Ok(Some(row.try_into()?)),
            None => Ok(None),
        }
    }

    /// Persist only the applied accumulator amounts.
    pub fn update_accumulators(&self, member_id: &str, accumulators: &AccumulatorSet) -> DbResult<()> {
        write_accumulators(&self.conn, member_id, accumulators)
    }
}

pub(super) fn write_accumulators(
    conn: &Connection,
    member_id: &str,
    accumulators: &AccumulatorSet,
) -> DbResult<()> {
    let rows = conn.execute(
        r#"
        UPDATE members
        SET deductible_applied = ?1, out_of_pocket_applied = ?2, updated_at = datetime('now')
        WHERE member_id = ?3
        "#,
        params![
            decimal_to_sql(accumulators.applied(AccumulatorKind::Deductible)),
            decimal_to_sql(accumulators.applied(AccumulatorKind::OutOfPocket)),
            member_id,
        ],
    )?;

    if rows == 0 {
        return Err(DbError::NotFound(format!("Member {}", member_id)));
    }
    Ok(())
}

struct MemberRow {
    member_id: String,
    first_name: String,
    last_name: String,
    date_of_birth: String,
    gender: String,
    bin: String,
    pcn: String,
    group_number: String,
    effective_date: String,
    termination_date: Option<String>,
    deductible_limit: String,
    deductible_applied: String,
    out_of_pocket_limit: String,
    out_of_pocket_applied: String,
}

impl TryFrom<MemberRow> for Member {
    type Error = DbError;

    fn try_from(row: MemberRow) -> Result<Self, Self::Error> {
        let gender = Gender::parse(&row.gender)
            .ok_or_else(|| DbError::Constraint(format!("Unknown gender: {}", row.gender)))?;
        let deductible = Accumulator::with_applied(
            decimal_from_sql("deductible_limit", &row.deductible_limit)?,
            decimal_from_sql("deductible_applied", &row.deductible_applied)?,
        );
        let out_of_pocket = Accumulator::with_applied(
            decimal_from_sql("out_of_pocket_limit", &row.out_of_pocket_limit)?,
            decimal_from_sql("out_of_pocket_applied", &row.out_of_pocket_applied)?,
        );

        Ok(Member {
            member_id: row.member_id,
            first_name: row.first_name,
            last_name: row.last_name,
            date_of_birth: date_from_sql("date_of_birth", &row.date_of_birth)?,
            gender,
            bin: row.bin,
            pcn: row.pcn,
            group_number: row.group_number,
            effective_date: date_from_sql("effective_date", &row.effective_date)?,
            termination_date: row
                .termination_date
                .as_deref()
                .map(|d| date_from_sql("termination_date", d))
                .transpose()?,
            accumulators: AccumulatorSet::from_parts(deductible, out_of_pocket),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn member() -> Member {
        Member {
            member_id: "M100".into(),
            first_name: "Ada".into(),
            last_name: "Quinn".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1980, 5, 17).unwrap(),
            gender: Gender::Female,
            bin: "610014".into(),
            pcn: "RXPCN".into(),
            group_number: "GRP001".into(),
            effective_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            termination_date: Some(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()),
            accumulators: AccumulatorSet::new(dec!(100), dec!(2000)),
        }
    }

    #[test]
    fn test_upsert_and_get_member() {
        let db = Database::open_in_memory().unwrap();
        let member = member();
        db.upsert_member(&member).unwrap();

        let loaded = db.get_member("M100").unwrap().unwrap();
        assert_eq!(loaded, member);
        assert!(db.get_member("M999").unwrap().is_none());
    }

    #[test]
    fn test_update_accumulators() {
        let db = Database::open_in_memory().unwrap();
        let mut member = member();
        db.upsert_member(&member).unwrap();

        member.accumulators.apply(AccumulatorKind::Deductible, dec!(100));
        member.accumulators.apply(AccumulatorKind::OutOfPocket, dec!(106));
        db.update_accumulators("M100", &member.accumulators).unwrap();

        let loaded = db.get_member("M100").unwrap().unwrap();
        assert_eq!(loaded.accumulators.applied(AccumulatorKind::Deductible), dec!(100));
        assert_eq!(loaded.accumulators.remaining(AccumulatorKind::OutOfPocket), dec!(1894));
    }

    #[test]
    fn test_update_unknown_member() {
        let db = Database::open_in_memory().unwrap();
        let result = db.update_accumulators("M404", &AccumulatorSet::new(dec!(0), dec!(0)));
        assert!(matches!(result, Err(DbError::NotFound(_))));
    }
}
