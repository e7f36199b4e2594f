//! Formulary entry persistence.

use rusqlite::{params, OptionalExtension};
use rust_decimal::Decimal;

use super::{decimal_from_sql, decimal_to_sql, Database, DbError, DbResult};
use crate::models::{CostShare, Formulary, FormularyEntry, Gender, Gpi, Ndc};

const ENTRY_COLUMNS: &str = "ndc, gpi, drug_name, covered, tier, cost_share_kind, cost_share_amount,
    requires_prior_auth, requires_step_therapy, step_therapy_protocol, quantity_limit,
    days_supply_limit, min_age, max_age, gender_restriction";

impl Database {
    /// Insert or replace a formulary entry.
    pub fn upsert_formulary_entry(&self, entry: &FormularyEntry) -> DbResult<()> {
        let (kind, amount) = cost_share_to_sql(&entry.cost_share);
        self.conn.execute(
            r#"
            INSERT INTO formulary (
                ndc, gpi, drug_name, covered, tier, cost_share_kind, cost_share_amount,
                requires_prior_auth, requires_step_therapy, step_therapy_protocol, quantity_limit,
                days_supply_limit, min_age, max_age, gender_restriction
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(ndc) DO UPDATE SET
                gpi = excluded.gpi,
                drug_name = excluded.drug_name,
                covered = excluded.covered,
                tier = excluded.tier,
                cost_share_kind = excluded.cost_share_kind,
                cost_share_amount = excluded.cost_share_amount,
                requires_prior_auth = excluded.requires_prior_auth,
                requires_step_therapy = excluded.requires_step_therapy,
                step_therapy_protocol = excluded.step_therapy_protocol,
                quantity_limit = excluded.quantity_limit,
                days_supply_limit = excluded.days_supply_limit,
                min_age = excluded.min_age,
                max_age = excluded.max_age,
                gender_restriction = excluded.gender_restriction,
                updated_at = datetime('now')
            "#,
            params![
                entry.ndc.as_str(),
                entry.gpi.as_str(),
                entry.drug_name,
                entry.covered,
                entry.tier,
                kind,
                amount,
                entry.requires_prior_auth,
                entry.requires_step_therapy,
                entry.step_therapy_protocol,
                entry.quantity_limit.map(decimal_to_sql),
                entry.days_supply_limit,
                entry.min_age,
                entry.max_age,
                entry.gender_restriction.map(|g| g.code()),
            ],
        )?;
        Ok(())
    }

    /// Get a formulary entry by NDC.
    pub fn get_formulary_entry(&self, ndc: &Ndc) -> DbResult<Option<FormularyEntry>> {
        let sql = format!("SELECT {} FROM formulary WHERE ndc = ?1", ENTRY_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![ndc.as_str()], EntryRow::from_row)
            .optional()?;

        match row {
            Some(row) => Ok(Some(row.try_into()?)),
            None => Ok(None),
        }
    }

    /// Remove an entry. Returns false if it did not exist.
    pub fn delete_formulary_entry(&self, ndc: &Ndc) -> DbResult<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM formulary WHERE ndc = ?1", params![ndc.as_str()])?;
        Ok(rows > 0)
    }

    /// Load every entry into an in-memory formulary.
    pub fn load_formulary(&self) -> DbResult<Formulary> {
        let sql = format!("SELECT {} FROM formulary ORDER BY ndc", ENTRY_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], EntryRow::from_row)?;

        let mut entries = Vec::new();
        for row in rows {
            let entry: FormularyEntry = row?.try_into()?;
            entries.push(entry);
        }
        Ok(Formulary::from_entries(entries))
    }
}

fn cost_share_to_sql(cost_share: &CostShare) -> (&'static str, String) {
    match cost_share {
        CostShare::Copay(amount) => ("copay", decimal_to_sql(*amount)),
        CostShare::Coinsurance(rate) => ("coinsurance", decimal_to_sql(*rate)),
    }
}

struct EntryRow {
    ndc: String,
    gpi: String,
    drug_name: String,
    covered: bool,
    tier: u8,
    cost_share_kind: String,
    cost_share_amount: String,
    requires_prior_auth: bool,
    requires_step_therapy: bool,
    step_therapy_protocol: Option<String>,
    quantity_limit: Option<String>,
    days_supply_limit: Option<u32>,
    min_age: Option<u32>,
    max_age: Option<u32>,
    gender_restriction: Option<String>,
}

impl EntryRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            ndc: row.get(0)?,
            gpi: row.get(1)?,
            drug_name: row.get(2)?,
            covered: row.get(3)?,
            tier: row.get(4)?,
            cost_share_kind: row.get(5)?,
            cost_share_amount: row.get(6)?,
            requires_prior_auth: row.get(7)?,
            requires_step_therapy: row.get(8)?,
            step_therapy_protocol: row.get(9)?,
            quantity_limit: row.get(10)?,
            days_supply_limit: row.get(11)?,
            min_age: row.get(12)?,
            max_age: row.get(13)?,
            gender_restriction: row.get(14)?,
        })
    }
}

impl TryFrom<EntryRow> for FormularyEntry {
    type Error = DbError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        let ndc = Ndc::parse(&row.ndc).map_err(|e| DbError::Constraint(e.to_string()))?;
        let gpi = Gpi::parse(&row.gpi).map_err(|e| DbError::Constraint(e.to_string()))?;

        let amount: Decimal = decimal_from_sql("cost_share_amount", &row.cost_share_amount)?;
        let cost_share = match row.cost_share_kind.as_str() {
            "copay" => CostShare::Copay(amount),
            "coinsurance" => CostShare::Coinsurance(amount),
            other => {
                return Err(DbError::Constraint(format!("Unknown cost share kind: {}", other)));
            }
        };

        let quantity_limit = row
            .quantity_limit
            .as_deref()
            .map(|q| decimal_from_sql("quantity_limit", q))
            .transpose()?;

        let gender_restriction = match row.gender_restriction.as_deref() {
            Some(code) => Some(
                Gender::parse(code)
                    .ok_or_else(|| DbError::Constraint(format!("Unknown gender: {}", code)))?,
            ),
            None => None,
        };

        Ok(FormularyEntry {
            ndc,
            gpi,
            drug_name: row.drug_name,
            covered: row.covered,
            tier: row.tier,
            cost_share,
            requires_prior_auth: row.requires_prior_auth,
            requires_step_therapy: row.requires_step_therapy,
            step_therapy_protocol: row.step_therapy_protocol,
            quantity_limit,
            days_supply_limit: row.days_supply_limit,
            min_age: row.min_age,
            max_age: row.max_age,
            gender_restriction,
        })
    }
}
