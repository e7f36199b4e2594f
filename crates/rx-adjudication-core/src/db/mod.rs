//! SQLite persistence for formulary, members, paid fills and prior authorizations.

mod fills;
mod formulary;
mod members;
mod prior_auth;
mod schema;

pub use prior_auth::SqlitePaStore;
pub use schema::*;

use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::Decimal;
use thiserror::Error;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Owns the SQLite connection. The schema is applied on every open.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens (or creates) the database file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Self::with_schema(Connection::open(path)?)
    }

    pub fn open_in_memory() -> DbResult<Self> {
        Self::with_schema(Connection::open_in_memory()?)
    }

    fn with_schema(conn: Connection) -> DbResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Borrow the connection for the row-level stores.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Multi-statement writes (claim posting, PA decisions) go through here.
    pub fn transaction(&mut self) -> DbResult<rusqlite::Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }
}

// Money is stored as decimal text and dates as ISO-8601 text.

pub(crate) fn decimal_to_sql(value: Decimal) -> String {
    value.to_string()
}

pub(crate) fn decimal_from_sql(column: &str, value: &str) -> DbResult<Decimal> {
    Decimal::from_str(value)
        .map_err(|e| DbError::Constraint(format!("{} is not a decimal ({}): {}", column, value, e)))
}

pub(crate) fn date_to_sql(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn date_from_sql(column: &str, value: &str) -> DbResult<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| DbError::Constraint(format!("{} is not a date ({}): {}", column, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_database_opens() {
        assert!(Database::open_in_memory().is_ok());
    }

    #[test]
    fn test_all_tables_created() {
        let db = Database::open_in_memory().unwrap();
        let mut stmt = db.conn().prepare("SELECT name FROM sqlite_master WHERE type = 'table'").unwrap();
        let tables = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for table in ["formulary", "members", "claim_fills", "prior_auth_records", "prior_auth_history"] {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }
    }

    #[test]
    fn test_reopen_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rx.db");
        drop(Database::open(&path).unwrap());
        assert!(Database::open(&path).is_ok());
    }

    #[test]
    fn test_value_helpers() {
        assert_eq!(decimal_from_sql("x", &decimal_to_sql(Decimal::new(1234, 2))).unwrap(), Decimal::new(1234, 2));
        assert!(decimal_from_sql("x", "abc").is_err());
        let d = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(date_from_sql("d", &date_to_sql(d)).unwrap(), d);
        assert!(date_from_sql("d", "2024-13-01").is_err());
    }
}
