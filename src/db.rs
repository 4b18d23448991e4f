// 🗄️ Database - SQLite + WAL
// Schema for the staged extract, the state ledger and every pipeline artifact.
//
// Rows are append-only except import_log, which is finalized once per step run.

use crate::error::Result;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::str::FromStr;

use rust_decimal::Decimal;

/// Open (or create) the pipeline database and make sure the schema exists
pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    setup_database(&conn)?;
    Ok(conn)
}

/// In-memory database with the full schema (tests, dry runs)
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Staged extract (already parsed by the loader)
    // ==========================================================================
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS employees (
            employee_id TEXT PRIMARY KEY,
            fineos_customer_number TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            date_of_death TEXT
        );

        CREATE TABLE IF NOT EXISTS claims (
            claim_id TEXT PRIMARY KEY,
            employee_id TEXT NOT NULL REFERENCES employees(employee_id),
            employer_id TEXT NOT NULL,
            absence_case_number TEXT NOT NULL,
            leave_type TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS absence_periods (
            absence_period_id TEXT PRIMARY KEY,
            claim_id TEXT NOT NULL REFERENCES claims(claim_id),
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            period_type TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS benefit_years (
            benefit_year_id TEXT PRIMARY KEY,
            employee_id TEXT NOT NULL REFERENCES employees(employee_id),
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS pub_efts (
            pub_eft_id TEXT PRIMARY KEY,
            employee_id TEXT NOT NULL REFERENCES employees(employee_id),
            routing_nbr TEXT NOT NULL,
            account_nbr TEXT NOT NULL,
            account_type TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS payments (
            pub_individual_id INTEGER PRIMARY KEY AUTOINCREMENT,
            payment_id TEXT UNIQUE NOT NULL,
            claim_id TEXT NOT NULL,
            employee_id TEXT NOT NULL,
            c_value TEXT NOT NULL,
            i_value TEXT NOT NULL,
            period_start TEXT NOT NULL,
            period_end TEXT NOT NULL,
            payment_date TEXT NOT NULL,
            amount TEXT NOT NULL,
            payment_method TEXT NOT NULL,
            pub_eft_id TEXT,
            fineos_first_name TEXT NOT NULL,
            fineos_last_name TEXT NOT NULL,
            address_line_1 TEXT,
            address_line_2 TEXT,
            city TEXT,
            state TEXT,
            zip TEXT
        );

        CREATE TABLE IF NOT EXISTS reduction_payments (
            reduction_id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            fineos_customer_number TEXT NOT NULL,
            request_week_begin TEXT NOT NULL,
            payment_date TEXT,
            gross_amount TEXT NOT NULL,
            description TEXT
        );",
    )?;

    // ==========================================================================
    // State ledger + step runs (audit trail)
    // ==========================================================================
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS import_log (
            import_log_id INTEGER PRIMARY KEY AUTOINCREMENT,
            step_name TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            metrics TEXT NOT NULL,
            report_text TEXT
        );

        CREATE TABLE IF NOT EXISTS state_log (
            state_log_id INTEGER PRIMARY KEY AUTOINCREMENT,
            entry_id TEXT UNIQUE NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            end_state_id INTEGER NOT NULL,
            end_state TEXT NOT NULL,
            outcome TEXT NOT NULL,
            import_log_id INTEGER REFERENCES import_log(import_log_id),
            created_at TEXT NOT NULL
        );",
    )?;

    // ==========================================================================
    // Pipeline artifacts
    // ==========================================================================
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS audit_report_details (
            audit_report_detail_id INTEGER PRIMARY KEY AUTOINCREMENT,
            payment_id TEXT NOT NULL REFERENCES payments(payment_id),
            report_type TEXT NOT NULL,
            message TEXT NOT NULL,
            import_log_id INTEGER NOT NULL REFERENCES import_log(import_log_id),
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS payment_writeback_details (
            writeback_detail_id TEXT PRIMARY KEY,
            payment_id TEXT NOT NULL REFERENCES payments(payment_id),
            transaction_status TEXT NOT NULL,
            record_status TEXT NOT NULL,
            import_log_id INTEGER REFERENCES import_log(import_log_id),
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS reference_files (
            reference_file_id TEXT PRIMARY KEY,
            file_type TEXT NOT NULL,
            file_location TEXT NOT NULL,
            sha256 TEXT NOT NULL,
            import_log_id INTEGER REFERENCES import_log(import_log_id),
            created_at TEXT NOT NULL
        );",
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_state_log_entity
            ON state_log(entity_type, entity_id, created_at, state_log_id);
        CREATE INDEX IF NOT EXISTS idx_payments_employee ON payments(employee_id);
        CREATE INDEX IF NOT EXISTS idx_payments_ci ON payments(c_value, i_value);
        CREATE INDEX IF NOT EXISTS idx_reductions_customer
            ON reduction_payments(fineos_customer_number);
        CREATE INDEX IF NOT EXISTS idx_audit_details_payment ON audit_report_details(payment_id);
        CREATE INDEX IF NOT EXISTS idx_reference_files_sha ON reference_files(sha256);",
    )?;

    Ok(())
}

/// Run `f` inside a SAVEPOINT so its writes land together or not at all.
///
/// Works both inside an open step transaction and on a bare connection.
pub fn with_savepoint<T>(
    conn: &Connection,
    name: &str,
    f: impl FnOnce(&Connection) -> Result<T>,
) -> Result<T> {
    conn.execute_batch(&format!("SAVEPOINT {name}"))?;
    match f(conn) {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {name}"))?;
            Ok(value)
        }
        Err(e) => {
            conn.execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}"))?;
            Err(e)
        }
    }
}

// ============================================================================
// COLUMN CODECS
// Timestamps use a fixed-width RFC 3339 form so text order == time order.
// ============================================================================

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

pub fn parse_decimal(value: &str) -> rusqlite::Result<Decimal> {
    Decimal::from_str(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

pub fn parse_uuid(value: &str) -> rusqlite::Result<uuid::Uuid> {
    uuid::Uuid::parse_str(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

/// Parse an enum stored by its `as_str()` name
pub fn parse_column<T: FromStr<Err = String>>(value: &str) -> rusqlite::Result<T> {
    T::from_str(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })
}

/// Inclusive number of days in `[start, end]`
pub fn inclusive_days(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days() + 1
}
