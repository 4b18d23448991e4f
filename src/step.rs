// ⚙️ Step Runner - one unit of batch work
// Created → Running → {Committed | RolledBack}
//
// The import_log row is written outside the step transaction so it survives rollback.
// Steps never keep a cursor: their input set comes from latest_in_state, so a rerun
// after a crash picks up exactly what never reached the next state.

use crate::db::{format_timestamp, parse_column, parse_timestamp};
use crate::error::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{error, info};

// ============================================================================
// STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Created,
    Running,
    Committed,
    RolledBack,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Created => "created",
            StepStatus::Running => "running",
            StepStatus::Committed => "committed",
            StepStatus::RolledBack => "rolled_back",
        }
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "created" => Ok(StepStatus::Created),
            "running" => Ok(StepStatus::Running),
            "committed" => Ok(StepStatus::Committed),
            "rolled_back" => Ok(StepStatus::RolledBack),
            other => Err(format!("unknown step status: {other}")),
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Named counters, frozen into the import log when the step ends
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics(BTreeMap<String, i64>);

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(names: &[&str]) -> Self {
        Metrics(names.iter().map(|n| (n.to_string(), 0)).collect())
    }

    pub fn increment(&mut self, name: &str) {
        self.add(name, 1);
    }

    pub fn add(&mut self, name: &str, amount: i64) {
        *self.0.entry(name.to_string()).or_insert(0) += amount;
    }

    pub fn get(&self, name: &str) -> i64 {
        self.0.get(name).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &i64)> {
        self.0.iter()
    }

    /// True when every counter is zero (nothing was processed)
    pub fn all_zero(&self) -> bool {
        self.0.values().all(|v| *v == 0)
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        f.write_str(&parts.join(", "))
    }
}

// ============================================================================
// STEP TRAIT
// ============================================================================

/// What a step sees while it runs: the open transaction plus run-wide values
pub struct StepContext<'a> {
    pub conn: &'a Connection,
    pub import_log_id: i64,
    pub run_date: NaiveDate,
    pub metrics: Metrics,
}

impl<'a> StepContext<'a> {
    pub fn increment(&mut self, name: &str) {
        self.metrics.increment(name);
    }
}

pub trait Step {
    fn name(&self) -> &'static str;

    /// Counters initialized to zero before execute
    fn declared_metrics(&self) -> &'static [&'static str];

    fn execute(&mut self, ctx: &mut StepContext<'_>) -> Result<()>;

    /// Runs after rollback (e.g. move an errored input file aside)
    fn cleanup_on_failure(&mut self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// STEP REPORT (= one import_log row)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub import_log_id: i64,
    pub step_name: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub metrics: Metrics,
    pub report_text: Option<String>,
}

impl StepReport {
    pub fn summary(&self) -> String {
        format!(
            "[{}] {} #{} ({})",
            self.status, self.step_name, self.import_log_id, self.metrics
        )
    }
}

fn report_from_row(row: &Row<'_>) -> rusqlite::Result<StepReport> {
    let status: String = row.get(2)?;
    let started_at: String = row.get(3)?;
    let ended_at: Option<String> = row.get(4)?;
    let metrics: String = row.get(5)?;

    Ok(StepReport {
        import_log_id: row.get(0)?,
        step_name: row.get(1)?,
        status: parse_column(&status)?,
        started_at: parse_timestamp(&started_at)?,
        ended_at: ended_at.as_deref().map(parse_timestamp).transpose()?,
        metrics: serde_json::from_str(&metrics)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e)))?,
        report_text: row.get(6)?,
    })
}

// ============================================================================
// RUNNER
// ============================================================================

/// Run one step inside its own transaction and return its finalized import log
///
/// On failure the transaction is rolled back, `cleanup_on_failure` runs, the
/// import log is finalized as rolled back and the original error is returned.
pub fn run_step(conn: &mut Connection, step: &mut dyn Step, run_date: NaiveDate) -> Result<StepReport> {
    let step_name = step.name();
    let metrics = Metrics::declare(step.declared_metrics());
    let import_log_id = open_import_log(conn, step_name, &metrics)?;

    info!(step = step_name, import_log_id, %run_date, "step started");

    let tx = conn.transaction()?;
    let mut ctx = StepContext {
        conn: &tx,
        import_log_id,
        run_date,
        metrics,
    };

    let outcome = step.execute(&mut ctx);
    let metrics = ctx.metrics;

    match outcome.and_then(|_| tx.commit().map_err(Into::into)) {
        Ok(()) => {
            finalize_import_log(conn, import_log_id, StepStatus::Committed, &metrics, None)?;
            info!(step = step_name, import_log_id, metrics = %metrics, "step committed");
        }
        Err(e) => {
            // tx is consumed by commit or dropped here; either way nothing was kept
            error!(step = step_name, import_log_id, error = %e, "step failed, rolled back");
            if let Err(cleanup_err) = step.cleanup_on_failure() {
                error!(step = step_name, error = %cleanup_err, "cleanup after failure also failed");
            }
            finalize_import_log(conn, import_log_id, StepStatus::RolledBack, &metrics, Some(&e.to_string()))?;
            return Err(e);
        }
    }

    get_import_log(conn, import_log_id)
}

fn open_import_log(conn: &Connection, step_name: &str, metrics: &Metrics) -> Result<i64> {
    conn.execute(
        "INSERT INTO import_log (step_name, status, started_at, metrics) VALUES (?1, ?2, ?3, ?4)",
        params![
            step_name,
            StepStatus::Created.as_str(),
            format_timestamp(Utc::now()),
            serde_json::to_string(metrics)?,
        ],
    )?;
    let import_log_id = conn.last_insert_rowid();

    conn.execute(
        "UPDATE import_log SET status = ?1 WHERE import_log_id = ?2",
        params![StepStatus::Running.as_str(), import_log_id],
    )?;

    Ok(import_log_id)
}

fn finalize_import_log(
    conn: &Connection,
    import_log_id: i64,
    status: StepStatus,
    metrics: &Metrics,
    report_text: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE import_log
         SET status = ?1, ended_at = ?2, metrics = ?3, report_text = ?4
         WHERE import_log_id = ?5",
        params![
            status.as_str(),
            format_timestamp(Utc::now()),
            serde_json::to_string(metrics)?,
            report_text,
            import_log_id,
        ],
    )?;
    Ok(())
}

pub fn get_import_log(conn: &Connection, import_log_id: i64) -> Result<StepReport> {
    let report = conn.query_row(
        "SELECT import_log_id, step_name, status, started_at, ended_at, metrics, report_text
         FROM import_log WHERE import_log_id = ?1",
        params![import_log_id],
        report_from_row,
    )?;
    Ok(report)
}

/// Most recent step runs first
pub fn list_import_logs(conn: &Connection, limit: usize) -> Result<Vec<StepReport>> {
    let mut stmt = conn.prepare(
        "SELECT import_log_id, step_name, status, started_at, ended_at, metrics, report_text
         FROM import_log ORDER BY import_log_id DESC LIMIT ?1",
    )?;
    let reports = stmt
        .query_map(params![limit as i64], report_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(reports)
}

// ============================================================================
// TESTS
// ============================================================================
