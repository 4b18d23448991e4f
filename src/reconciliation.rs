// ⚖️ Reject File Reconciliation - turn program integrity decisions into states
//
// The returned audit report carries one decision per payment: reject, skip or
// (neither column set) accept. Every row is checked before anything is written;
// a single bad row quarantines the whole file.
//
// Payments awaiting a decision that are missing from the file are accepted only
// when they went out in the same audit report as the file's rows, and every
// report type staged for them treats silence as acceptance. The rest keep
// waiting for a later file.

use crate::audit::{is_yes, latest_staged_details, AuditReportRow, AuditReportType};
use crate::entities::payment::payment_exists;
use crate::error::{PipelineError, Result};
use crate::state_log::{
    latest_in_state, latest_state, record_transition, EntityRef, EntityType, Outcome, State, ValidationIssue,
    ValidationReason,
};
use crate::writeback::record_terminal_state;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

// ============================================================================
// DECISIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Accept,
    /// Rejected for the first flagged report type, if any
    Reject {
        report_type: Option<AuditReportType>,
        notes: String,
    },
    Skip { notes: String },
}

impl Decision {
    pub fn target_state(&self) -> State {
        match self {
            Decision::Accept => State::PaymentValidated,
            Decision::Reject { report_type: Some(t), .. } => t.reject_state(),
            Decision::Reject { report_type: None, .. } => State::PaymentAuditRejected,
            Decision::Skip { .. } => State::PaymentAuditSkipped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowDecision {
    pub payment_id: Uuid,
    pub decision: Decision,
}

// ============================================================================
// RECONCILIATION REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub row_count: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub skipped: usize,
    /// Missing from the file, accepted because silence counts as acceptance
    pub silently_accepted: usize,
    /// Missing from the file and still waiting
    pub awaiting_decision: usize,
    /// Sent in a different audit report; not answered by this file
    pub other_reports: usize,
}

impl ReconciliationReport {
    pub fn summary(&self) -> String {
        format!(
            "Reject file: {} rows, {} accepted, {} rejected, {} skipped, {} accepted by silence, {} still waiting, {} from other reports",
            self.row_count,
            self.accepted,
            self.rejected,
            self.skipped,
            self.silently_accepted,
            self.awaiting_decision,
            self.other_reports
        )
    }
}

// ============================================================================
// PLANNING (no writes)
// ============================================================================

fn decision_for(row: &AuditReportRow, staged_types: &[AuditReportType]) -> Decision {
    let notes = row.reject_notes.trim().to_string();
    if is_yes(&row.rejected_by_program_integrity) {
        // Column flags come first; fall back to what post-processing staged
        let report_type = row
            .flagged_types()
            .first()
            .copied()
            .or_else(|| staged_types.first().copied());
        Decision::Reject { report_type, notes }
    } else if is_yes(&row.skipped_by_program_integrity) {
        Decision::Skip { notes }
    } else {
        Decision::Accept
    }
}

fn staged_types(conn: &rusqlite::Connection, payment_id: Uuid) -> Result<Vec<AuditReportType>> {
    let types: BTreeSet<AuditReportType> = latest_staged_details(conn, payment_id)?
        .into_iter()
        .map(|d| d.report_type)
        .collect();
    Ok(types.into_iter().collect())
}

/// Check every row against the payments awaiting a decision.
///
/// Returns `PipelineError::Validation` listing every problem found.
pub fn plan(conn: &rusqlite::Connection, rows: &[AuditReportRow]) -> Result<Vec<RowDecision>> {
    let awaiting: HashSet<Uuid> = latest_in_state(conn, EntityType::Payment, &[State::PaymentAuditReportSent])?
        .into_iter()
        .map(|entry| entry.entity.entity_id)
        .collect();

    let mut issues = Vec::new();
    let mut seen = HashSet::new();
    let mut decisions = Vec::new();

    for (index, row) in rows.iter().enumerate() {
        let line = index + 2;
        let payment_id = match Uuid::parse_str(row.pfml_payment_id.trim()) {
            Ok(id) => id,
            Err(_) => {
                issues.push(ValidationIssue::new(
                    ValidationReason::UnknownPaymentId,
                    format!("line {line}: '{}' is not a payment id", row.pfml_payment_id),
                ));
                continue;
            }
        };

        if !awaiting.contains(&payment_id) {
            if payment_exists(conn, payment_id)? {
                let actual = latest_state(conn, EntityRef::payment(payment_id))?
                    .map(|e| e.end_state.description())
                    .unwrap_or("<none>");
                issues.push(ValidationIssue::new(
                    ValidationReason::UnexpectedPaymentState,
                    format!("line {line}: payment {payment_id} is not awaiting a decision ({actual})"),
                ));
            } else {
                issues.push(ValidationIssue::new(
                    ValidationReason::UnknownPaymentId,
                    format!("line {line}: unknown payment {payment_id}"),
                ));
            }
            continue;
        }

        if !seen.insert(payment_id) {
            issues.push(ValidationIssue::new(
                ValidationReason::InvalidValue,
                format!("line {line}: payment {payment_id} appears more than once"),
            ));
            continue;
        }

        if is_yes(&row.rejected_by_program_integrity) && is_yes(&row.skipped_by_program_integrity) {
            issues.push(ValidationIssue::new(
                ValidationReason::InvalidValue,
                format!("line {line}: payment {payment_id} is both rejected and skipped"),
            ));
            continue;
        }

        let types = staged_types(conn, payment_id)?;
        decisions.push(RowDecision {
            payment_id,
            decision: decision_for(row, &types),
        });
    }

    if !issues.is_empty() {
        return Err(PipelineError::Validation(issues));
    }
    Ok(decisions)
}

// ============================================================================
// APPLYING
// ============================================================================

/// Write one transition per decided payment, then settle the silent ones
pub fn apply(
    conn: &rusqlite::Connection,
    decisions: &[RowDecision],
    file_name: &str,
    import_log_id: i64,
) -> Result<ReconciliationReport> {
    let mut report = ReconciliationReport {
        row_count: decisions.len(),
        ..ReconciliationReport::default()
    };
    let decided: HashSet<Uuid> = decisions.iter().map(|d| d.payment_id).collect();

    // Which audit report (the import log of its export run) each payment went out in
    let awaiting = latest_in_state(conn, EntityType::Payment, &[State::PaymentAuditReportSent])?;
    let sent_in: HashMap<Uuid, Option<i64>> = awaiting
        .iter()
        .map(|entry| (entry.entity.entity_id, entry.import_log_id))
        .collect();
    let answered_reports: HashSet<Option<i64>> = decisions
        .iter()
        .filter_map(|d| sent_in.get(&d.payment_id).copied())
        .collect();

    for row in decisions {
        let state = row.decision.target_state();
        match &row.decision {
            Decision::Accept => {
                record_transition(
                    conn,
                    EntityRef::payment(row.payment_id),
                    state,
                    Outcome::message(format!("Accepted in {file_name}")),
                    Some(import_log_id),
                )?;
                report.accepted += 1;
            }
            Decision::Reject { notes, .. } => {
                record_terminal_state(
                    conn,
                    row.payment_id,
                    state,
                    Outcome::message(format!("Rejected in {file_name}: {notes}")),
                    Some(import_log_id),
                )?;
                report.rejected += 1;
            }
            Decision::Skip { notes } => {
                record_terminal_state(
                    conn,
                    row.payment_id,
                    state,
                    Outcome::message(format!("Skipped in {file_name}: {notes}")),
                    Some(import_log_id),
                )?;
                report.skipped += 1;
            }
        }
        debug!(payment_id = %row.payment_id, state = %state, "reconciled payment");
    }

    for entry in &awaiting {
        let payment_id = entry.entity.entity_id;
        if decided.contains(&payment_id) {
            continue;
        }
        if !answered_reports.contains(&entry.import_log_id) {
            report.other_reports += 1;
            continue;
        }
        let types = staged_types(conn, payment_id)?;
        if types.iter().all(|t| t.silence_is_acceptance()) {
            record_transition(
                conn,
                EntityRef::payment(payment_id),
                State::PaymentValidated,
                Outcome::message(format!("Not listed in {file_name}; accepted")),
                Some(import_log_id),
            )?;
            report.silently_accepted += 1;
        } else {
            report.awaiting_decision += 1;
        }
    }

    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================
