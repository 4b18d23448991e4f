// 🔍 Payment Audit - staged rule findings and the audit report CSV
//
// Post-processing stages one detail row per (payment, report type) finding.
// The audit report step flattens every payment awaiting sampling, together with
// its latest staged rows, into one CSV for program integrity review.
// The returned reject file uses the same columns with the decisions filled in.

use crate::db::{format_timestamp, parse_column, parse_timestamp, parse_uuid};
use crate::entities::payment::{payments_by_ci, payments_for_claim};
use crate::entities::{Claim, Employee, Payment};
use crate::error::Result;
use crate::state_log::{ever_reached, EntityRef, State};
use crate::writeback::WritebackStatus;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// REPORT TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AuditReportType {
    DuaDiaReduction,
    ExceedsTwentySixWeeks,
    DorFineosNameMismatch,
    /// Never staged: the cap rejects outright
    MaxWeeklyBenefits,
}

impl AuditReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditReportType::DuaDiaReduction => "dua_dia_reduction",
            AuditReportType::ExceedsTwentySixWeeks => "exceeds_26_weeks_total_leave",
            AuditReportType::DorFineosNameMismatch => "dor_fineos_name_mismatch",
            AuditReportType::MaxWeeklyBenefits => "max_weekly_benefits",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AuditReportType::DuaDiaReduction => "DUA DIA Reduction",
            AuditReportType::ExceedsTwentySixWeeks => "Exceeds 26 weeks of total leave",
            AuditReportType::DorFineosNameMismatch => "DOR FINEOS Name Mismatch",
            AuditReportType::MaxWeeklyBenefits => "Max Weekly Benefits",
        }
    }

    /// Terminal state when program integrity rejects a payment flagged with this type
    pub fn reject_state(&self) -> State {
        match self {
            AuditReportType::DuaDiaReduction => State::PaymentAuditRejectedAdditionalIncome,
            AuditReportType::ExceedsTwentySixWeeks => State::PaymentAuditRejectedLeaveDuration,
            AuditReportType::DorFineosNameMismatch => State::PaymentAuditRejectedNameMismatch,
            AuditReportType::MaxWeeklyBenefits => State::PaymentFailedMaxWeeklyBenefit,
        }
    }

    pub fn reject_writeback(&self) -> WritebackStatus {
        match self {
            AuditReportType::DuaDiaReduction => WritebackStatus::DuaDiaAdditionalIncome,
            AuditReportType::ExceedsTwentySixWeeks => WritebackStatus::LeaveDurationExceeded,
            AuditReportType::DorFineosNameMismatch => WritebackStatus::NameMismatch,
            AuditReportType::MaxWeeklyBenefits => WritebackStatus::MaxWeeklyBenefitsExceeded,
        }
    }

    /// Whether a payment missing from the returned file counts as accepted
    pub fn silence_is_acceptance(&self) -> bool {
        matches!(self, AuditReportType::DorFineosNameMismatch)
    }
}

impl FromStr for AuditReportType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "dua_dia_reduction" => Ok(AuditReportType::DuaDiaReduction),
            "exceeds_26_weeks_total_leave" => Ok(AuditReportType::ExceedsTwentySixWeeks),
            "dor_fineos_name_mismatch" => Ok(AuditReportType::DorFineosNameMismatch),
            "max_weekly_benefits" => Ok(AuditReportType::MaxWeeklyBenefits),
            other => Err(format!("unknown audit report type: {other}")),
        }
    }
}

// ============================================================================
// STAGED DETAILS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReportDetail {
    pub audit_report_detail_id: i64,
    pub payment_id: Uuid,
    pub report_type: AuditReportType,
    pub message: String,
    pub import_log_id: i64,
    pub created_at: DateTime<Utc>,
}

pub fn stage(
    conn: &Connection,
    payment_id: Uuid,
    report_type: AuditReportType,
    message: &str,
    import_log_id: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO audit_report_details (payment_id, report_type, message, import_log_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            payment_id.to_string(),
            report_type.as_str(),
            message,
            import_log_id,
            format_timestamp(Utc::now()),
        ],
    )?;
    Ok(())
}

/// Staged rows of the most recent post-processing run that staged anything for the payment
pub fn latest_staged_details(conn: &Connection, payment_id: Uuid) -> Result<Vec<AuditReportDetail>> {
    let mut stmt = conn.prepare(
        "SELECT audit_report_detail_id, payment_id, report_type, message, import_log_id, created_at
         FROM audit_report_details
         WHERE payment_id = ?1
           AND import_log_id = (SELECT MAX(import_log_id) FROM audit_report_details WHERE payment_id = ?1)
         ORDER BY audit_report_detail_id",
    )?;

    let details = stmt
        .query_map(params![payment_id.to_string()], |row| {
            let payment_id: String = row.get(1)?;
            let report_type: String = row.get(2)?;
            let created_at: String = row.get(5)?;
            Ok(AuditReportDetail {
                audit_report_detail_id: row.get(0)?,
                payment_id: parse_uuid(&payment_id)?,
                report_type: parse_column(&report_type)?,
                message: row.get(3)?,
                import_log_id: row.get(4)?,
                created_at: parse_timestamp(&created_at)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(details)
}

// ============================================================================
// AUDIT REPORT CSV
// ============================================================================

pub const AUDIT_REPORT_HEADERS: [&str; 29] = [
    "PFML Payment Id",
    "Leave Type",
    "Claimant First Name",
    "Claimant Last Name",
    "Customer Number",
    "Address Line 1",
    "Address Line 2",
    "City",
    "State",
    "Zip",
    "Payment Preference",
    "Scheduled Payment Date",
    "Payment Period Start",
    "Payment Period End",
    "Payment Amount",
    "Absence Case Number",
    "C Value",
    "I Value",
    "Employer ID",
    "Is First Time Payment",
    "Previously Errored Payment Count",
    "Previously Rejected Payment Count",
    "Previously Skipped Payment Count",
    "DUA DIA Reduction Details",
    "Exceeds 26 Weeks Total Leave Details",
    "DOR FINEOS Name Mismatch Details",
    "Rejected by Program Integrity",
    "Skipped by Program Integrity",
    "Reject Notes",
];

/// One line of the audit report (outbound) or reject file (inbound)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReportRow {
    #[serde(rename = "PFML Payment Id")]
    pub pfml_payment_id: String,
    #[serde(rename = "Leave Type")]
    pub leave_type: String,
    #[serde(rename = "Claimant First Name")]
    pub first_name: String,
    #[serde(rename = "Claimant Last Name")]
    pub last_name: String,
    #[serde(rename = "Customer Number")]
    pub customer_number: String,
    #[serde(rename = "Address Line 1")]
    pub address_line_1: String,
    #[serde(rename = "Address Line 2")]
    pub address_line_2: String,
    #[serde(rename = "City")]
    pub city: String,
    #[serde(rename = "State")]
    pub state: String,
    #[serde(rename = "Zip")]
    pub zip: String,
    #[serde(rename = "Payment Preference")]
    pub payment_preference: String,
    #[serde(rename = "Scheduled Payment Date")]
    pub scheduled_payment_date: String,
    #[serde(rename = "Payment Period Start")]
    pub payment_period_start: String,
    #[serde(rename = "Payment Period End")]
    pub payment_period_end: String,
    #[serde(rename = "Payment Amount")]
    pub payment_amount: String,
    #[serde(rename = "Absence Case Number")]
    pub absence_case_number: String,
    #[serde(rename = "C Value")]
    pub c_value: String,
    #[serde(rename = "I Value")]
    pub i_value: String,
    #[serde(rename = "Employer ID")]
    pub employer_id: String,
    #[serde(rename = "Is First Time Payment")]
    pub is_first_time_payment: String,
    #[serde(rename = "Previously Errored Payment Count")]
    pub previously_errored_payment_count: String,
    #[serde(rename = "Previously Rejected Payment Count")]
    pub previously_rejected_payment_count: String,
    #[serde(rename = "Previously Skipped Payment Count")]
    pub previously_skipped_payment_count: String,
    #[serde(rename = "DUA DIA Reduction Details")]
    pub dua_dia_reduction_details: String,
    #[serde(rename = "Exceeds 26 Weeks Total Leave Details")]
    pub exceeds_26_weeks_total_leave_details: String,
    #[serde(rename = "DOR FINEOS Name Mismatch Details")]
    pub dor_fineos_name_mismatch_details: String,
    #[serde(rename = "Rejected by Program Integrity")]
    pub rejected_by_program_integrity: String,
    #[serde(rename = "Skipped by Program Integrity")]
    pub skipped_by_program_integrity: String,
    #[serde(rename = "Reject Notes")]
    pub reject_notes: String,
}

pub fn yes_no(flag: bool) -> String {
    if flag { "Y" } else { "N" }.to_string()
}

/// "Y", "yes", "true" (any case) mean yes; anything else means no
pub fn is_yes(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "y" | "yes" | "true")
}

impl AuditReportRow {
    pub fn details_for(&self, report_type: AuditReportType) -> &str {
        match report_type {
            AuditReportType::DuaDiaReduction => &self.dua_dia_reduction_details,
            AuditReportType::ExceedsTwentySixWeeks => &self.exceeds_26_weeks_total_leave_details,
            AuditReportType::DorFineosNameMismatch => &self.dor_fineos_name_mismatch_details,
            AuditReportType::MaxWeeklyBenefits => "",
        }
    }

    /// Report types this row carries details for, in column order
    pub fn flagged_types(&self) -> Vec<AuditReportType> {
        [
            AuditReportType::DuaDiaReduction,
            AuditReportType::ExceedsTwentySixWeeks,
            AuditReportType::DorFineosNameMismatch,
        ]
        .into_iter()
        .filter(|t| !self.details_for(*t).trim().is_empty())
        .collect()
    }
}

/// Payment history shown next to each audited payment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaymentHistorySummary {
    pub is_first_time_payment: bool,
    pub previously_errored: usize,
    pub previously_rejected: usize,
    pub previously_skipped: usize,
}

pub fn payment_history_summary(conn: &Connection, payment: &Payment) -> Result<PaymentHistorySummary> {
    let mut summary = PaymentHistorySummary {
        is_first_time_payment: true,
        ..PaymentHistorySummary::default()
    };

    for other in payments_for_claim(conn, payment.claim_id)? {
        if other.payment_id == payment.payment_id {
            continue;
        }
        if ever_reached(conn, EntityRef::payment(other.payment_id), |s| s == State::PaymentAchSent)? {
            summary.is_first_time_payment = false;
            break;
        }
    }

    for other in payments_by_ci(conn, &payment.c_value, &payment.i_value)? {
        if other.payment_id == payment.payment_id {
            continue;
        }
        let entity = EntityRef::payment(other.payment_id);
        if ever_reached(conn, entity, |s| s.is_payment_error())? {
            summary.previously_errored += 1;
        }
        if ever_reached(conn, entity, |s| s.is_payment_rejection())? {
            summary.previously_rejected += 1;
        }
        if ever_reached(conn, entity, |s| s == State::PaymentAuditSkipped)? {
            summary.previously_skipped += 1;
        }
    }

    Ok(summary)
}

pub fn build_audit_row(
    payment: &Payment,
    employee: &Employee,
    claim: &Claim,
    history: PaymentHistorySummary,
    details: &[AuditReportDetail],
) -> AuditReportRow {
    let details_of = |report_type: AuditReportType| {
        details
            .iter()
            .filter(|d| d.report_type == report_type)
            .map(|d| d.message.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    AuditReportRow {
        pfml_payment_id: payment.payment_id.to_string(),
        leave_type: claim.leave_type.label().to_string(),
        first_name: payment.fineos_first_name.clone(),
        last_name: payment.fineos_last_name.clone(),
        customer_number: employee.fineos_customer_number.clone(),
        address_line_1: payment.address_line_1.clone().unwrap_or_default(),
        address_line_2: payment.address_line_2.clone().unwrap_or_default(),
        city: payment.city.clone().unwrap_or_default(),
        state: payment.state.clone().unwrap_or_default(),
        zip: payment.zip.clone().unwrap_or_default(),
        payment_preference: payment.payment_method.label().to_string(),
        scheduled_payment_date: payment.payment_date.to_string(),
        payment_period_start: payment.period_start.to_string(),
        payment_period_end: payment.period_end.to_string(),
        payment_amount: format!("{:.2}", payment.amount),
        absence_case_number: claim.absence_case_number.clone(),
        c_value: payment.c_value.clone(),
        i_value: payment.i_value.clone(),
        employer_id: claim.employer_id.clone(),
        is_first_time_payment: yes_no(history.is_first_time_payment),
        previously_errored_payment_count: history.previously_errored.to_string(),
        previously_rejected_payment_count: history.previously_rejected.to_string(),
        previously_skipped_payment_count: history.previously_skipped.to_string(),
        dua_dia_reduction_details: details_of(AuditReportType::DuaDiaReduction),
        exceeds_26_weeks_total_leave_details: details_of(AuditReportType::ExceedsTwentySixWeeks),
        dor_fineos_name_mismatch_details: details_of(AuditReportType::DorFineosNameMismatch),
        rejected_by_program_integrity: String::new(),
        skipped_by_program_integrity: String::new(),
        reject_notes: String::new(),
    }
}

pub fn write_audit_csv(rows: &[AuditReportRow]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    writer.write_record(AUDIT_REPORT_HEADERS)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer
        .into_inner()
        .map_err(|e| crate::error::PipelineError::Io(e.into_error()))
}

pub fn read_audit_csv(content: &[u8]) -> Result<Vec<AuditReportRow>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::Headers).from_reader(content);
    let rows = reader
        .deserialize()
        .collect::<std::result::Result<Vec<AuditReportRow>, csv::Error>>()?;
    Ok(rows)
}
