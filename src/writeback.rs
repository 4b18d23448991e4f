// 📤 Writeback Coordinator - terminal payment state -> vendor transaction status
//
// Every terminal payment transition is written together with its writeback
// detail row and the detail's own "ready" transition, inside one savepoint.
// A reader never sees a terminal state without its vendor status code.

use crate::db::{format_timestamp, parse_timestamp, parse_uuid, with_savepoint};
use crate::entities::Payment;
use crate::error::{PipelineError, Result};
use crate::state_log::{record_transition, EntityRef, Outcome, State, StateLogEntry};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// STATUS TABLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WritebackStatus {
    PaymentValidationError,
    MaxWeeklyBenefitsExceeded,
    PaymentAuditError,
    DuaDiaAdditionalIncome,
    LeaveDurationExceeded,
    NameMismatch,
    PaymentAuditInProgress,
    EftPendingBankValidation,
    EftAccountInformationError,
    Paid,
}

impl WritebackStatus {
    pub const ALL: [WritebackStatus; 10] = [
        WritebackStatus::PaymentValidationError,
        WritebackStatus::MaxWeeklyBenefitsExceeded,
        WritebackStatus::PaymentAuditError,
        WritebackStatus::DuaDiaAdditionalIncome,
        WritebackStatus::LeaveDurationExceeded,
        WritebackStatus::NameMismatch,
        WritebackStatus::PaymentAuditInProgress,
        WritebackStatus::EftPendingBankValidation,
        WritebackStatus::EftAccountInformationError,
        WritebackStatus::Paid,
    ];

    /// Vendor `transactionStatus` value
    pub fn transaction_status(&self) -> &'static str {
        match self {
            WritebackStatus::PaymentValidationError => "Payment Validation Error",
            WritebackStatus::MaxWeeklyBenefitsExceeded => "Max Weekly Benefits Exceeded",
            WritebackStatus::PaymentAuditError => "Payment Audit Error",
            WritebackStatus::DuaDiaAdditionalIncome => "DUA/DIA Additional Income",
            WritebackStatus::LeaveDurationExceeded => "Max Leave Duration Exceeded",
            WritebackStatus::NameMismatch => "Name Mismatch",
            WritebackStatus::PaymentAuditInProgress => "Payment Audit In Progress",
            WritebackStatus::EftPendingBankValidation => "EFT Pending Bank Validation",
            WritebackStatus::EftAccountInformationError => "EFT Account Information Error",
            WritebackStatus::Paid => "Paid",
        }
    }

    /// Vendor record `status`: paid payments become active, the rest stay pending
    pub fn record_status(&self) -> &'static str {
        match self {
            WritebackStatus::Paid => "Active",
            _ => "PendingActive",
        }
    }

    /// The closed terminal-state table
    pub fn for_terminal_state(state: State) -> Option<WritebackStatus> {
        match state {
            State::PaymentFailedAutomatedValidation => Some(WritebackStatus::PaymentValidationError),
            State::PaymentFailedMaxWeeklyBenefit => Some(WritebackStatus::MaxWeeklyBenefitsExceeded),
            State::PaymentAuditRejected => Some(WritebackStatus::PaymentAuditError),
            State::PaymentAuditRejectedAdditionalIncome => Some(WritebackStatus::DuaDiaAdditionalIncome),
            State::PaymentAuditRejectedLeaveDuration => Some(WritebackStatus::LeaveDurationExceeded),
            State::PaymentAuditRejectedNameMismatch => Some(WritebackStatus::NameMismatch),
            State::PaymentAuditSkipped => Some(WritebackStatus::PaymentAuditInProgress),
            State::PaymentEftPendingPrenote => Some(WritebackStatus::EftPendingBankValidation),
            State::PaymentEftAccountInvalid => Some(WritebackStatus::EftAccountInformationError),
            State::PaymentAchSent => Some(WritebackStatus::Paid),
            _ => None,
        }
    }
}

impl FromStr for WritebackStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        WritebackStatus::ALL
            .into_iter()
            .find(|status| status.transaction_status() == s)
            .ok_or_else(|| format!("unknown writeback status: {s}"))
    }
}

// ============================================================================
// WRITEBACK DETAIL
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WritebackDetail {
    pub writeback_detail_id: Uuid,
    pub payment_id: Uuid,
    pub status: WritebackStatus,
    pub import_log_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Result of one terminal write: the payment's entry and its writeback detail
#[derive(Debug, Clone)]
pub struct TerminalTransition {
    pub payment_entry: StateLogEntry,
    pub detail: WritebackDetail,
}

/// Move a payment to a terminal state and queue its vendor status, atomically
pub fn record_terminal_state(
    conn: &Connection,
    payment_id: Uuid,
    state: State,
    outcome: Outcome,
    import_log_id: Option<i64>,
) -> Result<TerminalTransition> {
    let status = WritebackStatus::for_terminal_state(state).ok_or_else(|| {
        PipelineError::invariant(format!(
            "terminal state '{}' has no writeback status",
            state.description()
        ))
    })?;

    with_savepoint(conn, "terminal_writeback", |conn| {
        let payment_entry = record_transition(conn, EntityRef::payment(payment_id), state, outcome, import_log_id)?;

        let detail = WritebackDetail {
            writeback_detail_id: Uuid::new_v4(),
            payment_id,
            status,
            import_log_id,
            created_at: Utc::now(),
        };
        conn.execute(
            "INSERT INTO payment_writeback_details (
                writeback_detail_id, payment_id, transaction_status, record_status, import_log_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                detail.writeback_detail_id.to_string(),
                payment_id.to_string(),
                status.transaction_status(),
                status.record_status(),
                import_log_id,
                format_timestamp(detail.created_at),
            ],
        )?;

        record_transition(
            conn,
            EntityRef::writeback_detail(detail.writeback_detail_id),
            State::WritebackReady,
            Outcome::message(status.transaction_status()),
            import_log_id,
        )?;

        Ok(TerminalTransition { payment_entry, detail })
    })
}

pub fn get_writeback_detail(conn: &Connection, writeback_detail_id: Uuid) -> Result<Option<WritebackDetail>> {
    let detail = conn
        .query_row(
            "SELECT writeback_detail_id, payment_id, transaction_status, import_log_id, created_at
             FROM payment_writeback_details WHERE writeback_detail_id = ?1",
            params![writeback_detail_id.to_string()],
            |row| {
                let id: String = row.get(0)?;
                let payment_id: String = row.get(1)?;
                let status: String = row.get(2)?;
                let created_at: String = row.get(4)?;
                Ok(WritebackDetail {
                    writeback_detail_id: parse_uuid(&id)?,
                    payment_id: parse_uuid(&payment_id)?,
                    status: crate::db::parse_column(&status)?,
                    import_log_id: row.get(3)?,
                    created_at: parse_timestamp(&created_at)?,
                })
            },
        )
        .optional()?;
    Ok(detail)
}

// ============================================================================
// WRITEBACK CSV
// ============================================================================

pub const WRITEBACK_HEADERS: [&str; 6] = [
    "pei_C_Value",
    "pei_I_Value",
    "status",
    "transactionStatus",
    "transStatusDate",
    "extractionDate",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WritebackRow {
    #[serde(rename = "pei_C_Value")]
    pub c_value: String,
    #[serde(rename = "pei_I_Value")]
    pub i_value: String,
    pub status: String,
    #[serde(rename = "transactionStatus")]
    pub transaction_status: String,
    #[serde(rename = "transStatusDate")]
    pub trans_status_date: String,
    #[serde(rename = "extractionDate")]
    pub extraction_date: String,
}

impl WritebackRow {
    pub fn new(payment: &Payment, detail: &WritebackDetail, extraction_date: NaiveDate) -> Self {
        WritebackRow {
            c_value: payment.c_value.clone(),
            i_value: payment.i_value.clone(),
            status: detail.status.record_status().to_string(),
            transaction_status: detail.status.transaction_status().to_string(),
            trans_status_date: detail.created_at.date_naive().to_string(),
            extraction_date: extraction_date.to_string(),
        }
    }
}

pub fn write_writeback_csv(rows: &[WritebackRow]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    writer.write_record(WRITEBACK_HEADERS)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.into_inner().map_err(|e| PipelineError::Io(e.into_error()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::post_processing::test_support::*;
    use crate::state_log::{latest_in_state, latest_state, EntityType};
    use rust_decimal_macros::dec;

    #[test]
    fn test_every_terminal_payment_state_has_a_status() {
        for state in State::ALL {
            if state.entity_type() == EntityType::Payment && state.is_terminal() {
                assert!(
                    WritebackStatus::for_terminal_state(state).is_some(),
                    "{state} has no writeback status"
                );
            }
        }
        assert_eq!(WritebackStatus::for_terminal_state(State::PaymentValidated), None);
    }

    #[test]
    fn test_terminal_write_is_atomic() {
        let fixture = Fixture::new();
        let container = fixture.stored_container(date(2021, 9, 19), date(2021, 9, 25), dec!(900.00));
        let payment_id = container.payment.payment_id;

        let written = record_terminal_state(
            &fixture.conn,
            payment_id,
            State::PaymentFailedMaxWeeklyBenefit,
            Outcome::message("cap"),
            None,
        )
        .unwrap();

        assert_eq!(written.detail.status, WritebackStatus::MaxWeeklyBenefitsExceeded);
        assert_eq!(
            latest_state(&fixture.conn, EntityRef::payment(payment_id)).unwrap().unwrap().end_state,
            State::PaymentFailedMaxWeeklyBenefit
        );
        let ready = latest_in_state(&fixture.conn, EntityType::WritebackDetail, &[State::WritebackReady]).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].entity.entity_id, written.detail.writeback_detail_id);

        let stored = get_writeback_detail(&fixture.conn, written.detail.writeback_detail_id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, WritebackStatus::MaxWeeklyBenefitsExceeded);
    }

    #[test]
    fn test_non_terminal_state_is_rejected_without_writes() {
        let fixture = Fixture::new();
        let container = fixture.stored_container(date(2021, 9, 19), date(2021, 9, 25), dec!(100.00));
        let payment_id = container.payment.payment_id;

        let err = record_terminal_state(&fixture.conn, payment_id, State::PaymentValidated, Outcome::default(), None)
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvariantViolation(_)));
        assert!(latest_state(&fixture.conn, EntityRef::payment(payment_id)).unwrap().is_none());
    }

    #[test]
    fn test_writeback_csv_layout() {
        let fixture = Fixture::new();
        let container = fixture.stored_container(date(2021, 9, 19), date(2021, 9, 25), dec!(100.00));
        let detail = WritebackDetail {
            writeback_detail_id: Uuid::new_v4(),
            payment_id: container.payment.payment_id,
            status: WritebackStatus::Paid,
            import_log_id: None,
            created_at: Utc::now(),
        };
        let row = WritebackRow::new(&container.payment, &detail, date(2021, 9, 27));
        let text = String::from_utf8(write_writeback_csv(&[row]).unwrap()).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "pei_C_Value,pei_I_Value,status,transactionStatus,transStatusDate,extractionDate"
        );
        let line = lines.next().unwrap();
        assert!(line.starts_with("7326,"));
        assert!(line.contains(",Active,Paid,"));
        assert!(line.ends_with(",2021-09-27"));
    }

    #[test]
    fn test_status_round_trips_through_vendor_text() {
        for status in WritebackStatus::ALL {
            assert_eq!(status.transaction_status().parse::<WritebackStatus>(), Ok(status));
        }
    }
}
