// 📜 State Ledger - "Every change is an event"
// Append-only history of (entity reached state X at time T with outcome O).
//
// The current state of an entity is its entry with the greatest created_at;
// entries written in the same instant are ordered by state_log_id (insertion sequence).

use crate::db::{format_timestamp, parse_column, parse_timestamp, parse_uuid};
use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ENTITY REFERENCES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityType {
    Payment,
    PubEft,
    WritebackDetail,
    ReferenceFile,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Payment => "payment",
            EntityType::PubEft => "pub_eft",
            EntityType::WritebackDetail => "writeback_detail",
            EntityType::ReferenceFile => "reference_file",
        }
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "payment" => Ok(EntityType::Payment),
            "pub_eft" => Ok(EntityType::PubEft),
            "writeback_detail" => Ok(EntityType::WritebackDetail),
            "reference_file" => Ok(EntityType::ReferenceFile),
            other => Err(format!("unknown entity type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub entity_id: Uuid,
}

impl EntityRef {
    pub fn payment(id: Uuid) -> Self {
        EntityRef { entity_type: EntityType::Payment, entity_id: id }
    }

    pub fn pub_eft(id: Uuid) -> Self {
        EntityRef { entity_type: EntityType::PubEft, entity_id: id }
    }

    pub fn writeback_detail(id: Uuid) -> Self {
        EntityRef { entity_type: EntityType::WritebackDetail, entity_id: id }
    }

    pub fn reference_file(id: Uuid) -> Self {
        EntityRef { entity_type: EntityType::ReferenceFile, entity_id: id }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type.as_str(), self.entity_id)
    }
}

// ============================================================================
// STATES
// The transitions are enumerated here, never user-programmable.
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum State {
    // Payment lifecycle
    PaymentReadyForPostProcessing,
    PaymentFailedAutomatedValidation,
    PaymentFailedMaxWeeklyBenefit,
    PaymentStagedForAuditSampling,
    PaymentAuditReportSent,
    PaymentAuditRejected,
    PaymentAuditRejectedAdditionalIncome,
    PaymentAuditRejectedLeaveDuration,
    PaymentAuditRejectedNameMismatch,
    PaymentAuditSkipped,
    PaymentValidated,
    PaymentEftPendingPrenote,
    PaymentEftAccountInvalid,
    PaymentAchSent,

    // Bank account (prenote) lifecycle
    EftPendingPrenote,
    EftPrenoteSent,
    EftPrenoteApproved,
    EftPrenoteRejected,

    // Vendor writeback lifecycle
    WritebackReady,
    WritebackSent,

    // Files produced or consumed by the pipeline
    AuditReportFileSent,
    RejectFileProcessed,
    AchFileSent,
    WritebackFileSent,
}

impl State {
    pub const ALL: [State; 24] = [
        State::PaymentReadyForPostProcessing,
        State::PaymentFailedAutomatedValidation,
        State::PaymentFailedMaxWeeklyBenefit,
        State::PaymentStagedForAuditSampling,
        State::PaymentAuditReportSent,
        State::PaymentAuditRejected,
        State::PaymentAuditRejectedAdditionalIncome,
        State::PaymentAuditRejectedLeaveDuration,
        State::PaymentAuditRejectedNameMismatch,
        State::PaymentAuditSkipped,
        State::PaymentValidated,
        State::PaymentEftPendingPrenote,
        State::PaymentEftAccountInvalid,
        State::PaymentAchSent,
        State::EftPendingPrenote,
        State::EftPrenoteSent,
        State::EftPrenoteApproved,
        State::EftPrenoteRejected,
        State::WritebackReady,
        State::WritebackSent,
        State::AuditReportFileSent,
        State::RejectFileProcessed,
        State::AchFileSent,
        State::WritebackFileSent,
    ];

    /// Stable numeric id persisted in state_log.end_state_id
    pub fn state_id(&self) -> i64 {
        match self {
            State::PaymentReadyForPostProcessing => 100,
            State::PaymentFailedAutomatedValidation => 101,
            State::PaymentFailedMaxWeeklyBenefit => 102,
            State::PaymentStagedForAuditSampling => 103,
            State::PaymentAuditReportSent => 104,
            State::PaymentAuditRejected => 105,
            State::PaymentAuditRejectedAdditionalIncome => 106,
            State::PaymentAuditRejectedLeaveDuration => 107,
            State::PaymentAuditRejectedNameMismatch => 108,
            State::PaymentAuditSkipped => 109,
            State::PaymentValidated => 110,
            State::PaymentEftPendingPrenote => 111,
            State::PaymentEftAccountInvalid => 112,
            State::PaymentAchSent => 113,
            State::EftPendingPrenote => 200,
            State::EftPrenoteSent => 201,
            State::EftPrenoteApproved => 202,
            State::EftPrenoteRejected => 203,
            State::WritebackReady => 300,
            State::WritebackSent => 301,
            State::AuditReportFileSent => 400,
            State::RejectFileProcessed => 401,
            State::AchFileSent => 402,
            State::WritebackFileSent => 403,
        }
    }

    pub fn from_state_id(id: i64) -> Option<State> {
        State::ALL.iter().copied().find(|s| s.state_id() == id)
    }

    pub fn description(&self) -> &'static str {
        match self {
            State::PaymentReadyForPostProcessing => "Payment ready for post-processing",
            State::PaymentFailedAutomatedValidation => "Payment failed automated validation",
            State::PaymentFailedMaxWeeklyBenefit => "Payment failed maximum weekly benefit validation",
            State::PaymentStagedForAuditSampling => "Payment staged for payment audit report sampling",
            State::PaymentAuditReportSent => "Payment audit report sent",
            State::PaymentAuditRejected => "Payment rejected by program integrity",
            State::PaymentAuditRejectedAdditionalIncome => "Payment rejected by program integrity: DUA/DIA additional income",
            State::PaymentAuditRejectedLeaveDuration => "Payment rejected by program integrity: leave duration exceeded",
            State::PaymentAuditRejectedNameMismatch => "Payment rejected by program integrity: name mismatch",
            State::PaymentAuditSkipped => "Payment skipped by program integrity",
            State::PaymentValidated => "Payment validated",
            State::PaymentEftPendingPrenote => "Payment held: EFT account pending prenote",
            State::PaymentEftAccountInvalid => "Payment failed: EFT account invalid",
            State::PaymentAchSent => "Payment sent in ACH file",
            State::EftPendingPrenote => "EFT account pending prenote",
            State::EftPrenoteSent => "EFT prenote sent",
            State::EftPrenoteApproved => "EFT prenote approved",
            State::EftPrenoteRejected => "EFT prenote rejected",
            State::WritebackReady => "Writeback ready to send",
            State::WritebackSent => "Writeback sent",
            State::AuditReportFileSent => "Payment audit report file sent",
            State::RejectFileProcessed => "Payment reject file processed",
            State::AchFileSent => "ACH file sent",
            State::WritebackFileSent => "Writeback file sent",
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self.state_id() / 100 {
            1 => EntityType::Payment,
            2 => EntityType::PubEft,
            3 => EntityType::WritebackDetail,
            _ => EntityType::ReferenceFile,
        }
    }

    /// Payment states no later step picks up again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            State::PaymentFailedAutomatedValidation
                | State::PaymentFailedMaxWeeklyBenefit
                | State::PaymentAuditRejected
                | State::PaymentAuditRejectedAdditionalIncome
                | State::PaymentAuditRejectedLeaveDuration
                | State::PaymentAuditRejectedNameMismatch
                | State::PaymentAuditSkipped
                | State::PaymentEftPendingPrenote
                | State::PaymentEftAccountInvalid
                | State::PaymentAchSent
        )
    }

    /// Payment states that count as an error for audit-report history columns
    pub fn is_payment_error(&self) -> bool {
        matches!(
            self,
            State::PaymentFailedAutomatedValidation
                | State::PaymentFailedMaxWeeklyBenefit
                | State::PaymentEftPendingPrenote
                | State::PaymentEftAccountInvalid
        )
    }

    pub fn is_payment_rejection(&self) -> bool {
        matches!(
            self,
            State::PaymentAuditRejected
                | State::PaymentAuditRejectedAdditionalIncome
                | State::PaymentAuditRejectedLeaveDuration
                | State::PaymentAuditRejectedNameMismatch
        )
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

// ============================================================================
// OUTCOME
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationReason {
    MissingField,
    InvalidValue,
    UnknownPaymentId,
    UnexpectedPaymentState,
    RuleFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub reason: ValidationReason,
    pub details: String,
}

impl ValidationIssue {
    pub fn new(reason: ValidationReason, details: impl Into<String>) -> Self {
        ValidationIssue { reason, details: details.into() }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.reason, self.details)
    }
}

/// Structured note stored with every transition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_issues: Vec<ValidationIssue>,
}

impl Outcome {
    pub fn message(message: impl Into<String>) -> Self {
        Outcome { message: message.into(), validation_issues: Vec::new() }
    }

    pub fn with_issues(message: impl Into<String>, issues: Vec<ValidationIssue>) -> Self {
        Outcome { message: message.into(), validation_issues: issues }
    }
}

// ============================================================================
// STATE LOG ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateLogEntry {
    /// Monotonic insertion sequence; tie-break for identical timestamps
    pub sequence: i64,
    pub entry_id: Uuid,
    pub entity: EntityRef,
    pub end_state: State,
    pub outcome: Outcome,
    pub import_log_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

const ENTRY_COLUMNS: &str =
    "state_log_id, entry_id, entity_type, entity_id, end_state_id, outcome, import_log_id, created_at";

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<StateLogEntry> {
    let entry_id: String = row.get(1)?;
    let entity_type: String = row.get(2)?;
    let entity_id: String = row.get(3)?;
    let state_id: i64 = row.get(4)?;
    let outcome_json: String = row.get(5)?;
    let created_at: String = row.get(7)?;

    let end_state = State::from_state_id(state_id).ok_or(rusqlite::Error::IntegralValueOutOfRange(4, state_id))?;

    Ok(StateLogEntry {
        sequence: row.get(0)?,
        entry_id: parse_uuid(&entry_id)?,
        entity: EntityRef {
            entity_type: parse_column(&entity_type)?,
            entity_id: parse_uuid(&entity_id)?,
        },
        end_state,
        outcome: serde_json::from_str(&outcome_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e)))?,
        import_log_id: row.get(6)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

// ============================================================================
// LEDGER OPERATIONS
// ============================================================================

/// Append a transition. Never touches earlier entries.
pub fn record_transition(
    conn: &Connection,
    entity: EntityRef,
    end_state: State,
    outcome: Outcome,
    import_log_id: Option<i64>,
) -> Result<StateLogEntry> {
    if end_state.entity_type() != entity.entity_type {
        return Err(PipelineError::invariant(format!(
            "state '{}' does not apply to {}",
            end_state.description(),
            entity
        )));
    }

    let entry_id = Uuid::new_v4();
    let created_at = Utc::now();
    let outcome_json = serde_json::to_string(&outcome)?;

    conn.execute(
        "INSERT INTO state_log (
            entry_id, entity_type, entity_id, end_state_id, end_state, outcome, import_log_id, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entry_id.to_string(),
            entity.entity_type.as_str(),
            entity.entity_id.to_string(),
            end_state.state_id(),
            end_state.description(),
            outcome_json,
            import_log_id,
            format_timestamp(created_at),
        ],
    )?;

    Ok(StateLogEntry {
        sequence: conn.last_insert_rowid(),
        entry_id,
        entity,
        end_state,
        outcome,
        import_log_id,
        created_at,
    })
}

/// Every entity of `entity_type` whose *latest* entry is in `candidate_states`.
///
/// An entity whose latest entry is elsewhere is excluded even if an older entry matches.
/// Results come back in insertion order of the qualifying entries.
pub fn latest_in_state(
    conn: &Connection,
    entity_type: EntityType,
    candidate_states: &[State],
) -> Result<Vec<StateLogEntry>> {
    if candidate_states.is_empty() {
        return Ok(Vec::new());
    }

    let state_ids = candidate_states
        .iter()
        .map(|s| s.state_id().to_string())
        .collect::<Vec<_>>()
        .join(", ");

    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM (
            SELECT s.*, ROW_NUMBER() OVER (
                PARTITION BY s.entity_id
                ORDER BY s.created_at DESC, s.state_log_id DESC
            ) AS recency
            FROM state_log s
            WHERE s.entity_type = ?1
        )
        WHERE recency = 1 AND end_state_id IN ({state_ids})
        ORDER BY state_log_id ASC"
    );

    let mut stmt = conn.prepare(&sql)?;
    let entries = stmt
        .query_map(params![entity_type.as_str()], entry_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(entries)
}

/// The current state entry of one entity, if it has any history
pub fn latest_state(conn: &Connection, entity: EntityRef) -> Result<Option<StateLogEntry>> {
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM state_log
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY created_at DESC, state_log_id DESC
         LIMIT 1"
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map(
        params![entity.entity_type.as_str(), entity.entity_id.to_string()],
        entry_from_row,
    )?;

    match rows.next() {
        Some(entry) => Ok(Some(entry?)),
        None => Ok(None),
    }
}

/// Full history of one entity, oldest first
pub fn history(conn: &Connection, entity: EntityRef) -> Result<Vec<StateLogEntry>> {
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM state_log
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY created_at ASC, state_log_id ASC"
    );

    let mut stmt = conn.prepare(&sql)?;
    let entries = stmt
        .query_map(
            params![entity.entity_type.as_str(), entity.entity_id.to_string()],
            entry_from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(entries)
}

/// Whether the entity ever reached a state matching `predicate`
pub fn ever_reached(
    conn: &Connection,
    entity: EntityRef,
    predicate: impl Fn(State) -> bool,
) -> Result<bool> {
    Ok(history(conn, entity)?.iter().any(|e| predicate(e.end_state)))
}

// ============================================================================
// TESTS
// ============================================================================
