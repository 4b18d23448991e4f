// 🪜 Pipeline Steps - one module per stage, run in a fixed order
//
// Each step picks its input with latest_in_state, so a rerun after a crash only
// sees the entities that never made it to the next state.

pub mod ach_file;
pub mod audit_report;
pub mod extract;
pub mod post_processing;
pub mod reject_file;
pub mod writeback_file;

pub use ach_file::AchFileStep;
pub use audit_report::AuditReportStep;
pub use extract::ExtractLoadStep;
pub use post_processing::PostProcessingStep;
pub use reject_file::RejectFileStep;
pub use writeback_file::WritebackFileStep;

use crate::entities::employee::{get_claim, get_employee};
use crate::entities::payment::require_payment;
use crate::entities::reference_file::insert_reference_file;
use crate::entities::{Claim, Employee, Payment, ReferenceFile, ReferenceFileType};
use crate::error::{PipelineError, Result};
use crate::file_exchange::FileTransfer;
use crate::state_log::{record_transition, EntityRef, Outcome, State};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

/// A payment with the employee and claim it belongs to
pub(crate) fn load_payment_context(conn: &Connection, payment_id: Uuid) -> Result<(Payment, Employee, Claim)> {
    let payment = require_payment(conn, payment_id)?;
    let employee = get_employee(conn, payment.employee_id)?.ok_or_else(|| {
        PipelineError::invariant(format!("payment {payment_id} references missing employee {}", payment.employee_id))
    })?;
    let claim = get_claim(conn, payment.claim_id)?.ok_or_else(|| {
        PipelineError::invariant(format!("payment {payment_id} references missing claim {}", payment.claim_id))
    })?;
    Ok((payment, employee, claim))
}

/// Record a written or consumed file and move it to `state`
pub(crate) fn record_file(
    conn: &Connection,
    file_type: ReferenceFileType,
    location: &Path,
    content: &[u8],
    state: State,
    import_log_id: i64,
) -> Result<ReferenceFile> {
    let file = ReferenceFile::new(file_type, location, content, Some(import_log_id));
    insert_reference_file(conn, &file)?;
    record_transition(
        conn,
        EntityRef::reference_file(file.reference_file_id),
        state,
        Outcome::message(file.file_location.clone()),
        Some(import_log_id),
    )?;
    Ok(file)
}

/// Delete the outbound file a rolled-back step wrote; the ledger never saw it sent
pub(crate) fn discard_written(transfer: &dyn FileTransfer, written: &mut Option<PathBuf>) -> Result<()> {
    if let Some(path) = written.take() {
        if path.exists() {
            transfer.remove(&path)?;
            warn!(file = %path.display(), "outbound file removed after rollback");
        }
    }
    Ok(())
}
