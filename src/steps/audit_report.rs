// Audit report export: every payment staged for sampling goes into one CSV for
// program integrity, then waits for the returned reject file. The CSV is
// deleted again when the step rolls back.

use super::{discard_written, load_payment_context, record_file};
use crate::audit::{build_audit_row, latest_staged_details, payment_history_summary, write_audit_csv};
use crate::config::FolderLayout;
use crate::entities::ReferenceFileType;
use crate::error::Result;
use crate::file_exchange::{timestamped_name, FileTransfer};
use crate::state_log::{latest_in_state, record_transition, EntityRef, EntityType, Outcome, State};
use crate::step::{Step, StepContext};
use chrono::Utc;
use std::path::PathBuf;
use tracing::info;

pub struct AuditReportStep {
    folders: FolderLayout,
    transfer: Box<dyn FileTransfer>,
    written: Option<PathBuf>,
}

impl AuditReportStep {
    pub fn new(folders: FolderLayout, transfer: Box<dyn FileTransfer>) -> Self {
        AuditReportStep {
            folders,
            transfer,
            written: None,
        }
    }
}

impl Step for AuditReportStep {
    fn name(&self) -> &'static str {
        "audit_report"
    }

    fn declared_metrics(&self) -> &'static [&'static str] {
        &["audit_report_row_count", "flagged_payment_count", "audit_report_file_count"]
    }

    fn execute(&mut self, ctx: &mut StepContext<'_>) -> Result<()> {
        self.written = None;
        let conn = ctx.conn;
        let staged = latest_in_state(conn, EntityType::Payment, &[State::PaymentStagedForAuditSampling])?;
        if staged.is_empty() {
            info!("no payments staged for the audit report");
            return Ok(());
        }

        let mut rows = Vec::with_capacity(staged.len());
        for entry in &staged {
            let (payment, employee, claim) = load_payment_context(conn, entry.entity.entity_id)?;
            let history = payment_history_summary(conn, &payment)?;
            let details = latest_staged_details(conn, payment.payment_id)?;
            if !details.is_empty() {
                ctx.increment("flagged_payment_count");
            }
            rows.push(build_audit_row(&payment, &employee, &claim, history, &details));
            ctx.increment("audit_report_row_count");
        }

        let content = write_audit_csv(&rows)?;
        let file_name = timestamped_name(
            "Payment-Audit-Report",
            ctx.run_date.and_time(Utc::now().time()),
            "csv",
        );
        let path = self.folders.audit_outbound.join(&file_name);
        self.transfer.write_bytes(&path, &content)?;
        self.written = Some(path.clone());
        record_file(
            conn,
            ReferenceFileType::AuditReport,
            &path,
            &content,
            State::AuditReportFileSent,
            ctx.import_log_id,
        )?;
        ctx.increment("audit_report_file_count");

        for entry in &staged {
            record_transition(
                conn,
                entry.entity,
                State::PaymentAuditReportSent,
                Outcome::message(format!("Included in {file_name}")),
                Some(ctx.import_log_id),
            )?;
        }

        info!(file = %path.display(), rows = rows.len(), "audit report written");
        Ok(())
    }

    fn cleanup_on_failure(&mut self) -> Result<()> {
        discard_written(self.transfer.as_ref(), &mut self.written)
    }
}
