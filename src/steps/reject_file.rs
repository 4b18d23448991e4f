// Reject file: consume the oldest returned audit report from `received`.
//
// A processed file moves to `processed`. Any failure, including a failed commit
// after that move, rolls the step back and moves the file to `error`, so the next
// run moves on to the following file.

use super::record_file;
use crate::audit::read_audit_csv;
use crate::config::FolderLayout;
use crate::entities::reference_file::{find_by_sha256, sha256_hex};
use crate::entities::ReferenceFileType;
use crate::error::{PipelineError, Result};
use crate::file_exchange::FileTransfer;
use crate::reconciliation::{apply, plan};
use crate::state_log::State;
use crate::step::{Step, StepContext};
use std::path::PathBuf;
use tracing::{info, warn};

pub struct RejectFileStep {
    folders: FolderLayout,
    transfer: Box<dyn FileTransfer>,
    current_file: Option<PathBuf>,
}

impl RejectFileStep {
    pub fn new(folders: FolderLayout, transfer: Box<dyn FileTransfer>) -> Self {
        RejectFileStep {
            folders,
            transfer,
            current_file: None,
        }
    }
}

impl Step for RejectFileStep {
    fn name(&self) -> &'static str {
        "reject_file"
    }

    fn declared_metrics(&self) -> &'static [&'static str] {
        &[
            "reject_file_count",
            "payment_accepted_count",
            "payment_rejected_count",
            "payment_skipped_count",
            "payment_silently_accepted_count",
            "payment_awaiting_decision_count",
            "payment_other_report_count",
        ]
    }

    fn execute(&mut self, ctx: &mut StepContext<'_>) -> Result<()> {
        self.current_file = None;
        let Some(path) = self.transfer.list_files(&self.folders.audit_received)?.into_iter().next() else {
            info!("no reject file received");
            return Ok(());
        };
        self.current_file = Some(path.clone());

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content = self.transfer.read(&path)?;

        let sha = sha256_hex(&content);
        if let Some(previous) = find_by_sha256(ctx.conn, ReferenceFileType::AuditRejectFile, &sha)? {
            return Err(PipelineError::DuplicateFile(format!(
                "{file_name} (same content as {})",
                previous.file_location
            )));
        }

        let rows = read_audit_csv(&content)?;
        let decisions = plan(ctx.conn, &rows)?;
        let report = apply(ctx.conn, &decisions, &file_name, ctx.import_log_id)?;

        record_file(
            ctx.conn,
            ReferenceFileType::AuditRejectFile,
            &self.folders.audit_processed.join(&file_name),
            &content,
            State::RejectFileProcessed,
            ctx.import_log_id,
        )?;
        let processed = self.transfer.move_to(&path, &self.folders.audit_processed)?;
        // Still ours until the step commits
        self.current_file = Some(processed);

        ctx.increment("reject_file_count");
        ctx.metrics.add("payment_accepted_count", report.accepted as i64);
        ctx.metrics.add("payment_rejected_count", report.rejected as i64);
        ctx.metrics.add("payment_skipped_count", report.skipped as i64);
        ctx.metrics.add("payment_silently_accepted_count", report.silently_accepted as i64);
        ctx.metrics.add("payment_awaiting_decision_count", report.awaiting_decision as i64);
        ctx.metrics.add("payment_other_report_count", report.other_reports as i64);

        info!(file = %file_name, "{}", report.summary());
        Ok(())
    }

    fn cleanup_on_failure(&mut self) -> Result<()> {
        if let Some(path) = self.current_file.take() {
            if path.exists() {
                let moved = self.transfer.move_to(&path, &self.folders.audit_error)?;
                warn!(file = %moved.display(), "reject file quarantined");
            }
        }
        Ok(())
    }
}
