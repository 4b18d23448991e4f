// Writeback file: flatten every queued vendor status into one CSV for the
// claims system. The CSV is deleted again when the step rolls back.

use super::{discard_written, record_file};
use crate::config::FolderLayout;
use crate::entities::payment::require_payment;
use crate::entities::ReferenceFileType;
use crate::error::{PipelineError, Result};
use crate::file_exchange::{timestamped_name, FileTransfer};
use crate::state_log::{latest_in_state, record_transition, EntityType, Outcome, State};
use crate::step::{Step, StepContext};
use crate::writeback::{get_writeback_detail, write_writeback_csv, WritebackRow};
use chrono::Utc;
use std::path::PathBuf;
use tracing::info;

pub struct WritebackFileStep {
    folders: FolderLayout,
    transfer: Box<dyn FileTransfer>,
    written: Option<PathBuf>,
}

impl WritebackFileStep {
    pub fn new(folders: FolderLayout, transfer: Box<dyn FileTransfer>) -> Self {
        WritebackFileStep {
            folders,
            transfer,
            written: None,
        }
    }
}

impl Step for WritebackFileStep {
    fn name(&self) -> &'static str {
        "writeback_file"
    }

    fn declared_metrics(&self) -> &'static [&'static str] {
        &["writeback_row_count", "writeback_file_count"]
    }

    fn execute(&mut self, ctx: &mut StepContext<'_>) -> Result<()> {
        self.written = None;
        let conn = ctx.conn;
        let ready = latest_in_state(conn, EntityType::WritebackDetail, &[State::WritebackReady])?;
        if ready.is_empty() {
            info!("no writeback details ready");
            return Ok(());
        }

        let mut rows = Vec::with_capacity(ready.len());
        for entry in &ready {
            let detail = get_writeback_detail(conn, entry.entity.entity_id)?.ok_or_else(|| {
                PipelineError::invariant(format!(
                    "writeback detail {} has state log entries but no row",
                    entry.entity.entity_id
                ))
            })?;
            let payment = require_payment(conn, detail.payment_id)?;
            rows.push(WritebackRow::new(&payment, &detail, ctx.run_date));
            ctx.increment("writeback_row_count");
        }

        let content = write_writeback_csv(&rows)?;
        let file_name = timestamped_name("PFML-Writeback", ctx.run_date.and_time(Utc::now().time()), "csv");
        let path = self.folders.writeback_outbound.join(&file_name);
        self.transfer.write_bytes(&path, &content)?;
        self.written = Some(path.clone());
        record_file(
            conn,
            ReferenceFileType::WritebackFile,
            &path,
            &content,
            State::WritebackFileSent,
            ctx.import_log_id,
        )?;
        ctx.increment("writeback_file_count");

        for entry in &ready {
            record_transition(
                conn,
                entry.entity,
                State::WritebackSent,
                Outcome::message(format!("Included in {file_name}")),
                Some(ctx.import_log_id),
            )?;
        }

        info!(file = %path.display(), rows = rows.len(), "writeback file written");
        Ok(())
    }

    fn cleanup_on_failure(&mut self) -> Result<()> {
        discard_written(self.transfer.as_ref(), &mut self.written)
    }
}
