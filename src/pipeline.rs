// 🔁 Pipeline - the fixed step order, and one run over it
//
// extract_load -> post_processing -> audit_report -> reject_file -> ach_file -> writeback_file
//
// Each step commits on its own. The run stops at the first failed step: later
// steps would only see the state the failed one left behind, and a rerun picks
// up from there.

use crate::config::PipelineConfig;
use crate::entities::LedgerAccountLookup;
use crate::error::{PipelineError, Result};
use crate::extract::ExtractBundle;
use crate::file_exchange::{ensure_folders, LocalFileTransfer};
use crate::step::{run_step, Step, StepReport};
use crate::steps::{
    AchFileStep, AuditReportStep, ExtractLoadStep, PostProcessingStep, RejectFileStep, WritebackFileStep,
};
use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use std::fmt;
use std::str::FromStr;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepName {
    ExtractLoad,
    PostProcessing,
    AuditReport,
    RejectFile,
    AchFile,
    WritebackFile,
}

impl StepName {
    /// Run order
    pub const ALL: [StepName; 6] = [
        StepName::ExtractLoad,
        StepName::PostProcessing,
        StepName::AuditReport,
        StepName::RejectFile,
        StepName::AchFile,
        StepName::WritebackFile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::ExtractLoad => "extract_load",
            StepName::PostProcessing => "post_processing",
            StepName::AuditReport => "audit_report",
            StepName::RejectFile => "reject_file",
            StepName::AchFile => "ach_file",
            StepName::WritebackFile => "writeback_file",
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepName {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().replace('-', "_").to_lowercase();
        StepName::ALL
            .into_iter()
            .find(|name| name.as_str() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = StepName::ALL.iter().map(|n| n.as_str()).collect();
                PipelineError::Config(format!("unknown step '{s}' (expected one of: {})", known.join(", ")))
            })
    }
}

/// Step factory. `extract_load` needs a bundle; without one it is skipped.
pub fn build_step(name: StepName, config: &PipelineConfig, bundle: Option<&ExtractBundle>) -> Option<Box<dyn Step>> {
    let folders = config.folders();
    match name {
        StepName::ExtractLoad => bundle.map(|b| Box::new(ExtractLoadStep::new(b.clone())) as Box<dyn Step>),
        StepName::PostProcessing => Some(Box::new(PostProcessingStep::new(config.rules.clone()))),
        StepName::AuditReport => Some(Box::new(AuditReportStep::new(folders, Box::new(LocalFileTransfer)))),
        StepName::RejectFile => Some(Box::new(RejectFileStep::new(folders, Box::new(LocalFileTransfer)))),
        StepName::AchFile => Some(Box::new(AchFileStep::new(
            config.ach.clone(),
            config.prenote_wait_days,
            folders,
            Box::new(LocalFileTransfer),
            Box::new(LedgerAccountLookup),
        ))),
        StepName::WritebackFile => Some(Box::new(WritebackFileStep::new(folders, Box::new(LocalFileTransfer)))),
    }
}

/// Explicit date, then the configured override, then today
pub fn resolve_run_date(config: &PipelineConfig, explicit: Option<NaiveDate>) -> NaiveDate {
    explicit
        .or(config.run_date)
        .unwrap_or_else(|| Utc::now().date_naive())
}

/// Run `steps` in order (all of them when `None`)
pub fn run_pipeline(
    conn: &mut Connection,
    config: &PipelineConfig,
    bundle: Option<&ExtractBundle>,
    steps: Option<&[StepName]>,
    run_date: NaiveDate,
) -> Result<Vec<StepReport>> {
    ensure_folders(&config.folders())?;

    let selected = steps.unwrap_or(&StepName::ALL);
    let mut reports = Vec::with_capacity(selected.len());
    for name in StepName::ALL.iter().filter(|n| selected.contains(*n)) {
        let Some(mut step) = build_step(*name, config, bundle) else {
            info!(step = %name, "skipped, no extract bundle given");
            continue;
        };
        match run_step(conn, step.as_mut(), run_date) {
            Ok(report) => reports.push(report),
            Err(e) => {
                error!(step = %name, error = %e, "pipeline stopped");
                return Err(e);
            }
        }
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use tempfile::TempDir;

    #[test]
    fn test_step_names_parse_loosely() {
        assert_eq!("ach-file".parse::<StepName>().unwrap(), StepName::AchFile);
        assert_eq!(" Reject_File ".parse::<StepName>().unwrap(), StepName::RejectFile);
        assert!(matches!("sampling".parse::<StepName>(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_empty_pipeline_run_creates_folders_and_skips_extract() {
        let root = TempDir::new().unwrap();
        let config = PipelineConfig {
            files_root: root.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        let mut conn = open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2021, 9, 27).unwrap();

        let reports = run_pipeline(&mut conn, &config, None, None, date).unwrap();
        let names: Vec<&str> = reports.iter().map(|r| r.step_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["post_processing", "audit_report", "reject_file", "ach_file", "writeback_file"]
        );
        assert!(reports.iter().all(|r| r.metrics.all_zero()));
        assert!(config.folders().all().iter().all(|p| p.is_dir()));
    }

    #[test]
    fn test_selected_steps_keep_pipeline_order() {
        let root = TempDir::new().unwrap();
        let config = PipelineConfig {
            files_root: root.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        let mut conn = open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2021, 9, 27).unwrap();

        let reports = run_pipeline(
            &mut conn,
            &config,
            None,
            Some(&[StepName::WritebackFile, StepName::PostProcessing][..]),
            date,
        )
        .unwrap();
        assert_eq!(reports[0].step_name, "post_processing");
        assert_eq!(reports[1].step_name, "writeback_file");
    }

    #[test]
    fn test_run_date_precedence() {
        let mut config = PipelineConfig::default();
        let configured = NaiveDate::from_ymd_opt(2021, 1, 4).unwrap();
        let explicit = NaiveDate::from_ymd_opt(2021, 2, 1).unwrap();
        config.run_date = Some(configured);
        assert_eq!(resolve_run_date(&config, Some(explicit)), explicit);
        assert_eq!(resolve_run_date(&config, None), configured);
    }
}
