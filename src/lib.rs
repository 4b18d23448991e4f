// PFML Payments - Core Library
// Payment lifecycle state machine and post-processing pipeline, used by the CLI and tests

pub mod db;
pub mod error;
pub mod config;
pub mod state_log;      // Append-only lifecycle ledger
pub mod step;           // Step runner + import log
pub mod entities;       // Employees, claims, payments, bank accounts, files
pub mod extract;        // Extract bundle + payment validation
pub mod post_processing; // Rules + payment container
pub mod audit;          // Audit staging + report CSV
pub mod reconciliation; // Reject/confirm file decisions
pub mod writeback;      // Terminal state -> vendor status
pub mod ach;            // NACHA encoder
pub mod file_exchange;
pub mod steps;
pub mod pipeline;

// Re-export commonly used types
pub use config::{AchConfig, FolderLayout, PipelineConfig, RuleConfig};
pub use db::{open_database, open_in_memory, setup_database};
pub use error::{PipelineError, Result};
pub use state_log::{
    history, latest_in_state, latest_state, record_transition,
    EntityRef, EntityType, Outcome, State, StateLogEntry, ValidationIssue, ValidationReason,
};
pub use step::{get_import_log, list_import_logs, run_step, Metrics, Step, StepContext, StepReport, StepStatus};
pub use entities::{
    Claim, Employee, LeaveType,
    Payment, PaymentMethod,
    PubEft, BankAccountType, PrenoteStatus, AccountLookup, LedgerAccountLookup,
    ReferenceFile, ReferenceFileType,
};
pub use extract::ExtractBundle;
pub use post_processing::{PaymentContainer, ContainerResult, Rule, RuleName, RuleOutcome};
pub use audit::{AuditReportRow, AuditReportType};
pub use reconciliation::{Decision, ReconciliationReport};
pub use writeback::{record_terminal_state, WritebackStatus};
pub use ach::{NachaFile, NachaError};
pub use file_exchange::{FileTransfer, LocalFileTransfer};
pub use pipeline::{run_pipeline, StepName};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
