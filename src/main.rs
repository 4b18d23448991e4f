use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::path::PathBuf;
use uuid::Uuid;

use pfml_payments::file_exchange::ensure_folders;
use pfml_payments::pipeline::{resolve_run_date, run_pipeline, StepName};
use pfml_payments::state_log::{history, EntityRef, EntityType};
use pfml_payments::step::{list_import_logs, StepReport};
use pfml_payments::{open_database, ExtractBundle, PipelineConfig};

#[derive(Parser)]
#[command(name = "pfml-payments", version, about = "PFML payment lifecycle pipeline")]
struct Cli {
    /// TOML configuration file (defaults apply when missing)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides the configuration)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database schema and the file-exchange folders
    Init,
    /// Load an extract bundle (JSON) and admit its payments
    Load { bundle: PathBuf },
    /// Run the pipeline, or only the named steps
    Run {
        #[arg(long = "step")]
        steps: Vec<String>,
        /// Run date, YYYY-MM-DD
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Extract bundle to load first
        #[arg(long)]
        bundle: Option<PathBuf>,
    },
    /// Print the state history of one entity
    History { entity_type: String, id: Uuid },
    /// List recent step runs
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = PipelineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }

    match cli.command {
        Command::Init => run_init(&config),
        Command::Load { bundle } => {
            let bundle = load_bundle(&bundle)?;
            let mut conn = open(&config)?;
            let run_date = resolve_run_date(&config, None);
            let reports = run_pipeline(&mut conn, &config, Some(&bundle), Some(&[StepName::ExtractLoad][..]), run_date)
                .context("Extract load failed")?;
            print_reports(&reports);
            Ok(())
        }
        Command::Run { steps, date, bundle } => {
            let selected = steps
                .iter()
                .map(|s| s.parse::<StepName>())
                .collect::<pfml_payments::Result<Vec<_>>>()?;
            let bundle = bundle.as_deref().map(load_bundle).transpose()?;
            let mut conn = open(&config)?;
            let run_date = resolve_run_date(&config, date);

            println!("🔁 Pipeline run for {run_date}");
            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            let steps = (!selected.is_empty()).then_some(selected.as_slice());
            let reports = run_pipeline(&mut conn, &config, bundle.as_ref(), steps, run_date)
                .context("Pipeline run failed")?;
            print_reports(&reports);
            Ok(())
        }
        Command::History { entity_type, id } => {
            let entity_type: EntityType = entity_type.parse().map_err(anyhow::Error::msg)?;
            let conn = open(&config)?;
            let entity = EntityRef { entity_type, entity_id: id };
            let entries = history(&conn, entity)?;
            if entries.is_empty() {
                println!("No state history for {entity}");
            }
            for entry in entries {
                println!(
                    "{}  #{:<6} {:<45} {}",
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.sequence,
                    entry.end_state.description(),
                    entry.outcome.message.lines().next().unwrap_or("")
                );
                for issue in &entry.outcome.validation_issues {
                    println!("{:>30}- {}", "", issue);
                }
            }
            Ok(())
        }
        Command::Runs { limit } => {
            let conn = open(&config)?;
            print_reports(&list_import_logs(&conn, limit)?);
            Ok(())
        }
    }
}

fn run_init(config: &PipelineConfig) -> Result<()> {
    println!("🗄️  Initializing pipeline storage");
    open(config)?;
    println!("✓ Database ready at {}", config.database_path.display());
    ensure_folders(&config.folders()).context("Failed to create file-exchange folders")?;
    println!("✓ Folders ready under {}", config.files_root.display());
    Ok(())
}

fn open(config: &PipelineConfig) -> Result<Connection> {
    open_database(&config.database_path)
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))
}

fn load_bundle(path: &std::path::Path) -> Result<ExtractBundle> {
    ExtractBundle::load(path).with_context(|| format!("Failed to read extract bundle {}", path.display()))
}

fn print_reports(reports: &[StepReport]) {
    if reports.is_empty() {
        println!("(no step runs)");
        return;
    }
    for report in reports {
        println!("{}", report.summary());
    }
}
