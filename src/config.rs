// 🔧 Pipeline configuration - TOML file + environment overrides
//
// Missing file → defaults. Environment variables win over the file:
//   PFML_DATABASE_PATH, PFML_FILES_ROOT, PFML_MAX_WEEKLY_BENEFIT

use crate::error::{PipelineError, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub database_path: PathBuf,
    /// Root of the audit/, pub/ and writeback/ folder tree
    pub files_root: PathBuf,
    /// Overrides "today" for every step (replays, tests)
    pub run_date: Option<NaiveDate>,
    pub prenote_wait_days: i64,
    pub rules: RuleConfig,
    pub ach: AchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    pub max_weekly_benefit_amount: Decimal,
    pub leave_duration_threshold_days: i64,
}

/// Originator settings stamped into every NACHA file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AchConfig {
    pub destination_routing: String,
    pub destination_name: String,
    pub origin_id: String,
    pub origin_name: String,
    pub company_name: String,
    pub company_id: String,
    pub odfi_id: String,
    pub reference_code: String,
    pub entry_description: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            database_path: PathBuf::from("pfml_payments.db"),
            files_root: PathBuf::from("pfml_files"),
            run_date: None,
            prenote_wait_days: 5,
            rules: RuleConfig::default(),
            ach: AchConfig::default(),
        }
    }
}

impl Default for RuleConfig {
    fn default() -> Self {
        RuleConfig {
            max_weekly_benefit_amount: Decimal::new(85000, 2),
            leave_duration_threshold_days: 182,
        }
    }
}

impl Default for AchConfig {
    fn default() -> Self {
        AchConfig {
            destination_routing: "011000138".to_string(),
            destination_name: "BANK OF AMERICA".to_string(),
            origin_id: "1046002284".to_string(),
            origin_name: "COMMONWEALTH OF MASSACHUSETTS".to_string(),
            company_name: "COMM OF MA PFML".to_string(),
            company_id: "1046002284".to_string(),
            odfi_id: "01100013".to_string(),
            reference_code: "PFML".to_string(),
            entry_description: "PAYMENT".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load from `path` if given and present, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(p)?;
                toml::from_str(&content)
                    .map_err(|e| PipelineError::Config(format!("{}: {}", p.display(), e)))?
            }
            _ => PipelineConfig::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// `lookup` is std::env::var in production and a map in tests
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(path) = lookup("PFML_DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(root) = lookup("PFML_FILES_ROOT") {
            self.files_root = PathBuf::from(root);
        }
        if let Some(amount) = lookup("PFML_MAX_WEEKLY_BENEFIT") {
            self.rules.max_weekly_benefit_amount = Decimal::from_str(amount.trim())
                .map_err(|e| PipelineError::Config(format!("PFML_MAX_WEEKLY_BENEFIT: {e}")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.rules.max_weekly_benefit_amount <= Decimal::ZERO {
            return Err(PipelineError::Config("max_weekly_benefit_amount must be positive".to_string()));
        }
        if self.rules.leave_duration_threshold_days <= 0 {
            return Err(PipelineError::Config("leave_duration_threshold_days must be positive".to_string()));
        }
        if self.prenote_wait_days < 0 {
            return Err(PipelineError::Config("prenote_wait_days cannot be negative".to_string()));
        }

        check_digits("ach.destination_routing", &self.ach.destination_routing, 9)?;
        check_digits("ach.odfi_id", &self.ach.odfi_id, 8)?;
        if self.ach.origin_id.is_empty() || self.ach.origin_id.len() > 10 {
            return Err(PipelineError::Config("ach.origin_id must be 1-10 characters".to_string()));
        }
        if self.ach.company_id.is_empty() || self.ach.company_id.len() > 10 {
            return Err(PipelineError::Config("ach.company_id must be 1-10 characters".to_string()));
        }
        Ok(())
    }

    /// Folder layout under files_root
    pub fn folders(&self) -> FolderLayout {
        FolderLayout::new(&self.files_root)
    }
}

fn check_digits(name: &str, value: &str, len: usize) -> Result<()> {
    if value.len() != len || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(PipelineError::Config(format!("{name} must be exactly {len} digits")));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderLayout {
    pub audit_outbound: PathBuf,
    pub audit_received: PathBuf,
    pub audit_processed: PathBuf,
    pub audit_error: PathBuf,
    pub pub_outbound: PathBuf,
    pub writeback_outbound: PathBuf,
}

impl FolderLayout {
    pub fn new(root: &Path) -> Self {
        FolderLayout {
            audit_outbound: root.join("audit").join("outbound"),
            audit_received: root.join("audit").join("received"),
            audit_processed: root.join("audit").join("processed"),
            audit_error: root.join("audit").join("error"),
            pub_outbound: root.join("pub").join("outbound"),
            writeback_outbound: root.join("writeback").join("outbound"),
        }
    }

    pub fn all(&self) -> [&Path; 6] {
        [
            &self.audit_outbound,
            &self.audit_received,
            &self.audit_processed,
            &self.audit_error,
            &self.pub_outbound,
            &self.writeback_outbound,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.rules.max_weekly_benefit_amount, dec!(850.00));
        assert_eq!(config.rules.leave_duration_threshold_days, 182);
        assert_eq!(config.prenote_wait_days, 5);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: PipelineConfig = toml::from_str(
            r#"
            prenote_wait_days = 3

            [rules]
            max_weekly_benefit_amount = "1000.00"
            "#,
        )
        .unwrap();

        assert_eq!(config.prenote_wait_days, 3);
        assert_eq!(config.rules.max_weekly_benefit_amount, dec!(1000.00));
        assert_eq!(config.rules.leave_duration_threshold_days, 182);
        assert_eq!(config.ach, AchConfig::default());
    }

    #[test]
    fn test_environment_overrides_win() {
        let env: HashMap<&str, &str> = [
            ("PFML_DATABASE_PATH", "/tmp/override.db"),
            ("PFML_MAX_WEEKLY_BENEFIT", "900.50"),
        ]
        .into_iter()
        .collect();

        let mut config = PipelineConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/override.db"));
        assert_eq!(config.rules.max_weekly_benefit_amount, dec!(900.50));
        assert_eq!(config.files_root, PathBuf::from("pfml_files"));
    }

    #[test]
    fn test_bad_override_is_a_config_error() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_overrides(|key| (key == "PFML_MAX_WEEKLY_BENEFIT").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_bad_routing_and_limits() {
        let mut config = PipelineConfig::default();
        config.ach.odfi_id = "1234".to_string();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.rules.max_weekly_benefit_amount = Decimal::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_folder_layout() {
        let layout = FolderLayout::new(Path::new("/data"));
        assert_eq!(layout.audit_received, PathBuf::from("/data/audit/received"));
        assert_eq!(layout.pub_outbound, PathBuf::from("/data/pub/outbound"));
        assert_eq!(layout.all().len(), 6);
    }
}
