// 📦 Payment Container - collects every rule result for one payment
// before a single state transition is written for it.

use super::{RuleName, RuleOutcome};
use crate::audit::AuditReportType;
use crate::entities::{Claim, Employee, Payment};
use crate::error::{PipelineError, Result};
use std::collections::BTreeMap;

/// Separator between notes of different rules
pub const NOTE_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone)]
pub struct PaymentContainer {
    pub payment: Payment,
    pub employee: Employee,
    pub claim: Claim,
    /// Informational notes in the order their rules ran
    notes: Vec<(RuleName, String)>,
    /// true = the rule failed
    flags: BTreeMap<RuleName, bool>,
    rejection: Option<(RuleName, String)>,
}

/// What the container reduces to once every rule has run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerResult {
    /// Payment moves on; each flag becomes one audit report row
    Pass { audit_flags: Vec<(AuditReportType, String)> },
    /// Payment ends here with a terminal state and a writeback
    Reject { rule: RuleName, message: String },
}

impl PaymentContainer {
    pub fn new(payment: Payment, employee: Employee, claim: Claim) -> Self {
        PaymentContainer {
            payment,
            employee,
            claim,
            notes: Vec::new(),
            flags: BTreeMap::new(),
            rejection: None,
        }
    }

    /// Record one rule's outcome. Never changes the payment's state.
    pub fn accumulate(&mut self, rule: RuleName, outcome: RuleOutcome) -> Result<()> {
        if self.flags.contains_key(&rule) {
            return Err(PipelineError::invariant(format!(
                "rule {} ran twice for payment {}",
                rule.as_str(),
                self.payment.payment_id
            )));
        }
        self.flags.insert(rule, !outcome.passed);

        if outcome.passed {
            return Ok(());
        }
        let note = outcome.note.unwrap_or_default();

        if rule.is_hard_reject() {
            if self.rejection.is_none() {
                self.rejection = Some((rule, note));
            }
        } else if self.rejection.is_none() {
            self.notes.push((rule, note));
        }
        Ok(())
    }

    pub fn has_run(&self, rule: RuleName) -> bool {
        self.flags.contains_key(&rule)
    }

    pub fn failed(&self, rule: RuleName) -> bool {
        self.flags.get(&rule).copied().unwrap_or(false)
    }

    pub fn is_rejected(&self) -> bool {
        self.rejection.is_some()
    }

    /// Every informational note joined by a blank line
    pub fn message(&self) -> String {
        self.notes
            .iter()
            .map(|(_, note)| note.as_str())
            .collect::<Vec<_>>()
            .join(NOTE_SEPARATOR)
    }

    pub fn reduce(self) -> ContainerResult {
        match self.rejection {
            Some((rule, message)) => ContainerResult::Reject { rule, message },
            None => ContainerResult::Pass {
                audit_flags: self
                    .notes
                    .into_iter()
                    .map(|(rule, note)| (rule.audit_report_type(), note))
                    .collect(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::post_processing::test_support::*;
    use rust_decimal_macros::dec;

    fn container() -> PaymentContainer {
        let fixture = Fixture::new();
        let payment = fixture.payment(date(2021, 9, 20), date(2021, 9, 26), dec!(100.00));
        PaymentContainer::new(payment, fixture.employee.clone(), fixture.claim.clone())
    }

    #[test]
    fn test_notes_are_joined_in_rule_order() {
        let mut c = container();
        c.accumulate(RuleName::DuaDiaReduction, RuleOutcome::fail("dua note")).unwrap();
        c.accumulate(RuleName::LeaveDuration, RuleOutcome::pass()).unwrap();
        c.accumulate(RuleName::NameMismatch, RuleOutcome::fail("name note")).unwrap();

        assert_eq!(c.message(), "dua note\n\nname note");
        assert!(c.failed(RuleName::DuaDiaReduction));
        assert!(!c.failed(RuleName::LeaveDuration));
        assert!(c.has_run(RuleName::LeaveDuration));

        match c.reduce() {
            ContainerResult::Pass { audit_flags } => {
                assert_eq!(
                    audit_flags,
                    vec![
                        (AuditReportType::DuaDiaReduction, "dua note".to_string()),
                        (AuditReportType::DorFineosNameMismatch, "name note".to_string()),
                    ]
                );
            }
            other => panic!("expected pass, got {other:?}"),
        }
    }

    #[test]
    fn test_hard_reject_drops_informational_notes() {
        let mut c = container();
        c.accumulate(RuleName::DuaDiaReduction, RuleOutcome::fail("dua note")).unwrap();
        c.accumulate(RuleName::MaxWeeklyBenefit, RuleOutcome::fail("over the cap")).unwrap();
        // Notes arriving after the rejection are not kept either
        c.accumulate(RuleName::NameMismatch, RuleOutcome::fail("name note")).unwrap();

        assert!(c.is_rejected());
        assert_eq!(c.message(), "dua note");
        assert_eq!(
            c.reduce(),
            ContainerResult::Reject {
                rule: RuleName::MaxWeeklyBenefit,
                message: "over the cap".to_string()
            }
        );
    }

    #[test]
    fn test_same_rule_twice_is_rejected() {
        let mut c = container();
        c.accumulate(RuleName::NameMismatch, RuleOutcome::pass()).unwrap();
        let err = c.accumulate(RuleName::NameMismatch, RuleOutcome::pass()).unwrap_err();
        assert!(matches!(err, PipelineError::InvariantViolation(_)));
    }

    #[test]
    fn test_clean_container_passes_without_flags() {
        let c = container();
        assert_eq!(c.reduce(), ContainerResult::Pass { audit_flags: vec![] });
    }
}
