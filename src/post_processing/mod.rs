// 🧪 Post-Processing Rules - composable payment validators
//
// A closed set of rules behind one trait, registered in a fixed order.
// Individual rules look at one payment at a time and only produce audit notes.
// The maximum weekly benefit rule looks at an employee's whole group and can reject.
//
// A rule error is never caught per rule: it aborts the step.

pub mod container;
pub mod dua_dia;
pub mod leave_duration;
pub mod max_weekly_benefit;
pub mod name_mismatch;

pub use container::{ContainerResult, PaymentContainer};
pub use dua_dia::DuaDiaReductionRule;
pub use leave_duration::LeaveDurationRule;
pub use max_weekly_benefit::MaxWeeklyBenefitRule;
pub use name_mismatch::NameMismatchRule;

use crate::audit::AuditReportType;
use crate::config::RuleConfig;
use crate::error::Result;
use crate::step::Metrics;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

// ============================================================================
// RULE NAMES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RuleName {
    DuaDiaReduction,
    LeaveDuration,
    NameMismatch,
    MaxWeeklyBenefit,
}

impl RuleName {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleName::DuaDiaReduction => "dua_dia_reduction",
            RuleName::LeaveDuration => "leave_duration",
            RuleName::NameMismatch => "name_mismatch",
            RuleName::MaxWeeklyBenefit => "max_weekly_benefit",
        }
    }

    /// A failing hard rule rejects the payment; the others only annotate it
    pub fn is_hard_reject(&self) -> bool {
        matches!(self, RuleName::MaxWeeklyBenefit)
    }

    pub fn audit_report_type(&self) -> AuditReportType {
        match self {
            RuleName::DuaDiaReduction => AuditReportType::DuaDiaReduction,
            RuleName::LeaveDuration => AuditReportType::ExceedsTwentySixWeeks,
            RuleName::NameMismatch => AuditReportType::DorFineosNameMismatch,
            RuleName::MaxWeeklyBenefit => AuditReportType::MaxWeeklyBenefits,
        }
    }
}

// ============================================================================
// RULE OUTCOME
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOutcome {
    pub passed: bool,
    pub note: Option<String>,
}

impl RuleOutcome {
    pub fn pass() -> Self {
        RuleOutcome { passed: true, note: None }
    }

    pub fn fail(note: impl Into<String>) -> Self {
        RuleOutcome {
            passed: false,
            note: Some(note.into()),
        }
    }
}

// ============================================================================
// RULE TRAIT
// ============================================================================

/// Everything a rule may read or count while it runs
pub struct RuleContext<'a> {
    pub conn: &'a Connection,
    pub config: &'a RuleConfig,
    pub metrics: &'a mut Metrics,
}

pub trait Rule {
    fn name(&self) -> RuleName;

    fn process(&mut self, ctx: &mut RuleContext<'_>, container: &PaymentContainer) -> Result<RuleOutcome>;
}

/// Individual rules in the order they run; their notes concatenate in this order
pub fn individual_rules() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(DuaDiaReductionRule),
        Box::new(LeaveDurationRule),
        Box::new(NameMismatchRule),
    ]
}

/// Run every individual rule over one container
pub fn run_individual_rules(
    rules: &mut [Box<dyn Rule>],
    ctx: &mut RuleContext<'_>,
    container: &mut PaymentContainer,
) -> Result<()> {
    for rule in rules.iter_mut() {
        let outcome = rule.process(ctx, container)?;
        container.accumulate(rule.name(), outcome)?;
    }
    Ok(())
}

/// Run the cross-payment rule over every container, one employee group at a time
///
/// Containers are processed ordered by employee, period start, then payment id.
pub fn run_cross_employee_rules(
    rule: &mut MaxWeeklyBenefitRule,
    ctx: &mut RuleContext<'_>,
    containers: &mut [PaymentContainer],
) -> Result<()> {
    containers.sort_by(|a, b| {
        (a.payment.employee_id, a.payment.period_start, a.payment.payment_id).cmp(&(
            b.payment.employee_id,
            b.payment.period_start,
            b.payment.payment_id,
        ))
    });

    let mut start = 0;
    while start < containers.len() {
        let employee_id = containers[start].payment.employee_id;
        let end = containers[start..]
            .iter()
            .position(|c| c.payment.employee_id != employee_id)
            .map(|offset| start + offset)
            .unwrap_or(containers.len());

        rule.begin_employee(ctx, employee_id)?;
        for container in containers[start..end].iter_mut() {
            let outcome = rule.process(ctx, container)?;
            container.accumulate(rule.name(), outcome)?;
        }
        start = end;
    }
    Ok(())
}
