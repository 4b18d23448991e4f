// Post-processing: run every rule over the payments ready for it, then write one
// transition per payment (staged for audit sampling, or a terminal reject).

use super::load_payment_context;
use crate::audit::stage;
use crate::config::RuleConfig;
use crate::error::Result;
use crate::post_processing::{
    individual_rules, run_cross_employee_rules, run_individual_rules, ContainerResult, MaxWeeklyBenefitRule,
    PaymentContainer, RuleContext,
};
use crate::state_log::{latest_in_state, record_transition, EntityRef, EntityType, Outcome, State};
use crate::step::{Step, StepContext};
use crate::writeback::record_terminal_state;
use tracing::{debug, info};

pub struct PostProcessingStep {
    rules: RuleConfig,
}

impl PostProcessingStep {
    pub fn new(rules: RuleConfig) -> Self {
        PostProcessingStep { rules }
    }
}

impl Step for PostProcessingStep {
    fn name(&self) -> &'static str {
        "post_processing"
    }

    fn declared_metrics(&self) -> &'static [&'static str] {
        &[
            "payment_processed_count",
            "payment_staged_count",
            "payment_rejected_count",
            "audit_flag_count",
            "reduction_overlap_count",
            "leave_duration_exceeded_count",
            "names_swapped_count",
            "name_mismatch_count",
            "max_weekly_benefit_exceeded_count",
        ]
    }

    fn execute(&mut self, ctx: &mut StepContext<'_>) -> Result<()> {
        let conn = ctx.conn;
        let ready = latest_in_state(conn, EntityType::Payment, &[State::PaymentReadyForPostProcessing])?;
        if ready.is_empty() {
            info!("no payments ready for post-processing");
            return Ok(());
        }

        let mut containers = Vec::with_capacity(ready.len());
        for entry in &ready {
            let (payment, employee, claim) = load_payment_context(conn, entry.entity.entity_id)?;
            containers.push(PaymentContainer::new(payment, employee, claim));
        }

        {
            let mut rule_ctx = RuleContext {
                conn,
                config: &self.rules,
                metrics: &mut ctx.metrics,
            };
            let mut rules = individual_rules();
            for container in containers.iter_mut() {
                run_individual_rules(&mut rules, &mut rule_ctx, container)?;
            }
            run_cross_employee_rules(&mut MaxWeeklyBenefitRule::default(), &mut rule_ctx, &mut containers)?;
        }

        for container in containers {
            let payment_id = container.payment.payment_id;
            let message = container.message();
            ctx.increment("payment_processed_count");

            match container.reduce() {
                ContainerResult::Pass { audit_flags } => {
                    for (report_type, note) in &audit_flags {
                        stage(conn, payment_id, *report_type, note, ctx.import_log_id)?;
                        ctx.increment("audit_flag_count");
                    }
                    let outcome = if message.is_empty() {
                        Outcome::message("Passed all post-processing rules")
                    } else {
                        Outcome::message(message)
                    };
                    record_transition(
                        conn,
                        EntityRef::payment(payment_id),
                        State::PaymentStagedForAuditSampling,
                        outcome,
                        Some(ctx.import_log_id),
                    )?;
                    ctx.increment("payment_staged_count");
                    debug!(%payment_id, flags = audit_flags.len(), "payment staged for audit sampling");
                }
                ContainerResult::Reject { rule, message } => {
                    record_terminal_state(
                        conn,
                        payment_id,
                        State::PaymentFailedMaxWeeklyBenefit,
                        Outcome::message(message),
                        Some(ctx.import_log_id),
                    )?;
                    ctx.increment("payment_rejected_count");
                    debug!(%payment_id, rule = rule.as_str(), "payment rejected");
                }
            }
        }

        info!(
            processed = ctx.metrics.get("payment_processed_count"),
            staged = ctx.metrics.get("payment_staged_count"),
            rejected = ctx.metrics.get("payment_rejected_count"),
            "post-processing finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{latest_staged_details, AuditReportType};
    use crate::entities::payment::insert_payment;
    use crate::post_processing::test_support::*;
    use crate::state_log::latest_state;
    use crate::step::run_step;
    use rust_decimal_macros::dec;

    fn ready(fixture: &Fixture, start: chrono::NaiveDate, end: chrono::NaiveDate, amount: rust_decimal::Decimal) -> uuid::Uuid {
        let payment = fixture.payment(start, end, amount);
        insert_payment(&fixture.conn, &payment).unwrap();
        record_transition(
            &fixture.conn,
            EntityRef::payment(payment.payment_id),
            State::PaymentReadyForPostProcessing,
            Outcome::default(),
            None,
        )
        .unwrap();
        payment.payment_id
    }

    #[test]
    fn test_flags_are_staged_and_cap_rejections_are_terminal() {
        let mut fixture = Fixture::new();
        let flagged = ready(&fixture, date(2021, 9, 5), date(2021, 9, 11), dec!(200.00));
        let over_cap = ready(&fixture, date(2021, 9, 19), date(2021, 9, 25), dec!(900.00));
        fixture
            .conn
            .execute("UPDATE payments SET fineos_first_name = 'Jane'", [])
            .unwrap();

        let report = run_step(
            &mut fixture.conn,
            &mut PostProcessingStep::new(RuleConfig::default()),
            date(2021, 9, 27),
        )
        .unwrap();

        assert_eq!(report.metrics.get("payment_processed_count"), 2);
        assert_eq!(report.metrics.get("payment_staged_count"), 1);
        assert_eq!(report.metrics.get("payment_rejected_count"), 1);
        assert_eq!(report.metrics.get("name_mismatch_count"), 2);

        let staged = latest_staged_details(&fixture.conn, flagged).unwrap();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].report_type, AuditReportType::DorFineosNameMismatch);

        let rejected = latest_state(&fixture.conn, EntityRef::payment(over_cap)).unwrap().unwrap();
        assert_eq!(rejected.end_state, State::PaymentFailedMaxWeeklyBenefit);
        // The informational name note was dropped with the rejection
        assert!(!rejected.outcome.message.contains("DOR Name"));
        assert!(latest_staged_details(&fixture.conn, over_cap).unwrap().is_empty());
    }

    #[test]
    fn test_second_run_processes_nothing() {
        let mut fixture = Fixture::new();
        ready(&fixture, date(2021, 9, 19), date(2021, 9, 25), dec!(100.00));
        let mut step = PostProcessingStep::new(RuleConfig::default());
        run_step(&mut fixture.conn, &mut step, date(2021, 9, 27)).unwrap();
        let second = run_step(&mut fixture.conn, &mut step, date(2021, 9, 27)).unwrap();
        assert!(second.metrics.all_zero());
    }
}
