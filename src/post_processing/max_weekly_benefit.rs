// Maximum weekly benefit
//
// Each payment's amount is spread across the Sunday-to-Saturday weeks its period
// touches, proportionally to the days in each week (the last week takes the
// rounding remainder). A payment is rejected when any of its weeks, added to what
// the employee already has for that week, goes above the cap.
//
// Already counted: earlier payments still in flight or sent, plus the payments
// of this run accepted before it. A rejected payment adds nothing, so every
// payment's outcome stands on its own.

use super::{PaymentContainer, Rule, RuleContext, RuleName, RuleOutcome};
use crate::db::inclusive_days;
use crate::entities::payment::payments_for_employee;
use crate::error::Result;
use crate::state_log::{latest_state, EntityRef, State};
use chrono::{Datelike, Duration, NaiveDate};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

/// Payment states whose amount already counts against the weekly cap
pub const COUNTED_STATES: [State; 4] = [
    State::PaymentStagedForAuditSampling,
    State::PaymentAuditReportSent,
    State::PaymentValidated,
    State::PaymentAchSent,
];

#[derive(Debug, Default)]
pub struct MaxWeeklyBenefitRule {
    employee_id: Option<Uuid>,
    week_totals: BTreeMap<NaiveDate, Decimal>,
}

/// Sunday on or before `date`
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_sunday() as i64)
}

/// Split `amount` over the weeks of `[start, end]`, keyed by week start
pub fn allocate_by_week(start: NaiveDate, end: NaiveDate, amount: Decimal) -> Vec<(NaiveDate, Decimal)> {
    if end < start {
        return vec![(week_start(start), amount)];
    }

    let total_days = Decimal::from(inclusive_days(start, end));
    let mut chunks: Vec<(NaiveDate, i64)> = Vec::new();
    let mut cursor = start;
    while cursor <= end {
        let week = week_start(cursor);
        let week_end = (week + Duration::days(6)).min(end);
        chunks.push((week, inclusive_days(cursor, week_end)));
        cursor = week_end + Duration::days(1);
    }

    let mut allocated = Decimal::ZERO;
    let last = chunks.len() - 1;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, (week, days))| {
            let share = if i == last {
                amount - allocated
            } else {
                (amount * Decimal::from(days) / total_days).round_dp(2)
            };
            allocated += share;
            (week, share)
        })
        .collect()
}

impl MaxWeeklyBenefitRule {
    /// Reset the running totals and load what the employee was already paid
    pub fn begin_employee(&mut self, ctx: &mut RuleContext<'_>, employee_id: Uuid) -> Result<()> {
        self.employee_id = Some(employee_id);
        self.week_totals.clear();

        for payment in payments_for_employee(ctx.conn, employee_id)? {
            let counted = latest_state(ctx.conn, EntityRef::payment(payment.payment_id))?
                .map(|entry| COUNTED_STATES.contains(&entry.end_state))
                .unwrap_or(false);
            if counted {
                self.add(&allocate_by_week(payment.period_start, payment.period_end, payment.amount));
            }
        }

        debug!(%employee_id, weeks = self.week_totals.len(), "loaded prior weekly totals");
        Ok(())
    }

    pub fn week_total(&self, week: NaiveDate) -> Decimal {
        self.week_totals.get(&week).copied().unwrap_or(Decimal::ZERO)
    }

    fn add(&mut self, allocation: &[(NaiveDate, Decimal)]) {
        for (week, share) in allocation {
            *self.week_totals.entry(*week).or_insert(Decimal::ZERO) += *share;
        }
    }
}

impl Rule for MaxWeeklyBenefitRule {
    fn name(&self) -> RuleName {
        RuleName::MaxWeeklyBenefit
    }

    fn process(&mut self, ctx: &mut RuleContext<'_>, container: &PaymentContainer) -> Result<RuleOutcome> {
        let payment = &container.payment;
        if self.employee_id != Some(payment.employee_id) {
            self.begin_employee(ctx, payment.employee_id)?;
        }

        let cap = ctx.config.max_weekly_benefit_amount;
        let allocation = allocate_by_week(payment.period_start, payment.period_end, payment.amount);

        let over: Vec<String> = allocation
            .iter()
            .filter(|(week, share)| self.week_total(*week) + *share > cap)
            .map(|(week, share)| {
                format!(
                    "- Week of {}: previously allocated ${:.2}, this payment ${:.2}",
                    week,
                    self.week_total(*week),
                    share
                )
            })
            .collect();

        if over.is_empty() {
            self.add(&allocation);
            return Ok(RuleOutcome::pass());
        }

        ctx.metrics.increment("max_weekly_benefit_exceeded_count");
        Ok(RuleOutcome::fail(format!(
            "Payment would exceed the maximum weekly benefit amount of ${:.2}:\n{}",
            cap,
            over.join("\n")
        )))
    }
}
