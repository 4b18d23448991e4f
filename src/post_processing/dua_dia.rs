// DUA/DIA reduction overlap
//
// A reduction record is reported when its benefit week starts or ends inside the
// payment period (both bounds inclusive). Informational only. Matches from both
// sources are listed together, oldest benefit week first.

use super::{PaymentContainer, Rule, RuleContext, RuleName, RuleOutcome};
use crate::entities::reduction::reductions_for_customer;
use crate::entities::{ReductionPayment, ReductionSource};
use crate::error::Result;
use chrono::NaiveDate;

pub struct DuaDiaReductionRule;

pub fn overlaps_period(reduction: &ReductionPayment, start: NaiveDate, end: NaiveDate) -> bool {
    let in_period = |d: NaiveDate| start <= d && d <= end;
    in_period(reduction.request_week_begin) || in_period(reduction.request_week_end())
}

fn describe(reduction: &ReductionPayment) -> String {
    let paid = reduction
        .payment_date
        .map(|d| d.to_string())
        .unwrap_or_else(|| "N/A".to_string());
    format!(
        "- {} Benefit Week Begin: {}, Payment Date: {}, Gross Amount: ${:.2}",
        reduction.source.label(),
        reduction.request_week_begin,
        paid,
        reduction.gross_amount
    )
}

impl Rule for DuaDiaReductionRule {
    fn name(&self) -> RuleName {
        RuleName::DuaDiaReduction
    }

    fn process(&mut self, ctx: &mut RuleContext<'_>, container: &PaymentContainer) -> Result<RuleOutcome> {
        let payment = &container.payment;
        let mut matches = Vec::new();
        for source in [ReductionSource::Dua, ReductionSource::Dia] {
            matches.extend(
                reductions_for_customer(ctx.conn, &container.employee.fineos_customer_number, source)?
                    .into_iter()
                    .filter(|r| overlaps_period(r, payment.period_start, payment.period_end)),
            );
        }
        if matches.is_empty() {
            return Ok(RuleOutcome::pass());
        }

        // Stable: same-week records keep DUA before DIA
        matches.sort_by_key(|r| r.request_week_begin);
        ctx.metrics.add("reduction_overlap_count", matches.len() as i64);

        let lines: Vec<String> = matches.iter().map(describe).collect();
        Ok(RuleOutcome::fail(format!("DUA/DIA Reductions:\n{}", lines.join("\n"))))
    }
}
