// Leave duration threshold
//
// Per benefit year and employer: the inclusive day count of continuous absence
// periods lying entirely inside the benefit year. Any (year, employer) pair above
// the threshold flags the payment.

use super::{PaymentContainer, Rule, RuleContext, RuleName, RuleOutcome};
use crate::db::inclusive_days;
use crate::entities::employee::{absence_periods_for_employee, benefit_years_for_employee};
use crate::entities::{AbsencePeriodType, BenefitYear, EmployerAbsencePeriod};
use crate::error::Result;
use std::collections::{BTreeMap, HashSet};

pub struct LeaveDurationRule;

/// Total continuous leave days per employer within one benefit year
pub fn days_by_employer(benefit_year: &BenefitYear, periods: &[EmployerAbsencePeriod]) -> BTreeMap<String, i64> {
    let mut seen = HashSet::new();
    let mut totals: BTreeMap<String, i64> = BTreeMap::new();

    for p in periods {
        let period = &p.period;
        if period.period_type != AbsencePeriodType::Continuous {
            continue;
        }
        if !benefit_year.contains(period.start_date, period.end_date) {
            continue;
        }
        // Same absence period can show up under several claims
        if !seen.insert(period.absence_period_id) {
            continue;
        }
        *totals.entry(p.employer_id.clone()).or_insert(0) += inclusive_days(period.start_date, period.end_date);
    }
    totals
}

impl Rule for LeaveDurationRule {
    fn name(&self) -> RuleName {
        RuleName::LeaveDuration
    }

    fn process(&mut self, ctx: &mut RuleContext<'_>, container: &PaymentContainer) -> Result<RuleOutcome> {
        let employee_id = container.employee.employee_id;
        let threshold = ctx.config.leave_duration_threshold_days;
        let periods = absence_periods_for_employee(ctx.conn, employee_id)?;

        let mut findings = Vec::new();
        for year in benefit_years_for_employee(ctx.conn, employee_id)? {
            let exceeded: Vec<String> = days_by_employer(&year, &periods)
                .into_iter()
                .filter(|(_, days)| *days > threshold)
                .map(|(employer_id, days)| format!("- Employer ID: {employer_id}, Leave Duration: {days} days"))
                .collect();

            if !exceeded.is_empty() {
                findings.push(format!(
                    "Benefit Year Start: {}, Benefit Year End: {}\n{}",
                    year.start_date,
                    year.end_date,
                    exceeded.join("\n")
                ));
            }
        }

        if findings.is_empty() {
            return Ok(RuleOutcome::pass());
        }
        ctx.metrics.increment("leave_duration_exceeded_count");
        Ok(RuleOutcome::fail(format!(
            "Leave duration exceeds {threshold} days:\n{}",
            findings.join("\n")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleConfig;
    use crate::entities::employee::{insert_absence_period, insert_benefit_year, insert_claim};
    use crate::entities::{AbsencePeriod, Claim, LeaveType};
    use crate::post_processing::test_support::*;
    use crate::step::Metrics;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn add_period(fixture: &Fixture, claim_id: Uuid, start: NaiveDate, end: NaiveDate, kind: AbsencePeriodType) {
        insert_absence_period(
            &fixture.conn,
            &AbsencePeriod {
                absence_period_id: Uuid::new_v4(),
                claim_id,
                start_date: start,
                end_date: end,
                period_type: kind,
            },
        )
        .unwrap();
    }

    fn add_benefit_year(fixture: &Fixture) -> BenefitYear {
        let year = BenefitYear {
            benefit_year_id: Uuid::new_v4(),
            employee_id: fixture.employee.employee_id,
            start_date: date(2021, 1, 3),
            end_date: date(2022, 1, 1),
        };
        insert_benefit_year(&fixture.conn, &year).unwrap();
        year
    }

    fn run(fixture: &Fixture) -> RuleOutcome {
        let container = fixture.stored_container(date(2021, 9, 20), date(2021, 9, 26), dec!(100.00));
        let config = RuleConfig::default();
        let mut metrics = Metrics::new();
        let mut ctx = RuleContext {
            conn: &fixture.conn,
            config: &config,
            metrics: &mut metrics,
        };
        LeaveDurationRule.process(&mut ctx, &container).unwrap()
    }

    #[test]
    fn test_exceeding_threshold_for_one_employer_flags() {
        let fixture = Fixture::new();
        add_benefit_year(&fixture);
        // 2021-01-04..2021-05-31 = 148 days, 2021-06-01..2021-07-15 = 45 days → 193
        add_period(&fixture, fixture.claim.claim_id, date(2021, 1, 4), date(2021, 5, 31), AbsencePeriodType::Continuous);
        add_period(&fixture, fixture.claim.claim_id, date(2021, 6, 1), date(2021, 7, 15), AbsencePeriodType::Continuous);

        let outcome = run(&fixture);
        assert!(!outcome.passed);
        let note = outcome.note.unwrap();
        assert!(note.contains("Employer ID: EMP-1, Leave Duration: 193 days"));
        assert!(note.contains("Benefit Year Start: 2021-01-03"));
    }

    #[test]
    fn test_days_are_split_by_employer() {
        let fixture = Fixture::new();
        let year = add_benefit_year(&fixture);
        let other_claim = Claim {
            claim_id: Uuid::new_v4(),
            employee_id: fixture.employee.employee_id,
            employer_id: "EMP-2".to_string(),
            absence_case_number: "NTN-200".to_string(),
            leave_type: LeaveType::Family,
        };
        insert_claim(&fixture.conn, &other_claim).unwrap();

        add_period(&fixture, fixture.claim.claim_id, date(2021, 1, 4), date(2021, 5, 31), AbsencePeriodType::Continuous);
        add_period(&fixture, other_claim.claim_id, date(2021, 6, 1), date(2021, 7, 15), AbsencePeriodType::Continuous);

        let periods = absence_periods_for_employee(&fixture.conn, fixture.employee.employee_id).unwrap();
        let totals = days_by_employer(&year, &periods);
        assert_eq!(totals.get("EMP-1"), Some(&148));
        assert_eq!(totals.get("EMP-2"), Some(&45));
        assert!(run(&fixture).passed);
    }

    #[test]
    fn test_intermittent_and_out_of_year_periods_are_ignored() {
        let fixture = Fixture::new();
        add_benefit_year(&fixture);
        add_period(&fixture, fixture.claim.claim_id, date(2021, 1, 4), date(2021, 12, 31), AbsencePeriodType::Intermittent);
        // Starts before the benefit year
        add_period(&fixture, fixture.claim.claim_id, date(2020, 6, 1), date(2021, 7, 1), AbsencePeriodType::Continuous);

        assert!(run(&fixture).passed);
    }

    #[test]
    fn test_exactly_at_threshold_passes() {
        let fixture = Fixture::new();
        add_benefit_year(&fixture);
        // 2021-01-04 + 181 days = 2021-07-04 → 182 inclusive days
        add_period(&fixture, fixture.claim.claim_id, date(2021, 1, 4), date(2021, 7, 4), AbsencePeriodType::Continuous);
        assert!(run(&fixture).passed);
    }
}
