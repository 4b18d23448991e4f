// DOR vs FINEOS name comparison
//
// Names are compared lower-cased with every non-letter removed.
// A name shorter than 2 letters may be an initial and always flags.
// Transposed first/last names pass but are counted separately.

use super::{PaymentContainer, Rule, RuleContext, RuleName, RuleOutcome};
use crate::error::Result;

pub struct NameMismatchRule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameComparison {
    Match,
    Swapped,
    Mismatch,
}

pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphabetic())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

fn same_name(a: &str, b: &str) -> bool {
    a.contains(b) || b.contains(a)
}

pub fn compare_names(dor: (&str, &str), fineos: (&str, &str)) -> NameComparison {
    let (dor_first, dor_last) = (normalize_name(dor.0), normalize_name(dor.1));
    let (fineos_first, fineos_last) = (normalize_name(fineos.0), normalize_name(fineos.1));

    if [&dor_first, &dor_last, &fineos_first, &fineos_last]
        .iter()
        .any(|n| n.chars().count() < 2)
    {
        return NameComparison::Mismatch;
    }

    if same_name(&dor_first, &fineos_first) && same_name(&dor_last, &fineos_last) {
        NameComparison::Match
    } else if same_name(&dor_first, &fineos_last) && same_name(&dor_last, &fineos_first) {
        NameComparison::Swapped
    } else {
        NameComparison::Mismatch
    }
}

impl Rule for NameMismatchRule {
    fn name(&self) -> RuleName {
        RuleName::NameMismatch
    }

    fn process(&mut self, ctx: &mut RuleContext<'_>, container: &PaymentContainer) -> Result<RuleOutcome> {
        let employee = &container.employee;
        let payment = &container.payment;

        match compare_names(
            (&employee.first_name, &employee.last_name),
            (&payment.fineos_first_name, &payment.fineos_last_name),
        ) {
            NameComparison::Match => Ok(RuleOutcome::pass()),
            NameComparison::Swapped => {
                ctx.metrics.increment("names_swapped_count");
                Ok(RuleOutcome::pass())
            }
            NameComparison::Mismatch => {
                ctx.metrics.increment("name_mismatch_count");
                Ok(RuleOutcome::fail(format!(
                    "DOR Name: {} {}\nFINEOS Name: {} {}",
                    employee.first_name, employee.last_name, payment.fineos_first_name, payment.fineos_last_name
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleConfig;
    use crate::post_processing::test_support::*;
    use crate::step::Metrics;
    use rust_decimal_macros::dec;

    #[test]
    fn test_normalize_strips_non_letters() {
        assert_eq!(normalize_name("O'Brien-Smith Jr."), "obriensmithjr");
        assert_eq!(normalize_name(" 42 "), "");
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(compare_names(("John", "Smith"), ("JOHN", "smith")), NameComparison::Match);
        assert_eq!(compare_names(("Jon", "Smith"), ("Jonathan", "Smith-Jones")), NameComparison::Match);
        assert_eq!(compare_names(("John", "Smith"), ("Smith", "John")), NameComparison::Swapped);
        assert_eq!(compare_names(("John", "Smith"), ("Jane", "Smith")), NameComparison::Mismatch);
        // Initials always flag, even when they would be substrings
        assert_eq!(compare_names(("J", "Smith"), ("John", "Smith")), NameComparison::Mismatch);
        assert_eq!(compare_names(("John", "S."), ("John", "S")), NameComparison::Mismatch);
    }

    #[test]
    fn test_swapped_names_pass_and_are_counted() {
        let fixture = Fixture::new();
        let mut container = fixture.stored_container(date(2021, 9, 20), date(2021, 9, 26), dec!(100.00));
        container.payment.fineos_first_name = "Smith".to_string();
        container.payment.fineos_last_name = "John".to_string();

        let config = RuleConfig::default();
        let mut metrics = Metrics::new();
        let mut ctx = RuleContext {
            conn: &fixture.conn,
            config: &config,
            metrics: &mut metrics,
        };
        let outcome = NameMismatchRule.process(&mut ctx, &container).unwrap();

        assert!(outcome.passed);
        assert_eq!(metrics.get("names_swapped_count"), 1);
        assert_eq!(metrics.get("name_mismatch_count"), 0);
    }

    #[test]
    fn test_mismatch_note_shows_both_names() {
        let fixture = Fixture::new();
        let mut container = fixture.stored_container(date(2021, 9, 20), date(2021, 9, 26), dec!(100.00));
        container.payment.fineos_first_name = "Jane".to_string();

        let config = RuleConfig::default();
        let mut metrics = Metrics::new();
        let mut ctx = RuleContext {
            conn: &fixture.conn,
            config: &config,
            metrics: &mut metrics,
        };
        let outcome = NameMismatchRule.process(&mut ctx, &container).unwrap();

        assert!(!outcome.passed);
        assert_eq!(outcome.note.unwrap(), "DOR Name: John Smith\nFINEOS Name: Jane Smith");
    }
}
