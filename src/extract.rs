// 📥 Extract Bundle - rows already parsed by the staging loader
//
// The vendor extract arrives as one JSON document. Reference rows are stored as-is;
// every payment is checked here before it may enter post-processing.

use crate::entities::employee::{get_claim, get_employee};
use crate::entities::pub_eft::get_pub_eft;
use crate::entities::{
    AbsencePeriod, BenefitYear, Claim, Employee, Payment, PaymentMethod, PubEft, ReductionPayment,
};
use crate::error::Result;
use crate::state_log::{ValidationIssue, ValidationReason};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractBundle {
    pub employees: Vec<Employee>,
    pub claims: Vec<Claim>,
    pub absence_periods: Vec<AbsencePeriod>,
    pub benefit_years: Vec<BenefitYear>,
    pub pub_efts: Vec<PubEft>,
    pub reductions: Vec<ReductionPayment>,
    pub payments: Vec<Payment>,
    /// Accounts already verified outside this system; they skip the prenote
    pub approved_pub_eft_ids: Vec<Uuid>,
    /// Accounts the bank refused during prenote
    pub rejected_pub_eft_ids: Vec<Uuid>,
}

impl ExtractBundle {
    pub fn from_json(content: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(content)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read(path)?;
        Self::from_json(&content)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn is_empty(&self) -> bool {
        self.employees.is_empty()
            && self.claims.is_empty()
            && self.absence_periods.is_empty()
            && self.benefit_years.is_empty()
            && self.pub_efts.is_empty()
            && self.reductions.is_empty()
            && self.payments.is_empty()
    }
}

/// Problems that keep a payment out of post-processing; empty means valid.
///
/// Reference rows must already be stored: the check reads them back from `conn`.
pub fn validate_payment(conn: &Connection, payment: &Payment) -> Result<Vec<ValidationIssue>> {
    let mut issues = Vec::new();

    if payment.c_value.trim().is_empty() {
        issues.push(ValidationIssue::new(ValidationReason::MissingField, "c_value"));
    }
    if payment.i_value.trim().is_empty() {
        issues.push(ValidationIssue::new(ValidationReason::MissingField, "i_value"));
    }
    if payment.fineos_first_name.trim().is_empty() || payment.fineos_last_name.trim().is_empty() {
        issues.push(ValidationIssue::new(ValidationReason::MissingField, "claimant name"));
    }
    if payment.amount <= Decimal::ZERO {
        issues.push(ValidationIssue::new(
            ValidationReason::InvalidValue,
            format!("amount must be positive, got {}", payment.amount),
        ));
    }
    if payment.period_end < payment.period_start {
        issues.push(ValidationIssue::new(
            ValidationReason::InvalidValue,
            format!(
                "period end {} is before period start {}",
                payment.period_end, payment.period_start
            ),
        ));
    }

    if get_employee(conn, payment.employee_id)?.is_none() {
        issues.push(ValidationIssue::new(
            ValidationReason::InvalidValue,
            format!("unknown employee {}", payment.employee_id),
        ));
    }
    match get_claim(conn, payment.claim_id)? {
        None => issues.push(ValidationIssue::new(
            ValidationReason::InvalidValue,
            format!("unknown claim {}", payment.claim_id),
        )),
        Some(claim) if claim.employee_id != payment.employee_id => issues.push(ValidationIssue::new(
            ValidationReason::InvalidValue,
            format!("claim {} belongs to another employee", payment.claim_id),
        )),
        Some(_) => {}
    }

    if payment.payment_method == PaymentMethod::Ach {
        match payment.pub_eft_id {
            None => issues.push(ValidationIssue::new(ValidationReason::MissingField, "pub_eft_id")),
            Some(pub_eft_id) => match get_pub_eft(conn, pub_eft_id)? {
                None => issues.push(ValidationIssue::new(
                    ValidationReason::InvalidValue,
                    format!("unknown bank account {pub_eft_id}"),
                )),
                Some(eft) if !eft.is_valid_routing() => issues.push(ValidationIssue::new(
                    ValidationReason::InvalidValue,
                    format!("routing number '{}' is not 9 digits", eft.routing_nbr),
                )),
                Some(_) => {}
            },
        }
    } else if payment.address_line_1.as_deref().map_or(true, |a| a.trim().is_empty()) {
        issues.push(ValidationIssue::new(
            ValidationReason::MissingField,
            "address_line_1 (check payment)",
        ));
    }

    Ok(issues)
}
