// 💵 Payment Entity - one scheduled disbursement for a claim
//
// Identity: payment_id (UUID). The vendor's own key is the (C value, I value) pair.
// pub_individual_id is assigned on insert and becomes the NACHA individual id.

use crate::db::{parse_column, parse_decimal, parse_uuid};
use crate::error::{PipelineError, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Ach,
    Check,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Ach => "ach",
            PaymentMethod::Check => "check",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PaymentMethod::Ach => "ACH",
            PaymentMethod::Check => "Check",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ach" => Ok(PaymentMethod::Ach),
            "check" => Ok(PaymentMethod::Check),
            other => Err(format!("unknown payment method: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// Assigned by the database on insert
    #[serde(skip)]
    pub pub_individual_id: Option<i64>,
    pub payment_id: Uuid,
    pub claim_id: Uuid,
    pub employee_id: Uuid,
    pub c_value: String,
    pub i_value: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub payment_date: NaiveDate,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub pub_eft_id: Option<Uuid>,
    pub fineos_first_name: String,
    pub fineos_last_name: String,
    #[serde(default)]
    pub address_line_1: Option<String>,
    #[serde(default)]
    pub address_line_2: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
}

impl Payment {
    pub fn period_days(&self) -> i64 {
        crate::db::inclusive_days(self.period_start, self.period_end)
    }
}

const PAYMENT_COLUMNS: &str = "pub_individual_id, payment_id, claim_id, employee_id, c_value, i_value,
    period_start, period_end, payment_date, amount, payment_method, pub_eft_id,
    fineos_first_name, fineos_last_name, address_line_1, address_line_2, city, state, zip";

fn payment_from_row(row: &Row<'_>) -> rusqlite::Result<Payment> {
    let payment_id: String = row.get(1)?;
    let claim_id: String = row.get(2)?;
    let employee_id: String = row.get(3)?;
    let amount: String = row.get(9)?;
    let payment_method: String = row.get(10)?;
    let pub_eft_id: Option<String> = row.get(11)?;

    Ok(Payment {
        pub_individual_id: row.get(0)?,
        payment_id: parse_uuid(&payment_id)?,
        claim_id: parse_uuid(&claim_id)?,
        employee_id: parse_uuid(&employee_id)?,
        c_value: row.get(4)?,
        i_value: row.get(5)?,
        period_start: row.get(6)?,
        period_end: row.get(7)?,
        payment_date: row.get(8)?,
        amount: parse_decimal(&amount)?,
        payment_method: parse_column(&payment_method)?,
        pub_eft_id: pub_eft_id.as_deref().map(parse_uuid).transpose()?,
        fineos_first_name: row.get(12)?,
        fineos_last_name: row.get(13)?,
        address_line_1: row.get(14)?,
        address_line_2: row.get(15)?,
        city: row.get(16)?,
        state: row.get(17)?,
        zip: row.get(18)?,
    })
}

/// Insert a payment and return its pub_individual_id
pub fn insert_payment(conn: &Connection, payment: &Payment) -> Result<i64> {
    conn.execute(
        "INSERT INTO payments (
            payment_id, claim_id, employee_id, c_value, i_value,
            period_start, period_end, payment_date, amount, payment_method, pub_eft_id,
            fineos_first_name, fineos_last_name, address_line_1, address_line_2, city, state, zip
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        params![
            payment.payment_id.to_string(),
            payment.claim_id.to_string(),
            payment.employee_id.to_string(),
            payment.c_value,
            payment.i_value,
            payment.period_start,
            payment.period_end,
            payment.payment_date,
            payment.amount.to_string(),
            payment.payment_method.as_str(),
            payment.pub_eft_id.map(|id| id.to_string()),
            payment.fineos_first_name,
            payment.fineos_last_name,
            payment.address_line_1,
            payment.address_line_2,
            payment.city,
            payment.state,
            payment.zip,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn payment_exists(conn: &Connection, payment_id: Uuid) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM payments WHERE payment_id = ?1",
        params![payment_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn get_payment(conn: &Connection, payment_id: Uuid) -> Result<Option<Payment>> {
    let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE payment_id = ?1");
    let payment = conn
        .query_row(&sql, params![payment_id.to_string()], payment_from_row)
        .optional()?;
    Ok(payment)
}

/// Like get_payment, but a missing row is an error
pub fn require_payment(conn: &Connection, payment_id: Uuid) -> Result<Payment> {
    get_payment(conn, payment_id)?.ok_or_else(|| PipelineError::UnknownPayment(payment_id.to_string()))
}

pub fn payments_for_employee(conn: &Connection, employee_id: Uuid) -> Result<Vec<Payment>> {
    query_payments(conn, "employee_id = ?1", &employee_id.to_string())
}

pub fn payments_for_claim(conn: &Connection, claim_id: Uuid) -> Result<Vec<Payment>> {
    query_payments(conn, "claim_id = ?1", &claim_id.to_string())
}

/// Every payment the vendor sent under the same C/I key (reissues of one payment)
pub fn payments_by_ci(conn: &Connection, c_value: &str, i_value: &str) -> Result<Vec<Payment>> {
    let sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE c_value = ?1 AND i_value = ?2 ORDER BY pub_individual_id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let payments = stmt
        .query_map(params![c_value, i_value], payment_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(payments)
}

fn query_payments(conn: &Connection, filter: &str, value: &str) -> Result<Vec<Payment>> {
    let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE {filter} ORDER BY pub_individual_id");
    let mut stmt = conn.prepare(&sql)?;
    let payments = stmt
        .query_map(params![value], payment_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(payments)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use rust_decimal_macros::dec;

    pub(crate) fn sample_payment(employee_id: Uuid, claim_id: Uuid) -> Payment {
        Payment {
            pub_individual_id: None,
            payment_id: Uuid::new_v4(),
            claim_id,
            employee_id,
            c_value: "7326".to_string(),
            i_value: "301".to_string(),
            period_start: NaiveDate::from_ymd_opt(2021, 9, 20).unwrap(),
            period_end: NaiveDate::from_ymd_opt(2021, 9, 26).unwrap(),
            payment_date: NaiveDate::from_ymd_opt(2021, 9, 27).unwrap(),
            amount: dec!(500.00),
            payment_method: PaymentMethod::Check,
            pub_eft_id: None,
            fineos_first_name: "Jane".to_string(),
            fineos_last_name: "Doe".to_string(),
            address_line_1: Some("1 Main St".to_string()),
            address_line_2: None,
            city: Some("Boston".to_string()),
            state: Some("MA".to_string()),
            zip: Some("02108".to_string()),
        }
    }

    #[test]
    fn test_insert_assigns_individual_id_and_round_trips() {
        let conn = open_in_memory().unwrap();
        let payment = sample_payment(Uuid::new_v4(), Uuid::new_v4());

        let first_id = insert_payment(&conn, &payment).unwrap();
        let second = sample_payment(payment.employee_id, payment.claim_id);
        let second_id = insert_payment(&conn, &second).unwrap();
        assert!(second_id > first_id);

        let loaded = require_payment(&conn, payment.payment_id).unwrap();
        assert_eq!(loaded.pub_individual_id, Some(first_id));
        assert_eq!(loaded.amount, dec!(500.00));
        assert_eq!(loaded.payment_method, PaymentMethod::Check);
        assert_eq!(loaded.period_days(), 7);
    }

    #[test]
    fn test_duplicate_payment_id_is_rejected() {
        let conn = open_in_memory().unwrap();
        let payment = sample_payment(Uuid::new_v4(), Uuid::new_v4());
        insert_payment(&conn, &payment).unwrap();
        assert!(payment_exists(&conn, payment.payment_id).unwrap());
        assert!(insert_payment(&conn, &payment).is_err());
    }

    #[test]
    fn test_lookup_by_ci_and_claim() {
        let conn = open_in_memory().unwrap();
        let employee_id = Uuid::new_v4();
        let claim_id = Uuid::new_v4();
        let first = sample_payment(employee_id, claim_id);
        let mut other = sample_payment(employee_id, claim_id);
        other.i_value = "302".to_string();
        insert_payment(&conn, &first).unwrap();
        insert_payment(&conn, &other).unwrap();

        assert_eq!(payments_by_ci(&conn, "7326", "301").unwrap().len(), 1);
        assert_eq!(payments_for_claim(&conn, claim_id).unwrap().len(), 2);
        assert_eq!(payments_for_employee(&conn, employee_id).unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_payment_is_an_error() {
        let conn = open_in_memory().unwrap();
        let err = require_payment(&conn, Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownPayment(_)));
    }
}
