// ➖ Reduction Payments - DUA (unemployment) and DIA (industrial accident) benefits
// Other state benefits the claimant received for a given week; reported next to PFML payments.

use crate::db::{parse_column, parse_decimal, parse_uuid};
use crate::error::Result;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReductionSource {
    Dua,
    Dia,
}

impl ReductionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReductionSource::Dua => "dua",
            ReductionSource::Dia => "dia",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReductionSource::Dua => "DUA",
            ReductionSource::Dia => "DIA",
        }
    }
}

impl FromStr for ReductionSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "dua" => Ok(ReductionSource::Dua),
            "dia" => Ok(ReductionSource::Dia),
            other => Err(format!("unknown reduction source: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReductionPayment {
    pub reduction_id: Uuid,
    pub source: ReductionSource,
    pub fineos_customer_number: String,
    /// First day of the 7-day benefit week the reduction covers
    pub request_week_begin: NaiveDate,
    #[serde(default)]
    pub payment_date: Option<NaiveDate>,
    pub gross_amount: Decimal,
    #[serde(default)]
    pub description: Option<String>,
}

impl ReductionPayment {
    pub fn request_week_end(&self) -> NaiveDate {
        self.request_week_begin + chrono::Duration::days(6)
    }
}

pub fn insert_reduction_payment(conn: &Connection, reduction: &ReductionPayment) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO reduction_payments (
            reduction_id, source, fineos_customer_number, request_week_begin, payment_date, gross_amount, description
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            reduction.reduction_id.to_string(),
            reduction.source.as_str(),
            reduction.fineos_customer_number,
            reduction.request_week_begin,
            reduction.payment_date,
            reduction.gross_amount.to_string(),
            reduction.description,
        ],
    )?;
    Ok(())
}

/// Reductions for one claimant, oldest benefit week first
pub fn reductions_for_customer(
    conn: &Connection,
    fineos_customer_number: &str,
    source: ReductionSource,
) -> Result<Vec<ReductionPayment>> {
    let mut stmt = conn.prepare(
        "SELECT reduction_id, source, fineos_customer_number, request_week_begin, payment_date, gross_amount, description
         FROM reduction_payments
         WHERE fineos_customer_number = ?1 AND source = ?2
         ORDER BY request_week_begin, reduction_id",
    )?;

    let reductions = stmt
        .query_map(params![fineos_customer_number, source.as_str()], |row| {
            let reduction_id: String = row.get(0)?;
            let source: String = row.get(1)?;
            let gross_amount: String = row.get(5)?;
            Ok(ReductionPayment {
                reduction_id: parse_uuid(&reduction_id)?,
                source: parse_column(&source)?,
                fineos_customer_number: row.get(2)?,
                request_week_begin: row.get(3)?,
                payment_date: row.get(4)?,
                gross_amount: parse_decimal(&gross_amount)?,
                description: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(reductions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use rust_decimal_macros::dec;

    fn reduction(source: ReductionSource, customer: &str, begin: NaiveDate) -> ReductionPayment {
        ReductionPayment {
            reduction_id: Uuid::new_v4(),
            source,
            fineos_customer_number: customer.to_string(),
            request_week_begin: begin,
            payment_date: None,
            gross_amount: dec!(120.00),
            description: None,
        }
    }

    #[test]
    fn test_reductions_are_filtered_and_ordered() {
        let conn = open_in_memory().unwrap();
        let late = NaiveDate::from_ymd_opt(2021, 9, 22).unwrap();
        let early = NaiveDate::from_ymd_opt(2021, 9, 15).unwrap();

        insert_reduction_payment(&conn, &reduction(ReductionSource::Dua, "100", late)).unwrap();
        insert_reduction_payment(&conn, &reduction(ReductionSource::Dua, "100", early)).unwrap();
        insert_reduction_payment(&conn, &reduction(ReductionSource::Dia, "100", early)).unwrap();
        insert_reduction_payment(&conn, &reduction(ReductionSource::Dua, "200", early)).unwrap();

        let dua = reductions_for_customer(&conn, "100", ReductionSource::Dua).unwrap();
        assert_eq!(dua.len(), 2);
        assert_eq!(dua[0].request_week_begin, early);
        assert_eq!(dua[1].request_week_begin, late);
        assert_eq!(dua[0].gross_amount, dec!(120.00));

        let dia = reductions_for_customer(&conn, "100", ReductionSource::Dia).unwrap();
        assert_eq!(dia.len(), 1);
    }

    #[test]
    fn test_request_week_end() {
        let r = reduction(ReductionSource::Dia, "1", NaiveDate::from_ymd_opt(2021, 9, 15).unwrap());
        assert_eq!(r.request_week_end(), NaiveDate::from_ymd_opt(2021, 9, 21).unwrap());
    }
}
