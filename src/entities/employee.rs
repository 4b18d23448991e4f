// 👤 Employee Entity - claimant, claims, absence periods and benefit years
//
// Identity: employee_id (UUID) from the source system.
// The pipeline only reads this projection; the extract step is the only writer.

use crate::db::{parse_column, parse_uuid};
use crate::error::Result;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// LEAVE TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LeaveType {
    Family,
    Medical,
}

impl LeaveType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaveType::Family => "family",
            LeaveType::Medical => "medical",
        }
    }

    /// Label used in reports and NACHA batch headers
    pub fn label(&self) -> &'static str {
        match self {
            LeaveType::Family => "Family",
            LeaveType::Medical => "Medical",
        }
    }
}

impl FromStr for LeaveType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "family" => Ok(LeaveType::Family),
            "medical" => Ok(LeaveType::Medical),
            other => Err(format!("unknown leave type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbsencePeriodType {
    Continuous,
    Intermittent,
    ReducedSchedule,
}

impl AbsencePeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbsencePeriodType::Continuous => "continuous",
            AbsencePeriodType::Intermittent => "intermittent",
            AbsencePeriodType::ReducedSchedule => "reduced_schedule",
        }
    }
}

impl FromStr for AbsencePeriodType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "continuous" => Ok(AbsencePeriodType::Continuous),
            "intermittent" => Ok(AbsencePeriodType::Intermittent),
            "reduced_schedule" => Ok(AbsencePeriodType::ReducedSchedule),
            other => Err(format!("unknown absence period type: {other}")),
        }
    }
}

// ============================================================================
// ENTITIES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    pub employee_id: Uuid,
    pub fineos_customer_number: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub date_of_death: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub claim_id: Uuid,
    pub employee_id: Uuid,
    pub employer_id: String,
    pub absence_case_number: String,
    pub leave_type: LeaveType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbsencePeriod {
    pub absence_period_id: Uuid,
    pub claim_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub period_type: AbsencePeriodType,
}

/// Absence period joined with the employer of its claim
#[derive(Debug, Clone, PartialEq)]
pub struct EmployerAbsencePeriod {
    pub employer_id: String,
    pub period: AbsencePeriod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenefitYear {
    pub benefit_year_id: Uuid,
    pub employee_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl BenefitYear {
    pub fn contains(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.start_date <= start && end <= self.end_date
    }
}

// ============================================================================
// PERSISTENCE
// ============================================================================

pub fn insert_employee(conn: &Connection, employee: &Employee) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO employees (employee_id, fineos_customer_number, first_name, last_name, date_of_death)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            employee.employee_id.to_string(),
            employee.fineos_customer_number,
            employee.first_name,
            employee.last_name,
            employee.date_of_death,
        ],
    )?;
    Ok(())
}

fn employee_from_row(row: &Row<'_>) -> rusqlite::Result<Employee> {
    let employee_id: String = row.get(0)?;
    Ok(Employee {
        employee_id: parse_uuid(&employee_id)?,
        fineos_customer_number: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        date_of_death: row.get(4)?,
    })
}

pub fn get_employee(conn: &Connection, employee_id: Uuid) -> Result<Option<Employee>> {
    let employee = conn
        .query_row(
            "SELECT employee_id, fineos_customer_number, first_name, last_name, date_of_death
             FROM employees WHERE employee_id = ?1",
            params![employee_id.to_string()],
            employee_from_row,
        )
        .optional()?;
    Ok(employee)
}

pub fn insert_claim(conn: &Connection, claim: &Claim) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO claims (claim_id, employee_id, employer_id, absence_case_number, leave_type)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            claim.claim_id.to_string(),
            claim.employee_id.to_string(),
            claim.employer_id,
            claim.absence_case_number,
            claim.leave_type.as_str(),
        ],
    )?;
    Ok(())
}

pub fn get_claim(conn: &Connection, claim_id: Uuid) -> Result<Option<Claim>> {
    let claim = conn
        .query_row(
            "SELECT claim_id, employee_id, employer_id, absence_case_number, leave_type
             FROM claims WHERE claim_id = ?1",
            params![claim_id.to_string()],
            |row| {
                let claim_id: String = row.get(0)?;
                let employee_id: String = row.get(1)?;
                let leave_type: String = row.get(4)?;
                Ok(Claim {
                    claim_id: parse_uuid(&claim_id)?,
                    employee_id: parse_uuid(&employee_id)?,
                    employer_id: row.get(2)?,
                    absence_case_number: row.get(3)?,
                    leave_type: parse_column(&leave_type)?,
                })
            },
        )
        .optional()?;
    Ok(claim)
}

pub fn insert_absence_period(conn: &Connection, period: &AbsencePeriod) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO absence_periods (absence_period_id, claim_id, start_date, end_date, period_type)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            period.absence_period_id.to_string(),
            period.claim_id.to_string(),
            period.start_date,
            period.end_date,
            period.period_type.as_str(),
        ],
    )?;
    Ok(())
}

/// Every absence period across all claims of the employee, with the claim's employer
pub fn absence_periods_for_employee(conn: &Connection, employee_id: Uuid) -> Result<Vec<EmployerAbsencePeriod>> {
    let mut stmt = conn.prepare(
        "SELECT c.employer_id, a.absence_period_id, a.claim_id, a.start_date, a.end_date, a.period_type
         FROM absence_periods a
         JOIN claims c ON c.claim_id = a.claim_id
         WHERE c.employee_id = ?1
         ORDER BY a.start_date, a.absence_period_id",
    )?;

    let periods = stmt
        .query_map(params![employee_id.to_string()], |row| {
            let absence_period_id: String = row.get(1)?;
            let claim_id: String = row.get(2)?;
            let period_type: String = row.get(5)?;
            Ok(EmployerAbsencePeriod {
                employer_id: row.get(0)?,
                period: AbsencePeriod {
                    absence_period_id: parse_uuid(&absence_period_id)?,
                    claim_id: parse_uuid(&claim_id)?,
                    start_date: row.get(3)?,
                    end_date: row.get(4)?,
                    period_type: parse_column(&period_type)?,
                },
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(periods)
}

pub fn insert_benefit_year(conn: &Connection, benefit_year: &BenefitYear) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO benefit_years (benefit_year_id, employee_id, start_date, end_date)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            benefit_year.benefit_year_id.to_string(),
            benefit_year.employee_id.to_string(),
            benefit_year.start_date,
            benefit_year.end_date,
        ],
    )?;
    Ok(())
}

pub fn benefit_years_for_employee(conn: &Connection, employee_id: Uuid) -> Result<Vec<BenefitYear>> {
    let mut stmt = conn.prepare(
        "SELECT benefit_year_id, employee_id, start_date, end_date
         FROM benefit_years WHERE employee_id = ?1
         ORDER BY start_date",
    )?;

    let years = stmt
        .query_map(params![employee_id.to_string()], |row| {
            let benefit_year_id: String = row.get(0)?;
            let employee_id: String = row.get(1)?;
            Ok(BenefitYear {
                benefit_year_id: parse_uuid(&benefit_year_id)?,
                employee_id: parse_uuid(&employee_id)?,
                start_date: row.get(2)?,
                end_date: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(years)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_employee_and_claim_round_trip() {
        let conn = open_in_memory().unwrap();
        let employee = Employee {
            employee_id: Uuid::new_v4(),
            fineos_customer_number: "1234".to_string(),
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            date_of_death: None,
        };
        insert_employee(&conn, &employee).unwrap();

        let claim = Claim {
            claim_id: Uuid::new_v4(),
            employee_id: employee.employee_id,
            employer_id: "EMP-1".to_string(),
            absence_case_number: "NTN-1-ABS-01".to_string(),
            leave_type: LeaveType::Medical,
        };
        insert_claim(&conn, &claim).unwrap();

        assert_eq!(get_employee(&conn, employee.employee_id).unwrap(), Some(employee));
        assert_eq!(get_claim(&conn, claim.claim_id).unwrap(), Some(claim));
        assert_eq!(get_claim(&conn, Uuid::new_v4()).unwrap(), None);
    }

    #[test]
    fn test_absence_periods_carry_employer() {
        let conn = open_in_memory().unwrap();
        let employee_id = Uuid::new_v4();
        insert_employee(
            &conn,
            &Employee {
                employee_id,
                fineos_customer_number: "1".to_string(),
                first_name: "A".to_string(),
                last_name: "B".to_string(),
                date_of_death: None,
            },
        )
        .unwrap();

        let claim_id = Uuid::new_v4();
        insert_claim(
            &conn,
            &Claim {
                claim_id,
                employee_id,
                employer_id: "EMP-9".to_string(),
                absence_case_number: "NTN-9".to_string(),
                leave_type: LeaveType::Family,
            },
        )
        .unwrap();
        insert_absence_period(
            &conn,
            &AbsencePeriod {
                absence_period_id: Uuid::new_v4(),
                claim_id,
                start_date: date(2021, 1, 1),
                end_date: date(2021, 3, 31),
                period_type: AbsencePeriodType::Continuous,
            },
        )
        .unwrap();

        let periods = absence_periods_for_employee(&conn, employee_id).unwrap();
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].employer_id, "EMP-9");
        assert_eq!(periods[0].period.period_type, AbsencePeriodType::Continuous);
    }

    #[test]
    fn test_benefit_year_contains() {
        let year = BenefitYear {
            benefit_year_id: Uuid::new_v4(),
            employee_id: Uuid::new_v4(),
            start_date: date(2021, 1, 3),
            end_date: date(2022, 1, 1),
        };
        assert!(year.contains(date(2021, 1, 3), date(2022, 1, 1)));
        assert!(!year.contains(date(2021, 1, 2), date(2021, 6, 1)));
        assert!(!year.contains(date(2021, 6, 1), date(2022, 1, 2)));
    }
}
