// 🏦 PubEft Entity - a claimant's bank account for direct deposit
//
// An account can only receive money after its zero-dollar prenote was accepted.
// Prenote status is never stored on the row; it is the account's latest ledger state.

use crate::db::{parse_column, parse_uuid};
use crate::error::Result;
use crate::state_log::{latest_state, EntityRef, State, StateLogEntry};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BankAccountType {
    Checking,
    Savings,
}

impl BankAccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BankAccountType::Checking => "checking",
            BankAccountType::Savings => "savings",
        }
    }
}

impl FromStr for BankAccountType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "checking" => Ok(BankAccountType::Checking),
            "savings" => Ok(BankAccountType::Savings),
            other => Err(format!("unknown bank account type: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubEft {
    pub pub_eft_id: Uuid,
    pub employee_id: Uuid,
    /// 9-digit ABA routing number (8-digit RDFI id + check digit)
    pub routing_nbr: String,
    pub account_nbr: String,
    pub account_type: BankAccountType,
}

impl PubEft {
    pub fn is_valid_routing(&self) -> bool {
        self.routing_nbr.len() == 9 && self.routing_nbr.chars().all(|c| c.is_ascii_digit())
    }
}

pub fn insert_pub_eft(conn: &Connection, eft: &PubEft) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO pub_efts (pub_eft_id, employee_id, routing_nbr, account_nbr, account_type)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            eft.pub_eft_id.to_string(),
            eft.employee_id.to_string(),
            eft.routing_nbr,
            eft.account_nbr,
            eft.account_type.as_str(),
        ],
    )?;
    Ok(inserted > 0)
}

pub fn get_pub_eft(conn: &Connection, pub_eft_id: Uuid) -> Result<Option<PubEft>> {
    let eft = conn
        .query_row(
            "SELECT pub_eft_id, employee_id, routing_nbr, account_nbr, account_type
             FROM pub_efts WHERE pub_eft_id = ?1",
            params![pub_eft_id.to_string()],
            |row| {
                let pub_eft_id: String = row.get(0)?;
                let employee_id: String = row.get(1)?;
                let account_type: String = row.get(4)?;
                Ok(PubEft {
                    pub_eft_id: parse_uuid(&pub_eft_id)?,
                    employee_id: parse_uuid(&employee_id)?,
                    routing_nbr: row.get(2)?,
                    account_nbr: row.get(3)?,
                    account_type: parse_column(&account_type)?,
                })
            },
        )
        .optional()?;
    Ok(eft)
}

// ============================================================================
// ACCOUNT LOOKUP
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrenoteStatus {
    Pending,
    Sent,
    Approved,
    Rejected,
}

impl PrenoteStatus {
    pub fn from_state(state: State) -> Option<PrenoteStatus> {
        match state {
            State::EftPendingPrenote => Some(PrenoteStatus::Pending),
            State::EftPrenoteSent => Some(PrenoteStatus::Sent),
            State::EftPrenoteApproved => Some(PrenoteStatus::Approved),
            State::EftPrenoteRejected => Some(PrenoteStatus::Rejected),
            _ => None,
        }
    }
}

/// Answers "can this bank account receive money yet?"
pub trait AccountLookup {
    fn prenote_status(&self, conn: &Connection, pub_eft_id: Uuid) -> Result<Option<PrenoteStatus>>;
}

/// Reads the prenote status from the account's latest state-log entry
#[derive(Debug, Default, Clone, Copy)]
pub struct LedgerAccountLookup;

impl AccountLookup for LedgerAccountLookup {
    fn prenote_status(&self, conn: &Connection, pub_eft_id: Uuid) -> Result<Option<PrenoteStatus>> {
        let latest: Option<StateLogEntry> = latest_state(conn, EntityRef::pub_eft(pub_eft_id))?;
        Ok(latest.and_then(|entry| PrenoteStatus::from_state(entry.end_state)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::entities::employee::{insert_employee, Employee};
    use crate::state_log::{record_transition, Outcome};

    fn setup_eft(conn: &Connection) -> PubEft {
        let employee_id = Uuid::new_v4();
        insert_employee(
            conn,
            &Employee {
                employee_id,
                fineos_customer_number: "55".to_string(),
                first_name: "Sam".to_string(),
                last_name: "Lee".to_string(),
                date_of_death: None,
            },
        )
        .unwrap();

        let eft = PubEft {
            pub_eft_id: Uuid::new_v4(),
            employee_id,
            routing_nbr: "021000021".to_string(),
            account_nbr: "123456789".to_string(),
            account_type: BankAccountType::Savings,
        };
        assert!(insert_pub_eft(conn, &eft).unwrap());
        eft
    }

    #[test]
    fn test_insert_is_idempotent() {
        let conn = open_in_memory().unwrap();
        let eft = setup_eft(&conn);
        assert!(!insert_pub_eft(&conn, &eft).unwrap());
        assert_eq!(get_pub_eft(&conn, eft.pub_eft_id).unwrap(), Some(eft));
    }

    #[test]
    fn test_ledger_lookup_follows_latest_state() {
        let conn = open_in_memory().unwrap();
        let eft = setup_eft(&conn);
        let lookup = LedgerAccountLookup;

        assert_eq!(lookup.prenote_status(&conn, eft.pub_eft_id).unwrap(), None);

        let entity = EntityRef::pub_eft(eft.pub_eft_id);
        record_transition(&conn, entity, State::EftPendingPrenote, Outcome::default(), None).unwrap();
        assert_eq!(lookup.prenote_status(&conn, eft.pub_eft_id).unwrap(), Some(PrenoteStatus::Pending));

        record_transition(&conn, entity, State::EftPrenoteSent, Outcome::default(), None).unwrap();
        record_transition(&conn, entity, State::EftPrenoteApproved, Outcome::default(), None).unwrap();
        assert_eq!(lookup.prenote_status(&conn, eft.pub_eft_id).unwrap(), Some(PrenoteStatus::Approved));
    }

    #[test]
    fn test_routing_validation() {
        let conn = open_in_memory().unwrap();
        let mut eft = setup_eft(&conn);
        assert!(eft.is_valid_routing());
        eft.routing_nbr = "02100002".to_string();
        assert!(!eft.is_valid_routing());
    }
}
