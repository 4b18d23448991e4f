// Entry (6) and addenda (7) records

use super::fields::{alphanumeric, blanks, number, numeric, to_cents};
use super::transaction_code::{code_for, EntryKind};
use super::{NachaError, NachaResult, RECORD_LENGTH};
use crate::entities::{BankAccountType, PubEft};
use chrono::NaiveDate;
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceClass {
    Mixed,
    CreditsOnly,
    DebitsOnly,
}

impl ServiceClass {
    pub fn code(&self) -> &'static str {
        match self {
            ServiceClass::Mixed => "200",
            ServiceClass::CreditsOnly => "220",
            ServiceClass::DebitsOnly => "225",
        }
    }
}

// ============================================================================
// ADDENDA
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addendum {
    /// Type 99: carried by return entries
    Return {
        reason_code: String,
        original_trace: String,
        date_of_death: Option<NaiveDate>,
        original_rdfi: String,
        information: String,
    },
    /// Type 05: free-form payment related information
    PaymentRelated { information: String },
}

impl Addendum {
    pub fn render(&self, trace_number: &str) -> NachaResult<String> {
        let record = match self {
            Addendum::Return {
                reason_code,
                original_trace,
                date_of_death,
                original_rdfi,
                information,
            } => {
                let death = date_of_death
                    .map(|d| d.format("%y%m%d").to_string())
                    .unwrap_or_else(|| blanks(6));
                format!(
                    "799{}{}{}{}{}{}",
                    alphanumeric(reason_code, 3),
                    numeric("original trace", original_trace, 15)?,
                    death,
                    numeric("original receiving DFI", original_rdfi, 8)?,
                    alphanumeric(information, 44),
                    numeric("trace number", trace_number, 15)?,
                )
            }
            Addendum::PaymentRelated { information } => {
                let entry_sequence = &trace_number[trace_number.len().saturating_sub(7)..];
                format!(
                    "705{}{}{}",
                    alphanumeric(information, 80),
                    number("addenda sequence", 1, 4)?,
                    numeric("entry sequence", entry_sequence, 7)?,
                )
            }
        };
        check_length('7', record)
    }
}

// ============================================================================
// ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NachaEntry {
    pub kind: EntryKind,
    pub account_type: BankAccountType,
    /// Full 9-digit routing number; the first 8 are the receiving DFI id
    pub routing_nbr: String,
    pub account_nbr: String,
    pub amount: Decimal,
    pub individual_id: String,
    pub individual_name: String,
    pub addendum: Option<Addendum>,
    /// Assigned when the file is finalized
    pub trace_number: Option<String>,
}

impl NachaEntry {
    pub fn new(
        kind: EntryKind,
        eft: &PubEft,
        amount: Decimal,
        individual_id: impl Into<String>,
        individual_name: impl Into<String>,
    ) -> NachaResult<Self> {
        if !eft.is_valid_routing() {
            return Err(NachaError::InvalidRoutingNumber(eft.routing_nbr.clone()));
        }
        let individual_id = individual_id.into();
        if kind != EntryKind::Prenote && amount.is_zero() {
            return Err(NachaError::ZeroAmount(individual_id));
        }
        // Reject amounts that cannot be encoded before they reach a batch
        to_cents(amount)?;

        Ok(NachaEntry {
            kind,
            account_type: eft.account_type,
            routing_nbr: eft.routing_nbr.clone(),
            account_nbr: eft.account_nbr.clone(),
            amount,
            individual_id,
            individual_name: individual_name.into(),
            addendum: None,
            trace_number: None,
        })
    }

    pub fn deposit(
        eft: &PubEft,
        amount: Decimal,
        individual_id: impl Into<String>,
        individual_name: impl Into<String>,
    ) -> NachaResult<Self> {
        Self::new(EntryKind::Deposit, eft, amount, individual_id, individual_name)
    }

    /// Zero-dollar entry that validates the account
    pub fn prenote(
        eft: &PubEft,
        individual_id: impl Into<String>,
        individual_name: impl Into<String>,
    ) -> NachaResult<Self> {
        Self::new(EntryKind::Prenote, eft, Decimal::ZERO, individual_id, individual_name)
    }

    pub fn with_addendum(mut self, addendum: Addendum) -> Self {
        self.addendum = Some(addendum);
        self
    }

    pub fn transaction_code(&self) -> u8 {
        code_for(self.account_type, self.kind)
    }

    /// Codes x1-x4 move money into the receiver's account
    pub fn is_credit(&self) -> bool {
        self.transaction_code() % 10 <= 4
    }

    pub fn receiving_dfi(&self) -> &str {
        &self.routing_nbr[..8]
    }

    pub fn receiving_dfi_number(&self) -> u64 {
        self.receiving_dfi().parse().unwrap_or(0)
    }

    pub fn amount_cents(&self) -> NachaResult<u64> {
        to_cents(self.amount)
    }

    /// Entry record plus its addendum, if any
    pub fn render(&self) -> NachaResult<Vec<String>> {
        let trace = self.trace_number.as_deref().ok_or(NachaError::NotFinalized)?;

        let entry = format!(
            "6{}{}{}{}{}{}{}{}{}{}",
            self.transaction_code(),
            numeric("receiving DFI", self.receiving_dfi(), 8)?,
            &self.routing_nbr[8..9],
            alphanumeric(&self.account_nbr, 17),
            number("amount", self.amount_cents()?, 10)?,
            alphanumeric(&self.individual_id, 15),
            alphanumeric(&self.individual_name, 22),
            blanks(2),
            if self.addendum.is_some() { "1" } else { "0" },
            numeric("trace number", trace, 15)?,
        );

        let mut lines = vec![check_length('6', entry)?];
        if let Some(addendum) = &self.addendum {
            lines.push(addendum.render(trace)?);
        }
        Ok(lines)
    }

    pub fn record_count(&self) -> usize {
        if self.addendum.is_some() {
            2
        } else {
            1
        }
    }
}

pub(crate) fn check_length(record_type: char, record: String) -> NachaResult<String> {
    if record.len() != RECORD_LENGTH {
        return Err(NachaError::RecordLength {
            record_type,
            length: record.len(),
        });
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn eft(account_type: BankAccountType) -> PubEft {
        PubEft {
            pub_eft_id: Uuid::new_v4(),
            employee_id: Uuid::new_v4(),
            routing_nbr: "021000021".to_string(),
            account_nbr: "987654321".to_string(),
            account_type,
        }
    }

    #[test]
    fn test_entry_layout() {
        let mut entry = NachaEntry::deposit(&eft(BankAccountType::Checking), dec!(812.34), "42", "Jane Doe").unwrap();
        entry.trace_number = Some("011000130000001".to_string());

        let lines = entry.render().unwrap();
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert_eq!(line.len(), 94);
        assert_eq!(&line[0..1], "6");
        assert_eq!(&line[1..3], "22");
        assert_eq!(&line[3..11], "02100002");
        assert_eq!(&line[11..12], "1");
        assert_eq!(&line[12..29], "987654321        ");
        assert_eq!(&line[29..39], "0000081234");
        assert_eq!(&line[39..54], "42             ");
        assert_eq!(&line[54..76], "JANE DOE              ");
        assert_eq!(&line[78..79], "0");
        assert_eq!(&line[79..94], "011000130000001");
    }

    #[test]
    fn test_prenote_is_zero_dollar_and_savings_code() {
        let mut entry = NachaEntry::prenote(&eft(BankAccountType::Savings), "7", "Sam Lee").unwrap();
        entry.trace_number = Some("011000130000002".to_string());
        let line = &entry.render().unwrap()[0];
        assert_eq!(&line[1..3], "33");
        assert_eq!(&line[29..39], "0000000000");
        assert!(entry.is_credit());
    }

    #[test]
    fn test_zero_amount_only_for_prenotes() {
        let err = NachaEntry::deposit(&eft(BankAccountType::Checking), dec!(0), "1", "X").unwrap_err();
        assert!(matches!(err, NachaError::ZeroAmount(_)));
    }

    #[test]
    fn test_bad_routing_rejected() {
        let mut bad = eft(BankAccountType::Checking);
        bad.routing_nbr = "12345".to_string();
        assert!(matches!(
            NachaEntry::deposit(&bad, dec!(1), "1", "X"),
            Err(NachaError::InvalidRoutingNumber(_))
        ));
    }

    #[test]
    fn test_render_before_trace_assigned_fails() {
        let entry = NachaEntry::deposit(&eft(BankAccountType::Checking), dec!(1), "1", "X").unwrap();
        assert_eq!(entry.render(), Err(NachaError::NotFinalized));
    }

    #[test]
    fn test_return_addendum_layout() {
        let mut entry = NachaEntry::new(EntryKind::Return, &eft(BankAccountType::Checking), dec!(10.00), "9", "Pat Roe")
            .unwrap()
            .with_addendum(Addendum::Return {
                reason_code: "R15".to_string(),
                original_trace: "011000130000009".to_string(),
                date_of_death: NaiveDate::from_ymd_opt(2021, 8, 30),
                original_rdfi: "02100002".to_string(),
                information: "deceased".to_string(),
            });
        entry.trace_number = Some("011000130000003".to_string());

        let lines = entry.render().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(&lines[0][1..3], "21");
        assert_eq!(&lines[0][78..79], "1");

        let addenda = &lines[1];
        assert_eq!(addenda.len(), 94);
        assert_eq!(&addenda[0..3], "799");
        assert_eq!(&addenda[3..6], "R15");
        assert_eq!(&addenda[6..21], "011000130000009");
        assert_eq!(&addenda[21..27], "210830");
        assert_eq!(&addenda[27..35], "02100002");
        assert_eq!(&addenda[79..94], "011000130000003");
    }

    #[test]
    fn test_payment_related_addendum_layout() {
        let addendum = Addendum::PaymentRelated {
            information: "PFML benefit".to_string(),
        };
        let line = addendum.render("011000130000012").unwrap();
        assert_eq!(line.len(), 94);
        assert_eq!(&line[0..3], "705");
        assert_eq!(&line[83..87], "0001");
        assert_eq!(&line[87..94], "0000012");
    }
}
