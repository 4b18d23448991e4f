// Transaction codes from {account type, prenote, return}
//
//              deposit  prenote  return
//   checking      22       23       21
//   savings       32       33       31

use super::{NachaError, NachaResult};
use crate::entities::BankAccountType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Deposit,
    Prenote,
    Return,
}

impl EntryKind {
    pub fn from_flags(is_prenote: bool, is_return: bool) -> NachaResult<EntryKind> {
        match (is_prenote, is_return) {
            (true, true) => Err(NachaError::UnsupportedTransactionCode),
            (true, false) => Ok(EntryKind::Prenote),
            (false, true) => Ok(EntryKind::Return),
            (false, false) => Ok(EntryKind::Deposit),
        }
    }
}

pub fn transaction_code(account_type: BankAccountType, is_prenote: bool, is_return: bool) -> NachaResult<u8> {
    let kind = EntryKind::from_flags(is_prenote, is_return)?;
    Ok(code_for(account_type, kind))
}

pub fn code_for(account_type: BankAccountType, kind: EntryKind) -> u8 {
    let base = match account_type {
        BankAccountType::Checking => 20,
        BankAccountType::Savings => 30,
    };
    let offset = match kind {
        EntryKind::Return => 1,
        EntryKind::Deposit => 2,
        EntryKind::Prenote => 3,
    };
    base + offset
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_table() {
        use BankAccountType::*;
        assert_eq!(transaction_code(Checking, false, false).unwrap(), 22);
        assert_eq!(transaction_code(Checking, true, false).unwrap(), 23);
        assert_eq!(transaction_code(Checking, false, true).unwrap(), 21);
        assert_eq!(transaction_code(Savings, false, false).unwrap(), 32);
        assert_eq!(transaction_code(Savings, true, false).unwrap(), 33);
        assert_eq!(transaction_code(Savings, false, true).unwrap(), 31);
    }

    #[test]
    fn test_prenote_return_is_unsupported() {
        assert_eq!(
            transaction_code(BankAccountType::Checking, true, true),
            Err(NachaError::UnsupportedTransactionCode)
        );
    }
}
