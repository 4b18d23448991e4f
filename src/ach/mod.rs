// 🏧 ACH / NACHA encoder
//
// File → Batches → Entries (→ optional Addendum), serialized as 94-character records:
//   1 file header, 5 batch header, 6 entry, 7 addenda, 8 batch control, 9 file control.
// The file is padded with all-'9' lines to a multiple of ten records (one block = 10 lines).

pub mod fields;
pub mod file;
pub mod records;
pub mod transaction_code;

pub use file::{NachaBatch, NachaFile, NachaFileSettings};
pub use records::{Addendum, NachaEntry, ServiceClass};
pub use transaction_code::{transaction_code, EntryKind};

use thiserror::Error;

pub const RECORD_LENGTH: usize = 94;
pub const BLOCKING_FACTOR: usize = 10;

pub type NachaResult<T> = std::result::Result<T, NachaError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NachaError {
    #[error("field {field} value {value:?} does not fit in {width} digits")]
    NumericOverflow {
        field: &'static str,
        value: String,
        width: usize,
    },

    #[error("field {field} must be numeric, got {value:?}")]
    NotNumeric { field: &'static str, value: String },

    #[error("prenote entries cannot be returns")]
    UnsupportedTransactionCode,

    #[error("invalid routing number {0:?}")]
    InvalidRoutingNumber(String),

    #[error("negative amount {0} cannot be encoded")]
    NegativeAmount(String),

    #[error("non-prenote entry for {0} has a zero amount")]
    ZeroAmount(String),

    #[error("record {record_type} rendered {length} characters, expected 94")]
    RecordLength { record_type: char, length: usize },

    #[error("file must be finalized before serialization")]
    NotFinalized,
}
