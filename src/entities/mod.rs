// Entity Models - the projection of the source system the pipeline reads
//
// Each entity has a stable UUID identity. Its lifecycle lives in the state log,
// never in columns on its own row.

pub mod employee;
pub mod payment;
pub mod pub_eft;
pub mod reduction;
pub mod reference_file;

pub use employee::{AbsencePeriod, AbsencePeriodType, BenefitYear, Claim, Employee, EmployerAbsencePeriod, LeaveType};
pub use payment::{Payment, PaymentMethod};
pub use pub_eft::{AccountLookup, BankAccountType, LedgerAccountLookup, PrenoteStatus, PubEft};
pub use reduction::{ReductionPayment, ReductionSource};
pub use reference_file::{ReferenceFile, ReferenceFileType};
