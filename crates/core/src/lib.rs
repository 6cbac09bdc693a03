pub mod money;
pub mod session;
pub mod transaction;

pub use money::{Amount, Currency, CurrencyConversion, InvalidCurrency};
pub use session::{RequisitionStatus, Session, Token};
pub use transaction::{BookingStatus, Classification, ClassificationError, MergeError, Transaction};
