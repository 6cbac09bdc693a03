pub mod payload;
pub mod reconcile;
pub(crate) mod util;

pub use payload::{normalize, parse_datetime, transaction_id, NormalizationError};
pub use reconcile::{decide, decide_with, ActionTally, ReconcileAction};
