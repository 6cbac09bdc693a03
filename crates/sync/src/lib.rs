pub mod aggregator;
pub mod directory;
pub mod error;
pub mod gocardless;
pub mod orchestrator;
pub mod store;
pub mod token;

#[cfg(test)]
pub(crate) mod testing;

pub use aggregator::{Aggregator, InitializedSession, RawTransactions, Requisition};
pub use directory::{
    AccountResolution, BankLink, LinkSettings, SessionDirectory, SANDBOX_BANK,
    SANDBOX_INSTITUTION_ID,
};
pub use error::{LinkError, SyncError, UpstreamError};
pub use gocardless::{GoCardlessClient, DEFAULT_BASE_URL};
pub use orchestrator::{
    FailureScope, SkippedSession, StopHandle, SyncFailure, SyncOptions, SyncOrchestrator,
    SyncReport,
};
pub use store::{SessionStore, SqliteStore, TransactionStore};
pub use token::TokenManager;
