pub mod db;

pub use db::{
    apply_classification, create_db, find_transaction, list_sessions, list_transactions,
    save_session, set_session_status, upsert_transaction, DbPool, StorageError,
};
