use async_trait::async_trait;
use bankfeed_core::{RequisitionStatus, Session, Transaction};
use bankfeed_storage::{DbPool, StorageError};

/// Persistence the orchestrator reconciles against.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Transaction>, StorageError>;

    /// Inserts or overwrites every field except `classification`.
    async fn upsert(&self, transaction: &Transaction) -> Result<(), StorageError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save_session(&self, session: &Session) -> Result<(), StorageError>;

    async fn list_sessions(&self) -> Result<Vec<Session>, StorageError>;

    async fn set_session_status(
        &self,
        requisition_id: &str,
        status: &RequisitionStatus,
    ) -> Result<(), StorageError>;
}

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl TransactionStore for SqliteStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Transaction>, StorageError> {
        bankfeed_storage::find_transaction(&self.pool, id).await
    }

    async fn upsert(&self, transaction: &Transaction) -> Result<(), StorageError> {
        bankfeed_storage::upsert_transaction(&self.pool, transaction).await
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn save_session(&self, session: &Session) -> Result<(), StorageError> {
        bankfeed_storage::save_session(&self.pool, session).await
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, StorageError> {
        bankfeed_storage::list_sessions(&self.pool).await
    }

    async fn set_session_status(
        &self,
        requisition_id: &str,
        status: &RequisitionStatus,
    ) -> Result<(), StorageError> {
        bankfeed_storage::set_session_status(&self.pool, requisition_id, status).await
    }
}
