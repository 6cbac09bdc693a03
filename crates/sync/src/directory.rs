use bankfeed_core::{RequisitionStatus, Session};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::aggregator::Aggregator;
use crate::error::{LinkError, UpstreamError};
use crate::store::SessionStore;
use crate::token::TokenManager;

pub const SANDBOX_BANK: &str = "sandbox";
pub const SANDBOX_INSTITUTION_ID: &str = "SANDBOXFINANCE_SFIN0000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    pub country: String,
    pub redirect_uri: String,
}

/// A freshly opened linking session and the consent URL for the account holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankLink {
    pub session: Session,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountResolution {
    Ready(Vec<String>),
    /// Requisition is not linked; the session is skipped for now.
    NotReady(RequisitionStatus),
}

pub struct SessionDirectory<A, S> {
    tokens: Arc<TokenManager<A>>,
    store: Arc<S>,
    settings: LinkSettings,
}

impl<A: Aggregator, S: SessionStore> SessionDirectory<A, S> {
    pub fn new(tokens: Arc<TokenManager<A>>, store: Arc<S>, settings: LinkSettings) -> Self {
        Self {
            tokens,
            store,
            settings,
        }
    }

    #[instrument(skip(self))]
    pub async fn link(&self, bank_name: &str) -> Result<BankLink, LinkError> {
        let institution_id = self.institution_id(bank_name).await?;
        let reference_id = Uuid::new_v4().to_string();

        let aggregator = self.tokens.aggregator();
        let redirect_uri = self.settings.redirect_uri.as_str();
        let initialized = self
            .tokens
            .call_authenticated(|access| {
                let institution_id = institution_id.as_str();
                let reference_id = reference_id.as_str();
                async move {
                    aggregator
                        .initialize_session(&access, institution_id, redirect_uri, reference_id)
                        .await
                }
            })
            .await?;

        let session = Session::new(&initialized.requisition_id, bank_name);
        self.store.save_session(&session).await?;
        info!(
            requisition_id = %session.requisition_id,
            institution_id = %institution_id,
            "Bank link initiated"
        );

        Ok(BankLink {
            session,
            link: initialized.link,
        })
    }

    async fn institution_id(&self, bank_name: &str) -> Result<String, LinkError> {
        if bank_name == SANDBOX_BANK {
            return Ok(SANDBOX_INSTITUTION_ID.to_string());
        }

        let aggregator = self.tokens.aggregator();
        let country = self.settings.country.as_str();
        self.tokens
            .call_authenticated(|access| async move {
                aggregator
                    .resolve_institution(&access, country, bank_name)
                    .await
            })
            .await
            .map_err(|source| LinkError::Institution {
                bank_name: bank_name.to_string(),
                source,
            })
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>, bankfeed_storage::StorageError> {
        self.store.list_sessions().await
    }

    /// Looks up the requisition and returns its accounts when linked. The
    /// observed status is written back to the session store.
    #[instrument(skip(self, session), fields(requisition_id = %session.requisition_id))]
    pub async fn resolve_accounts(
        &self,
        session: &Session,
    ) -> Result<AccountResolution, UpstreamError> {
        let aggregator = self.tokens.aggregator();
        let requisition_id = session.requisition_id.as_str();
        let requisition = self
            .tokens
            .call_authenticated(|access| async move {
                aggregator.get_requisition(&access, requisition_id).await
            })
            .await?;

        if requisition.status != session.status {
            if let Err(e) = self
                .store
                .set_session_status(requisition_id, &requisition.status)
                .await
            {
                warn!(error = %e, "Could not record session status");
            }
        }

        if requisition.status.is_linked() {
            Ok(AccountResolution::Ready(requisition.accounts))
        } else {
            Ok(AccountResolution::NotReady(requisition.status))
        }
    }
}
