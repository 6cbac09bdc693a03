use async_trait::async_trait;
use bankfeed_core::{RequisitionStatus, Token};
use serde::Deserialize;
use serde_json::Value;

use crate::error::UpstreamError;

/// Result of opening a linking session: the requisition handle plus the consent
/// URL the account holder must visit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializedSession {
    pub requisition_id: String,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requisition {
    pub status: RequisitionStatus,
    pub accounts: Vec<String>,
}

/// Raw per-account transaction lists, untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawTransactions {
    #[serde(default)]
    pub booked: Vec<Value>,
    #[serde(default)]
    pub pending: Vec<Value>,
}

/// The open-banking aggregator. Every call taking `access` may fail with
/// [`UpstreamError::Unauthorized`] when the token is no longer accepted.
#[async_trait]
pub trait Aggregator: Send + Sync {
    async fn generate_token(&self) -> Result<Token, UpstreamError>;

    async fn exchange_token(&self, refresh_token: &str) -> Result<Token, UpstreamError>;

    async fn resolve_institution(
        &self,
        access: &str,
        country: &str,
        name: &str,
    ) -> Result<String, UpstreamError>;

    async fn initialize_session(
        &self,
        access: &str,
        institution_id: &str,
        redirect_uri: &str,
        reference_id: &str,
    ) -> Result<InitializedSession, UpstreamError>;

    async fn get_requisition(
        &self,
        access: &str,
        requisition_id: &str,
    ) -> Result<Requisition, UpstreamError>;

    async fn get_transactions(
        &self,
        access: &str,
        account_id: &str,
    ) -> Result<RawTransactions, UpstreamError>;
}
