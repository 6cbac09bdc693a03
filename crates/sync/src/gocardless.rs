//! HTTP client for the GoCardless Bank Account Data API (v2).

use async_trait::async_trait;
use bankfeed_core::{RequisitionStatus, Token};
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::{RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::aggregator::{Aggregator, InitializedSession, RawTransactions, Requisition};
use crate::error::UpstreamError;

pub const DEFAULT_BASE_URL: &str = "https://bankaccountdata.gocardless.com/";

#[derive(Serialize)]
struct NewTokenRequest<'a> {
    secret_id: &'a str,
    secret_key: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access: String,
    access_expires: Option<i64>,
    // Absent from refresh responses; the old refresh token stays valid.
    refresh: Option<String>,
}

#[derive(Deserialize)]
struct Institution {
    id: String,
    name: String,
}

#[derive(Serialize)]
struct RequisitionRequest<'a> {
    redirect: &'a str,
    institution_id: &'a str,
    reference: &'a str,
}

#[derive(Deserialize)]
struct RequisitionResponse {
    id: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    accounts: Vec<String>,
}

#[derive(Deserialize)]
struct TransactionsResponse {
    #[serde(default)]
    transactions: RawTransactions,
}

#[derive(Clone)]
pub struct GoCardlessClient {
    base_url: Url,
    http: reqwest::Client,
    secret_id: String,
    secret_key: String,
    timeout: Duration,
}

impl fmt::Debug for GoCardlessClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoCardlessClient")
            .field("base_url", &self.base_url.as_str())
            .field("secret_id", &self.secret_id)
            .field("secret_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GoCardlessClient {
    pub fn new(
        base_url: &str,
        secret_id: &str,
        secret_key: &str,
        timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| UpstreamError::Transport(format!("invalid base_url '{base_url}': {e}")))?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        Ok(Self {
            base_url,
            http,
            secret_id: secret_id.to_string(),
            secret_key: secret_key.to_string(),
            timeout,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, UpstreamError> {
        self.base_url
            .join(path)
            .map_err(|e| UpstreamError::Transport(format!("invalid endpoint '{path}': {e}")))
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, UpstreamError> {
        let res = request
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = res.status();
        if status.is_success() {
            return res
                .json::<T>()
                .await
                .map_err(|e| UpstreamError::Decode(e.to_string()));
        }

        if status.as_u16() == 401 {
            return Err(UpstreamError::Unauthorized);
        }

        let body = res.text().await.unwrap_or_default();
        Err(UpstreamError::Http {
            status: status.as_u16(),
            body,
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> UpstreamError {
        if e.is_timeout() {
            UpstreamError::Timeout(self.timeout)
        } else {
            UpstreamError::Transport(e.to_string())
        }
    }

    fn token_from(response: TokenResponse, refresh_fallback: &str) -> Token {
        Token {
            access_token: response.access,
            refresh_token: response
                .refresh
                .unwrap_or_else(|| refresh_fallback.to_string()),
            access_expires: response
                .access_expires
                .map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
        }
    }
}

#[async_trait]
impl Aggregator for GoCardlessClient {
    async fn generate_token(&self) -> Result<Token, UpstreamError> {
        let url = self.endpoint("api/v2/token/new/")?;
        let response: TokenResponse = self
            .execute(self.http.post(url).json(&NewTokenRequest {
                secret_id: &self.secret_id,
                secret_key: &self.secret_key,
            }))
            .await?;
        debug!("Issued new aggregator token");
        Ok(Self::token_from(response, ""))
    }

    async fn exchange_token(&self, refresh_token: &str) -> Result<Token, UpstreamError> {
        let url = self.endpoint("api/v2/token/refresh/")?;
        let response: TokenResponse = self
            .execute(self.http.post(url).json(&RefreshRequest {
                refresh: refresh_token,
            }))
            .await?;
        Ok(Self::token_from(response, refresh_token))
    }

    async fn resolve_institution(
        &self,
        access: &str,
        country: &str,
        name: &str,
    ) -> Result<String, UpstreamError> {
        let url = self.endpoint("api/v2/institutions/")?;
        let institutions: Vec<Institution> = self
            .execute(
                self.http
                    .get(url)
                    .query(&[("country", country)])
                    .bearer_auth(access),
            )
            .await?;

        institutions
            .into_iter()
            .find(|i| i.name.eq_ignore_ascii_case(name) || i.id.eq_ignore_ascii_case(name))
            .map(|i| i.id)
            .ok_or_else(|| UpstreamError::InstitutionNotFound {
                country: country.to_string(),
                name: name.to_string(),
            })
    }

    async fn initialize_session(
        &self,
        access: &str,
        institution_id: &str,
        redirect_uri: &str,
        reference_id: &str,
    ) -> Result<InitializedSession, UpstreamError> {
        let url = self.endpoint("api/v2/requisitions/")?;
        let response: RequisitionResponse = self
            .execute(
                self.http
                    .post(url)
                    .bearer_auth(access)
                    .json(&RequisitionRequest {
                        redirect: redirect_uri,
                        institution_id,
                        reference: reference_id,
                    }),
            )
            .await?;

        if response.link.is_empty() {
            return Err(UpstreamError::Decode(format!(
                "requisition {} has no consent link",
                response.id
            )));
        }

        Ok(InitializedSession {
            requisition_id: response.id,
            link: response.link,
        })
    }

    async fn get_requisition(
        &self,
        access: &str,
        requisition_id: &str,
    ) -> Result<Requisition, UpstreamError> {
        let url = self.endpoint(&format!("api/v2/requisitions/{requisition_id}/"))?;
        let response: RequisitionResponse =
            self.execute(self.http.get(url).bearer_auth(access)).await?;

        Ok(Requisition {
            status: RequisitionStatus::from_code(&response.status),
            accounts: response.accounts,
        })
    }

    async fn get_transactions(
        &self,
        access: &str,
        account_id: &str,
    ) -> Result<RawTransactions, UpstreamError> {
        let url = self.endpoint(&format!("api/v2/accounts/{account_id}/transactions/"))?;
        let response: TransactionsResponse =
            self.execute(self.http.get(url).bearer_auth(access)).await?;
        Ok(response.transactions)
    }
}
