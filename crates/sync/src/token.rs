//! Access-token lifecycle: one refresh-and-retry per authenticated call,
//! single-flighted across concurrent callers.

use bankfeed_core::Token;
use chrono::Utc;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::aggregator::Aggregator;
use crate::error::UpstreamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenPhase {
    Valid,
    Refreshing,
}

struct TokenSlot {
    token: Token,
    /// Bumped on every successful refresh; lets waiters see a refresh already happened.
    generation: u64,
    phase: TokenPhase,
}

pub struct TokenManager<A> {
    aggregator: Arc<A>,
    slot: RwLock<TokenSlot>,
    refresh_lock: Mutex<()>,
    timeout: Duration,
    refreshes: AtomicUsize,
}

impl<A: Aggregator> TokenManager<A> {
    /// Obtains a fresh pair from the aggregator's static credentials.
    pub async fn connect(aggregator: Arc<A>, timeout: Duration) -> Result<Self, UpstreamError> {
        let token = tokio::time::timeout(timeout, aggregator.generate_token())
            .await
            .map_err(|_| UpstreamError::Timeout(timeout))??;
        Ok(Self::with_token(aggregator, token, timeout))
    }

    pub fn with_token(aggregator: Arc<A>, token: Token, timeout: Duration) -> Self {
        Self {
            aggregator,
            slot: RwLock::new(TokenSlot {
                token,
                generation: 0,
                phase: TokenPhase::Valid,
            }),
            refresh_lock: Mutex::new(()),
            timeout,
            refreshes: AtomicUsize::new(0),
        }
    }

    pub fn aggregator(&self) -> &A {
        &self.aggregator
    }

    /// Number of completed token refreshes since construction.
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Runs `operation` with the current access token. On an authorization
    /// failure the token is refreshed once and the operation retried once;
    /// anything else, including a second authorization failure, is returned.
    pub async fn call_authenticated<T, F, Fut>(&self, operation: F) -> Result<T, UpstreamError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let (mut access, generation, stale) = {
            let slot = self.slot.read().await;
            if slot.phase == TokenPhase::Refreshing {
                debug!("Refresh in flight, using the current token until it lands");
            }
            (
                slot.token.access_token.clone(),
                slot.generation,
                slot.token.is_stale_at(Utc::now()),
            )
        };

        let mut refreshed = false;
        if stale {
            access = self.refresh(generation).await?;
            refreshed = true;
        }

        match self.attempt(&operation, access).await {
            Err(e) if e.is_authorization() && !refreshed => {
                warn!("Access token rejected, refreshing");
                let access = self.refresh(generation).await?;
                self.attempt(&operation, access).await
            }
            other => other,
        }
    }

    async fn attempt<T, F, Fut>(&self, operation: &F, access: String) -> Result<T, UpstreamError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        tokio::time::timeout(self.timeout, operation(access))
            .await
            .map_err(|_| UpstreamError::Timeout(self.timeout))?
    }

    /// Replaces the token unless another caller already did so after `seen`.
    /// Returns the access token to retry with.
    #[instrument(skip(self))]
    async fn refresh(&self, seen: u64) -> Result<String, UpstreamError> {
        let _guard = self.refresh_lock.lock().await;

        let refresh_token = {
            let mut slot = self.slot.write().await;
            if slot.generation != seen {
                return Ok(slot.token.access_token.clone());
            }
            slot.phase = TokenPhase::Refreshing;
            slot.token.refresh_token.clone()
        };

        let result = self.exchange(&refresh_token).await;

        let mut slot = self.slot.write().await;
        slot.phase = TokenPhase::Valid;
        let token = result?;
        slot.token = token;
        slot.generation += 1;
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        info!(generation = slot.generation, "Access token refreshed");
        Ok(slot.token.access_token.clone())
    }

    async fn exchange(&self, refresh_token: &str) -> Result<Token, UpstreamError> {
        let exchanged = tokio::time::timeout(self.timeout, self.aggregator.exchange_token(refresh_token))
            .await
            .map_err(|_| UpstreamError::Timeout(self.timeout))?;

        match exchanged {
            Err(e) if e.is_authorization() => {
                warn!("Refresh token rejected, requesting a new token pair");
                tokio::time::timeout(self.timeout, self.aggregator.generate_token())
                    .await
                    .map_err(|_| UpstreamError::Timeout(self.timeout))?
            }
            other => other,
        }
    }
}
