//! One sync cycle: sessions → accounts → fetch → normalize → reconcile → persist.

use bankfeed_core::{BookingStatus, RequisitionStatus, Session, Transaction};
use bankfeed_import::{decide, normalize, transaction_id, ActionTally};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use crate::aggregator::Aggregator;
use crate::directory::{AccountResolution, LinkSettings, SessionDirectory};
use crate::error::SyncError;
use crate::store::{SessionStore, TransactionStore};
use crate::token::TokenManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Decide every action but write nothing.
    pub dry_run: bool,
    pub max_concurrent_sessions: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_concurrent_sessions: 4,
        }
    }
}

/// Asks a running cycle to stop before its next session or account.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureScope {
    Session {
        requisition_id: String,
    },
    Account {
        requisition_id: String,
        account_id: String,
    },
    Transaction {
        requisition_id: String,
        account_id: String,
        transaction_id: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub scope: FailureScope,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSession {
    pub requisition_id: String,
    pub bank_name: String,
    pub status: RequisitionStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub sessions: usize,
    pub accounts: usize,
    pub tally: ActionTally,
    /// Entries that failed normalization.
    pub rejected: usize,
    pub skipped: Vec<SkippedSession>,
    pub failures: Vec<SyncFailure>,
    pub cancelled: bool,
    pub dry_run: bool,
}

impl SyncReport {
    fn merge(&mut self, other: SyncReport) {
        self.sessions += other.sessions;
        self.accounts += other.accounts;
        self.tally.merge(other.tally);
        self.rejected += other.rejected;
        self.skipped.extend(other.skipped);
        self.failures.extend(other.failures);
        self.cancelled |= other.cancelled;
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }
}

pub struct SyncOrchestrator<A, S> {
    tokens: Arc<TokenManager<A>>,
    store: Arc<S>,
    directory: SessionDirectory<A, S>,
    options: SyncOptions,
    stop: StopHandle,
}

impl<A, S> SyncOrchestrator<A, S>
where
    A: Aggregator,
    S: TransactionStore + SessionStore,
{
    pub fn new(
        tokens: Arc<TokenManager<A>>,
        store: Arc<S>,
        settings: LinkSettings,
        options: SyncOptions,
    ) -> Self {
        let directory = SessionDirectory::new(tokens.clone(), store.clone(), settings);
        Self {
            tokens,
            store,
            directory,
            options,
            stop: StopHandle::default(),
        }
    }

    pub fn directory(&self) -> &SessionDirectory<A, S> {
        &self.directory
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Best-effort pass over every known session. Only failing to list the
    /// sessions is an error; everything else lands in the report.
    pub async fn run_once(&self) -> Result<SyncReport, SyncError> {
        let sessions = self.directory.list_sessions().await?;
        info!(
            sessions = sessions.len(),
            dry_run = self.options.dry_run,
            "Sync cycle started"
        );

        let permits = Semaphore::new(self.options.max_concurrent_sessions.max(1));
        let reports = join_all(
            sessions
                .iter()
                .map(|session| self.sync_session_bounded(&permits, session)),
        )
        .await;

        let mut report = SyncReport {
            dry_run: self.options.dry_run,
            ..SyncReport::default()
        };
        for r in reports {
            report.merge(r);
        }

        info!(
            inserted = report.tally.inserted,
            updated = report.tally.updated,
            unchanged = report.tally.unchanged,
            rejected = report.rejected,
            skipped = report.skipped.len(),
            failures = report.failures.len(),
            cancelled = report.cancelled,
            token_refreshes = self.tokens.refresh_count(),
            "Sync cycle finished"
        );
        Ok(report)
    }

    async fn sync_session_bounded(&self, permits: &Semaphore, session: &Session) -> SyncReport {
        let _permit = match permits.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                return SyncReport {
                    failures: vec![SyncFailure {
                        scope: FailureScope::Session {
                            requisition_id: session.requisition_id.clone(),
                        },
                        reason: e.to_string(),
                    }],
                    ..SyncReport::default()
                }
            }
        };

        if self.stop.is_stopped() {
            return SyncReport {
                cancelled: true,
                ..SyncReport::default()
            };
        }
        self.sync_session(session).await
    }

    #[instrument(skip_all, fields(requisition_id = %session.requisition_id, bank = %session.bank_name))]
    async fn sync_session(&self, session: &Session) -> SyncReport {
        let mut report = SyncReport::default();

        let accounts = match self.directory.resolve_accounts(session).await {
            Ok(AccountResolution::Ready(accounts)) => accounts,
            Ok(AccountResolution::NotReady(status)) => {
                warn!(status = %status.code(), "Session not linked, skipping");
                report.skipped.push(SkippedSession {
                    requisition_id: session.requisition_id.clone(),
                    bank_name: session.bank_name.clone(),
                    status,
                });
                return report;
            }
            Err(e) => {
                error!(error = %e, transient = e.is_transient(), "Could not resolve accounts");
                report.failures.push(SyncFailure {
                    scope: FailureScope::Session {
                        requisition_id: session.requisition_id.clone(),
                    },
                    reason: e.to_string(),
                });
                return report;
            }
        };

        report.sessions = 1;
        for account_id in &accounts {
            if self.stop.is_stopped() {
                info!("Stop requested, leaving remaining accounts");
                report.cancelled = true;
                break;
            }
            report.accounts += 1;
            self.sync_account(session, account_id, &mut report).await;
        }
        report
    }

    #[instrument(skip_all, fields(account_id = %account_id))]
    async fn sync_account(&self, session: &Session, account_id: &str, report: &mut SyncReport) {
        let aggregator = self.tokens.aggregator();
        let raw = match self
            .tokens
            .call_authenticated(|access| async move {
                aggregator.get_transactions(&access, account_id).await
            })
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                error!(error = %e, transient = e.is_transient(), "Could not fetch transactions");
                report.failures.push(SyncFailure {
                    scope: FailureScope::Account {
                        requisition_id: session.requisition_id.clone(),
                        account_id: account_id.to_string(),
                    },
                    reason: e.to_string(),
                });
                return;
            }
        };

        let transaction_failure = |transaction_id: Option<&str>, reason: String| SyncFailure {
            scope: FailureScope::Transaction {
                requisition_id: session.requisition_id.clone(),
                account_id: account_id.to_string(),
                transaction_id: transaction_id.map(str::to_string),
            },
            reason,
        };

        // Dry runs stage their decisions here so repeated ids see earlier ones.
        let mut staged: HashMap<String, Transaction> = HashMap::new();

        let entries = raw
            .booked
            .iter()
            .map(|p| (p, BookingStatus::Booked))
            .chain(raw.pending.iter().map(|p| (p, BookingStatus::Pending)));

        for (payload, status) in entries {
            let incoming = match normalize(payload, &session.bank_name, account_id, status) {
                Ok(tx) => tx,
                Err(e) => {
                    let id = transaction_id(payload);
                    warn!(transaction_id = ?id, kind = e.kind(), error = %e, "Skipping transaction");
                    report.rejected += 1;
                    report.failures.push(transaction_failure(id, e.to_string()));
                    continue;
                }
            };

            let stored = match staged.get(&incoming.id) {
                Some(tx) => Some(tx.clone()),
                None => match self.store.find_by_id(&incoming.id).await {
                    Ok(found) => found,
                    Err(e) => {
                        error!(transaction_id = %incoming.id, error = %e, "Lookup failed");
                        report
                            .failures
                            .push(transaction_failure(Some(&incoming.id), e.to_string()));
                        continue;
                    }
                },
            };

            let id = incoming.id.clone();
            let action = match decide(incoming, stored.as_ref()) {
                Ok(action) => action,
                Err(e) => {
                    report.failures.push(transaction_failure(Some(&id), e.to_string()));
                    continue;
                }
            };

            if let Some(record) = action.record() {
                if self.options.dry_run {
                    staged.insert(record.id.clone(), record.clone());
                } else if let Err(e) = self.store.upsert(record).await {
                    error!(transaction_id = %id, error = %e, "Write failed");
                    report.failures.push(transaction_failure(Some(&id), e.to_string()));
                    continue;
                }
            }

            debug!(transaction_id = %id, action = action.kind(), "Reconciled");
            report.tally.record(&action);
        }
    }
}
