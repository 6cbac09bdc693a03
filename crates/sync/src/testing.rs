//! In-memory aggregator and store used by the unit tests.

use async_trait::async_trait;
use bankfeed_core::{
    Amount, BookingStatus, Classification, RequisitionStatus, Session, Token, Transaction,
};
use bankfeed_storage::StorageError;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::aggregator::{Aggregator, InitializedSession, RawTransactions, Requisition};
use crate::error::UpstreamError;
use crate::orchestrator::StopHandle;
use crate::store::{SessionStore, TransactionStore};

pub fn token(access: &str) -> Token {
    Token {
        access_token: access.to_string(),
        refresh_token: "refresh-0".to_string(),
        access_expires: None,
    }
}

pub fn sample_transaction(id: &str, short_name: &str) -> Transaction {
    Transaction {
        id: id.to_string(),
        bank: "monzo".to_string(),
        account_id: "acc-1".to_string(),
        entry_reference: None,
        transaction_datetime: Some(Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()),
        transaction_amount: Amount::new("GBP".parse().unwrap(), Decimal::new(-450, 2)),
        currency_conversion: None,
        short_name: Some(short_name.to_string()),
        status: BookingStatus::Booked,
        classification: Classification::default(),
    }
}

#[derive(Default)]
struct FakeState {
    accepted: Option<String>,
    refresh_fixes_auth: bool,
    refresh_rejected: bool,
    issued: usize,
    exchange_calls: usize,
    generate_calls: usize,
    institutions: HashMap<String, String>,
    requisitions: HashMap<String, Requisition>,
    created: Vec<(String, String)>,
    transactions: HashMap<String, RawTransactions>,
    failing_accounts: HashMap<String, u16>,
    unauthorized_accounts: HashSet<String>,
    stop_on_fetch: Option<StopHandle>,
}

/// Scriptable aggregator. Accepts exactly one access token at a time.
pub struct FakeAggregator {
    state: Mutex<FakeState>,
}

impl FakeAggregator {
    pub fn new(access: &str) -> Self {
        Self {
            state: Mutex::new(FakeState {
                accepted: Some(access.to_string()),
                refresh_fixes_auth: true,
                ..FakeState::default()
            }),
        }
    }

    /// The currently accepted access token stops working.
    pub fn revoke_access(&self) {
        self.state.lock().unwrap().accepted = None;
    }

    /// When false, newly issued tokens are still rejected.
    pub fn set_refresh_fixes_auth(&self, fixes: bool) {
        self.state.lock().unwrap().refresh_fixes_auth = fixes;
    }

    pub fn set_refresh_rejected(&self, rejected: bool) {
        self.state.lock().unwrap().refresh_rejected = rejected;
    }

    pub fn exchange_calls(&self) -> usize {
        self.state.lock().unwrap().exchange_calls
    }

    pub fn generate_calls(&self) -> usize {
        self.state.lock().unwrap().generate_calls
    }

    pub fn add_institution(&self, name: &str, id: &str) {
        self.state
            .lock()
            .unwrap()
            .institutions
            .insert(name.to_lowercase(), id.to_string());
    }

    pub fn set_requisition(&self, id: &str, status: RequisitionStatus, accounts: &[&str]) {
        self.state.lock().unwrap().requisitions.insert(
            id.to_string(),
            Requisition {
                status,
                accounts: accounts.iter().map(|a| a.to_string()).collect(),
            },
        );
    }

    pub fn set_transactions(&self, account_id: &str, booked: Vec<Value>, pending: Vec<Value>) {
        self.state
            .lock()
            .unwrap()
            .transactions
            .insert(account_id.to_string(), RawTransactions { booked, pending });
    }

    pub fn fail_account(&self, account_id: &str, status: u16) {
        self.state
            .lock()
            .unwrap()
            .failing_accounts
            .insert(account_id.to_string(), status);
    }

    /// Fetches for this account are rejected regardless of the token.
    pub fn reject_account(&self, account_id: &str) {
        self.state
            .lock()
            .unwrap()
            .unauthorized_accounts
            .insert(account_id.to_string());
    }

    /// The first transaction fetch raises `stop`, as an interrupt mid-cycle would.
    pub fn stop_on_fetch(&self, stop: StopHandle) {
        self.state.lock().unwrap().stop_on_fetch = Some(stop);
    }

    /// `(institution_id, reference_id)` for every session initialized.
    pub fn created_sessions(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().created.clone()
    }

    fn authorize(&self, access: &str) -> Result<(), UpstreamError> {
        match &self.state.lock().unwrap().accepted {
            Some(accepted) if accepted == access => Ok(()),
            _ => Err(UpstreamError::Unauthorized),
        }
    }

    fn issue(state: &mut FakeState, prefix: &str) -> Token {
        state.issued += 1;
        let access = format!("{prefix}-{}", state.issued);
        if state.refresh_fixes_auth {
            state.accepted = Some(access.clone());
        }
        Token {
            access_token: access,
            refresh_token: format!("refresh-{}", state.issued),
            access_expires: None,
        }
    }
}

#[async_trait]
impl Aggregator for FakeAggregator {
    async fn generate_token(&self) -> Result<Token, UpstreamError> {
        let mut state = self.state.lock().unwrap();
        state.generate_calls += 1;
        Ok(Self::issue(&mut state, "access-gen"))
    }

    async fn exchange_token(&self, _refresh_token: &str) -> Result<Token, UpstreamError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        state.exchange_calls += 1;
        if state.refresh_rejected {
            return Err(UpstreamError::Unauthorized);
        }
        Ok(Self::issue(&mut state, "access"))
    }

    async fn resolve_institution(
        &self,
        access: &str,
        country: &str,
        name: &str,
    ) -> Result<String, UpstreamError> {
        self.authorize(access)?;
        self.state
            .lock()
            .unwrap()
            .institutions
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| UpstreamError::InstitutionNotFound {
                country: country.to_string(),
                name: name.to_string(),
            })
    }

    async fn initialize_session(
        &self,
        access: &str,
        institution_id: &str,
        _redirect_uri: &str,
        reference_id: &str,
    ) -> Result<InitializedSession, UpstreamError> {
        self.authorize(access)?;
        let mut state = self.state.lock().unwrap();
        state
            .created
            .push((institution_id.to_string(), reference_id.to_string()));
        let requisition_id = format!("req-{}", state.created.len());
        state.requisitions.insert(
            requisition_id.clone(),
            Requisition {
                status: RequisitionStatus::Created,
                accounts: Vec::new(),
            },
        );
        Ok(InitializedSession {
            link: format!("https://ob.example/start/{requisition_id}"),
            requisition_id,
        })
    }

    async fn get_requisition(
        &self,
        access: &str,
        requisition_id: &str,
    ) -> Result<Requisition, UpstreamError> {
        tokio::task::yield_now().await;
        self.authorize(access)?;
        self.state
            .lock()
            .unwrap()
            .requisitions
            .get(requisition_id)
            .cloned()
            .ok_or_else(|| UpstreamError::Http {
                status: 404,
                body: format!("requisition {requisition_id} not found"),
            })
    }

    async fn get_transactions(
        &self,
        access: &str,
        account_id: &str,
    ) -> Result<RawTransactions, UpstreamError> {
        tokio::task::yield_now().await;
        self.authorize(access)?;
        let mut state = self.state.lock().unwrap();
        if let Some(stop) = state.stop_on_fetch.take() {
            stop.stop();
        }
        if state.unauthorized_accounts.contains(account_id) {
            return Err(UpstreamError::Unauthorized);
        }
        if let Some(status) = state.failing_accounts.get(account_id) {
            return Err(UpstreamError::Http {
                status: *status,
                body: "account unavailable".to_string(),
            });
        }
        Ok(state.transactions.get(account_id).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
struct MemoryState {
    transactions: HashMap<String, Transaction>,
    sessions: Vec<Session>,
    upserts: usize,
    failing_upserts: HashSet<String>,
}

/// Store kept in a map; counts writes.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Transaction> {
        self.state.lock().unwrap().transactions.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().transactions.len()
    }

    pub fn upserts(&self) -> usize {
        self.state.lock().unwrap().upserts
    }

    pub fn classify(&self, id: &str, classification: Classification) {
        if let Some(tx) = self.state.lock().unwrap().transactions.get_mut(id) {
            tx.classification = classification;
        }
    }

    pub fn fail_upsert(&self, id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_upserts
            .insert(id.to_string());
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Transaction>, StorageError> {
        Ok(self.get(id))
    }

    async fn upsert(&self, transaction: &Transaction) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_upserts.contains(&transaction.id) {
            return Err(StorageError::Corrupt {
                id: transaction.id.clone(),
                detail: "write refused".to_string(),
            });
        }
        state.upserts += 1;
        let classification = state
            .transactions
            .get(&transaction.id)
            .map(|t| t.classification)
            .unwrap_or(transaction.classification);
        let mut stored = transaction.clone();
        stored.classification = classification;
        state.transactions.insert(stored.id.clone(), stored);
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn save_session(&self, session: &Session) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        state
            .sessions
            .retain(|s| s.requisition_id != session.requisition_id);
        state.sessions.push(session.clone());
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, StorageError> {
        Ok(self.state.lock().unwrap().sessions.clone())
    }

    async fn set_session_status(
        &self,
        requisition_id: &str,
        status: &RequisitionStatus,
    ) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        if let Some(s) = state
            .sessions
            .iter_mut()
            .find(|s| s.requisition_id == requisition_id)
        {
            s.status = status.clone();
        }
        Ok(())
    }
}
