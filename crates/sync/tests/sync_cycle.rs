use bankfeed_core::{Classification, RequisitionStatus, Session};
use bankfeed_sync::{
    GoCardlessClient, LinkSettings, SessionStore, SqliteStore, SyncOptions, SyncOrchestrator,
    TokenManager,
};
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v2/token/new/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access": "a1",
            "access_expires": 86400,
            "refresh": "r1",
            "refresh_expires": 2592000
        })))
        .mount(server)
        .await;
}

async fn mount_linked_requisition(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/v2/requisitions/req-1/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "req-1",
            "status": "LN",
            "accounts": ["acc-1"],
            "link": "https://ob.example/start/req-1"
        })))
        .mount(server)
        .await;
}

async fn mount_transactions(server: &MockServer, booked: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path("/api/v2/accounts/acc-1/transactions/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "transactions": {"booked": booked, "pending": []}
        })))
        .mount(server)
        .await;
}

async fn orchestrator(
    server: &MockServer,
    store: Arc<SqliteStore>,
) -> SyncOrchestrator<GoCardlessClient, SqliteStore> {
    let client =
        GoCardlessClient::new(&server.uri(), "id", "key", Duration::from_secs(5)).unwrap();
    let tokens = TokenManager::connect(Arc::new(client), Duration::from_secs(5))
        .await
        .unwrap();
    SyncOrchestrator::new(
        Arc::new(tokens),
        store,
        LinkSettings {
            country: "GB".to_string(),
            redirect_uri: "http://localhost:3000".to_string(),
        },
        SyncOptions::default(),
    )
}

async fn store(dir: &tempfile::TempDir) -> Arc<SqliteStore> {
    let pool = bankfeed_storage::create_db(&dir.path().join("bankfeed.db"))
        .await
        .unwrap();
    let store = SqliteStore::new(pool);
    store.save_session(&Session::new("req-1", "monzo")).await.unwrap();
    Arc::new(store)
}

#[tokio::test]
async fn amended_description_updates_without_touching_classification() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_linked_requisition(&server).await;
    mount_transactions(
        &server,
        vec![json!({
            "transactionId": "tx1",
            "transactionAmount": {"amount": "-5.00", "currency": "GBP"},
            "bookingDate": "2024-01-01",
            "creditorName": "Shop"
        })],
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir).await;
    let sync = orchestrator(&server, store.clone()).await;

    let first = sync.run_once().await.unwrap();
    assert_eq!(first.tally.inserted, 1);

    let tx = bankfeed_storage::find_transaction(store.pool(), "tx1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.transaction_amount.currency.as_str(), "GBP");
    assert_eq!(tx.transaction_amount.amount, Decimal::new(-500, 2));
    assert_eq!(tx.short_name.as_deref(), Some("Shop"));
    assert_eq!(
        tx.transaction_datetime,
        Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    );
    assert_eq!(tx.classification, Classification::Unknown {});

    let periodic = Classification::periodic(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 6, 30, 0, 0, 0).unwrap(),
    )
    .unwrap();
    assert!(bankfeed_storage::apply_classification(store.pool(), "tx1", &periodic)
        .await
        .unwrap());

    server.reset().await;
    mount_linked_requisition(&server).await;
    mount_transactions(
        &server,
        vec![json!({
            "transactionId": "tx1",
            "transactionAmount": {"amount": "-5.00", "currency": "GBP"},
            "bookingDate": "2024-01-01",
            "remittanceInformationUnstructured": "Shop Ltd"
        })],
    )
    .await;

    let second = sync.run_once().await.unwrap();
    assert_eq!(second.tally.updated, 1);

    let tx = bankfeed_storage::find_transaction(store.pool(), "tx1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.id, "tx1");
    assert_eq!(tx.short_name.as_deref(), Some("Shop Ltd"));
    assert_eq!(tx.classification, periodic);

    let third = sync.run_once().await.unwrap();
    assert_eq!(third.tally.unchanged, 1);
    assert_eq!(
        bankfeed_storage::list_transactions(store.pool(), 10)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn rejected_access_token_is_refreshed_mid_cycle() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_linked_requisition(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v2/accounts/acc-1/transactions/"))
        .and(header("authorization", "Bearer a1"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "expired"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/token/refresh/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access": "a2", "access_expires": 86400})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/accounts/acc-1/transactions/"))
        .and(header("authorization", "Bearer a2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "transactions": {
                "booked": [],
                "pending": [{
                    "transactionId": "tx7",
                    "transactionAmount": {"amount": "-12.00", "currency": "EUR"},
                    "valueDate": "2024-02-03",
                    "debtorName": "Landlord"
                }]
            }
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir).await;
    let sync = orchestrator(&server, store.clone()).await;

    let report = sync.run_once().await.unwrap();
    assert!(report.is_clean(), "{:?}", report.failures);
    assert_eq!(report.tally.inserted, 1);

    let sessions = store.list_sessions().await.unwrap();
    assert_eq!(sessions[0].status, RequisitionStatus::Linked);

    let tx = bankfeed_storage::find_transaction(store.pool(), "tx7")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.short_name.as_deref(), Some("Landlord"));
}
