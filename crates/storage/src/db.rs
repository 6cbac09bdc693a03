use bankfeed_core::{
    Amount, BookingStatus, Classification, Currency, CurrencyConversion, RequisitionStatus,
    Session, Transaction,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Sqlite,
};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Corrupt row for {id}: {detail}")]
    Corrupt { id: String, detail: String },
}

pub async fn create_db(path: &Path) -> Result<DbPool, StorageError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            bank TEXT NOT NULL,
            account_id TEXT NOT NULL,
            entry_reference TEXT,
            transaction_datetime TEXT,
            currency TEXT NOT NULL,
            amount TEXT NOT NULL,
            conversion_from TEXT,
            conversion_to TEXT,
            conversion_rate TEXT,
            short_name TEXT,
            status TEXT NOT NULL,
            classification TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            requisition_id TEXT PRIMARY KEY,
            bank_name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'CR',
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

// ── Transactions ─────────────────────────────────────────────────────────────

type TransactionRow = (
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    String,
);

const TRANSACTION_COLUMNS: &str = "id, bank, account_id, entry_reference, transaction_datetime, \
     currency, amount, conversion_from, conversion_to, conversion_rate, short_name, status, \
     classification";

pub async fn find_transaction(pool: &DbPool, id: &str) -> Result<Option<Transaction>, StorageError> {
    let row = sqlx::query_as::<_, TransactionRow>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(transaction_from_row).transpose()
}

pub async fn list_transactions(pool: &DbPool, limit: i64) -> Result<Vec<Transaction>, StorageError> {
    let rows = sqlx::query_as::<_, TransactionRow>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions \
         ORDER BY transaction_datetime DESC, id LIMIT ?"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(transaction_from_row).collect()
}

/// Atomic per id. On conflict only upstream-derived columns are rewritten;
/// `classification` is left as stored.
pub async fn upsert_transaction(pool: &DbPool, tx: &Transaction) -> Result<(), StorageError> {
    let classification = serde_json::to_string(&tx.classification).map_err(|e| {
        StorageError::Corrupt {
            id: tx.id.clone(),
            detail: e.to_string(),
        }
    })?;
    let conversion = tx.currency_conversion.as_ref();

    sqlx::query(
        r#"
        INSERT INTO transactions (
            id, bank, account_id, entry_reference, transaction_datetime, currency, amount,
            conversion_from, conversion_to, conversion_rate, short_name, status, classification
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            entry_reference = excluded.entry_reference,
            transaction_datetime = excluded.transaction_datetime,
            currency = excluded.currency,
            amount = excluded.amount,
            conversion_from = excluded.conversion_from,
            conversion_to = excluded.conversion_to,
            conversion_rate = excluded.conversion_rate,
            short_name = excluded.short_name,
            status = excluded.status,
            updated_at = datetime('now')
        "#,
    )
    .bind(&tx.id)
    .bind(&tx.bank)
    .bind(&tx.account_id)
    .bind(tx.entry_reference.as_deref())
    .bind(tx.transaction_datetime.map(format_datetime))
    .bind(tx.transaction_amount.currency.as_str())
    .bind(tx.transaction_amount.amount.to_string())
    .bind(conversion.map(|c| c.from_currency.to_string()))
    .bind(conversion.map(|c| c.to_currency.to_string()))
    .bind(conversion.map(|c| c.rate.to_string()))
    .bind(tx.short_name.as_deref())
    .bind(tx.status.as_str())
    .bind(classification)
    .execute(pool)
    .await?;

    Ok(())
}

/// Tagging entry point: touches nothing but `classification`.
/// Returns `false` when no transaction has this id.
pub async fn apply_classification(
    pool: &DbPool,
    id: &str,
    classification: &Classification,
) -> Result<bool, StorageError> {
    let encoded = serde_json::to_string(classification).map_err(|e| StorageError::Corrupt {
        id: id.to_string(),
        detail: e.to_string(),
    })?;

    let result = sqlx::query(
        "UPDATE transactions SET classification = ?, updated_at = datetime('now') WHERE id = ?",
    )
    .bind(encoded)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Fixed nanosecond precision keeps the TEXT column sortable.
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn transaction_from_row(r: TransactionRow) -> Result<Transaction, StorageError> {
    let id = r.0;
    let corrupt = |detail: String| StorageError::Corrupt {
        id: id.clone(),
        detail,
    };

    let transaction_datetime = r
        .4
        .as_deref()
        .map(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| corrupt(format!("transaction_datetime '{s}': {e}")))
        })
        .transpose()?;

    let currency = Currency::from_str(&r.5).map_err(|e| corrupt(e.to_string()))?;
    let amount = Decimal::from_str(&r.6).map_err(|e| corrupt(format!("amount '{}': {e}", r.6)))?;

    let currency_conversion = match (r.7, r.8, r.9) {
        (Some(from), Some(to), Some(rate)) => Some(CurrencyConversion {
            from_currency: Currency::from_str(&from).map_err(|e| corrupt(e.to_string()))?,
            to_currency: Currency::from_str(&to).map_err(|e| corrupt(e.to_string()))?,
            rate: Decimal::from_str(&rate).map_err(|e| corrupt(format!("rate '{rate}': {e}")))?,
        }),
        (None, None, None) => None,
        _ => return Err(corrupt("partial currency conversion".to_string())),
    };

    let status = BookingStatus::parse(&r.11).ok_or_else(|| corrupt(format!("status '{}'", r.11)))?;
    let classification: Classification = serde_json::from_str(&r.12)
        .map_err(|e| corrupt(format!("classification '{}': {e}", r.12)))?;

    Ok(Transaction {
        id,
        bank: r.1,
        account_id: r.2,
        entry_reference: r.3,
        transaction_datetime,
        transaction_amount: Amount::new(currency, amount),
        currency_conversion,
        short_name: r.10,
        status,
        classification,
    })
}

// ── Sessions ─────────────────────────────────────────────────────────────────

pub async fn save_session(pool: &DbPool, session: &Session) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        INSERT INTO sessions (requisition_id, bank_name, status) VALUES (?, ?, ?)
        ON CONFLICT(requisition_id) DO UPDATE SET
            bank_name = excluded.bank_name,
            updated_at = datetime('now')
        "#,
    )
    .bind(&session.requisition_id)
    .bind(&session.bank_name)
    .bind(session.status.code())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn list_sessions(pool: &DbPool) -> Result<Vec<Session>, StorageError> {
    let rows = sqlx::query_as::<_, (String, String, String)>(
        "SELECT requisition_id, bank_name, status FROM sessions ORDER BY created_at, requisition_id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| Session {
            requisition_id: r.0,
            bank_name: r.1,
            status: RequisitionStatus::from_code(&r.2),
        })
        .collect())
}

pub async fn set_session_status(
    pool: &DbPool,
    requisition_id: &str,
    status: &RequisitionStatus,
) -> Result<(), StorageError> {
    sqlx::query(
        "UPDATE sessions SET status = ?, updated_at = datetime('now') WHERE requisition_id = ?",
    )
    .bind(status.code())
    .bind(requisition_id)
    .execute(pool)
    .await?;

    Ok(())
}
