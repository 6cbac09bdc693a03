//! Normalization of one aggregator transaction object into a [`Transaction`].
//!
//! The payload is the bank-specific JSON the aggregator relays, e.g.
//!
//! ```json
//! {
//!   "transactionId": "tx1",
//!   "bookingDate": "2024-01-01",
//!   "transactionAmount": {"amount": "-5.00", "currency": "GBP"},
//!   "creditorName": "Shop"
//! }
//! ```

use bankfeed_core::{
    Amount, BookingStatus, Classification, Currency, CurrencyConversion, InvalidCurrency,
    Transaction,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;

use crate::util::{first_present, non_empty_str};

/// Date fields in resolution order.
pub const DATETIME_WATERFALL: &[&str] =
    &["valueDateTime", "bookingDateTime", "valueDate", "bookingDate"];

/// Label fields in resolution order.
pub const SHORT_NAME_WATERFALL: &[&str] = &[
    "creditorName",
    "debtorName",
    "remittanceInformationUnstructured",
    "additionalInformation",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("Missing transaction id")]
    MissingId,
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error(transparent)]
    InvalidCurrency(#[from] InvalidCurrency),
}

impl NormalizationError {
    pub fn kind(&self) -> &'static str {
        match self {
            NormalizationError::MissingId => "missing_id",
            NormalizationError::InvalidAmount(_) => "invalid_amount",
            NormalizationError::InvalidCurrency(_) => "invalid_currency",
        }
    }
}

/// Upstream transaction id exactly as sent. Blank ids count as missing.
pub fn transaction_id(payload: &Value) -> Option<&str> {
    payload
        .get("transactionId")
        .and_then(Value::as_str)
        .filter(|id| !id.trim().is_empty())
}

pub fn normalize(
    payload: &Value,
    bank: &str,
    account_id: &str,
    status: BookingStatus,
) -> Result<Transaction, NormalizationError> {
    let id = transaction_id(payload).ok_or(NormalizationError::MissingId)?;

    let transaction_amount = parse_amount_block(payload.get("transactionAmount"))?;

    let currency_conversion = match exchange_block(payload) {
        Some(block) => Some(parse_exchange_block(block, transaction_amount.currency)?),
        None => None,
    };

    let short_name = first_present(
        SHORT_NAME_WATERFALL
            .iter()
            .map(|key| non_empty_str(payload, key)),
    )
    .map(str::to_string);

    // Lenient: the first populated date field decides, and an unparsable value
    // leaves the timestamp empty rather than rejecting the entry.
    let transaction_datetime = first_present(
        DATETIME_WATERFALL
            .iter()
            .map(|key| non_empty_str(payload, key)),
    )
    .and_then(parse_datetime);

    Ok(Transaction {
        id: id.to_string(),
        bank: bank.to_string(),
        account_id: account_id.to_string(),
        entry_reference: non_empty_str(payload, "entryReference").map(str::to_string),
        transaction_datetime,
        transaction_amount,
        currency_conversion,
        short_name,
        status,
        classification: Classification::default(),
    })
}

fn parse_amount_block(block: Option<&Value>) -> Result<Amount, NormalizationError> {
    let block = block
        .filter(|b| b.is_object())
        .ok_or_else(|| NormalizationError::InvalidAmount("missing transactionAmount".to_string()))?;

    let raw = block.get("amount").unwrap_or(&Value::Null);
    let amount = parse_decimal(raw)
        .ok_or_else(|| NormalizationError::InvalidAmount(raw.to_string()))?;

    let currency = parse_currency(block.get("currency"))?;
    Ok(Amount::new(currency, amount))
}

/// The exchange object, if any. Some institutions send a one-element list
/// instead of an object; null, `[]` and `{}` all mean no conversion.
fn exchange_block(payload: &Value) -> Option<&Value> {
    let block = match payload.get("currencyExchange")? {
        Value::Array(items) => items.first()?,
        other => other,
    };
    match block {
        Value::Null => None,
        Value::Object(fields) if fields.is_empty() => None,
        other => Some(other),
    }
}

fn parse_exchange_block(
    block: &Value,
    to_currency: Currency,
) -> Result<CurrencyConversion, NormalizationError> {
    let from_currency = parse_currency(block.get("sourceCurrency"))?;
    let raw_rate = block.get("exchangeRate").unwrap_or(&Value::Null);
    let rate = parse_decimal(raw_rate)
        .ok_or_else(|| NormalizationError::InvalidAmount(format!("exchange rate {raw_rate}")))?;

    Ok(CurrencyConversion {
        from_currency,
        to_currency,
        rate,
    })
}

fn parse_currency(value: Option<&Value>) -> Result<Currency, NormalizationError> {
    let code = value.and_then(Value::as_str).unwrap_or_default();
    Ok(Currency::from_str(code)?)
}

/// Amounts arrive as strings ("-5.4000") from most banks, as numbers from a few.
fn parse_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            Decimal::from_str(s)
                .or_else(|_| Decimal::from_scientific(s))
                .ok()
        }
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        _ => None,
    }
}

/// Accepts RFC 3339, offset-less ISO datetimes (with or without seconds), and
/// plain dates. Offset-less values are taken as UTC; plain dates as midnight UTC.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%dT%H:%M%:z", "%Y-%m-%dT%H:%M%z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    let naive = s.strip_suffix('Z').unwrap_or(s);
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Some(dt.and_utc());
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
