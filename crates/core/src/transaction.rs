use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::money::{Amount, CurrencyConversion};

/// User- or engine-assigned classification. Never written by the sync path.
///
/// Serializes as a single-key object, e.g. `{"OneOff":{}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Unknown {},
    OneOff {},
    Periodic {
        from_date: DateTime<Utc>,
        to_date: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassificationError {
    #[error("Periodic range is inverted: {from} is after {to}")]
    InvertedRange {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
}

impl Default for Classification {
    fn default() -> Self {
        Classification::Unknown {}
    }
}

impl Classification {
    pub fn periodic(
        from_date: DateTime<Utc>,
        to_date: DateTime<Utc>,
    ) -> Result<Self, ClassificationError> {
        if from_date > to_date {
            return Err(ClassificationError::InvertedRange {
                from: from_date,
                to: to_date,
            });
        }
        Ok(Classification::Periodic { from_date, to_date })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Classification::Unknown {} => "Unknown",
            Classification::OneOff {} => "OneOff",
            Classification::Periodic { .. } => "Periodic",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Unknown {} | Classification::OneOff {} => f.write_str(self.name()),
            Classification::Periodic { from_date, to_date } => write!(
                f,
                "Periodic({} to {})",
                from_date.format("%Y-%m-%d"),
                to_date.format("%Y-%m-%d")
            ),
        }
    }
}

/// Which upstream list an entry was reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Booked,
    Pending,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Booked => "booked",
            BookingStatus::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "booked" => Some(BookingStatus::Booked),
            "pending" => Some(BookingStatus::Pending),
            _ => None,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub bank: String,
    pub account_id: String,
    pub entry_reference: Option<String>,
    pub transaction_datetime: Option<DateTime<Utc>>,
    pub transaction_amount: Amount,
    pub currency_conversion: Option<CurrencyConversion>,
    pub short_name: Option<String>,
    pub status: BookingStatus,
    pub classification: Classification,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("Transaction ids do not match: stored={stored}, incoming={incoming}")]
    IdMismatch { stored: String, incoming: String },
}

impl Transaction {
    /// Returns `stored` with every upstream-derived field taken from `incoming`.
    /// `id`, `bank`, `account_id` and `classification` stay as stored.
    pub fn merge_incoming(&self, incoming: &Transaction) -> Result<Transaction, MergeError> {
        if self.id != incoming.id {
            return Err(MergeError::IdMismatch {
                stored: self.id.clone(),
                incoming: incoming.id.clone(),
            });
        }

        Ok(Transaction {
            entry_reference: incoming.entry_reference.clone(),
            transaction_datetime: incoming.transaction_datetime,
            transaction_amount: incoming.transaction_amount,
            currency_conversion: incoming.currency_conversion,
            short_name: incoming.short_name.clone(),
            status: incoming.status,
            ..self.clone()
        })
    }

    /// Field-for-field equality over normalized data, ignoring `classification`.
    pub fn same_data(&self, other: &Transaction) -> bool {
        self.id == other.id
            && self.bank == other.bank
            && self.account_id == other.account_id
            && self.entry_reference == other.entry_reference
            && self.transaction_datetime == other.transaction_datetime
            && self.transaction_amount == other.transaction_amount
            && self.currency_conversion == other.currency_conversion
            && self.short_name == other.short_name
            && self.status == other.status
    }
}
