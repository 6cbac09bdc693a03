use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Requisition lifecycle as reported by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum RequisitionStatus {
    Created,
    GivingConsent,
    UndergoingAuthentication,
    SelectingAccounts,
    GrantingAccess,
    Linked,
    Rejected,
    Suspended,
    Expired,
    Other(String),
}

impl RequisitionStatus {
    pub fn from_code(code: &str) -> Self {
        match code {
            "CR" => RequisitionStatus::Created,
            "GC" => RequisitionStatus::GivingConsent,
            "UA" => RequisitionStatus::UndergoingAuthentication,
            "SA" => RequisitionStatus::SelectingAccounts,
            "GA" => RequisitionStatus::GrantingAccess,
            "LN" => RequisitionStatus::Linked,
            "RJ" => RequisitionStatus::Rejected,
            "SU" => RequisitionStatus::Suspended,
            "EX" => RequisitionStatus::Expired,
            other => RequisitionStatus::Other(other.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            RequisitionStatus::Created => "CR",
            RequisitionStatus::GivingConsent => "GC",
            RequisitionStatus::UndergoingAuthentication => "UA",
            RequisitionStatus::SelectingAccounts => "SA",
            RequisitionStatus::GrantingAccess => "GA",
            RequisitionStatus::Linked => "LN",
            RequisitionStatus::Rejected => "RJ",
            RequisitionStatus::Suspended => "SU",
            RequisitionStatus::Expired => "EX",
            RequisitionStatus::Other(code) => code,
        }
    }

    pub fn is_linked(&self) -> bool {
        matches!(self, RequisitionStatus::Linked)
    }

    /// Still waiting on the account holder to finish consent.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            RequisitionStatus::Created
                | RequisitionStatus::GivingConsent
                | RequisitionStatus::UndergoingAuthentication
                | RequisitionStatus::SelectingAccounts
                | RequisitionStatus::GrantingAccess
        )
    }
}

impl From<String> for RequisitionStatus {
    fn from(code: String) -> Self {
        RequisitionStatus::from_code(&code)
    }
}

impl From<RequisitionStatus> for String {
    fn from(status: RequisitionStatus) -> Self {
        status.code().to_string()
    }
}

impl fmt::Display for RequisitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A linked (or linking) bank session. One per requisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub requisition_id: String,
    pub bank_name: String,
    pub status: RequisitionStatus,
}

impl Session {
    pub fn new(requisition_id: &str, bank_name: &str) -> Self {
        Session {
            requisition_id: requisition_id.to_string(),
            bank_name: bank_name.to_string(),
            status: RequisitionStatus::Created,
        }
    }
}

/// Access/refresh credential pair. Replaced wholesale on refresh.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires: Option<DateTime<Utc>>,
}

impl Token {
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        self.access_expires.is_some_and(|exp| now >= exp)
    }
}

// Never print credentials.
impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("access_expires", &self.access_expires)
            .finish()
    }
}
