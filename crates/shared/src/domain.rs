use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque user identifier as issued by the account service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgreementId(pub i64);

impl fmt::Display for AgreementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Closed set of message kinds on the wire. Anything the server sends that we
/// do not recognize is carried as `Unknown` rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Text,
    Image,
    Form,
    #[serde(other)]
    Unknown,
}

impl MessageType {
    /// Tie-break weight when two messages carry the same timestamp.
    /// Lower weights sort first.
    pub fn weight(self) -> u8 {
        match self {
            MessageType::Unknown => 0,
            MessageType::Text => 1,
            MessageType::Image => 2,
            MessageType::Form => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgreementStatus {
    Pending,
    Accepted,
    Rejected,
}

impl AgreementStatus {
    /// Accepted and Rejected are terminal; only Pending may transition.
    pub fn is_terminal(self) -> bool {
        !matches!(self, AgreementStatus::Pending)
    }
}

/// The two legal resolutions of a pending agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgreementDecision {
    Accepted,
    Rejected,
}

impl AgreementDecision {
    pub fn as_status(self) -> AgreementStatus {
        match self {
            AgreementDecision::Accepted => AgreementStatus::Accepted,
            AgreementDecision::Rejected => AgreementStatus::Rejected,
        }
    }
}
