//! Error taxonomy shared by the lifecycle manager, registry and conversation
//!
//! Collaborator errors (`LedgerError`, `MessengerError`) are folded into
//! `BrokerError` so that every failure reaching a principal has exactly one
//! classification.

use crate::runtime::{LedgerError, MessengerError};
use crate::session::SessionError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification used for retry decisions and session recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Authorization,
    Conflict,
    ExternalUnavailable,
    NotFound,
}

impl ErrorKind {
    /// The subject of a flow is gone or was changed by someone else, so the
    /// step cannot be repeated. Everything else leaves the step usable.
    pub fn ends_flow(self) -> bool {
        matches!(self, ErrorKind::Conflict | ErrorKind::NotFound)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("not allowed: {0}")]
    Authorization(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("service unavailable: {0}")]
    ExternalUnavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
}

pub type BrokerResult<T> = Result<T, BrokerError>;

impl BrokerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::Authorization(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::ExternalUnavailable(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BrokerError::Validation(_) => ErrorKind::Validation,
            BrokerError::Authorization(_) => ErrorKind::Authorization,
            BrokerError::Conflict(_) => ErrorKind::Conflict,
            BrokerError::ExternalUnavailable(_) => ErrorKind::ExternalUnavailable,
            BrokerError::NotFound(_) => ErrorKind::NotFound,
        }
    }

    /// Text shown to the principal
    pub fn user_message(&self) -> String {
        match self {
            BrokerError::Validation(msg) => format!("❌ {msg}"),
            BrokerError::Authorization(msg) => format!("⛔ {msg}"),
            BrokerError::Conflict(msg) => format!("⚠️ {msg}"),
            BrokerError::ExternalUnavailable(_) => {
                "⚠️ The service is temporarily unavailable. Please try again in a moment."
                    .to_string()
            }
            BrokerError::NotFound(msg) => format!("🔍 {msg}"),
        }
    }
}

impl From<SessionError> for BrokerError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Conflict { .. } => BrokerError::conflict(e.to_string()),
            SessionError::Unavailable(what) => BrokerError::unavailable(what),
        }
    }
}

impl From<LedgerError> for BrokerError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::NotFound(what) => BrokerError::NotFound(what),
            LedgerError::Conflict(what) => BrokerError::Conflict(what),
            LedgerError::Duplicate(what) => BrokerError::Conflict(what),
            LedgerError::Unavailable(what) => BrokerError::ExternalUnavailable(what),
        }
    }
}

impl From<MessengerError> for BrokerError {
    fn from(e: MessengerError) -> Self {
        match e {
            MessengerError::Rejected(what) => BrokerError::Validation(what),
            MessengerError::Unavailable(what) => BrokerError::ExternalUnavailable(what),
        }
    }
}
